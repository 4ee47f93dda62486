//! End-to-end tests of the request/response, waveform, and download
//! engines against a scripted in-memory port.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;
use std::time::Duration;

use shouterlib::download::{frame_count, Corruption, Downloader, RETRIES};
use shouterlib::protocol::options::{Fault, Opt16, OptVar, VAR_TYPE_STRING};
use shouterlib::protocol::{crc, framing, Status, ACK, BOOT_START, NACK};
use shouterlib::{Client, Error};

/// A port that replays one canned response per read call and records
/// everything written to it.
struct MockPort {
    responses: VecDeque<Vec<u8>>,
    written: Vec<u8>,
}

impl MockPort {
    fn new(responses: Vec<Vec<u8>>) -> Self {
        Self {
            responses: responses.into(),
            written: Vec::new(),
        }
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.responses.pop_front() {
            Some(response) => {
                buf[..response.len()].copy_from_slice(&response);
                Ok(response.len())
            }
            None => Err(ErrorKind::TimedOut.into()),
        }
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn frame(payload: &[u8]) -> Vec<u8> {
    let mut payload = payload.to_vec();
    crc::append(&mut payload);
    framing::stuff(&payload)
}

/// Build a device response frame carrying 16-bit and variable values.
fn response(u16s: &[(u8, u16)], vars: &[(u8, &[u8])], to_follow: u8) -> Vec<u8> {
    let mask_for = |ids: &[u8]| -> Vec<u8> {
        match ids.iter().copied().max() {
            None => Vec::new(),
            Some(max) => {
                let mut mask = vec![0u8; max as usize / 8 + 1];
                for &id in ids {
                    mask[id as usize / 8] |= 1 << (id % 8);
                }
                mask
            }
        }
    };
    let mask16 = mask_for(&u16s.iter().map(|&(id, _)| id).collect::<Vec<_>>());
    let maskv = mask_for(&vars.iter().map(|&(id, _)| id).collect::<Vec<_>>());

    let mut payload = vec![mask16.len() as u8, 0, maskv.len() as u8];
    payload.extend_from_slice(&mask16);
    payload.extend_from_slice(&maskv);
    payload.push(to_follow);
    payload.push(0);
    for &(_, value) in u16s {
        payload.extend_from_slice(&value.to_be_bytes());
    }
    for &(_, data) in vars {
        payload.push(VAR_TYPE_STRING);
        payload.push(data.len() as u8);
        payload.extend_from_slice(data);
    }
    frame(&payload)
}

fn command_response(status: u8) -> Vec<u8> {
    frame(&[0, 0, 0, status])
}

#[test]
fn request_returns_values_in_request_order() {
    // device answers in ascending id order; the caller asked the other
    // way around
    let port = MockPort::new(vec![response(
        &[(Opt16::Voltage.id(), 300), (Opt16::PulseWidth.id(), 80)],
        &[],
        0,
    )]);
    let mut client = Client::new(port).with_response_ticks(5);

    let values = client
        .request_u16(&[Opt16::PulseWidth, Opt16::Voltage])
        .unwrap();
    assert_eq!(values, vec![80, 300]);
    assert_eq!(client.tables().get_u16(Opt16::Voltage), 300);
}

#[test]
fn command_returns_status_byte() {
    let port = MockPort::new(vec![command_response(ACK)]);
    let mut client = Client::new(port).with_response_ticks(5);
    assert_eq!(client.disarm().unwrap(), Status::Ack);
}

#[test]
fn faults_decode_names() {
    let port = MockPort::new(vec![response(
        &[(Opt16::FaultActive.id(), 0x0005)],
        &[],
        0,
    )]);
    let mut client = Client::new(port).with_response_ticks(5);
    assert_eq!(
        client.faults(false).unwrap(),
        vec![Fault::Probe, Fault::PanelOpen]
    );
}

#[test]
fn arm_surfaces_hardware_fault() {
    let port = MockPort::new(vec![
        command_response(ACK),
        response(&[(Opt16::FaultActive.id(), 0x0001)], &[], 0),
    ]);
    let mut client = Client::new(port).with_response_ticks(5);
    match client.arm() {
        Err(Error::HardwareFault(faults)) => assert_eq!(faults, vec![Fault::Probe]),
        other => panic!("expected hardware fault, got {:?}", other),
    }
}

#[test]
fn state_is_opaque_passthrough() {
    let port = MockPort::new(vec![response(
        &[],
        &[(OptVar::CurrentState.id(), b"disarmed")],
        0,
    )]);
    let mut client = Client::new(port).with_response_ticks(5);
    assert_eq!(client.state().unwrap(), "disarmed");
}

#[test]
fn bad_crc_frames_are_dropped_until_timeout() {
    let mut corrupt = response(&[(Opt16::Voltage.id(), 300)], &[], 0);
    let n = corrupt.len();
    corrupt[n - 2] ^= 0x40; // damage the CRC trailer
    let port = MockPort::new(vec![corrupt]);
    let mut client = Client::new(port).with_response_ticks(3);
    assert!(matches!(
        client.request_u16(&[Opt16::Voltage]),
        Err(Error::Timeout)
    ));
}

#[test]
fn wave_fetch_follows_continuation() {
    // fragment one: 8 bits, two more packets to follow; fragment two:
    // 4 bits, done
    let port = MockPort::new(vec![
        response(
            &[],
            &[(OptVar::PatternWave.id(), &[8, 0b1011_0010])],
            2,
        ),
        response(&[], &[(OptVar::PatternWave.id(), &[4, 0b0110_0000])], 0),
    ]);
    let mut client = Client::new(port).with_response_ticks(5);
    assert_eq!(client.pattern_wave().unwrap(), "101100100110");

    // the follow-up request must carry the device's continuation count
    let written = client.free().written;
    let mut expected = vec![0, 0, 1, 1 << OptVar::PatternWave.id(), 2, 0];
    crc::append(&mut expected);
    let expected = framing::stuff(&expected);
    assert!(written
        .windows(expected.len())
        .any(|w| w == expected.as_slice()));
}

#[test]
fn wave_upload_round_trips() {
    let wave = "101100101";
    let port = MockPort::new(vec![command_response(ACK)]);
    let mut client = Client::new(port).with_response_ticks(5);
    client.set_pattern_wave(wave).unwrap();

    // pull the uploaded chunk back out of the written frame and replay
    // it as a fetch fragment
    let written = client.free().written;
    let payload = framing::unstuff(&written);
    let body = &payload[..payload.len() - 2];
    assert_eq!(&body[..5], &[0, 0, 1, 1 << OptVar::PatternWave.id(), 0]);
    let bit_count = body[5];
    assert_eq!(bit_count as usize, wave.len());

    let mut fragment = vec![bit_count];
    fragment.extend_from_slice(&body[6..]);
    let port = MockPort::new(vec![response(
        &[],
        &[(OptVar::PatternWave.id(), &fragment)],
        0,
    )]);
    let mut client = Client::new(port).with_response_ticks(5);
    assert_eq!(client.pattern_wave().unwrap(), wave);
}

#[test]
fn wave_upload_nack_is_distinguished() {
    let port = MockPort::new(vec![command_response(NACK)]);
    let mut client = Client::new(port).with_response_ticks(5);
    assert!(matches!(
        client.set_pattern_wave("1010"),
        Err(Error::Nack)
    ));
}

#[test]
fn wave_upload_rejects_bad_characters() {
    let port = MockPort::new(vec![]);
    let mut client = Client::new(port).with_response_ticks(5);
    assert!(matches!(
        client.set_pattern_wave("10x1"),
        Err(Error::Validation(_))
    ));
    // nothing may have gone out on the wire
    assert!(client.free().written.is_empty());
}

#[test]
fn set_count_mismatch_never_reaches_the_wire() {
    let port = MockPort::new(vec![]);
    let mut client = Client::new(port).with_response_ticks(5);
    assert!(matches!(
        client.set_u16(&[Opt16::Voltage, Opt16::PulseWidth], &[400]),
        Err(Error::Validation(_))
    ));
    assert!(client.free().written.is_empty());
}

fn write_image(tag: &str, frames: &[&[u8]]) -> PathBuf {
    let mut data = Vec::new();
    for payload in frames {
        data.extend_from_slice(&frame(payload));
    }
    let path = std::env::temp_dir().join(format!(
        "shouterlib-test-{}-{}.bin",
        std::process::id(),
        tag
    ));
    std::fs::write(&path, &data).unwrap();
    path
}

#[test]
fn download_aborts_on_retry_exhaustion() {
    let path = write_image("abort", &[&[0xaa], &[0xbb], &[0xcc]]);
    let frame0 = frame(&[0xaa]);
    let frame1 = frame(&[0xbb]);
    let frame2 = frame(&[0xcc]);

    // ready byte, ack for frame 0, then silence
    let port = MockPort::new(vec![
        framing::stuff(&[BOOT_START]),
        framing::stuff(&[ACK]),
    ]);
    let mut downloader = Downloader::new(port).with_ack_timeout(Duration::from_millis(30));

    let err = downloader
        .download(&path, None, |_, _| {})
        .unwrap_err();
    assert!(matches!(err, Error::Protocol(ref m) if m.contains("frame 1")));

    let written = downloader.free().written;
    let count = |needle: &[u8]| {
        written
            .windows(needle.len())
            .filter(|w| *w == needle)
            .count()
    };
    assert_eq!(count(&frame0), 1);
    assert_eq!(count(&frame1), RETRIES);
    // the loop never reached the frame after the failure
    assert_eq!(count(&frame2), 0);

    std::fs::remove_file(&path).unwrap();
}

#[test]
fn download_sends_every_frame_once_on_clean_run() {
    let path = write_image("clean", &[&[0x01], &[0x02]]);
    let port = MockPort::new(vec![
        framing::stuff(&[BOOT_START]),
        framing::stuff(&[ACK]),
        framing::stuff(&[ACK]),
    ]);
    let mut downloader = Downloader::new(port).with_ack_timeout(Duration::from_millis(30));

    let mut seen = Vec::new();
    downloader
        .download(&path, None, |done, total| seen.push((done, total)))
        .unwrap();
    assert_eq!(seen, vec![(1, 2), (2, 2)]);

    assert_eq!(frame_count(&path).unwrap(), 2);
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn corrupted_frames_differ_from_clean_ones() {
    let path = write_image("corrupt", &[&[0x10, 0x20]]);
    let clean = shouterlib::download::locate_frame(&path, 0, None).unwrap();
    let crc_broken =
        shouterlib::download::locate_frame(&path, 0, Some(Corruption::BreakCrc)).unwrap();
    let frame_broken =
        shouterlib::download::locate_frame(&path, 0, Some(Corruption::BreakFrame)).unwrap();

    assert_ne!(clean, crc_broken);
    assert_eq!(clean.len(), crc_broken.len());
    assert_eq!(frame_broken.len(), clean.len() - 1);

    std::fs::remove_file(&path).unwrap();
}

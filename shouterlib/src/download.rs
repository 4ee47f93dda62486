//! Firmware download engine.
//!
//! A download image is a file of already frame-delimited packets. The
//! engine replays it packet by packet, stop-and-wait: each frame must be
//! acknowledged before the next is sent, with a bounded retry budget per
//! frame. This is the only layer with built-in retries; a download either
//! completes fully or reports the first failing frame index.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use std::time::Duration;

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::protocol::framing::{FrameBuffer, FRAME_END, FRAME_START};
use crate::protocol::{ACK, BOOT_START, BOOT_START_ALT, FRAMING_ERROR, NACK, READ_CHUNK, TIMEOUT};

/// Attempts per frame before the transfer is abandoned.
pub const RETRIES: usize = 5;
/// Ack wait per attempt.
const ACK_TIMEOUT: Duration = Duration::from_secs(1);
/// Wait for the bootloader's initial ready byte.
const READY_TIMEOUT: Duration = Duration::from_secs(10);
/// Wait for the trailing verification status.
const VERIFY_TIMEOUT: Duration = Duration::from_secs(5);
/// One poll tick.
const TICK: Duration = Duration::from_millis(10);

/// Status bytes [wait_for_ack] recognizes, in match order.
const STATUS_BYTES: [u8; 6] = [ACK, NACK, FRAMING_ERROR, TIMEOUT, BOOT_START, BOOT_START_ALT];

/// Deliberate frame damage for fault-injection testing against the
/// bootloader's error paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Corruption {
    /// Replace the trailing CRC byte with a fixed wrong value, keeping
    /// the terminator.
    BreakCrc,
    /// Drop the terminator entirely.
    BreakFrame,
}

/// Count the terminator-delimited frames in a download image.
pub fn frame_count(path: &Path) -> Result<usize> {
    let data = std::fs::read(path)?;
    Ok(data.iter().filter(|&&b| b == FRAME_END).count())
}

/// Locate frame `index` in a download image, rescanning from the start
/// of the file on every call.
///
/// The frame is returned delimiters included, optionally corrupted.
pub fn locate_frame(path: &Path, index: usize, corruption: Option<Corruption>) -> Result<Vec<u8>> {
    let data = std::fs::read(path)?;
    let mut rest = &data[..];

    for _ in 0..index {
        let end = rest
            .iter()
            .position(|&b| b == FRAME_END)
            .ok_or_else(|| Error::Validation(format!("no frame {} in image", index)))?;
        rest = &rest[end + 1..];
    }

    let end = rest
        .iter()
        .position(|&b| b == FRAME_END)
        .ok_or_else(|| Error::Validation(format!("no frame {} in image", index)))?;
    let start = rest[..end]
        .iter()
        .position(|&b| b == FRAME_START)
        .ok_or(Error::Frame("frame without start delimiter"))?;

    let mut frame = rest[start..=end].to_vec();
    match corruption {
        Some(Corruption::BreakCrc) => {
            let n = frame.len();
            frame[n - 2] = 0xa8;
        }
        Some(Corruption::BreakFrame) => {
            frame.pop();
        }
        None => {}
    }
    Ok(frame)
}

/// Drives a download over an open port.
///
/// State is local to one call: the engine tracks nothing across
/// downloads beyond its receive buffer.
#[derive(Debug)]
pub struct Downloader<F> {
    port: F,
    buffer: FrameBuffer,
    received: VecDeque<Vec<u8>>,
    ack_timeout: Duration,
}

impl<F> Downloader<F>
where
    F: Read + Write,
{
    pub fn new(port: F) -> Self {
        Self {
            port,
            buffer: FrameBuffer::new(),
            received: VecDeque::new(),
            ack_timeout: ACK_TIMEOUT,
        }
    }

    /// Change the per-attempt ack wait.
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Release the port.
    pub fn free(self) -> F {
        self.port
    }

    fn pump(&mut self) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK];
        match self.port.read(&mut chunk) {
            Ok(0) => Ok(()),
            Ok(n) => {
                self.buffer.extend(&chunk[..n]);
                while let Some(payload) = self.buffer.next_frame() {
                    self.received.push_back(payload);
                }
                Ok(())
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Poll for one of the known status bytes, pumping reads once per
    /// tick. Returns the status byte, or a null byte when the budget
    /// runs out. A match drains everything else received so far.
    pub fn wait_for_ack(&mut self, timeout: Duration) -> Result<u8> {
        let ticks = (timeout.as_millis() / TICK.as_millis()).max(1);
        for _ in 0..ticks {
            self.pump()?;
            for &status in &STATUS_BYTES {
                if self
                    .received
                    .iter()
                    .any(|p| p.first() == Some(&status))
                {
                    self.received.clear();
                    return Ok(status);
                }
            }
            std::thread::sleep(TICK);
        }
        Ok(0)
    }

    /// Send frame `index` of the image, retrying up to [RETRIES] times.
    ///
    /// Returns the number of bytes sent on ack, or 0 when the retry
    /// budget is exhausted. A frame counts as delivered only on an
    /// explicit ack, never optimistically.
    pub fn send_packet(
        &mut self,
        path: &Path,
        index: usize,
        corruption: Option<Corruption>,
    ) -> Result<usize> {
        let frame = locate_frame(path, index, corruption)?;
        for attempt in 0..RETRIES {
            self.port.write_all(&frame)?;
            self.port.flush()?;
            let status = self.wait_for_ack(self.ack_timeout)?;
            if status == ACK {
                return Ok(frame.len());
            }
            debug!(
                "frame {}: no ack on attempt {} (status 0x{:02x})",
                index,
                attempt + 1,
                status
            );
        }
        warn!("frame {}: retry budget exhausted", index);
        Ok(0)
    }

    /// Command the device out of its application and into download mode,
    /// and wait for the bootloader's ready byte.
    pub fn enter_download_mode(&mut self) -> Result<()> {
        self.port.write_all(b"s bb 0\n")?;
        self.port.write_all(b"reset\n")?;
        self.port.flush()?;
        if self.wait_for_ack(READY_TIMEOUT)? != BOOT_START {
            return Err(Error::Protocol(
                "device did not enter download mode".into(),
            ));
        }
        Ok(())
    }

    /// Download a firmware image, frame by frame, aborting on the first
    /// frame whose retries are exhausted.
    ///
    /// `progress` is called with (frames sent, frame total) after every
    /// delivered frame.
    pub fn download(
        &mut self,
        path: &Path,
        corruption: Option<Corruption>,
        mut progress: impl FnMut(usize, usize),
    ) -> Result<()> {
        let total = frame_count(path)?;
        self.enter_download_mode()?;
        for index in 0..total {
            if self.send_packet(path, index, corruption)? == 0 {
                return Err(Error::Protocol(format!(
                    "frame {} not acknowledged after {} attempts",
                    index, RETRIES
                )));
            }
            progress(index + 1, total);
        }
        Ok(())
    }

    /// Run the download loop against a verification image. The trailing
    /// status decides the outcome instead of triggering a boot: the
    /// alternate boot-start byte means the image verified.
    pub fn verify(
        &mut self,
        path: &Path,
        progress: impl FnMut(usize, usize),
    ) -> Result<bool> {
        self.download(path, None, progress)?;
        Ok(self.wait_for_ack(VERIFY_TIMEOUT)? == BOOT_START_ALT)
    }
}

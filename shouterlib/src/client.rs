//! The request/response engine and the command/state layer on top of it.

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use log::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::framing::FrameBuffer;
use crate::protocol::options::{Category, Fault, Opt16, Opt8, OptVar, OptionTables};
use crate::protocol::packet::{self, Decoded};
use crate::protocol::{crc, Command, Status, ACK, NACK, READ_CHUNK, TIMEOUT};

/// Poll interval while waiting for a response.
const POLL_TICK: Duration = Duration::from_millis(10);
/// Poll ticks before an exchange gives up.
const RESPONSE_TICKS: u32 = 100;
/// Upper bound on continuation rounds for one pattern-wave fetch.
const WAVE_ROUNDS: usize = 100;

/// A client for the pulse generator's serial protocol.
///
/// The client owns the port and the per-connection [OptionTables], and
/// supports exactly one outstanding request/response exchange at a time.
/// Every decoded response mutates the tables in place, whether or not the
/// values were requested by that exchange.
#[derive(Debug)]
pub struct Client<F> {
    port: F,
    buffer: FrameBuffer,
    tables: OptionTables,
    response_ticks: u32,
}

impl<F> Client<F> {
    /// Create a new client on an open port.
    pub fn new(port: F) -> Self {
        Self {
            port,
            buffer: FrameBuffer::new(),
            tables: OptionTables::new(),
            response_ticks: RESPONSE_TICKS,
        }
    }

    /// Change the per-exchange poll budget, in ticks of 10 ms.
    pub fn with_response_ticks(mut self, ticks: u32) -> Self {
        self.response_ticks = ticks;
        self
    }

    /// Last-known option values for this connection.
    pub fn tables(&self) -> &OptionTables {
        &self.tables
    }

    /// Get the underlying port.
    pub fn port(&self) -> &F {
        &self.port
    }

    /// Get the underlying port, mutably.
    ///
    /// Writing to it yourself may confuse an exchange in progress.
    pub fn port_mut(&mut self) -> &mut F {
        &mut self.port
    }

    /// Release the port.
    pub fn free(self) -> F {
        self.port
    }
}

impl<F> Client<F>
where
    F: Read + Write,
{
    /// Pull whatever the port has ready into the frame buffer.
    fn pump(&mut self) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK];
        match self.port.read(&mut chunk) {
            Ok(0) => Ok(()),
            Ok(n) => {
                trace!("rx {} bytes", n);
                self.buffer.extend(&chunk[..n]);
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

    /// Wait for the next frame that passes its CRC check, and return its
    /// payload with the trailer stripped.
    ///
    /// Frames with a bad residue are dropped silently (logged); if the
    /// poll budget runs out first, the exchange times out.
    fn read_response(&mut self) -> Result<Vec<u8>> {
        for _ in 0..self.response_ticks {
            self.pump()?;
            while let Some(payload) = self.buffer.next_frame() {
                if crc::residue_ok(&payload) {
                    let body_len = payload.len() - 2;
                    let mut body = payload;
                    body.truncate(body_len);
                    return Ok(body);
                }
                warn!("dropping frame with bad crc ({} bytes)", payload.len());
            }
            std::thread::sleep(POLL_TICK);
        }
        Err(Error::Timeout)
    }

    /// One exchange: transmit a frame, wait for a valid response, return
    /// its payload without the CRC trailer.
    fn exchange(&mut self, frame: &[u8]) -> Result<Vec<u8>> {
        self.buffer.clear();
        trace!("tx {} bytes", frame.len());
        self.port.write_all(frame)?;
        self.port.flush()?;
        self.read_response()
    }

    /// Exchange and decode, applying every decoded value to the tables.
    fn exchange_decoded(&mut self, frame: &[u8]) -> Result<Decoded> {
        let body = self.exchange(frame)?;
        let decoded = packet::decode_response(&body)?;
        decoded.apply(&mut self.tables);
        Ok(decoded)
    }

    /// Request 16-bit options. Returns the values for exactly the
    /// requested ids, in request order.
    pub fn request_u16(&mut self, ids: &[Opt16]) -> Result<Vec<u16>> {
        let raw: Vec<u8> = ids.iter().map(|o| o.id()).collect();
        self.exchange_decoded(&packet::build_request(&raw, Category::U16))?;
        Ok(ids.iter().map(|&o| self.tables.get_u16(o)).collect())
    }

    /// Request 8-bit options, in request order.
    pub fn request_u8(&mut self, ids: &[Opt8]) -> Result<Vec<u8>> {
        let raw: Vec<u8> = ids.iter().map(|o| o.id()).collect();
        self.exchange_decoded(&packet::build_request(&raw, Category::U8))?;
        Ok(ids.iter().map(|&o| self.tables.get_u8(o)).collect())
    }

    /// Request variable-length options, in request order.
    ///
    /// The pattern wave has its own continuation protocol; use
    /// [Client::pattern_wave] for it.
    pub fn request_var(&mut self, ids: &[OptVar]) -> Result<Vec<String>> {
        if ids
            .iter()
            .any(|&o| matches!(o, OptVar::PatternWave | OptVar::PatternWaveAppend))
        {
            return Err(Error::Validation(
                "pattern wave options use the continuation protocol".into(),
            ));
        }
        let raw: Vec<u8> = ids.iter().map(|o| o.id()).collect();
        self.exchange_decoded(&packet::build_request(&raw, Category::Var))?;
        Ok(ids
            .iter()
            .map(|&o| match o {
                OptVar::BoardId => self.tables.board_id().to_owned(),
                _ => self.tables.current_state().to_owned(),
            })
            .collect())
    }

    /// Refresh every 16-bit and 8-bit option plus board id and state.
    pub fn request_all(&mut self) -> Result<()> {
        self.exchange_decoded(&packet::build_request_all())?;
        Ok(())
    }

    /// Write option values. Returns the raw response payload so callers
    /// can inspect the ack/nack themselves.
    pub fn send_set(&mut self, ids: &[u8], category: Category, values: &[u16]) -> Result<Vec<u8>> {
        let frame = packet::build_set(ids, category, values)?;
        let body = self.exchange(&frame)?;
        if let Ok(decoded) = packet::decode_response(&body) {
            decoded.apply(&mut self.tables);
        }
        Ok(body)
    }

    /// Write 16-bit options.
    pub fn set_u16(&mut self, ids: &[Opt16], values: &[u16]) -> Result<Vec<u8>> {
        let raw: Vec<u8> = ids.iter().map(|o| o.id()).collect();
        self.send_set(&raw, Category::U16, values)
    }

    /// Write 8-bit options.
    pub fn set_u8(&mut self, ids: &[Opt8], values: &[u8]) -> Result<Vec<u8>> {
        let raw: Vec<u8> = ids.iter().map(|o| o.id()).collect();
        let wide: Vec<u16> = values.iter().map(|&v| v as u16).collect();
        self.send_set(&raw, Category::U8, &wide)
    }

    /// Send a single-byte command and return the status byte from the
    /// reply. The reply is also decoded for side-channel option updates.
    pub fn send_command(&mut self, command: Command) -> Result<Status> {
        debug!("command {:?}", command);
        let body = self.exchange(&packet::build_command(command))?;
        if body.len() < 4 {
            return Err(Error::Protocol("no response from device".into()));
        }
        let status = Status::from_byte(body[3]);
        let decoded = packet::decode_response(&body)?;
        decoded.apply(&mut self.tables);
        Ok(status)
    }

    // ------------------------------------------------------------------
    // command/state engine

    /// Arm the output stage.
    ///
    /// The fault register is fetched fresh after the command; any set
    /// fault bit is surfaced as [Error::HardwareFault]. Faults are never
    /// cleared automatically.
    pub fn arm(&mut self) -> Result<Status> {
        let status = self.send_command(Command::Arm)?;
        let faults = self.faults(false)?;
        if !faults.is_empty() {
            return Err(Error::HardwareFault(faults));
        }
        Ok(status)
    }

    pub fn disarm(&mut self) -> Result<Status> {
        self.send_command(Command::Disarm)
    }

    pub fn pulse(&mut self) -> Result<Status> {
        self.send_command(Command::Pulse)
    }

    pub fn reset(&mut self) -> Result<Status> {
        self.send_command(Command::Reset)
    }

    /// Restore the device's default option values.
    pub fn restore_defaults(&mut self) -> Result<Status> {
        self.send_command(Command::Default)
    }

    pub fn clear_faults(&mut self) -> Result<Status> {
        self.send_command(Command::ClearFaults)
    }

    /// Clear faults, then arm.
    pub fn clear_then_arm(&mut self) -> Result<Status> {
        self.send_command(Command::ClearFaults)?;
        self.arm()
    }

    /// True exactly when the device acknowledges the trigger-safe query.
    pub fn trigger_safe(&mut self) -> Result<bool> {
        Ok(self.send_command(Command::TriggerSafe)?.is_ack())
    }

    /// Fetch the device's state string. Opaque pass-through; the set of
    /// states is not validated here.
    pub fn state(&mut self) -> Result<String> {
        self.request_var(&[OptVar::CurrentState])?;
        Ok(self.tables.current_state().to_owned())
    }

    /// Fetch the active or latched fault register and return the set
    /// fault names.
    pub fn faults(&mut self, latched: bool) -> Result<Vec<Fault>> {
        let opt = if latched {
            Opt16::FaultLatched
        } else {
            Opt16::FaultActive
        };
        self.request_u16(&[opt])?;
        Ok(self.tables.faults(latched))
    }

    // ------------------------------------------------------------------
    // waveform continuation

    /// Fetch the pattern wave as a '0'/'1' string, following the
    /// continuation counter across as many fragments as the device needs.
    pub fn pattern_wave(&mut self) -> Result<String> {
        self.tables.reset_pattern_wave();
        let mut to_follow = 0;
        for _ in 0..WAVE_ROUNDS {
            let decoded = self.exchange_decoded(&packet::build_wave_request(to_follow))?;
            if decoded.to_follow == 0 {
                return Ok(self.tables.pattern_wave().to_owned());
            }
            to_follow = decoded.to_follow;
        }
        Err(Error::Protocol("pattern wave continuation never ended".into()))
    }

    /// Upload a pattern wave given as a '0'/'1' string.
    ///
    /// The wave is packed MSB-first and sent in 16-bit chunks, the first
    /// under the pattern-wave selector and the rest under the append
    /// selector; every chunk must be acknowledged.
    pub fn set_pattern_wave(&mut self, wave: &str) -> Result<()> {
        if wave.is_empty() {
            return Err(Error::Validation("empty pattern wave".into()));
        }
        let mut packed = vec![0u8; (wave.len() + 7) / 8];
        for (i, c) in wave.chars().enumerate() {
            match c {
                '1' => packed[i / 8] |= 0x80 >> (i % 8),
                '0' => {}
                _ => {
                    return Err(Error::Validation(format!(
                        "pattern wave must be '0'/'1', found {:?}",
                        c
                    )))
                }
            }
        }

        for (index, chunk) in packed.chunks(2).enumerate() {
            let bit_count = (wave.len() - index * 16).min(16) as u8;
            let frame = packet::build_wave_chunk(index == 0, bit_count, chunk);
            let body = self.exchange(&frame)?;
            if body.len() < 4 {
                return Err(Error::Protocol("no response from device".into()));
            }
            match body[3] {
                ACK => {}
                NACK => return Err(Error::Nack),
                TIMEOUT => return Err(Error::Timeout),
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected status 0x{:02x} during wave upload",
                        other
                    )))
                }
            }
        }
        Ok(())
    }
}

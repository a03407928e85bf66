//! The host side of the SAM4000 request/response handshake.
//!
//! The protocol is strictly half-duplex: the driver issues one ENQ poll
//! at a time and blocks on the port for the reply. One poll cycle is:
//!
//! ```text
//! Idle -> AwaitResponse -> (NoData | FrameStart)
//!                              -> [ChecksumRetry]* -> FrameAccepted | FrameAbandoned
//! ```
//!
//! Timeouts are owned by the port: a read that produces no byte within
//! the port's configured budget means the device is unreachable, which is
//! fatal and never retried. Checksum failures are the only retried
//! condition, bounded by [LinkDriver::with_retry_limit].

use std::io::{ErrorKind, Read, Write};

use tracing::{debug, trace, warn};

use crate::protocol::{self, code};
use crate::transmission::Transmission;
use crate::{Error, Result};

/// Upper bound on a frame body. A real strip frame is well under 200
/// bytes; anything larger means we lost the sentinel.
const MAX_FRAME_LEN: usize = 4096;

/// Outcome of one completed poll cycle.
#[derive(Debug)]
pub enum Poll {
    /// Device answered NAK: no new strip yet. Wait the idle interval
    /// before polling again.
    NoData,
    /// A strip frame arrived, verified, and decoded.
    Strip(Transmission),
}

/// Drives the poll/acknowledge handshake over any byte stream.
///
/// `P` is typically a serial port but any `Read + Write` works; reads
/// must observe some response budget and report an exhausted budget as
/// zero bytes or [ErrorKind::TimedOut].
pub struct LinkDriver<P: Read + Write> {
    port: P,
    retry_limit: u32,
    always_retry: bool,
    capture: Option<Box<dyn Write + Send>>,
}

impl<P: Read + Write> LinkDriver<P> {
    const DEFAULT_RETRY_LIMIT: u32 = 3;

    pub fn new(port: P) -> Self {
        LinkDriver {
            port,
            retry_limit: Self::DEFAULT_RETRY_LIMIT,
            always_retry: false,
            capture: None,
        }
    }

    /// Set the number of retransmissions requested before a frame with a
    /// bad checksum is abandoned.
    #[must_use]
    pub fn with_retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = limit;
        self
    }

    /// Retry checksum failures indefinitely instead of abandoning.
    #[must_use]
    pub fn with_always_retry(mut self, always: bool) -> Self {
        self.always_retry = always;
        self
    }

    /// Copy every raw pre-decode frame body to `sink`, best effort.
    /// Write failures are logged and never affect protocol behavior.
    #[must_use]
    pub fn with_capture(mut self, sink: Box<dyn Write + Send>) -> Self {
        self.capture = Some(sink);
        self
    }

    /// Consume the driver and hand back the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Activate the device, in barcode or no-barcode mode.
    pub fn activate(&mut self, barcode: bool) -> Result<()> {
        let c = if barcode { code::BAR } else { code::NOBAR };
        self.port.write_all(&[c])?;
        self.port.flush()?;
        debug!(barcode, "device activated");
        Ok(())
    }

    /// Send the deactivation signal so the device returns to its inactive
    /// state.
    pub fn deactivate(&mut self) -> Result<()> {
        self.port.write_all(&[code::EXIT])?;
        self.port.flush()?;
        debug!("device deactivated");
        Ok(())
    }

    /// [LinkDriver::deactivate], but failure is only logged. Used on
    /// abort paths where the original error must win.
    pub fn deactivate_best_effort(&mut self) {
        if let Err(err) = self.deactivate() {
            warn!(error = %err, "failed to send deactivate signal");
        }
    }

    /// Run one poll cycle.
    ///
    /// # Errors
    /// - [Error::LinkUnreachable]: no response byte within the budget
    /// - [Error::FrameAbandoned]: checksum retries exhausted; the device
    ///   was still acknowledged and the strip must be re-presented
    /// - [Error::FrameMalformed]: frame structure violated
    /// - [Error::Decode]: payload invalid despite a verified checksum
    pub fn poll(&mut self) -> Result<Poll> {
        self.port.write_all(&[code::ENQ])?;
        self.port.flush()?;

        match self.read_byte()? {
            code::NAK => {
                trace!("poll: no data");
                Ok(Poll::NoData)
            }
            code::STX => self.receive_frame(),
            other => {
                debug!(byte = other, "unexpected control byte");
                Err(Error::FrameMalformed("unexpected control byte"))
            }
        }
    }

    /// Read a frame body, verifying its checksum with bounded retry.
    fn receive_frame(&mut self) -> Result<Poll> {
        let mut attempts = 0u32;
        loop {
            let raw = self.read_frame_body()?;
            if let Some(sink) = self.capture.as_mut() {
                if let Err(err) = sink.write_all(&raw).and_then(|()| sink.flush()) {
                    warn!(error = %err, "raw capture write failed");
                }
            }

            let (payload, transmitted) = protocol::extract_frame(&raw)?;
            let computed = protocol::frame_checksum(payload);
            if computed != transmitted {
                attempts += 1;
                debug!(computed, transmitted, attempts, "checksum mismatch");
                if self.always_retry || attempts <= self.retry_limit {
                    self.port.write_all(&[code::NAK])?;
                    self.port.flush()?;
                    continue;
                }
                // Acknowledge anyway to keep the device's sequencing
                // consistent; the operator re-presents the strip.
                self.port.write_all(&[code::ACK])?;
                self.port.flush()?;
                return Err(Error::FrameAbandoned { attempts });
            }

            // A matched checksum guarantees the bytes but not their
            // semantics; a decode failure here is corruption and is not
            // retried.
            let transmission = Transmission::decode(payload)?;
            self.port.write_all(&[code::ACK])?;
            self.port.flush()?;
            trace!(%transmission, "frame accepted");
            return Ok(Poll::Strip(transmission));
        }
    }

    /// Read bytes up to, and excluding, the end-of-frame sentinel.
    fn read_frame_body(&mut self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        loop {
            let b = self.read_byte()?;
            if b == code::EOF {
                return Ok(body);
            }
            if body.len() == MAX_FRAME_LEN {
                return Err(Error::FrameMalformed("missing end-of-frame sentinel"));
            }
            body.push(b);
        }
    }

    /// Read a single byte, mapping an exhausted response budget to
    /// [Error::LinkUnreachable].
    fn read_byte(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        loop {
            match self.port.read(&mut buf) {
                Ok(0) => return Err(Error::LinkUnreachable),
                Ok(_) => return Ok(buf[0]),
                Err(err) if err.kind() == ErrorKind::TimedOut => {
                    return Err(Error::LinkUnreachable)
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(Error::Io(err)),
            }
        }
    }
}

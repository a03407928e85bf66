use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

use samlink::protocol::{code, frame_checksum};

/// Join payload fields with the CR separator.
pub fn payload(fields: &[&str]) -> Vec<u8> {
    fields.join("\r").into_bytes()
}

/// Payload with all header fields unknown and one normal shot per ring
/// value.
pub fn strip_of(rings: &[f64]) -> Vec<u8> {
    let mut fields: Vec<String> = vec!["?".to_string(); 6];
    for r in rings {
        fields.extend([format!("{r:.1}"), "2.5".to_string(), "0".to_string(), "0".to_string()]);
    }
    let fields: Vec<&str> = fields.iter().map(String::as_str).collect();
    payload(&fields)
}

/// Frame body as transmitted after STX: payload, ETB, checksum, sentinel.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut raw = payload.to_vec();
    raw.push(code::ETB);
    raw.push(frame_checksum(payload));
    raw.push(code::EOF);
    raw
}

struct Strip {
    frame: Vec<u8>,
    /// Transmissions served with a flipped checksum before a clean one.
    corrupt: usize,
}

/// In-memory SAM4000 playing the device side of the handshake.
///
/// ENQ serves STX plus the current frame (or NAK when none is pending),
/// NAK retransmits the current frame body, ACK completes the cycle and
/// moves to the next strip. Reads with nothing buffered time out, which
/// the driver maps to an unreachable link.
pub struct ScriptedPort {
    strips: VecDeque<Strip>,
    readbuf: VecDeque<u8>,
    /// Every byte the host wrote, in order.
    pub written: Vec<u8>,
    /// When set the device never answers a poll.
    pub silent: bool,
}

impl ScriptedPort {
    pub fn new() -> Self {
        ScriptedPort {
            strips: VecDeque::new(),
            readbuf: VecDeque::new(),
            written: Vec::new(),
            silent: false,
        }
    }

    pub fn push_strip(&mut self, payload: &[u8]) {
        self.strips.push_back(Strip {
            frame: encode_frame(payload),
            corrupt: 0,
        });
    }

    /// Serve `corrupt` bad transmissions of this strip before a clean
    /// one. Use `usize::MAX` for a strip that never transfers cleanly.
    pub fn push_corrupted_strip(&mut self, payload: &[u8], corrupt: usize) {
        self.strips.push_back(Strip {
            frame: encode_frame(payload),
            corrupt,
        });
    }

    /// Queue a pre-encoded frame body verbatim, for structural fault
    /// injection. The body must include its own sentinel.
    pub fn push_raw_frame(&mut self, frame: Vec<u8>) {
        self.strips.push_back(Strip { frame, corrupt: 0 });
    }

    pub fn host_bytes(&self, b: u8) -> usize {
        self.written.iter().filter(|&&w| w == b).count()
    }

    fn serve_body(&mut self) {
        let Some(strip) = self.strips.front_mut() else {
            return;
        };
        let mut frame = strip.frame.clone();
        if strip.corrupt > 0 {
            strip.corrupt -= 1;
            // Checksum byte sits just before the sentinel.
            let at = frame.len() - 2;
            frame[at] ^= 0xff;
        }
        self.readbuf.extend(frame);
    }
}

impl Read for ScriptedPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.readbuf.pop_front() {
            Some(b) => {
                buf[0] = b;
                Ok(1)
            }
            None => Err(io::Error::from(io::ErrorKind::TimedOut)),
        }
    }
}

impl Write for ScriptedPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for &b in buf {
            self.written.push(b);
            if self.silent {
                continue;
            }
            match b {
                code::ENQ => {
                    if self.strips.is_empty() {
                        self.readbuf.push_back(code::NAK);
                    } else {
                        self.readbuf.push_back(code::STX);
                        self.serve_body();
                    }
                }
                code::NAK => self.serve_body(),
                code::ACK => {
                    self.strips.pop_front();
                }
                _ => {}
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// `Write` handle over shared storage, for inspecting capture output.
#[derive(Clone)]
pub struct SharedSink(pub Arc<Mutex<Vec<u8>>>);

impl SharedSink {
    pub fn new() -> Self {
        SharedSink(Arc::new(Mutex::new(Vec::new())))
    }
}

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

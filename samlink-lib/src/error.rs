#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// No response byte arrived within the device's response budget.
    ///
    /// The link is considered dead; this is never retried.
    #[error("device unreachable: no response within the response budget")]
    LinkUnreachable,

    /// Frame structure violated the wire format.
    #[error("frame malformed: {0}")]
    FrameMalformed(&'static str),

    /// Computed and transmitted checksums disagree for a single reception.
    #[error("checksum mismatch: computed {computed:#04x}, transmitted {transmitted:#04x}")]
    ChecksumMismatch { computed: u8, transmitted: u8 },

    /// The checksum retry bound was exhausted. The device has been
    /// acknowledged to keep its sequencing consistent; the physical strip
    /// must be re-presented.
    #[error("frame abandoned after {attempts} failed receptions")]
    FrameAbandoned { attempts: u32 },

    /// Payload structure violated after a verified checksum. The bytes are
    /// good, so this indicates a protocol or version mismatch.
    #[error("transmission decode failed: {0}")]
    Decode(String),

    /// Strip or series size outside the allowed set, caught at startup.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A strip arrived before any shooter was registered.
    #[error("no shooter registered")]
    NoActiveShooter,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

use crate::frame::Command;

/// Errors returned from various operations.
#[derive(Clone, Debug, thiserror::Error, PartialEq)]
pub enum Error {
    #[error("I/O error: {0:?}")]
    IoError(::std::io::ErrorKind),

    /// Fewer than 4 bytes arrived before the read timed out or the
    /// device went away. Carries the number of bytes actually received.
    #[error("Incomplete frame: received {0} of 4 bytes (timeout or no device responded)")]
    Length(usize),

    /// The checksum byte of a received frame does not match the XOR of
    /// the other three bytes.
    #[error("Checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    Checksum { expected: u8, actual: u8 },

    /// The card answered a [Command](super::Command) with something other than
    /// its success code, including an explicit ERROR response.
    #[error("Command {command} failed (response code {code})")]
    CommandFailed { command: Command, code: u8 },

    /// A relay number outside 1-8 was given.
    #[error("Not a valid relay number! Expected 1-8.")]
    InvalidRelay,

    /// A port value outside 0-255 was given.
    #[error("Not a valid port value! Expected 0-255.")]
    InvalidPortValue,

    /// A read timeout that is not a positive, finite number of seconds.
    #[error("Not a valid timeout! Expected a positive number of seconds.")]
    InvalidTimeout,
}

impl From<::std::io::Error> for Error {
    fn from(e: ::std::io::Error) -> Error {
        Error::IoError(e.kind())
    }
}

use std::fmt;
use std::io;

/// Error kinds surfaced across the activation/capture boundary.
#[derive(Debug, Clone)]
pub enum FpError {
    /// A USB transfer failed, or the interrupt listener broke.
    Io(String),
    /// The device returned a different length than requested.
    Protocol(String),
    /// Unknown hardware layout, or no firmware encryption marker found.
    NoDev,
    /// Allocation failure.
    NoMem,
    /// The scanpwr retry budget was exhausted.
    TimedOut,
    /// An unknown `fp_imgdev_state` was requested.
    Inval,
    /// The timer service failed to arm or cancel a timer.
    Time(String),
    /// A transfer was cancelled before it completed.
    Cancelled,
}

impl FpError {
    pub fn io(msg: impl Into<String>) -> Self {
        FpError::Io(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        FpError::Protocol(msg.into())
    }

    /// Negative errno-style code, for host-contract functions that report a
    /// bare `int` (`activate_complete(err)`, `session_error(err)`).
    pub fn to_errno(&self) -> i32 {
        match self {
            FpError::Io(_) => -libc::EIO,
            FpError::Protocol(_) => -libc::EPROTO,
            FpError::NoDev => -libc::ENODEV,
            FpError::NoMem => -libc::ENOMEM,
            FpError::TimedOut => -libc::ETIMEDOUT,
            FpError::Inval => -libc::EINVAL,
            FpError::Time(_) => -libc::EIO,
            FpError::Cancelled => -libc::ECANCELED,
        }
    }
}

impl fmt::Display for FpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FpError::Io(msg) => write!(f, "I/O error: {msg}"),
            FpError::Protocol(msg) => write!(f, "protocol error: {msg}"),
            FpError::NoDev => write!(f, "no such device / unrecognized hardware"),
            FpError::NoMem => write!(f, "out of memory"),
            FpError::TimedOut => write!(f, "timed out"),
            FpError::Inval => write!(f, "invalid argument"),
            FpError::Time(msg) => write!(f, "timer error: {msg}"),
            FpError::Cancelled => write!(f, "transfer cancelled"),
        }
    }
}

impl std::error::Error for FpError {}

impl From<io::Error> for FpError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => FpError::TimedOut,
            io::ErrorKind::NotConnected | io::ErrorKind::NotFound => FpError::NoDev,
            io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => FpError::Inval,
            _ => FpError::Io(err.to_string()),
        }
    }
}

impl From<FpError> for io::Error {
    fn from(err: FpError) -> Self {
        let kind = match &err {
            FpError::Io(_) => io::ErrorKind::Other,
            FpError::Protocol(_) => io::ErrorKind::InvalidData,
            FpError::NoDev => io::ErrorKind::NotConnected,
            FpError::NoMem => io::ErrorKind::Other,
            FpError::TimedOut => io::ErrorKind::TimedOut,
            FpError::Inval => io::ErrorKind::InvalidInput,
            FpError::Time(_) => io::ErrorKind::Other,
            FpError::Cancelled => io::ErrorKind::Interrupted,
        };
        io::Error::new(kind, err.to_string())
    }
}

pub type FpResult<T> = Result<T, FpError>;

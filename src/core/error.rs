use std::fmt;
use std::io;

/// Broad propagation policy for an [`Error`], matching the three
/// categories a caller needs to distinguish: whether the wire is
/// still good, whether the target rejected the protocol, or whether
/// the builder was misused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Socket write/read failed, short write, empty datagram, malformed
    /// datagram size, or a packet-header mismatch. The wire is suspect;
    /// the target should be marked `Disconnected`.
    Network,
    /// Protocol-level rejection: transaction-header mismatch, unknown
    /// type, malformed RMW, truncated read, non-zero info code. The
    /// wire is fine, only this packet's remaining transactions abort.
    IPbus,
    /// Caller misused the builder API (e.g. destination buffer shorter
    /// than the declared word count).
    Logic,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Network => "NetworkError",
            ErrorKind::IPbus => "IPbusError",
            ErrorKind::Logic => "LogicError",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::Network, message)
    }

    pub fn ipbus(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::IPbus, message)
    }

    pub fn logic(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::Logic, message)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::network(err.to_string())
    }
}

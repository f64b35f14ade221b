use crate::address::Address;

/// Coarse classification of an [`Error`], cheap to copy and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AlreadyConnected,
    AddressNotFound,
    NotWritable,
    AlreadyListening,
    AddressInUse,
    NotRunning,
    UnknownEncoding,
    InvalidEncoding,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// `connect` was called on a channel that is connected or connecting.
    #[error("stream is already connected (requested {0})")]
    AlreadyConnected(Address),

    /// No endpoint is listening on the requested address.
    #[error("no stream is listening on {0}")]
    AddressNotFound(Address),

    #[error("stream is not writable")]
    NotWritable,

    /// `listen` was called on an endpoint that already holds an address.
    #[error("server is already listening on {0}")]
    AlreadyListening(Address),

    #[error("address {0} is already bound")]
    AddressInUse(Address),

    #[error("server is not running")]
    NotRunning,

    #[error("unknown encoding: {0}")]
    UnknownEncoding(String),

    /// Text could not be converted to bytes with the requested encoding.
    #[error("invalid {encoding} payload: {reason}")]
    InvalidEncoding {
        encoding: &'static str,
        reason: String,
    },

    /// Caller supplied reason, typically passed to `destroy_with_error`.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Creates an [`Error::Other`] carrying the given message.
    pub fn other(message: impl Into<String>) -> Self {
        Error::Other(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::AlreadyConnected(_) => ErrorKind::AlreadyConnected,
            Error::AddressNotFound(_) => ErrorKind::AddressNotFound,
            Error::NotWritable => ErrorKind::NotWritable,
            Error::AlreadyListening(_) => ErrorKind::AlreadyListening,
            Error::AddressInUse(_) => ErrorKind::AddressInUse,
            Error::NotRunning => ErrorKind::NotRunning,
            Error::UnknownEncoding(_) => ErrorKind::UnknownEncoding,
            Error::InvalidEncoding { .. } => ErrorKind::InvalidEncoding,
            Error::Other(_) => ErrorKind::Other,
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> std::io::Error {
        let kind = match err.kind() {
            ErrorKind::AddressNotFound => std::io::ErrorKind::ConnectionRefused,
            ErrorKind::AddressInUse => std::io::ErrorKind::AddrInUse,
            ErrorKind::AlreadyConnected => std::io::ErrorKind::AlreadyExists,
            ErrorKind::NotWritable => std::io::ErrorKind::BrokenPipe,
            ErrorKind::NotRunning => std::io::ErrorKind::NotConnected,
            ErrorKind::UnknownEncoding | ErrorKind::InvalidEncoding => {
                std::io::ErrorKind::InvalidInput
            }
            _ => std::io::ErrorKind::Other,
        };
        // Addresses are not Send, so only the message crosses over
        std::io::Error::new(kind, err.to_string())
    }
}

pub type Result<T> = core::result::Result<T, Error>;

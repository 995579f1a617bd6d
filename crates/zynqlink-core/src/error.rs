//! Error types for zynqlink.
//!
//! All fallible operations across the library return [`Result<T>`], which
//! uses [`Error`] as the error type. Every error is local to the operation
//! that produced it and is reported to the immediate caller; none of them
//! are fatal to the process.

/// The error type for all zynqlink operations.
///
/// Link-level failures (`Connect`, `Send`, `Receive`, `Framing`) are always
/// reported after the device link has already fallen back to
/// `Disconnected`, so callers may retry `connect` immediately.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A payload could not be serialized to JSON or does not fit a frame.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// A complete frame arrived but its body is not valid UTF-8 JSON, or
    /// the JSON does not have the expected shape.
    #[error("decode error: {0}")]
    Decode(String),

    /// The byte stream violated the length-prefix framing (short header,
    /// short body, oversized frame).
    #[error("framing error: {0}")]
    Framing(String),

    /// The TCP connection could not be established (refused, unreachable,
    /// timed out).
    #[error("connect error: {0}")]
    Connect(String),

    /// Writing a frame to an active link failed.
    #[error("send error: {0}")]
    Send(String),

    /// Reading from an active link failed.
    #[error("receive error: {0}")]
    Receive(String),

    /// A command parameter was rejected before anything touched the network.
    #[error("invalid parameter: {0}")]
    Validation(String),

    /// The machine's own IPv4 address could not be determined.
    #[error("no local IPv4 address available")]
    NoLocalAddress,

    /// The operation requires a connected link.
    #[error("not connected")]
    NotConnected,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Discriminant of an [`Error`], for callers that branch on the failure
/// class without caring about the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`Error::Encoding`].
    Encoding,
    /// See [`Error::Decode`].
    Decode,
    /// See [`Error::Framing`].
    Framing,
    /// See [`Error::Connect`].
    Connect,
    /// See [`Error::Send`].
    Send,
    /// See [`Error::Receive`].
    Receive,
    /// See [`Error::Validation`].
    Validation,
    /// See [`Error::NoLocalAddress`].
    NoLocalAddress,
    /// See [`Error::NotConnected`].
    NotConnected,
    /// See [`Error::Io`].
    Io,
}

impl Error {
    /// Return the failure class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Encoding(_) => ErrorKind::Encoding,
            Error::Decode(_) => ErrorKind::Decode,
            Error::Framing(_) => ErrorKind::Framing,
            Error::Connect(_) => ErrorKind::Connect,
            Error::Send(_) => ErrorKind::Send,
            Error::Receive(_) => ErrorKind::Receive,
            Error::Validation(_) => ErrorKind::Validation,
            Error::NoLocalAddress => ErrorKind::NoLocalAddress,
            Error::NotConnected => ErrorKind::NotConnected,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    /// Whether this error belongs in a single user-facing notification.
    ///
    /// Connection, transfer, and discovery failures are; validation errors
    /// are shown inline where the command was built, and encode/decode
    /// problems are protocol noise for the log.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Connect
                | ErrorKind::Send
                | ErrorKind::Receive
                | ErrorKind::Framing
                | ErrorKind::NoLocalAddress
                | ErrorKind::NotConnected
        )
    }
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

use thiserror::Error as ThisError;

/// The common error type of this crate.
///
/// The variants follow the failure classes of the protocols involved: socket
/// failures, violations of one of the wire protocols, unsupported persistence
/// formats and structurally invalid log files.
#[derive(Debug, ThisError)]
pub enum Error {
    /// A socket could not be opened, read from or written to.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// The WebSocket layer reported a failure.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// A message or value violated one of the wire protocols.
    ///
    /// Protocol errors affect a single message or field; sessions stay
    /// usable after one occurred.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A persisted dataset could not be parsed or has an unsupported format.
    #[error("format error: {0}")]
    Format(String),

    /// A binary log file is structurally invalid.
    ///
    /// Well-formed log files never produce this; it indicates data
    /// corruption and decoding fails rather than silently truncating.
    #[error("decode error: {0}")]
    Decode(String),
}

/// A common result type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_fmt() {
        let error = Error::Protocol("unexpected response command 42".to_owned());

        let result = format!("{}", error);

        assert_eq!("protocol error: unexpected response command 42", result);
    }

    #[test]
    fn test_from_io_error() {
        use std::io;

        let cause = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");

        let error = Error::from(cause);

        assert!(matches!(error, Error::Connection(_)));
        assert_eq!("connection error: refused", format!("{}", error));
    }
}

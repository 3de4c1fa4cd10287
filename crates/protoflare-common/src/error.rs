use miette::Diagnostic;

/// Boxed error used as the catch-all source for transport and storage failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Transport-level errors that occur during HTTP communication
#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum TransportError {
    /// Failed to establish connection to server
    #[error("connection error: {0}")]
    #[diagnostic(
        code(protoflare::transport::connect),
        help("check network connectivity and that the host is reachable")
    )]
    Connect(String),

    /// Request timed out
    #[error("request timeout")]
    #[diagnostic(code(protoflare::transport::timeout))]
    Timeout,

    /// Request construction failed (malformed URI, headers, etc.)
    #[error("invalid request: {0}")]
    #[diagnostic(code(protoflare::transport::invalid_request))]
    InvalidRequest(String),

    /// The operation was cancelled by its caller
    #[error("request cancelled")]
    #[diagnostic(
        code(protoflare::transport::cancelled),
        help("the cancellation token attached to this client was triggered")
    )]
    Cancelled,

    /// Other transport error
    #[error("transport error: {0}")]
    #[diagnostic(code(protoflare::transport::other))]
    Other(BoxError),
}

impl TransportError {
    /// Convert an arbitrary `HttpClient` error into a `TransportError`.
    ///
    /// Errors that already are a `TransportError` (such as the ones produced by
    /// [`Cancellable`](crate::http_client::Cancellable)) keep their kind, so
    /// cancellation survives the trip through generic client code.
    pub fn from_client_error<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let boxed: BoxError = Box::new(error);
        match boxed.downcast::<TransportError>() {
            Ok(transport) => *transport,
            Err(other) => TransportError::Other(other),
        }
    }

    /// Whether this error represents caller-initiated cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransportError::Cancelled)
    }
}

#[cfg(feature = "reqwest-client")]
impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() {
            Self::Connect(e.to_string())
        } else if e.is_builder() || e.is_request() {
            Self::InvalidRequest(e.to_string())
        } else {
            Self::Other(Box::new(e))
        }
    }
}

impl From<http::Error> for TransportError {
    fn from(e: http::Error) -> Self {
        Self::InvalidRequest(e.to_string())
    }
}

/// Errors emitted by key-value stores.
#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum StoreError {
    /// Filesystem or I/O error
    #[error("I/O error: {0}")]
    #[diagnostic(code(protoflare::store::io))]
    Io(#[from] std::io::Error),
    /// Serialization error (e.g., JSON)
    #[error("serialization error: {0}")]
    #[diagnostic(code(protoflare::store::serde))]
    Serde(#[from] serde_json::Error),
    /// The stored data is not in the expected shape
    #[error("corrupt store: {0}")]
    #[diagnostic(
        code(protoflare::store::corrupt),
        help("the backing file must contain a JSON object; delete it to start fresh")
    )]
    Corrupt(String),
    /// Any other error from a backend implementation
    #[error(transparent)]
    #[diagnostic(code(protoflare::store::other))]
    Other(#[from] BoxError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    #[test]
    fn from_client_error_keeps_transport_kind() {
        let err = TransportError::from_client_error(TransportError::Cancelled);
        assert!(err.is_cancelled());
    }

    #[test]
    fn from_client_error_wraps_foreign_errors() {
        let err = TransportError::from_client_error(Boom);
        assert!(matches!(err, TransportError::Other(ref e) if e.to_string() == "boom"));
        assert!(!err.is_cancelled());
    }
}

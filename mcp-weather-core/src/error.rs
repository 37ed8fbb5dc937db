use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire-level classification of a failure, carried in protocol error envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    UpstreamUnavailable,
    UpstreamProtocolError,
    UpstreamDataShapeError,
    InvalidRequest,
    TransportClosed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UpstreamUnavailable => "UpstreamUnavailable",
            ErrorKind::UpstreamProtocolError => "UpstreamProtocolError",
            ErrorKind::UpstreamDataShapeError => "UpstreamDataShapeError",
            ErrorKind::InvalidRequest => "InvalidRequest",
            ErrorKind::TransportClosed => "TransportClosed",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every failure the resolver, fetcher, protocol and scheduler can report.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WeatherError {
    /// No network/transport reachability to the upstream provider.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The provider answered, but the payload could not be understood.
    #[error("upstream protocol error: {0}")]
    UpstreamProtocol(String),

    /// The payload parsed but violates the forecast shape contract.
    #[error("upstream data shape error: {0}")]
    UpstreamDataShape(String),

    /// A tool invocation with a missing or invalid argument.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The protocol byte stream is gone.
    #[error("transport closed: {0}")]
    TransportClosed(String),
}

impl WeatherError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WeatherError::UpstreamUnavailable(_) => ErrorKind::UpstreamUnavailable,
            WeatherError::UpstreamProtocol(_) => ErrorKind::UpstreamProtocolError,
            WeatherError::UpstreamDataShape(_) => ErrorKind::UpstreamDataShapeError,
            WeatherError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            WeatherError::TransportClosed(_) => ErrorKind::TransportClosed,
        }
    }

    /// The human-readable part, without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            WeatherError::UpstreamUnavailable(m)
            | WeatherError::UpstreamProtocol(m)
            | WeatherError::UpstreamDataShape(m)
            | WeatherError::InvalidRequest(m)
            | WeatherError::TransportClosed(m) => m,
        }
    }

    /// Rebuild an error from a kind and message received over the wire.
    pub fn from_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::UpstreamUnavailable => WeatherError::UpstreamUnavailable(message),
            ErrorKind::UpstreamProtocolError => WeatherError::UpstreamProtocol(message),
            ErrorKind::UpstreamDataShapeError => WeatherError::UpstreamDataShape(message),
            ErrorKind::InvalidRequest => WeatherError::InvalidRequest(message),
            ErrorKind::TransportClosed => WeatherError::TransportClosed(message),
        }
    }

    /// Transient failures the scheduler absorbs with retry/backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WeatherError::UpstreamUnavailable(_) | WeatherError::UpstreamProtocol(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_and_message_survive_reconstruction() {
        let errors = [
            WeatherError::UpstreamUnavailable("offline".into()),
            WeatherError::UpstreamProtocol("bad json".into()),
            WeatherError::UpstreamDataShape("23 points".into()),
            WeatherError::InvalidRequest("no query".into()),
            WeatherError::TransportClosed("eof".into()),
        ];

        for err in errors {
            let rebuilt = WeatherError::from_kind(err.kind(), err.message());
            assert_eq!(rebuilt, err);
        }
    }

    #[test]
    fn only_upstream_transients_are_retryable() {
        assert!(WeatherError::UpstreamUnavailable(String::new()).is_retryable());
        assert!(WeatherError::UpstreamProtocol(String::new()).is_retryable());
        assert!(!WeatherError::UpstreamDataShape(String::new()).is_retryable());
        assert!(!WeatherError::InvalidRequest(String::new()).is_retryable());
        assert!(!WeatherError::TransportClosed(String::new()).is_retryable());
    }

    #[test]
    fn kind_serializes_as_bare_name() {
        let json = serde_json::to_string(&ErrorKind::UpstreamDataShapeError).unwrap();
        assert_eq!(json, "\"UpstreamDataShapeError\"");
        assert_eq!(ErrorKind::TransportClosed.to_string(), "TransportClosed");
    }

    #[test]
    fn display_includes_kind_context() {
        let err = WeatherError::UpstreamUnavailable("connection refused".into());
        assert_eq!(err.to_string(), "upstream unavailable: connection refused");
    }
}

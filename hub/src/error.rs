//! Error types for the `hub` crate.
use std::error::Error as StdError;
use std::fmt;

/// Errors raised while bridging a client connection to the hub.
///
/// None of these are fatal to the hub itself: decode errors are skipped by the
/// inbound pump, connection errors end a single client, and `HubUnavailable`
/// only tells a caller that the control loop has already stopped.
#[derive(Debug)]
pub struct Error {
    // Underlying error emitted by serde_json or the WebSocket transport
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    // Enum representing which category of error
    pub error_kind: HubErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubErrorKind {
    // Malformed JSON or a payload that does not match its envelope variant
    Decode,
    // Read or write failure on the duplex connection
    Connection,
    // The control loop has exited and no longer accepts events
    HubUnavailable,
}

impl Error {
    pub fn connection(source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Error {
            source: Some(source.into()),
            error_kind: HubErrorKind::Connection,
        }
    }

    pub fn hub_unavailable() -> Self {
        Error {
            source: None,
            error_kind: HubErrorKind::HubUnavailable,
        }
    }

    pub fn is_decode(&self) -> bool {
        self.error_kind == HubErrorKind::Decode
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "Hub Error ({:?}): {source}", self.error_kind),
            None => write!(f, "Hub Error ({:?})", self.error_kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: HubErrorKind::Decode,
        }
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(err: std::string::FromUtf8Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: HubErrorKind::Decode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_errors_map_to_decode_kind() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert_eq!(err.error_kind, HubErrorKind::Decode);
        assert!(err.is_decode());
        assert!(err.source().is_some());
    }

    #[test]
    fn test_invalid_utf8_maps_to_decode_kind() {
        let err: Error = String::from_utf8(vec![0xff, 0xfe]).unwrap_err().into();
        assert!(err.is_decode());
        assert!(err.to_string().contains("Decode"));
    }

    #[test]
    fn test_connection_error_keeps_its_source_message() {
        let err = Error::connection("connection reset by peer");
        assert_eq!(err.error_kind, HubErrorKind::Connection);
        assert!(err.to_string().contains("connection reset by peer"));
    }

    #[test]
    fn test_hub_unavailable_has_no_source() {
        let err = Error::hub_unavailable();
        assert_eq!(err.error_kind, HubErrorKind::HubUnavailable);
        assert!(err.source().is_none());
        assert!(!err.is_decode());
    }
}

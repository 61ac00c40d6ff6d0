use std::error::Error as StdError;
use std::fmt;

pub type Result<T> = core::result::Result<T, Error>;

/// Errors that stop the HTTP server from starting or serving.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ServerErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerErrorKind {
    // An allowed origin could not be used as a header value
    InvalidOrigin(String),
    // Binding the listen address or accepting connections failed
    Io,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (&self.error_kind, &self.source) {
            (ServerErrorKind::InvalidOrigin(origin), _) => {
                write!(f, "Invalid allowed origin {origin:?}")
            }
            (ServerErrorKind::Io, Some(source)) => write!(f, "Server I/O error: {source}"),
            (ServerErrorKind::Io, None) => write!(f, "Server I/O error"),
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

impl Error {
    pub(crate) fn invalid_origin(
        origin: &str,
        source: axum::http::header::InvalidHeaderValue,
    ) -> Self {
        Error {
            source: Some(Box::new(source)),
            error_kind: ServerErrorKind::InvalidOrigin(origin.to_string()),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: ServerErrorKind::Io,
        }
    }
}

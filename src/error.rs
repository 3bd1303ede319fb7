use std::fmt;
use std::io;

pub(crate) type TintaResult<T> = Result<T, Error>;

/// Errors that can occur while loading grammars and themes or tokenizing lines
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred when reading a grammar or theme file
    Io(io::Error),

    /// JSON parsing failed when loading a grammar or a theme.
    Json(serde_json::Error),

    /// An invalid hex color was encountered.
    /// Can only happen when parsing a theme color explicitly.
    #[allow(missing_docs)]
    InvalidHexColor { value: String, reason: String },

    /// A grammar was not found in the registry or through the locator.
    GrammarNotFound(String),

    /// A pattern of the grammar was rejected by the regex engine.
    /// Raised when building a grammar, never while tokenizing.
    #[allow(missing_docs)]
    InvalidRegex { pattern: String, message: String },

    /// A regex compilation error occurred during tokenization.
    /// End/while patterns with back-references are rewritten for every match
    /// so they can only be validated once resolved.
    TokenizeRegex(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Json(err) => write!(f, "JSON parsing error: {}", err),
            Error::InvalidHexColor { value, reason } => {
                write!(f, "invalid hex color '{}': {}", value, reason)
            }
            Error::GrammarNotFound(name) => write!(f, "grammar '{}' not found", name),
            Error::InvalidRegex { pattern, message } => {
                write!(f, "invalid regex '{}': {}", pattern, message)
            }
            Error::TokenizeRegex(message) => write!(f, "regex compilation error: {}", message),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Json(err) => Some(err),
            Error::InvalidHexColor { .. }
            | Error::GrammarNotFound(_)
            | Error::InvalidRegex { .. }
            | Error::TokenizeRegex(_) => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

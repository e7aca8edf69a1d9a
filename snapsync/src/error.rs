use std::error;
use std::fmt;

/// Result type used across the sync library.
pub type SyncResult<T> = Result<T, SyncError>;

/// Error raised by snapshot extraction, conversion, loading and orchestration.
///
/// Each error carries an [`ErrorKind`] used for retry and reporting decisions, a static
/// description and optionally a dynamic detail.
#[derive(Debug, Clone)]
pub struct SyncError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    WithDescription(ErrorKind, &'static str),
    WithDescriptionAndDetail(ErrorKind, &'static str, String),
}

/// Categories of sync failures.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    // Source errors
    AuthenticationError,
    NetworkError,
    TimeoutError,
    FormatError,
    SourceIoError,

    // Conversion errors
    UnsupportedType,
    ConversionError,

    // Destination errors
    TableMissing,
    DestinationConnectionFailed,
    DestinationQueryFailed,

    // IO & serialization errors
    IoError,
    SerializationError,
    DeserializationError,

    // Service errors
    ConfigError,
    InvalidState,

    Unknown,
}

impl ErrorKind {
    /// Returns whether a failure of this kind may succeed when attempted again.
    ///
    /// Rejected credentials and malformed archives are final.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::NetworkError
                | ErrorKind::TimeoutError
                | ErrorKind::SourceIoError
                | ErrorKind::IoError
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => kind,
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::WithDescriptionAndDetail(_, _, ref detail) => Some(detail.as_str()),
            ErrorRepr::WithDescription(..) => None,
        }
    }
}

/// Errors compare by kind and by whether they carry a detail.
impl PartialEq for SyncError {
    fn eq(&self, other: &SyncError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::WithDescription(kind_a, _), ErrorRepr::WithDescription(kind_b, _)) => {
                kind_a == kind_b
            }
            (
                ErrorRepr::WithDescriptionAndDetail(kind_a, _, _),
                ErrorRepr::WithDescriptionAndDetail(kind_b, _, _),
            ) => kind_a == kind_b,
            _ => false,
        }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.repr {
            ErrorRepr::WithDescription(kind, desc) => write!(f, "{kind:?}: {desc}"),
            ErrorRepr::WithDescriptionAndDetail(kind, desc, ref detail) => {
                write!(f, "{kind:?}: {desc} -> {detail}")
            }
        }
    }
}

impl error::Error for SyncError {}

impl From<(ErrorKind, &'static str)> for SyncError {
    fn from((kind, desc): (ErrorKind, &'static str)) -> SyncError {
        SyncError {
            repr: ErrorRepr::WithDescription(kind, desc),
        }
    }
}

impl From<(ErrorKind, &'static str, String)> for SyncError {
    fn from((kind, desc, detail): (ErrorKind, &'static str, String)) -> SyncError {
        SyncError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, desc, detail),
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> SyncError {
        let (kind, description) = match err.kind() {
            std::io::ErrorKind::TimedOut => (ErrorKind::TimeoutError, "I/O operation timed out"),
            _ => (ErrorKind::IoError, "I/O error occurred"),
        };

        SyncError::from((kind, description, err.to_string()))
    }
}

/// Classifies JSON failures by [`serde_json::error::Category`].
impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> SyncError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        SyncError::from((kind, description, err.to_string()))
    }
}

/// A damaged archive is a format problem; reading it from disk is an I/O problem.
impl From<zip::result::ZipError> for SyncError {
    fn from(err: zip::result::ZipError) -> SyncError {
        let (kind, description) = match err {
            zip::result::ZipError::Io(_) => (ErrorKind::SourceIoError, "Snapshot archive I/O failed"),
            _ => (ErrorKind::FormatError, "Snapshot archive is malformed"),
        };

        SyncError::from((kind, description, err.to_string()))
    }
}

impl From<tokio::time::error::Elapsed> for SyncError {
    fn from(err: tokio::time::error::Elapsed) -> SyncError {
        SyncError::from((
            ErrorKind::TimeoutError,
            "Operation exceeded its deadline",
            err.to_string(),
        ))
    }
}

impl From<rustls::Error> for SyncError {
    fn from(err: rustls::Error) -> SyncError {
        SyncError::from((
            ErrorKind::DestinationConnectionFailed,
            "TLS configuration failed",
            err.to_string(),
        ))
    }
}

/// Classifies destination failures by SQLSTATE.
impl From<tokio_postgres::Error> for SyncError {
    fn from(err: tokio_postgres::Error) -> SyncError {
        use tokio_postgres::error::SqlState;

        let (kind, description) = match err.code() {
            Some(sqlstate) => match *sqlstate {
                SqlState::CONNECTION_EXCEPTION
                | SqlState::CONNECTION_DOES_NOT_EXIST
                | SqlState::CONNECTION_FAILURE
                | SqlState::SQLCLIENT_UNABLE_TO_ESTABLISH_SQLCONNECTION
                | SqlState::SQLSERVER_REJECTED_ESTABLISHMENT_OF_SQLCONNECTION
                | SqlState::ADMIN_SHUTDOWN
                | SqlState::CRASH_SHUTDOWN
                | SqlState::CANNOT_CONNECT_NOW => (
                    ErrorKind::DestinationConnectionFailed,
                    "PostgreSQL connection error",
                ),

                SqlState::INVALID_AUTHORIZATION_SPECIFICATION | SqlState::INVALID_PASSWORD => (
                    ErrorKind::DestinationConnectionFailed,
                    "PostgreSQL authentication failed",
                ),

                SqlState::DATA_EXCEPTION
                | SqlState::INVALID_TEXT_REPRESENTATION
                | SqlState::CHARACTER_NOT_IN_REPERTOIRE
                | SqlState::UNTRANSLATABLE_CHARACTER
                | SqlState::STRING_DATA_RIGHT_TRUNCATION => (
                    ErrorKind::ConversionError,
                    "PostgreSQL rejected a value",
                ),

                SqlState::UNDEFINED_TABLE | SqlState::UNDEFINED_SCHEMA => (
                    ErrorKind::TableMissing,
                    "PostgreSQL table or schema not found",
                ),

                _ => (
                    ErrorKind::DestinationQueryFailed,
                    "PostgreSQL query failed",
                ),
            },
            None if err.is_closed() => (
                ErrorKind::DestinationConnectionFailed,
                "PostgreSQL connection closed",
            ),
            None => (
                ErrorKind::DestinationQueryFailed,
                "PostgreSQL client error",
            ),
        };

        SyncError::from((kind, description, err.to_string()))
    }
}

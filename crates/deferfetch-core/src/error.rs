//! Error types for result processing and batch initialization.

use crate::key::PendingAssociation;
use std::fmt;

/// The primary error type for all deferfetch operations.
#[derive(Debug)]
pub enum Error {
    /// A primary key could not be built from the available columns.
    InvalidKey(InvalidKeyError),
    /// A batched secondary load failed; the whole batch stays unresolved.
    SecondaryLoad(SecondaryLoadError),
    /// Unknown entity or association in the mapping catalog
    Mapping(MappingError),
    /// Misuse of a result cursor
    Cursor(CursorError),
    /// Configuration errors
    Config(ConfigError),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug, Clone)]
pub struct InvalidKeyError {
    pub kind: InvalidKeyKind,
    /// Entity the key was built for, when known.
    pub entity: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidKeyKind {
    /// No entity name was supplied
    MissingEntity,
    /// Entity name is not a valid identifier
    BadEntityName,
    /// Key has no components, or a key column is absent from the row
    MissingComponent,
    /// A key component is NULL
    NullComponent,
    /// A key component has no stable identity (float, JSON)
    UnhashableComponent,
}

#[derive(Debug)]
pub struct SecondaryLoadError {
    /// Association role of the failed batch.
    pub role: String,
    /// Target entity of the failed batch.
    pub target_entity: String,
    /// Every pending association of the batch; none of them was applied.
    pub pending: Vec<PendingAssociation>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone)]
pub struct MappingError {
    pub kind: MappingErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingErrorKind {
    /// No mapping registered for the entity name
    UnknownEntity,
    /// Foreign-key columns do not line up with the target's primary key
    KeyArity,
}

#[derive(Debug, Clone)]
pub struct CursorError {
    pub kind: CursorErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorErrorKind {
    /// The cursor was closed; no further rows are delivered.
    Closed,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Is this an invalid-key error (fatal for one row only)?
    pub fn is_invalid_key(&self) -> bool {
        matches!(self, Error::InvalidKey(_))
    }

    /// Is this a failed secondary load?
    pub fn is_secondary_load_failure(&self) -> bool {
        matches!(self, Error::SecondaryLoad(_))
    }

    /// Pending associations left unresolved by a failed batch, if any.
    pub fn failed_associations(&self) -> Option<&[PendingAssociation]> {
        match self {
            Error::SecondaryLoad(e) => Some(&e.pending),
            _ => None,
        }
    }

    /// Build a cursor-closed error.
    pub fn cursor_closed(operation: &str) -> Self {
        Error::Cursor(CursorError {
            kind: CursorErrorKind::Closed,
            message: format!("cannot {operation} on a closed cursor"),
        })
    }
}

impl InvalidKeyError {
    pub fn new(
        kind: InvalidKeyKind,
        entity: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            entity: entity.map(str::to_string),
            message: message.into(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidKey(e) => write!(f, "Invalid key: {}", e),
            Error::SecondaryLoad(e) => write!(f, "Secondary load failed: {}", e),
            Error::Mapping(e) => write!(f, "Mapping error: {}", e.message),
            Error::Cursor(e) => write!(f, "Cursor error: {}", e.message),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::SecondaryLoad(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for InvalidKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(entity) = &self.entity {
            write!(f, "{} (entity '{}')", self.message, entity)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl fmt::Display for SecondaryLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{} -> {}, {} pending association(s) unresolved]",
            self.message,
            self.role,
            self.target_entity,
            self.pending.len()
        )
    }
}

impl From<InvalidKeyError> for Error {
    fn from(err: InvalidKeyError) -> Self {
        Error::InvalidKey(err)
    }
}

impl From<SecondaryLoadError> for Error {
    fn from(err: SecondaryLoadError) -> Self {
        Error::SecondaryLoad(err)
    }
}

impl From<MappingError> for Error {
    fn from(err: MappingError) -> Self {
        Error::Mapping(err)
    }
}

impl From<CursorError> for Error {
    fn from(err: CursorError) -> Self {
        Error::Cursor(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(ConfigError {
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

/// Result type alias for deferfetch operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::EntityKey;
    use crate::value::Value;

    #[test]
    fn secondary_load_reports_pending() {
        let owner = EntityKey::new("Appointment", vec![Value::BigInt(1)]).unwrap();
        let target = EntityKey::new("User", vec![Value::BigInt(7)]).unwrap();
        let err = Error::SecondaryLoad(SecondaryLoadError {
            role: "owner".to_string(),
            target_entity: "User".to_string(),
            pending: vec![PendingAssociation::new(owner, "owner", target)],
            message: "connection reset".to_string(),
            source: Some(Box::new(std::io::Error::other("reset"))),
        });

        assert!(err.is_secondary_load_failure());
        assert!(!err.is_invalid_key());
        assert_eq!(err.failed_associations().map(<[_]>::len), Some(1));
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(
            err.to_string(),
            "Secondary load failed: connection reset [owner -> User, 1 pending association(s) unresolved]"
        );
    }

    #[test]
    fn invalid_key_display() {
        let err: Error =
            InvalidKeyError::new(InvalidKeyKind::NullComponent, Some("User"), "null key").into();
        assert!(err.is_invalid_key());
        assert_eq!(err.to_string(), "Invalid key: null key (entity 'User')");
    }

    #[test]
    fn cursor_closed_message() {
        let err = Error::cursor_closed("pull");
        match err {
            Error::Cursor(e) => {
                assert_eq!(e.kind, CursorErrorKind::Closed);
                assert_eq!(e.message, "cannot pull on a closed cursor");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}

//! Name-or-UUID identifiers.
//!
//! Most operations accept either a stable UUID or a human-friendly name. The
//! distinction is purely syntactic: anything that parses as a UUID is one.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Query key used for exact UUID matches.
pub const UUID_FILTER: &str = "uuid";

/// Query key used for exact name matches.
pub const NAME_FILTER: &str = "name_exact";

/// A resource reference supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Identifier {
    /// Canonical unique identifier
    UniqueId(Uuid),
    /// Display name
    Name(String),
}

impl Identifier {
    /// Classifies the input as a UUID or a name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the input is empty.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(Error::Validation("Empty ID is not allowed.".to_string()));
        }
        Ok(Uuid::parse_str(trimmed).map_or_else(|_| Self::Name(trimmed.to_string()), Self::UniqueId))
    }

    /// Returns true if the identifier is UUID-shaped.
    #[must_use]
    pub const fn is_unique_id(&self) -> bool {
        matches!(self, Self::UniqueId(_))
    }

    /// Returns the UUID, if any.
    #[must_use]
    pub const fn as_uuid(&self) -> Option<&Uuid> {
        match self {
            Self::UniqueId(uuid) => Some(uuid),
            Self::Name(_) => None,
        }
    }

    /// Returns the name, if any.
    #[must_use]
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Self::UniqueId(_) => None,
            Self::Name(name) => Some(name),
        }
    }

    /// Returns the filter pair that selects this identifier server-side.
    #[must_use]
    pub fn filter(&self) -> (&'static str, String) {
        match self {
            Self::UniqueId(_) => (UUID_FILTER, self.to_string()),
            Self::Name(name) => (NAME_FILTER, name.clone()),
        }
    }
}

impl From<Uuid> for Identifier {
    fn from(uuid: Uuid) -> Self {
        Self::UniqueId(uuid)
    }
}

impl FromStr for Identifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // The API renders UUIDs without dashes.
            Self::UniqueId(uuid) => write!(f, "{}", uuid.simple()),
            Self::Name(name) => f.write_str(name),
        }
    }
}

/// Returns true if the string parses as a UUID.
#[must_use]
pub fn is_uuid(value: &str) -> bool {
    Uuid::parse_str(value.trim()).is_ok()
}

/// Validates a UUID string.
///
/// # Errors
///
/// Returns [`Error::Validation`] naming `what` if the string is not a UUID.
pub fn require_uuid(value: &str, what: &str) -> Result<Uuid> {
    Uuid::parse_str(value.trim()).map_err(|_| {
        Error::Validation(format!("The UUID of {what} has unexpected format: {value}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HYPHENATED: &str = "df3ee5ca-c587-4dff-a1aa-d86bc1919d8d";
    const SIMPLE: &str = "df3ee5cac5874dffa1aad86bc1919d8d";

    #[test]
    fn hyphenated_uuid_is_unique_id() {
        let id = Identifier::parse(HYPHENATED).unwrap();
        assert!(id.is_unique_id());
        assert_eq!(id.to_string(), SIMPLE);
    }

    #[test]
    fn simple_uuid_is_unique_id() {
        let id: Identifier = SIMPLE.parse().unwrap();
        assert_eq!(id.as_uuid().map(|u| u.simple().to_string()), Some(SIMPLE.to_string()));
        assert_eq!(id.filter(), ("uuid", SIMPLE.to_string()));
    }

    #[test]
    fn anything_else_is_a_name() {
        for input in ["web", "59e46d029a79473779915a22", "my tenant", "uuid_subnet"] {
            let id = Identifier::parse(input).unwrap();
            assert_eq!(id.as_name(), Some(input));
            assert_eq!(id.filter(), ("name_exact", input.to_string()));
        }
    }

    #[test]
    fn empty_identifier_is_rejected() {
        let err = Identifier::parse("  ").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn require_uuid_reports_subject() {
        let err = require_uuid("nope", "SLURM allocation").unwrap_err();
        assert_eq!(
            err,
            Error::Validation("The UUID of SLURM allocation has unexpected format: nope".to_string())
        );
        assert!(require_uuid(HYPHENATED, "x").is_ok());
        assert!(is_uuid(SIMPLE));
        assert!(!is_uuid("subnet"));
    }
}

use thiserror::Error;

/// PostgreSQL SQLSTATE for unique_violation.
pub const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Error)]
pub enum DatabaseError {
    /// A uniqueness constraint rejected the write. `constraint` is the index name
    /// when the backend reported one.
    #[error("Unique constraint violated: {}", constraint.as_deref().unwrap_or("unknown"))]
    UniqueViolation { constraint: Option<String> },

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl DatabaseError {
    pub fn is_unique_violation_of(&self, name: &str) -> bool {
        matches!(self, DatabaseError::UniqueViolation { constraint: Some(c) } if c == name)
    }
}

impl From<reqwest::Error> for DatabaseError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            DatabaseError::Decode(e.to_string())
        } else {
            DatabaseError::Transport(e.to_string())
        }
    }
}

/// Extracts the constraint name from a PostgREST error body such as
/// `duplicate key value violates unique constraint "appointments_slot_unique"`.
pub fn constraint_from_message(message: &str) -> Option<String> {
    let marker = "unique constraint \"";
    let start = message.find(marker)? + marker.len();
    let rest = &message[start..];
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_name_is_parsed_from_postgrest_message() {
        let msg = "duplicate key value violates unique constraint \"appointments_slot_unique\"";
        assert_eq!(constraint_from_message(msg).as_deref(), Some("appointments_slot_unique"));
        assert_eq!(constraint_from_message("something else"), None);
    }

    #[test]
    fn unique_violation_matches_by_name() {
        let err = DatabaseError::UniqueViolation { constraint: Some("a".into()) };
        assert!(err.is_unique_violation_of("a"));
        assert!(!err.is_unique_violation_of("b"));
    }
}

//! Error types for the mail entity model.

use thiserror::Error;

/// An address could not be parsed into a [`crate::MailAddress`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// Nothing to parse.
    #[error("Empty address")]
    Empty,

    /// The input was not a single mailbox (`local@domain`).
    #[error("Invalid address '{0}': {1}")]
    Invalid(String, String),

    /// Group syntax (`name: a@b, c@d;`) is not a single recipient.
    #[error("Group address '{0}' cannot be used as a mailbox")]
    Group(String),
}

/// The structured view of a message could not be produced.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContentError {
    /// The header block is malformed.
    #[error("Malformed headers: {0}")]
    MalformedHeaders(String),

    /// A header value could not be decoded.
    #[error("Undecodable header {name}: {reason}")]
    Undecodable { name: String, reason: String },
}

/// A state name was rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    /// State names may not be empty or whitespace.
    #[error("State name cannot be empty")]
    Empty,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AddressError::Invalid("nope".to_string(), "missing @".to_string());
        assert_eq!(err.to_string(), "Invalid address 'nope': missing @");

        let err = ContentError::Undecodable {
            name: "Subject".to_string(),
            reason: "bad charset".to_string(),
        };
        assert_eq!(err.to_string(), "Undecodable header Subject: bad charset");

        assert_eq!(StateError::Empty.to_string(), "State name cannot be empty");
    }
}

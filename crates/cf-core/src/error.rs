//! # FeedError
//!
//! Centralized error handling for the campus-feed crates.
//! Maps the failure taxonomy (validation, authentication, store) to one enum.

use std::fmt;

use thiserror::Error;

/// The primary error type for all feed operations.
#[derive(Error, Debug)]
pub enum FeedError {
    /// User-correctable input problem, flagged at one field.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The operation needs a signed-in user and there is none.
    #[error("unauthenticated")]
    Unauthenticated,

    /// Signed in, but not allowed to touch this resource.
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("email verification not observed after {attempts} checks")]
    VerificationTimedOut { attempts: u32 },

    /// Resource not found (e.g., Post, Poll, Profile)
    #[error("{0} not found with ID {1}")]
    NotFound(String, String),

    /// A stored document did not have the expected shape.
    #[error("malformed document: {0}")]
    Decode(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Infrastructure failure reported by a port (network, permissions).
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl FeedError {
    /// The flagged field, when this is a validation failure.
    pub fn field(&self) -> Option<Field> {
        match self {
            FeedError::Validation(v) => Some(v.field),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::Decode(err.to_string())
    }
}

/// A specialized Result type for feed logic.
pub type Result<T> = std::result::Result<T, FeedError>;

/// Input fields that can be flagged by form validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Space,
    Title,
    Content,
    Username,
    Email,
    Password,
    RetypePassword,
    Question,
    PollOption(usize),
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Space => f.write_str("space"),
            Field::Title => f.write_str("title"),
            Field::Content => f.write_str("content"),
            Field::Username => f.write_str("username"),
            Field::Email => f.write_str("email"),
            Field::Password => f.write_str("password"),
            Field::RetypePassword => f.write_str("retypePassword"),
            Field::Question => f.write_str("question"),
            Field::PollOption(i) => write!(f, "option {}", i + 1),
        }
    }
}

/// Why a field was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    #[error("required")]
    Missing,
    #[error("unknown space")]
    UnknownSpace,
    #[error("longer than {max} characters")]
    TooLong { max: usize },
    #[error("more than {max} lines")]
    TooManyLines { max: usize },
    #[error("shorter than {min} characters")]
    TooShort { min: usize },
    #[error("not a valid email address")]
    InvalidEmail,
    #[error("must be a college (.edu) email")]
    NotCollegeEmail,
    #[error("email domain is not associated with any school")]
    UnknownSchool,
    #[error("passwords do not match")]
    Mismatch,
    #[error("already belongs to another account")]
    AlreadyInUse,
    #[error("at least {min} options required")]
    TooFewOptions { min: usize },
    #[error("at most {max} options allowed")]
    TooManyOptions { max: usize },
    #[error("no such option")]
    OutOfRange,
}

/// One flagged field and the reason it was flagged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: Field,
    pub reason: Reason,
}

impl ValidationError {
    pub fn new(field: Field, reason: Reason) -> Self {
        Self { field, reason }
    }
}

/// Returned when a string names none of the fixed spaces.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown space `{0}`")]
pub struct UnknownSpace(pub String);

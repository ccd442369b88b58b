//! Errors raised by repositories, whichever backend serves them.

use thiserror::Error;

/// Which constraint rejected a write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub table: Option<String>,
    pub constraint: Option<String>,
    pub message: String,
}

impl Violation {
    fn from_database(err: &dyn sqlx::error::DatabaseError) -> Self {
        Self {
            table: err.table().map(str::to_string),
            constraint: err.constraint().map(str::to_string),
            message: err.message().to_string(),
        }
    }
}

/// Repository failures callers can act on; everything else is [`DbError::Other`]
#[derive(Error, Debug)]
pub enum DbError {
    #[error("Entity not found")]
    NotFound,

    /// A receipt, coupon code or offer code that must be unique already exists
    #[error("Unique constraint violation: {}", .0.message)]
    UniqueViolation(Violation),

    #[error("Foreign key constraint violation: {}", .0.message)]
    ForeignKeyViolation(Violation),

    /// A stored row would break a CHECK rule, e.g. a negative balance
    #[error("Check constraint violation: {}", .0.message)]
    CheckViolation(Violation),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DbError {
    /// Whether this is a unique violation on the named constraint
    pub fn is_unique_violation_on(&self, name: &str) -> bool {
        matches!(self, DbError::UniqueViolation(Violation { constraint: Some(c), .. }) if c == name)
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        let violation = match &err {
            sqlx::Error::RowNotFound => return DbError::NotFound,
            sqlx::Error::Database(db_err) => {
                let violation = Violation::from_database(&**db_err);
                if db_err.is_unique_violation() {
                    Some(DbError::UniqueViolation(violation))
                } else if db_err.is_foreign_key_violation() {
                    Some(DbError::ForeignKeyViolation(violation))
                } else if db_err.is_check_violation() {
                    Some(DbError::CheckViolation(violation))
                } else {
                    None
                }
            }
            _ => None,
        };
        violation.unwrap_or_else(|| DbError::Other(err.into()))
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

pub mod models;
pub mod repositories;
pub mod schema;
pub mod store;

pub use store::ReconstructionStore;

use crate::blob::BlobError;
use rusqlite::ErrorCode;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Could not open database {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Invalid {entity} payload: {message}")]
    InvalidShape {
        entity: &'static str,
        message: String,
    },

    #[error("Blob error: {0}")]
    Blob(#[from] BlobError),

    #[error("Database query error: {0}")]
    Query(rusqlite::Error),
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref failure, ref message)
                if failure.code == ErrorCode::ConstraintViolation =>
            {
                DatabaseError::Constraint(
                    message.clone().unwrap_or_else(|| failure.to_string()),
                )
            }
            other => DatabaseError::Query(other),
        }
    }
}

impl DatabaseError {
    pub fn is_constraint(&self) -> bool {
        matches!(self, DatabaseError::Constraint(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DatabaseError::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, DatabaseError>;

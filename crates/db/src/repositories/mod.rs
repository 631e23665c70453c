use frontdesk_core::errors::StoreError;
use frontdesk_core::safety::AdmissionStoreError;
use thiserror::Error;

pub mod action_log;
pub mod admission;
pub mod events;
pub mod rule;

pub use action_log::SqlActionLogRepository;
pub use admission::SqlAdmissionStore;
pub use events::SqlEventHistory;
pub use rule::SqlRuleRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for StoreError {
    fn from(value: RepositoryError) -> Self {
        StoreError::backend(value)
    }
}

impl From<RepositoryError> for AdmissionStoreError {
    fn from(value: RepositoryError) -> Self {
        AdmissionStoreError::backend(value)
    }
}

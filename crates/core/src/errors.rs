use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("unknown trigger kind `{0}`")]
    UnknownTriggerKind(String),
    #[error("unknown action kind `{0}`")]
    UnknownActionKind(String),
    #[error("unknown rule status `{0}`")]
    UnknownRuleStatus(String),
    #[error("unknown execution status `{0}`")]
    UnknownExecutionStatus(String),
}

/// Backend failure surfaced by a repository or store trait. Collaborator
/// implementations flatten their native errors into this so core logic does
/// not depend on sqlx or HTTP types.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("storage failure: {0}")]
pub struct StoreError(pub String);

impl StoreError {
    pub fn backend(message: impl std::fmt::Display) -> Self {
        Self(message.to_string())
    }
}

//! Application-wide error types.

use thiserror::Error;

use crate::llm::ProviderError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("memory error: {0}")]
    Memory(String),

    #[error("llm error: {0}")]
    Llm(#[from] ProviderError),

    #[error("comms error: {0}")]
    Comms(String),

    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

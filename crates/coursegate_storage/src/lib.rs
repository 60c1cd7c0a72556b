#![forbid(unsafe_code)]

pub mod kv;
pub mod pending_orders;
pub mod repo;

use coursegate_kernel_contracts::ContractViolation;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StorageError {
    #[error("storage io failure at '{path}': {message}")]
    Io { path: String, message: String },
    #[error("storage payload could not be decoded: {0}")]
    Decode(String),
    #[error("storage payload could not be encoded: {0}")]
    Encode(String),
    #[error("storage lock poisoned")]
    LockPoisoned,
    #[error("contract violation: {0}")]
    ContractViolation(ContractViolation),
}

impl From<ContractViolation> for StorageError {
    fn from(v: ContractViolation) -> Self {
        StorageError::ContractViolation(v)
    }
}

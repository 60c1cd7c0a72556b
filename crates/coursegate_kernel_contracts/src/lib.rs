#![forbid(unsafe_code)]

pub mod common;
pub mod course;
pub mod enrollment;
pub mod gate;
pub mod order;
pub mod progress;

pub use common::{ContractViolation, ReasonCodeId, SchemaVersion, UnixTimeMs, Validate};

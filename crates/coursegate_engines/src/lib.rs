#![forbid(unsafe_code)]

pub mod gate;
pub mod navigator;
pub mod order_scan;
pub mod progress_index;
pub mod summary;

//! Adapter implementations for the tool server repository port.

pub mod memory;
pub mod postgres;

//! Shared low-level utilities used across Pilum components.

pub mod bytes;
pub mod varint;

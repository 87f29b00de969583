//! Deterministic save/restore encoding for emulated devices.

pub mod io;

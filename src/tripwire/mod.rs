//! Tripwire — install verification, checksums, event log.

pub mod eventlog;
pub mod hasher;
pub mod verify;

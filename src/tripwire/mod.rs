//! Tripwire — BLAKE3 content hashing and the provenance event log.

pub mod eventlog;
pub mod hasher;

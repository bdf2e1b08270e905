//! Deterministic, pure logic for the engagement loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests; the
//! only nondeterminism (vote sampling) comes from an RNG the caller supplies.

pub mod budget;
pub mod decision;
pub mod dedup;
pub mod merge;
pub mod phase;
pub mod policy;
pub mod types;

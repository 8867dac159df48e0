//! End-to-end test suite for Lumen.
//!
//! Wires the follower, publisher and query surfaces together over an
//! in-memory origin and blob store.

pub mod helpers;

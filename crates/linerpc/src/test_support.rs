//! In-memory connection fixture (spec §8, SPEC_FULL.md component N "Test
//! harness").
//!
//! A connected `UnixStream` pair gives each end of a test connection a real
//! `Read + Write` socket without binding a TCP port or touching the
//! filesystem — the simplest way to get two independently-owned,
//! `try_clone`-able stream halves, which is exactly what
//! [`crate::connection::Stream`] needs. Public (not `#[cfg(test)]`-gated)
//! so both this crate's unit tests and `tests/` integration tests can build
//! a pair of connected [`crate::connection::Connection`]s talking only to
//! each other.

#![cfg(unix)]

use std::os::unix::net::UnixStream;

/// A connected pair of in-memory duplex stream ends, for feeding two
/// [`crate::connection::Connection`]s that talk only to each other.
pub fn duplex_pair() -> (UnixStream, UnixStream) {
    UnixStream::pair().expect("failed to create a unix socket pair")
}

//! Connection-scoped identifiers: the monotonic request-id counter and the
//! random connection id used to build hosted-object synthetic names.
//!
//! Grounded on `arti-rpc-client-core`'s `IdGenerator` (`msgs/request.rs`),
//! simplified: this protocol's ids are plain ascending integers, not the
//! `"!auto!--N"` string scheme the Arti RPC client uses to avoid colliding
//! with caller-supplied ids (this protocol has no caller-supplied ids).

use std::sync::atomic::{AtomicU64, Ordering};

/// A small opaque per-connection identifier, used only to build hosted
/// object synthetic names (`"<class>_<hex4 id>"`). Not a security boundary.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a fresh random connection id.
    pub fn random() -> Self {
        ConnectionId(rand::random())
    }

    /// Render the low 16 bits as 4 lowercase hex digits, as used in hosted
    /// object synthetic names.
    pub fn hex4(self) -> String {
        format!("{:04x}", self.0 & 0xffff)
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// The monotonic outgoing-request-id allocator (spec §4.C).
///
/// `next()` is the only operation; the mutual exclusion spec calls the "id
/// lock" is provided here by an atomic increment rather than a `Mutex<u64>`,
/// since the only invariant that matters (strict monotonicity, no reuse) is
/// exactly what `fetch_add` gives us.
#[derive(Debug, Default)]
pub struct IdAllocator {
    counter: AtomicU64,
}

impl IdAllocator {
    /// Create a fresh allocator whose counter starts at 0; the first call to
    /// [`IdAllocator::next`] preincrements it and returns 1, matching spec
    /// §3's "starts at 0, `get_id` returns preincremented value".
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    /// Return a fresh id, strictly greater than every id this allocator has
    /// previously returned.
    pub fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_strictly_increasing() {
        let ids = IdAllocator::new();
        let mut last = ids.next();
        for _ in 0..1000 {
            let next = ids.next();
            assert!(next > last, "id monotonicity violated: {next} <= {last}");
            last = next;
        }
    }

    #[test]
    fn first_id_is_one_preincremented_from_a_zero_start() {
        let ids = IdAllocator::new();
        assert_eq!(ids.next(), 1);
    }

    #[test]
    fn connection_id_hex4_is_four_lowercase_hex_digits() {
        let id = ConnectionId::random();
        let hex = id.hex4();
        assert_eq!(hex.len(), 4);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}

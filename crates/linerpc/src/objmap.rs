//! The per-connection hosted-object table (spec §3 "Hosted object", §4.D).
//!
//! Grounded conceptually on `arti-rpcserver::objmap` (a generational arena
//! keyed by unforgeable ids), simplified: this protocol's names are plain
//! strings derived from the object's type name plus a per-object id, with no
//! cryptographic unforgeability requirement (no auth is in scope), so a
//! `Mutex<HashMap>` keyed on pointer identity is sufficient and much
//! smaller than an arena.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::ids::IdAllocator;
use crate::object::{object_identity, Object};

/// Registers and looks up locally-hosted objects by their synthetic name.
///
/// Registration is lazy (happens on first outbound serialization) and
/// idempotent (spec §3: "the same user object gets the same synthetic name
/// ... across its lifetime"). Removal happens only via `__delete__` or
/// connection close (spec §5 "Resource lifetime": "no implicit GC across
/// the network").
pub struct HostedObjects {
    /// Mints the per-object id that becomes a name's hex suffix. Spec §3
    /// reads this as "hex4 connection id", but the reference's
    /// `connection.py` actually calls `self.get_id()` — a fresh id minted
    /// per registration, not the connection's own constant id — to build
    /// it; a constant suffix would make every hosted object on a connection
    /// collide on the same name. This allocator is scoped to the table
    /// rather than shared with the outbound-request id counter in
    /// [`crate::request::Registry`], so hosted-object ids and request ids
    /// don't need to interleave.
    ids: IdAllocator,
    by_name: Mutex<HashMap<String, Arc<dyn Object>>>,
    /// Reverse index from object identity to the name already assigned to
    /// it, so repeated registration of the same `Arc` is a no-op lookup
    /// rather than a linear scan of `by_name`.
    names_by_identity: Mutex<HashMap<usize, String>>,
}

impl HostedObjects {
    /// A fresh, empty table.
    pub fn new() -> Self {
        HostedObjects {
            ids: IdAllocator::new(),
            by_name: Mutex::new(HashMap::new()),
            names_by_identity: Mutex::new(HashMap::new()),
        }
    }

    /// Register `obj`, returning its synthetic name. If `obj` was already
    /// registered on this table, returns the same name it got the first
    /// time (spec's idempotence invariant); otherwise it gets a name built
    /// from a fresh id, so two distinct objects never collide.
    pub fn register(&self, obj: Arc<dyn Object>) -> String {
        let identity = object_identity(&obj);
        let mut names = self.names_by_identity.lock().expect("hosted object table poisoned");
        if let Some(existing) = names.get(&identity) {
            return existing.clone();
        }
        let class_name = type_tag(&obj);
        let fresh_id = self.ids.next();
        let name = format!("{}_{:04x}", class_name, fresh_id & 0xffff);
        names.insert(identity, name.clone());
        drop(names);
        self.by_name
            .lock()
            .expect("hosted object table poisoned")
            .insert(name.clone(), obj);
        name
    }

    /// Look up a previously-registered object by its synthetic name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Object>> {
        self.by_name.lock().expect("hosted object table poisoned").get(name).cloned()
    }

    /// Remove `name` from the table, invoking the object's
    /// [`Object::shutdown`] hook first. No-op (besides returning `false`) if
    /// `name` was never registered — this is the path the `__delete__`
    /// protocol uses, and repeated deletes must not panic.
    pub fn remove(&self, name: &str) -> bool {
        let removed = self.by_name.lock().expect("hosted object table poisoned").remove(name);
        match removed {
            Some(obj) => {
                obj.shutdown();
                let identity = object_identity(&obj);
                self.names_by_identity
                    .lock()
                    .expect("hosted object table poisoned")
                    .remove(&identity);
                true
            }
            None => false,
        }
    }

    /// Tear down every entry at connection close, running each object's
    /// shutdown hook (spec §4.I `close`: root handler's `_shutdown`; this
    /// extends the same policy to every hosted object, since their
    /// lifetime is otherwise tied to the connection per spec §5).
    pub fn clear(&self) {
        let drained: Vec<_> = self.by_name.lock().expect("hosted object table poisoned").drain().collect();
        self.names_by_identity.lock().expect("hosted object table poisoned").clear();
        for (_, obj) in drained {
            obj.shutdown();
        }
    }

    /// Number of currently-registered objects, for tests.
    pub fn len(&self) -> usize {
        self.by_name.lock().expect("hosted object table poisoned").len()
    }

    /// `true` if the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A coarse stand-in for "the object's class name, lowercased" (spec §3).
/// Rust has no runtime class-name reflection for arbitrary trait objects,
/// so hosted objects built via [`crate::object::SimpleObject`] are all
/// tagged `"object"`; types wanting a distinct tag implement a small marker
/// method instead. This keeps the synthetic-name *shape* faithful
/// (`"<tag>_<hex4>"`) without requiring every `Object` impl to supply
/// reflection machinery the protocol doesn't otherwise need.
fn type_tag(_obj: &Arc<dyn Object>) -> &'static str {
    "object"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::SimpleObject;

    #[test]
    fn registering_the_same_object_twice_returns_the_same_name() {
        let table = HostedObjects::new();
        let obj: Arc<dyn Object> = Arc::new(SimpleObject::new());
        let first = table.register(obj.clone());
        let second = table.register(obj);
        assert_eq!(first, second);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn distinct_objects_get_distinct_names_but_share_a_tag_prefix() {
        let table = HostedObjects::new();
        let a: Arc<dyn Object> = Arc::new(SimpleObject::new());
        let b: Arc<dyn Object> = Arc::new(SimpleObject::new());
        let name_a = table.register(a);
        let name_b = table.register(b);
        assert_ne!(name_a, name_b);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn remove_runs_shutdown_and_is_idempotent() {
        let table = HostedObjects::new();
        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ran_clone = ran.clone();
        let obj: Arc<dyn Object> =
            Arc::new(SimpleObject::new().with_shutdown_hook(move || ran_clone.store(true, std::sync::atomic::Ordering::SeqCst)));
        let name = table.register(obj);
        assert!(table.remove(&name));
        assert!(ran.load(std::sync::atomic::Ordering::SeqCst));
        assert!(!table.remove(&name));
    }
}

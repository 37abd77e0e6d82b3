//! The request handle and the pending-request registry (spec §4.C, §4.F).
//!
//! Grounded on `arti-rpc-client-core::conn::connimpl`'s `RequestState` /
//! `Receiver` pair: a condvar-guarded slot that the reader thread fills in
//! and a waiter blocks on, generalized here to also support the repeated
//! fills pipe mode needs.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};

use crate::codec::RpcValue;
use crate::error::{CallError, LocalError};
use crate::ids::IdAllocator;

/// One reply as delivered by the dispatcher: either a result value or an
/// error message (spec §6 response frame: `result`/`error` are mutually
/// exclusive).
#[derive(Clone, Debug)]
pub enum Reply {
    Result(RpcValue),
    Error(String),
}

/// A caller-supplied hook fired once per reply as it is delivered (spec
/// §3's "optional user callback", §4.F: "a callback, if provided, fires on
/// each response"). Runs on the dispatcher's thread inside
/// [`Registry::deliver`], before the waiting [`Request::value`]/
/// [`Request::next`] caller (if any) wakes — so a callback on a pipe-mode
/// request sees every reply in order, independent of whether the caller is
/// also polling `next()`.
pub type ReplyCallback = Box<dyn Fn(&Reply) + Send + Sync>;

enum Slot {
    /// Nothing has arrived yet.
    Empty,
    /// One or more replies buffered, oldest first.
    Filled(VecDeque<Reply>),
    /// The connection closed while this request was outstanding.
    ConnectionClosed,
}

struct Inner {
    slot: Mutex<Slot>,
    ready: Condvar,
    callback: Option<ReplyCallback>,
}

/// A receptacle for the response(s) to one outgoing request.
///
/// In single-response mode (`call`/`method`), exactly one [`Reply`] is ever
/// delivered, after which the request is dropped from the registry. In
/// pipe mode, multiple replies sharing the same id may arrive over time;
/// [`Request::next`] blocks for each one in turn until the caller calls
/// [`Request::close`].
pub struct Request {
    id: u64,
    inner: Arc<Inner>,
    pipe_mode: bool,
    registry: Arc<Registry>,
}

impl Request {
    fn new(
        id: u64,
        pipe_mode: bool,
        registry: Arc<Registry>,
        callback: Option<ReplyCallback>,
    ) -> (Self, Arc<Inner>) {
        let inner = Arc::new(Inner {
            slot: Mutex::new(Slot::Empty),
            ready: Condvar::new(),
            callback,
        });
        (
            Request {
                id,
                inner: inner.clone(),
                pipe_mode,
                registry,
            },
            inner,
        )
    }

    /// This request's outgoing id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Block for the single response (`call`/`method` modes). Consumes the
    /// one reply this request will ever receive.
    pub fn value(&self) -> Result<RpcValue, CallError> {
        debug_assert!(!self.pipe_mode, "value() is for single-response modes");
        match self.wait_for_reply()? {
            Reply::Result(v) => Ok(v),
            Reply::Error(msg) => Err(CallError::Remote(msg)),
        }
    }

    /// Block for the next response in pipe mode. Returns `Ok(None)` once
    /// the caller has called [`Request::close`] and no further replies will
    /// arrive.
    pub fn next(&self) -> Result<Option<Result<RpcValue, String>>, CallError> {
        debug_assert!(self.pipe_mode, "next() is for pipe mode");
        let mut slot = self.inner.slot.lock().expect("request slot poisoned");
        loop {
            match &mut *slot {
                Slot::Empty => {
                    slot = self.inner.ready.wait(slot).expect("request slot poisoned");
                }
                Slot::Filled(queue) => {
                    let reply = queue.pop_front().expect("Filled slot is never empty");
                    return Ok(Some(match reply {
                        Reply::Result(v) => Ok(v),
                        Reply::Error(msg) => Err(msg),
                    }));
                }
                Slot::ConnectionClosed => return Err(CallError::ConnectionClosed),
            }
        }
    }

    fn wait_for_reply(&self) -> Result<Reply, CallError> {
        let mut slot = self.inner.slot.lock().expect("request slot poisoned");
        loop {
            match &mut *slot {
                Slot::Empty => {
                    slot = self.inner.ready.wait(slot).expect("request slot poisoned");
                }
                Slot::Filled(queue) => {
                    return Ok(queue.pop_front().expect("Filled slot is never empty"));
                }
                Slot::ConnectionClosed => return Err(CallError::ConnectionClosed),
            }
        }
    }

    /// Explicitly close a pipe-mode request, unregistering it from the
    /// pending map. Spec §4.F: "sends a server-side hint ... and
    /// unregisters". The hint itself (a `__delete__`-style notification) is
    /// a connection-level concern left to the caller, since only the
    /// connection knows the qualified method name this pipe was opened
    /// against.
    pub fn close(&self) {
        self.registry.remove(self.id);
    }
}

/// The outgoing-request id allocator plus the pending-id → [`Request`] map
/// (spec §4.C).
pub struct Registry {
    ids: IdAllocator,
    pending: Mutex<HashMap<u64, (Arc<Inner>, bool)>>,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Arc::new(Registry {
            ids: IdAllocator::new(),
            pending: Mutex::new(HashMap::new()),
        })
    }

    /// Allocate a fresh id (spec §4.C `get_id`).
    pub fn next_id(&self) -> u64 {
        self.ids.next()
    }

    /// Register a fresh single-response or pipe-mode request under a
    /// caller-chosen id. Fails with [`LocalError::DuplicateRequestId`] if
    /// the id is already pending — this should never happen for ids minted
    /// by [`Registry::next_id`], but is checked anyway: a duplicate id is a
    /// local programming error, not an invariant to silently uphold.
    pub fn add_request(
        self: &Arc<Self>,
        id: u64,
        pipe_mode: bool,
    ) -> Result<Request, LocalError> {
        self.add_request_with_callback(id, pipe_mode, None)
    }

    /// As [`Registry::add_request`], but also registers a [`ReplyCallback`]
    /// fired on every reply this request receives (spec §4.F).
    pub fn add_request_with_callback(
        self: &Arc<Self>,
        id: u64,
        pipe_mode: bool,
        callback: Option<ReplyCallback>,
    ) -> Result<Request, LocalError> {
        let (request, inner) = Request::new(id, pipe_mode, self.clone(), callback);
        let mut pending = self.pending.lock().expect("pending map poisoned");
        if pending.contains_key(&id) {
            return Err(LocalError::DuplicateRequestId(id));
        }
        pending.insert(id, (inner, pipe_mode));
        Ok(request)
    }

    /// Deliver a reply for `id`. Returns `true` if a pending request was
    /// found (spec §4.G: "missing id is a silent drop (logged)" — logging
    /// that is the dispatcher's job, based on this return value).
    ///
    /// Single-response requests are removed from the map immediately
    /// (`auto_close`); pipe-mode requests stay registered until
    /// [`Request::close`] removes them.
    pub fn deliver(&self, id: u64, reply: Reply) -> bool {
        let mut pending = self.pending.lock().expect("pending map poisoned");
        let Some((inner, pipe_mode)) = pending.get(&id) else {
            return false;
        };
        let inner = inner.clone();
        let pipe_mode = *pipe_mode;
        if !pipe_mode {
            pending.remove(&id);
        }
        drop(pending);

        if let Some(callback) = &inner.callback {
            callback(&reply);
        }

        let mut slot = inner.slot.lock().expect("request slot poisoned");
        match &mut *slot {
            Slot::Filled(queue) => queue.push_back(reply),
            Slot::Empty => {
                let mut queue = VecDeque::new();
                queue.push_back(reply);
                *slot = Slot::Filled(queue);
            }
            Slot::ConnectionClosed => {}
        }
        drop(slot);
        inner.ready.notify_all();
        true
    }

    /// Remove `id` unconditionally (auto-close for single-response modes,
    /// or explicit [`Request::close`] in pipe mode).
    pub fn remove(&self, id: u64) {
        self.pending.lock().expect("pending map poisoned").remove(&id);
    }

    /// `true` if `id` is currently pending.
    pub fn contains(&self, id: u64) -> bool {
        self.pending.lock().expect("pending map poisoned").contains_key(&id)
    }

    /// Number of currently pending requests, for the id-uniqueness
    /// invariant tests.
    pub fn len(&self) -> usize {
        self.pending.lock().expect("pending map poisoned").len()
    }

    /// Wake every pending request with a connection-closed error (spec §5:
    /// "pending synchronous calls still waiting receive a
    /// connection-closed error via their handle").
    pub fn close_all(&self) {
        let drained: Vec<_> = self.pending.lock().expect("pending map poisoned").drain().collect();
        for (_, (inner, _pipe_mode)) in drained {
            let mut slot = inner.slot.lock().expect("request slot poisoned");
            *slot = Slot::ConnectionClosed;
            drop(slot);
            inner.ready.notify_all();
        }
    }

    /// Block with a timeout variant, used by tests exercising the
    /// configurable read timeout (spec §5 "Cancellation and timeouts").
    #[cfg(test)]
    pub fn pending_ids(&self) -> Vec<u64> {
        self.pending.lock().expect("pending map poisoned").keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use serde_json::Value;

    #[test]
    fn callback_fires_once_for_a_single_response_request() {
        let registry = Registry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let callback: ReplyCallback = Box::new(move |reply| {
            seen_clone.lock().unwrap().push(reply.clone());
        });
        let id = registry.next_id();
        let request = registry
            .add_request_with_callback(id, false, Some(callback))
            .unwrap();
        assert!(registry.deliver(id, Reply::Result(RpcValue::from_json(Value::from(7)))));
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(matches!(request.value(), Ok(v) if v.into_json().unwrap() == Value::from(7)));
    }

    #[test]
    fn callback_fires_for_every_reply_in_pipe_mode() {
        let registry = Registry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let callback: ReplyCallback = Box::new(move |_reply| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        let id = registry.next_id();
        let request = registry
            .add_request_with_callback(id, true, Some(callback))
            .unwrap();
        for i in 0..3 {
            assert!(registry.deliver(id, Reply::Result(RpcValue::from_json(Value::from(i)))));
        }
        assert_eq!(count.load(Ordering::SeqCst), 3);
        request.close();
        assert!(!registry.contains(id));
    }

    #[test]
    fn requests_without_a_callback_still_deliver_normally() {
        let registry = Registry::new();
        let id = registry.next_id();
        let request = registry.add_request(id, false).unwrap();
        assert!(registry.deliver(id, Reply::Error("boom".to_owned())));
        assert!(matches!(request.value(), Err(CallError::Remote(msg)) if msg == "boom"));
    }
}

//! The handler/hosted-object capability (spec §3 "hosted object", §4.D).
//!
//! `spec.md` leaves "handler-class authoring conventions" as an external
//! collaborator, but the trait those conventions target — something
//! exposing `get_method` — is squarely in scope. This module generalizes
//! that capability into an ordinary Rust trait plus a small builder
//! ([`SimpleObject`]) so tests and `linerpc-demo` don't need a macro to
//! stand up a handler.

use std::collections::HashMap;
use std::sync::Arc;

use crate::codec::RpcValue;
use crate::ids::ConnectionId;

/// Positional and keyword arguments decoded from an inbound request,
/// already resolved through the class-hinting codec (spec §4.B).
#[derive(Clone, Debug, Default)]
pub struct Params {
    /// Positional arguments, in order.
    pub args: Vec<RpcValue>,
    /// Keyword arguments. A `Vec` rather than a `HashMap` because the wire
    /// format makes no promise about key order mattering, but small linear
    /// scans over a handful of kwargs are simpler to reason about than
    /// introducing a second map type name into this crate's surface.
    pub kwargs: Vec<(String, RpcValue)>,
}

impl Params {
    /// Look up a keyword argument by name.
    pub fn kwarg(&self, name: &str) -> Option<&RpcValue> {
        self.kwargs.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Look up a positional argument by index.
    pub fn arg(&self, index: usize) -> Option<&RpcValue> {
        self.args.get(index)
    }

    /// Construct `Params` from a slice of plain JSON values, for callers
    /// (tests, the demo binary) building a request by hand.
    pub fn from_json_args(args: &[serde_json::Value]) -> Self {
        Params {
            args: args.iter().cloned().map(RpcValue::from_json).collect(),
            kwargs: Vec::new(),
        }
    }
}

/// The outcome of invoking a method body.
pub enum MethodOutcome {
    /// A single value — the common case (spec §4.G "call once, send one
    /// response").
    Value(RpcValue),
    /// A finite sequence of values, one response frame per item, all
    /// sharing the inbound request's id (spec §4.G "generator", the
    /// pipe-mode counterpart). Spec §9 models this as "a handler returning
    /// a lazy, finite sequence of values"; `Iterator` is that sequence.
    Pipe(Box<dyn Iterator<Item = Result<RpcValue, String>> + Send>),
}

/// What a method body returns: a value/pipe on success, or a short
/// diagnostic string on failure (spec §7 dispatch-level: "a short human
/// string").
pub type MethodResult = Result<MethodOutcome, String>;

/// A single bound method body.
pub type Method = dyn Fn(&dyn Context, Params) -> MethodResult + Send + Sync;

/// Context a method body is invoked with: connection identity, and the
/// ability to bind one of its own methods for handing out as a
/// `__functionreference__` (spec §4.B encode policy, "callable bound to
/// this connection's handler").
pub trait Context: Send + Sync {
    /// This connection's id, used only to tag freshly-bound methods.
    fn connection_id(&self) -> ConnectionId;

    /// Bind a method name (optionally dotted onto a hosted object) to this
    /// connection, producing a value that serializes as
    /// `__functionreference__` when sent out and, when decoded by the peer
    /// and invoked, dispatches back to that named method on this
    /// connection (spec §3's "bound method ... on the root handler ... or
    /// on a hosted object").
    fn bind_method(&self, qualified_name: String) -> crate::codec::BoundMethod;
}

/// The handler/hosted-object capability: anything a connection can resolve
/// method names against, whether the root handler or a table entry.
///
/// Grounded on the `get_method(name)` lookup described throughout spec §4 —
/// this is the exact trait spec §4.B's "object exposing `get_method`"
/// refers to.
pub trait Object: Send + Sync {
    /// Resolve a method by name. Returns the diagnostic string spec §4.G
    /// describes ("If the resolution step returned a diagnostic string...")
    /// on failure, which becomes the `error` field of the reply.
    fn get_method(&self, name: &str) -> Result<Arc<Method>, String>;

    /// Invoked when this object is removed from the hosted-object table,
    /// either by `__delete__` or connection close (spec §4.D). Exceptions
    /// — here, simply not applicable, since this returns nothing fallible —
    /// are not a concern; any cleanup that can fail should trap its own
    /// errors and log them, matching "exceptions in it are logged and
    /// swallowed".
    fn shutdown(&self) {}
}

/// A `HashMap`-backed [`Object`] for tests and demos: register named
/// closures, get a working handler with no boilerplate trait impl.
#[derive(Default)]
pub struct SimpleObject {
    methods: HashMap<String, Arc<Method>>,
    on_shutdown: Option<Box<dyn Fn() + Send + Sync>>,
}

impl SimpleObject {
    /// An object with no methods yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method body under `name`. Builder-style: returns `self`
    /// so calls chain.
    pub fn with_method(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&dyn Context, Params) -> MethodResult + Send + Sync + 'static,
    ) -> Self {
        self.methods.insert(name.into(), Arc::new(f));
        self
    }

    /// Register a hook run from [`Object::shutdown`].
    pub fn with_shutdown_hook(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_shutdown = Some(Box::new(f));
        self
    }
}

impl Object for SimpleObject {
    fn get_method(&self, name: &str) -> Result<Arc<Method>, String> {
        self.methods
            .get(name)
            .cloned()
            .ok_or_else(|| format!("no such method: {name:?}"))
    }

    fn shutdown(&self) {
        if let Some(hook) = &self.on_shutdown {
            hook();
        }
    }
}

/// Identify an `Arc<dyn Object>` by its data pointer, for the hosted-object
/// table's idempotent-registration invariant (spec §3: "the same user
/// object gets the same synthetic name ... idempotent registration").
/// `Arc::as_ptr` on a `dyn` trait object is a fat pointer; we only need the
/// data half to compare identity, so we cast through `()`.
pub fn object_identity(obj: &Arc<dyn Object>) -> usize {
    Arc::as_ptr(obj) as *const () as usize
}

//! The class-hinting JSON codec hook (spec §3 "Class hints", §4.B).
//!
//! Three single-key JSON shapes carry non-plain-data references across the
//! wire. This module's [`RpcValue`] is the runtime counterpart: a tree that
//! mirrors `serde_json::Value`'s shape but can also hold a resolved
//! reference at any position, so a hint nested inside an array or object
//! round-trips exactly like a top-level one (spec's testable property 4).
//!
//! There is no Python-style duck-typed `dump_object`/`load_object` pair of
//! free functions here — a systems language makes the three cases explicit
//! variants instead, resolved once, recursively, by [`encode`] and
//! [`decode`].

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::connection::Connection;
use crate::error::CodecError;
use crate::ids::ConnectionId;
use crate::object::Object;

const HINT_REMOTE_OBJECT: &str = "__remoteobject__";
const HINT_OBJECT_REFERENCE: &str = "__objectreference__";
const HINT_FUNCTION_REFERENCE: &str = "__functionreference__";

/// A JSON-shaped value that may, at any position, be one of the three
/// class-hinted references instead of plain data.
#[derive(Clone)]
pub enum RpcValue {
    /// A scalar with no further structure: null, bool, number, or string.
    Json(Value),
    /// A JSON array, recursively resolved.
    Array(Vec<RpcValue>),
    /// A JSON object with no hint key, recursively resolved.
    Object(Vec<(String, RpcValue)>),
    /// Decoded from `{"__remoteobject__": name}`: a stub for an object the
    /// peer hosts.
    Remote(Arc<RemoteStub>),
    /// Decoded from `{"__objectreference__": name}`, or constructed
    /// directly by a handler returning one of its own (possibly freshly
    /// created) objects: something this connection can call `get_method`
    /// on without going over the wire.
    Hosted(Arc<dyn Object>),
    /// Decoded from `{"__functionreference__": name}`, or constructed via
    /// [`crate::object::Context::bind_method`]: a callable reachable by
    /// sending a request for `qualified_name` on some connection.
    Bound(BoundMethod),
}

impl std::fmt::Debug for RpcValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcValue::Json(v) => write!(f, "Json({v})"),
            RpcValue::Array(items) => f.debug_list().entries(items).finish(),
            RpcValue::Object(fields) => f.debug_map().entries(fields.iter().map(|(k, v)| (k, v))).finish(),
            RpcValue::Remote(stub) => write!(f, "Remote({:?})", stub.object_name()),
            RpcValue::Hosted(_) => write!(f, "Hosted(..)"),
            RpcValue::Bound(bm) => write!(f, "Bound({:?})", bm.qualified_name()),
        }
    }
}

impl RpcValue {
    /// Wrap a plain `serde_json::Value` with no embedded hints, recursing
    /// into arrays/objects so the shape is uniform.
    pub fn from_json(v: Value) -> Self {
        match v {
            Value::Array(items) => RpcValue::Array(items.into_iter().map(RpcValue::from_json).collect()),
            Value::Object(map) => {
                RpcValue::Object(map.into_iter().map(|(k, v)| (k, RpcValue::from_json(v))).collect())
            }
            scalar => RpcValue::Json(scalar),
        }
    }

    /// Convert back to plain JSON, failing if a reference survives anywhere
    /// in the tree (spec treats this crate's runtime handles as not plain
    /// data; callers that want them must ask for an `RpcValue`, not a
    /// `serde_json::Value`).
    pub fn into_json(self) -> Result<Value, CodecError> {
        match self {
            RpcValue::Json(v) => Ok(v),
            RpcValue::Array(items) => Ok(Value::Array(
                items.into_iter().map(RpcValue::into_json).collect::<Result<_, _>>()?,
            )),
            RpcValue::Object(fields) => {
                let mut map = Map::new();
                for (k, v) in fields {
                    map.insert(k, v.into_json()?);
                }
                Ok(Value::Object(map))
            }
            RpcValue::Remote(_) | RpcValue::Hosted(_) | RpcValue::Bound(_) => {
                Err(CodecError::NotPlainData)
            }
        }
    }

    /// `true` for `Json(Value::Null)`, matching a bare-JSON `null`.
    pub fn is_null(&self) -> bool {
        matches!(self, RpcValue::Json(Value::Null))
    }
}

/// A decoded `__functionreference__`: a callable reachable by sending a
/// request named `qualified_name` (which may itself be dotted, e.g.
/// `"counter_00a1.next"`) through the connection identified by `conn_id`.
///
/// Encoding checks `conn_id` against the connection doing the encoding:
/// a `BoundMethod` minted on one connection cannot be smuggled onto another
/// (spec §4.B: "Callable bound to a different connection → fails with
/// `CrossConnectionSerialization`").
#[derive(Clone, Debug)]
pub struct BoundMethod {
    pub(crate) conn_id: ConnectionId,
    pub(crate) qualified_name: String,
}

impl BoundMethod {
    pub(crate) fn new(conn_id: ConnectionId, qualified_name: String) -> Self {
        BoundMethod { conn_id, qualified_name }
    }

    /// The method name this callable invokes, as it appears on the wire.
    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }
}

/// A stub for an object the peer hosts, decoded from `__remoteobject__`.
///
/// Holds a connection handle so the four proxy modes can be constructed
/// against `object_name`-prefixed method names (spec §3: "four proxies
/// bound to that name"). On `Drop`, best-effort sends a `__delete__`
/// notification so the peer can reclaim the hosted object (spec §5
/// "Resource lifetime").
pub struct RemoteStub {
    conn: Arc<Connection>,
    object_name: String,
}

impl RemoteStub {
    pub(crate) fn new(conn: Arc<Connection>, object_name: String) -> Self {
        RemoteStub { conn, object_name }
    }

    /// The synthetic name this stub refers to.
    pub fn object_name(&self) -> &str {
        &self.object_name
    }

    /// A [`crate::proxy::Proxy`] bound to this stub's object name, for
    /// placing calls against it.
    pub fn proxy(&self) -> crate::proxy::Proxy {
        crate::proxy::Proxy::new(self.conn.clone(), Some(self.object_name.clone()))
    }
}

impl Drop for RemoteStub {
    fn drop(&mut self) {
        let qualified = format!("{}.__delete__", self.object_name);
        // Best-effort: spec §5 and §9 both call this advisory, with
        // authoritative cleanup happening at connection close regardless.
        let _ = self.conn.send_notification(&qualified, Vec::new(), Vec::new());
    }
}

/// Decode hook (spec §4.B `load_object`): recursively resolve every JSON
/// object literal, promoting the three hint shapes to their runtime
/// counterparts and leaving everything else as plain structure.
pub fn decode(conn: &Connection, value: Value) -> Result<RpcValue, CodecError> {
    match value {
        Value::Array(items) => Ok(RpcValue::Array(
            items.into_iter().map(|v| decode(conn, v)).collect::<Result<_, _>>()?,
        )),
        Value::Object(map) => decode_object(conn, map),
        scalar => Ok(RpcValue::Json(scalar)),
    }
}

fn decode_object(conn: &Connection, map: Map<String, Value>) -> Result<RpcValue, CodecError> {
    if map.len() == 1 {
        if let Some(Value::String(name)) = map.get(HINT_REMOTE_OBJECT) {
            return Ok(RpcValue::Remote(Arc::new(RemoteStub::new(
                conn.self_handle(),
                name.clone(),
            ))));
        }
        if let Some(Value::String(name)) = map.get(HINT_OBJECT_REFERENCE) {
            let obj = conn
                .hosted_objects()
                .get(name)
                .ok_or_else(|| CodecError::InvalidReference(name.clone()))?;
            return Ok(RpcValue::Hosted(obj));
        }
        if let Some(Value::String(name)) = map.get(HINT_FUNCTION_REFERENCE) {
            return Ok(RpcValue::Bound(BoundMethod::new(conn.id(), name.clone())));
        }
    }
    let mut fields = Vec::with_capacity(map.len());
    for (k, v) in map {
        fields.push((k, decode(conn, v)?));
    }
    Ok(RpcValue::Object(fields))
}

/// Encode hook (spec §4.B `dump_object`): recursively render an
/// [`RpcValue`] to plain `serde_json::Value`, resolving each reference
/// variant per the policy table in spec §4.B.
pub fn encode(conn: &Connection, value: &RpcValue) -> Result<Value, CodecError> {
    match value {
        RpcValue::Json(v) => Ok(v.clone()),
        RpcValue::Array(items) => Ok(Value::Array(
            items.iter().map(|v| encode(conn, v)).collect::<Result<_, _>>()?,
        )),
        RpcValue::Object(fields) => {
            let mut map = Map::with_capacity(fields.len());
            for (k, v) in fields {
                map.insert(k.clone(), encode(conn, v)?);
            }
            Ok(Value::Object(map))
        }
        RpcValue::Remote(stub) => {
            let mut map = Map::new();
            map.insert(
                HINT_OBJECT_REFERENCE.to_owned(),
                Value::String(stub.object_name().to_owned()),
            );
            Ok(Value::Object(map))
        }
        RpcValue::Hosted(obj) => {
            let name = conn.hosted_objects().register(obj.clone());
            let mut map = Map::new();
            map.insert(HINT_REMOTE_OBJECT.to_owned(), Value::String(name));
            Ok(Value::Object(map))
        }
        RpcValue::Bound(bound) => {
            if bound.conn_id != conn.id() {
                return Err(CodecError::CrossConnectionSerialization);
            }
            let mut map = Map::new();
            map.insert(
                HINT_FUNCTION_REFERENCE.to_owned(),
                Value::String(bound.qualified_name.clone()),
            );
            Ok(Value::Object(map))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::SimpleObject;

    fn test_connection() -> Arc<Connection> {
        let (a, _b) = crate::test_support::duplex_pair();
        Connection::new_threaded(a, None)
    }

    #[test]
    fn plain_values_round_trip() {
        let conn = test_connection();
        let original = serde_json::json!({"a": [1, 2, "three"], "b": null});
        let decoded = decode(&conn, original.clone()).unwrap();
        let encoded = encode(&conn, &decoded).unwrap();
        assert_eq!(original, encoded);
    }

    #[test]
    fn object_reference_resolves_to_the_registered_object() {
        let conn = test_connection();
        let obj: Arc<dyn Object> = Arc::new(SimpleObject::new());
        let name = conn.hosted_objects().register(obj.clone());

        let hinted = serde_json::json!({"__objectreference__": name});
        let decoded = decode(&conn, hinted).unwrap();
        match decoded {
            RpcValue::Hosted(resolved) => {
                assert!(Arc::ptr_eq(&resolved, &obj));
            }
            other => panic!("expected Hosted, got {other:?}"),
        }
    }

    #[test]
    fn unknown_object_reference_is_invalid() {
        let conn = test_connection();
        let hinted = serde_json::json!({"__objectreference__": "nosuchobject_0000"});
        let err = decode(&conn, hinted).unwrap_err();
        assert!(matches!(err, CodecError::InvalidReference(_)));
    }

    #[test]
    fn function_reference_round_trips_on_the_same_connection() {
        let conn = test_connection();
        let bound = conn.bind_method_direct("greet".to_owned());
        let encoded = encode(&conn, &RpcValue::Bound(bound)).unwrap();
        assert_eq!(encoded, serde_json::json!({"__functionreference__": "greet"}));
        let decoded = decode(&conn, encoded).unwrap();
        match decoded {
            RpcValue::Bound(bm) => assert_eq!(bm.qualified_name(), "greet"),
            other => panic!("expected Bound, got {other:?}"),
        }
    }
}

//! The dispatcher: classifies one decoded frame and drives invocation
//! (spec §4.G).
//!
//! Grounded on `arti-rpcserver::connection::Connection`'s `run_loop`/
//! dispatch methods for the overall shape (classify → resolve → invoke →
//! reply), adapted from Arti's async/`Stream`-driven dispatch to plain
//! `std::thread` workers, one per inbound request when
//! [`crate::config::Config::threaded`] is set (spec §5: "one ephemeral
//! worker per inbound request").

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::codec;
use crate::connection::{self, Connection};
use crate::error::DispatchError;
use crate::object::{Method, Object, Params};
use crate::request::Reply;

const DELETE_METHOD: &str = "__delete__";

/// Classify and dispatch one decoded top-level JSON value.
pub fn dispatch_frame(conn: &Arc<Connection>, value: Value) {
    match value {
        Value::Array(items) => dispatch_batch(conn, items),
        other => dispatch_one(conn, other),
    }
}

fn dispatch_batch(conn: &Arc<Connection>, items: Vec<Value>) {
    // Spec §5: "inbound requests may be processed out of order and in
    // parallel; no causal ordering is promised between independent
    // requests" — so each batch element gets the same threaded-or-inline
    // treatment as a top-level request.
    if conn.config().threaded {
        let handles: Vec<_> = items
            .into_iter()
            .map(|item| {
                let conn = conn.clone();
                std::thread::spawn(move || dispatch_one(&conn, item))
            })
            .collect();
        for h in handles {
            let _ = h.join();
        }
    } else {
        for item in items {
            dispatch_one(conn, item);
        }
    }
}

fn dispatch_one(conn: &Arc<Connection>, value: Value) {
    let Value::Object(map) = value else {
        warn!("dropping frame of unexpected top-level shape");
        return;
    };

    if map.contains_key("result") {
        dispatch_response(conn, map);
        return;
    }
    if map.contains_key("method") {
        dispatch_request(conn, map);
        return;
    }

    // Spec §4.G: "Anything else -> reply 'Unknown format'". We can only
    // reply if an id is extractable; otherwise there is nowhere to send
    // the reply and we log and drop, matching frame-malformed policy.
    let id = map.get("id").and_then(Value::as_u64);
    match id {
        Some(id) => conn.send_frame(&connection::build_response_frame(
            conn,
            id,
            &Reply::Error(DispatchError::UnknownFormat.wire_message()),
        ).expect("encoding an error reply never invokes the hinting codec")),
        None => warn!("dropping frame matching neither response nor request shape"),
    }
}

fn dispatch_response(conn: &Arc<Connection>, map: serde_json::Map<String, Value>) {
    let Some(id) = map.get("id").and_then(Value::as_u64) else {
        warn!("dropping response frame with a missing or non-integer id");
        return;
    };
    let error = map.get("error").filter(|v| !v.is_null());
    let reply = if let Some(Value::String(msg)) = error {
        Reply::Error(msg.clone())
    } else {
        let result = map.get("result").cloned().unwrap_or(Value::Null);
        match codec::decode(conn, result) {
            Ok(v) => Reply::Result(v),
            Err(e) => {
                warn!(error = %e, "dropping response with an undecodable result");
                return;
            }
        }
    };
    connection::deliver_response(conn, id, reply);
}

fn dispatch_request(conn: &Arc<Connection>, mut map: serde_json::Map<String, Value>) {
    let Some(Value::String(method_name)) = map.remove("method") else {
        warn!("dropping request frame with a missing or non-string method");
        return;
    };
    let id = map.get("id").and_then(Value::as_u64);
    let params = map.remove("params");
    let kwparams = map.remove("kwparams");

    debug!(method = %method_name, id, "dispatching inbound request");

    let params = match decode_params(conn, params, kwparams) {
        Ok(p) => p,
        Err(DispatchError::InvalidParams) => {
            // Spec §9 open question (c): a scalar `params` is treated as
            // frame-malformed, not dispatch-level — logged and dropped,
            // never replied to, even if an id is present.
            warn!(method = %method_name, "dropping request with non-array, non-object params");
            return;
        }
        Err(e) => {
            reply_error_if_present(conn, id, &e.wire_message());
            return;
        }
    };

    let (object_name, bare_method) = match method_name.split_once('.') {
        Some((obj, rest)) => (Some(obj.to_owned()), rest.to_owned()),
        None => (None, method_name.clone()),
    };

    if let Some(obj_name) = &object_name {
        if bare_method == DELETE_METHOD {
            // Spec §6: "generates no reply even if an id is present".
            conn.hosted_objects().remove(obj_name);
            return;
        }
    }

    let target: Arc<dyn Object> = match &object_name {
        Some(obj_name) => match conn.hosted_objects().get(obj_name) {
            Some(obj) => obj,
            None => {
                reply_error_if_present(
                    conn,
                    id,
                    &DispatchError::InvalidObjectIdentifier(obj_name.clone()).wire_message(),
                );
                return;
            }
        },
        None => match conn.root_handler() {
            Some(handler) => handler,
            None => {
                reply_error_if_present(conn, id, &DispatchError::UnknownMethod(method_name.clone()).wire_message());
                return;
            }
        },
    };

    let method: Arc<Method> = match target.get_method(&bare_method) {
        Ok(m) => m,
        Err(diagnostic) => {
            reply_error_if_present(conn, id, &diagnostic);
            return;
        }
    };

    if conn.config().threaded {
        let conn = conn.clone();
        std::thread::spawn(move || invoke_and_reply(&conn, id, &method, params));
    } else {
        invoke_and_reply(conn, id, &method, params);
    }
}

fn decode_params(
    conn: &Connection,
    params: Option<Value>,
    kwparams: Option<Value>,
) -> Result<Params, DispatchError> {
    match params {
        None => Ok(Params::default()),
        Some(Value::Array(items)) => {
            let args = items
                .into_iter()
                .map(|v| codec::decode(conn, v))
                .collect::<Result<Vec<_>, _>>()?;
            let kwargs = match kwparams {
                None => Vec::new(),
                Some(Value::Object(map)) => map
                    .into_iter()
                    .map(|(k, v)| Ok((k, codec::decode(conn, v)?)))
                    .collect::<Result<Vec<_>, DispatchError>>()?,
                Some(_) => return Err(DispatchError::InvalidParams),
            };
            Ok(Params { args, kwargs })
        }
        // Symmetric with the encode-side quirk in spec §4.E: if `params`
        // is itself an object, it carries kwargs and args stays empty.
        Some(Value::Object(map)) => {
            let kwargs = map
                .into_iter()
                .map(|(k, v)| Ok((k, codec::decode(conn, v)?)))
                .collect::<Result<Vec<_>, DispatchError>>()?;
            Ok(Params { args: Vec::new(), kwargs })
        }
        Some(_) => Err(DispatchError::InvalidParams),
    }
}

fn invoke_and_reply(conn: &Arc<Connection>, id: Option<u64>, method: &Method, params: Params) {
    let outcome = method(conn.as_ref(), params);
    match outcome {
        // Spec §7: a handler-level error is already the short human string
        // ("<ErrorKind>: <message>") that goes straight onto the wire — no
        // extra wrapping, so `boom()` raising `RuntimeError("x")` produces
        // exactly `"RuntimeError: x"` (spec §8 scenario 3), not a
        // doubly-prefixed diagnostic.
        Err(diagnostic) => reply_error_if_present(conn, id, &diagnostic),
        Ok(crate::object::MethodOutcome::Value(value)) => {
            if let Some(id) = id {
                reply_value(conn, id, value);
            }
        }
        Ok(crate::object::MethodOutcome::Pipe(iter)) => {
            let Some(id) = id else {
                // No id: still exhaust the generator for its side effects,
                // but notification semantics suppress every reply.
                for _ in iter {}
                return;
            };
            for item in iter {
                match item {
                    Ok(value) => reply_value(conn, id, value),
                    Err(diagnostic) => {
                        // Spec §7: "Generator failure mid-stream": one
                        // error frame, same id, stream ends. Responses
                        // already emitted remain valid.
                        reply_error(conn, id, &diagnostic);
                        break;
                    }
                }
            }
        }
    }
}

fn reply_value(conn: &Connection, id: u64, value: crate::codec::RpcValue) {
    match connection::build_response_frame(conn, id, &Reply::Result(value)) {
        Ok(frame) => conn.send_frame(&frame),
        Err(e) => reply_error(conn, id, &format!("CodecError: {e}")),
    }
}

fn reply_error(conn: &Connection, id: u64, message: &str) {
    let frame = connection::build_response_frame(conn, id, &Reply::Error(message.to_owned()))
        .expect("encoding an error reply never invokes the hinting codec");
    conn.send_frame(&frame);
}

fn reply_error_if_present(conn: &Connection, id: Option<u64>, message: &str) {
    if let Some(id) = id {
        reply_error(conn, id, message);
    }
}

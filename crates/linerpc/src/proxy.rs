//! The outbound call surface (spec §3 "Remote-object stub", §4.E).
//!
//! Spec §9 notes that "dynamic attribute dispatch on Proxy" doesn't
//! transplant into a systems language and recommends an explicit
//! `call(name, args, kwargs)` operation instead — that's exactly what this
//! module is. A `Proxy` is parameterized by a connection and an optional
//! hosted-object name to dot method names onto, mirroring
//! `arti-rpc-client-core::conn::RpcConn`'s `execute`/`execute_with_handle`/
//! `execute_with_updates` trio, generalized to four modes instead of three
//! (this protocol additionally distinguishes fire-and-forget `notify` from
//! `method`).

use std::sync::Arc;

use serde_json::Value;

use crate::codec::{self, RpcValue};
use crate::connection::Connection;
use crate::error::CallError;
use crate::request::{Request, ReplyCallback};

/// A call-forwarding facade bound to a connection and, optionally, a
/// hosted-object name that every method call is dotted onto.
#[derive(Clone)]
pub struct Proxy {
    conn: Arc<Connection>,
    object_name: Option<String>,
}

impl Proxy {
    /// A proxy targeting the peer's root handler (`object_name: None`) or a
    /// specific hosted object by synthetic name.
    pub fn new(conn: Arc<Connection>, object_name: Option<String>) -> Self {
        Proxy { conn, object_name }
    }

    fn qualify(&self, method: &str) -> String {
        match &self.object_name {
            Some(obj) => format!("{obj}.{method}"),
            None => method.to_owned(),
        }
    }

    /// Encode `(args, kwargs)` the way spec §4.E requires: args in `params`
    /// when non-empty; otherwise kwargs in `params` (the documented
    /// backwards-compat quirk, preserved bit-exactly); `kwparams` carries
    /// kwargs only when args also went in `params`.
    fn encode_params(&self, args: &[RpcValue], kwargs: &[(String, RpcValue)]) -> Result<(Option<Value>, Option<Value>), CallError> {
        if !args.is_empty() {
            let params = Value::Array(
                args.iter()
                    .map(|v| codec::encode(&self.conn, v))
                    .collect::<Result<_, _>>()?,
            );
            let kwparams = if kwargs.is_empty() {
                None
            } else {
                let mut map = serde_json::Map::with_capacity(kwargs.len());
                for (k, v) in kwargs {
                    map.insert(k.clone(), codec::encode(&self.conn, v)?);
                }
                Some(Value::Object(map))
            };
            Ok((Some(params), kwparams))
        } else if !kwargs.is_empty() {
            let mut map = serde_json::Map::with_capacity(kwargs.len());
            for (k, v) in kwargs {
                map.insert(k.clone(), codec::encode(&self.conn, v)?);
            }
            Ok((Some(Value::Object(map)), None))
        } else {
            Ok((None, None))
        }
    }

    /// **call** (sync_type 0): blocks until the response arrives, returns
    /// its `result` or raises its `error`.
    pub fn call(&self, method: &str, args: &[RpcValue], kwargs: &[(String, RpcValue)]) -> Result<RpcValue, CallError> {
        let request = self.send_with_id(method, args, kwargs, false, None)?;
        request.value()
    }

    /// Convenience wrapper over [`Proxy::call`] taking plain JSON args, as
    /// spec §9 recommends for a systems-language surface.
    pub fn call0(&self, method: &str, args: &[Value]) -> Result<Value, CallError> {
        let args: Vec<RpcValue> = args.iter().cloned().map(RpcValue::from_json).collect();
        Ok(self.call(method, &args, &[])?.into_json()?)
    }

    /// **method** (sync_type 1): returns a [`Request`] handle that
    /// auto-closes on its first (and only) response.
    pub fn method(&self, method: &str, args: &[RpcValue], kwargs: &[(String, RpcValue)]) -> Result<Request, CallError> {
        self.send_with_id(method, args, kwargs, false, None)
    }

    /// As [`Proxy::method`], but `callback` fires once, with the single
    /// reply, before [`Request::value`] would return it (spec §4.F).
    pub fn method_with_callback(
        &self,
        method: &str,
        args: &[RpcValue],
        kwargs: &[(String, RpcValue)],
        callback: ReplyCallback,
    ) -> Result<Request, CallError> {
        self.send_with_id(method, args, kwargs, false, Some(callback))
    }

    /// Convenience wrapper over [`Proxy::method`].
    pub fn method0(&self, method: &str, args: &[Value]) -> Result<Request, CallError> {
        let args: Vec<RpcValue> = args.iter().cloned().map(RpcValue::from_json).collect();
        self.method(method, &args, &[])
    }

    /// **notify** (sync_type 2): no id emitted, no response expected.
    pub fn notify(&self, method: &str, args: &[RpcValue], kwargs: &[(String, RpcValue)]) -> Result<(), CallError> {
        self.conn.send_notification(&self.qualify(method), args.to_vec(), kwargs.to_vec())
    }

    /// Convenience wrapper over [`Proxy::notify`].
    pub fn notify0(&self, method: &str, args: &[Value]) -> Result<(), CallError> {
        let args: Vec<RpcValue> = args.iter().cloned().map(RpcValue::from_json).collect();
        self.notify(method, &args, &[])
    }

    /// **pipe** (sync_type 3): returns a [`Request`] handle with
    /// auto-close disabled; the caller polls [`Request::next`] and must
    /// eventually call [`Request::close`].
    pub fn pipe(&self, method: &str, args: &[RpcValue], kwargs: &[(String, RpcValue)]) -> Result<Request, CallError> {
        self.send_with_id(method, args, kwargs, true, None)
    }

    /// Convenience wrapper over [`Proxy::pipe`].
    pub fn pipe0(&self, method: &str, args: &[Value]) -> Result<Request, CallError> {
        let args: Vec<RpcValue> = args.iter().cloned().map(RpcValue::from_json).collect();
        self.pipe(method, &args, &[])
    }

    /// As [`Proxy::pipe`], but `callback` fires on every reply as it
    /// arrives, independent of the caller's own [`Request::next`] polling
    /// (spec §4.F).
    pub fn pipe_with_callback(
        &self,
        method: &str,
        args: &[RpcValue],
        kwargs: &[(String, RpcValue)],
        callback: ReplyCallback,
    ) -> Result<Request, CallError> {
        self.send_with_id(method, args, kwargs, true, Some(callback))
    }

    fn send_with_id(
        &self,
        method: &str,
        args: &[RpcValue],
        kwargs: &[(String, RpcValue)],
        pipe_mode: bool,
        callback: Option<ReplyCallback>,
    ) -> Result<Request, CallError> {
        let (params, kwparams) = self.encode_params(args, kwargs)?;
        self.conn
            .send_request_with_callback(&self.qualify(method), params, kwparams, pipe_mode, callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_encoding_follows_the_documented_quirk() {
        let (a, _b) = crate::test_support::duplex_pair();
        let conn = Connection::new_threaded(a, None);
        let proxy = Proxy::new(conn, None);

        // args only -> params is the array, no kwparams.
        let (params, kwparams) = proxy
            .encode_params(&[RpcValue::from_json(Value::from(1))], &[])
            .unwrap();
        assert_eq!(params, Some(Value::Array(vec![Value::from(1)])));
        assert_eq!(kwparams, None);

        // kwargs only -> kwargs go in params (backwards-compat quirk).
        let (params, kwparams) = proxy
            .encode_params(&[], &[("a".to_owned(), RpcValue::from_json(Value::from(2)))])
            .unwrap();
        assert_eq!(params, Some(serde_json::json!({"a": 2})));
        assert_eq!(kwparams, None);

        // both -> args in params, kwargs in kwparams.
        let (params, kwparams) = proxy
            .encode_params(
                &[RpcValue::from_json(Value::from(1))],
                &[("a".to_owned(), RpcValue::from_json(Value::from(2)))],
            )
            .unwrap();
        assert_eq!(params, Some(Value::Array(vec![Value::from(1)])));
        assert_eq!(kwparams, Some(serde_json::json!({"a": 2})));

        // neither -> both absent.
        let (params, kwparams) = proxy.encode_params(&[], &[]).unwrap();
        assert_eq!(params, None);
        assert_eq!(kwparams, None);
    }
}

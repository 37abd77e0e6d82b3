//! The connection controller (spec §3 "Connection", §4.I).
//!
//! Composes the framer, codec, request registry, hosted-object table,
//! writer pump, and dispatcher into the symmetric, bidirectional engine
//! spec §2's control-flow paragraph describes. Grounded on
//! `arti-rpc-client-core::conn::connimpl::RpcConn` for the lock/thread
//! shape (a reader the foreground thread drives, condvar-guarded request
//! slots, a background writer), generalized so the *same* struct also runs
//! the inbound-dispatch half that `arti-rpcserver::connection::Connection`
//! plays in Arti's async world.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::codec::{self, BoundMethod, RpcValue};
use crate::config::Config;
use crate::dispatcher;
use crate::error::{CallError, ConnectionError, ErrorKind, HasKind};
use crate::framer;
use crate::ids::ConnectionId;
use crate::object::{Context, Object};
use crate::objmap::HostedObjects;
use crate::request::{Registry, Reply, Request};
use crate::writer::WriterPump;

/// Types that can be split into an independent, owned read half and write
/// half, so the reader (foreground) and the writer pump (background
/// thread) never contend on the same handle. Implemented for `TcpStream`
/// and (on unix) `UnixStream` via `try_clone`; [`crate::test_support`]
/// implements it for its in-memory fixture.
pub trait Stream: Send + 'static {
    /// The read half, wrapped in [`BufReader`] by [`Connection::new_threaded`].
    type Reader: Read + Send + 'static;
    /// The write half.
    type Writer: Write + Send + 'static;

    /// Split `self` into independent read/write halves.
    fn split(self) -> (Self::Reader, Self::Writer);

    /// Apply the configured read/write timeouts (spec §5 "Cancellation and
    /// timeouts") to the underlying transport, if it has a notion of one.
    /// The default no-op fits fixtures like [`crate::test_support`]'s pipe
    /// that have no socket-level timeout to set; real sockets override it.
    fn set_timeouts(&self, _read: Option<Duration>, _write: Option<Duration>) {}

    /// Build a one-shot hook the [`framer::Reader`] calls on the first
    /// transient would-block/timed-out read, escalating the socket's read
    /// timeout to 5 s before retrying (spec §4.A). The default `None` fits
    /// fixtures with no socket-level timeout to escalate; real sockets
    /// override it by cloning `reader` so the hook can mutate the timeout
    /// independently of the reader itself.
    fn escalate_hook(_reader: &Self::Reader) -> Option<framer::EscalateTimeout> {
        None
    }
}

/// Spec §4.A's escalated read timeout for a transient would-block/timed-out
/// condition.
const ESCALATED_READ_TIMEOUT: Duration = Duration::from_secs(5);

impl Stream for std::net::TcpStream {
    type Reader = std::net::TcpStream;
    type Writer = std::net::TcpStream;

    fn split(self) -> (Self::Reader, Self::Writer) {
        let writer = self.try_clone().expect("TcpStream::try_clone");
        (self, writer)
    }

    fn set_timeouts(&self, read: Option<Duration>, write: Option<Duration>) {
        apply_socket_timeouts(
            read,
            write,
            |d| self.set_read_timeout(d),
            |d| self.set_write_timeout(d),
        );
    }

    fn escalate_hook(reader: &Self::Reader) -> Option<framer::EscalateTimeout> {
        let clone = reader.try_clone().ok()?;
        Some(Box::new(move || {
            if let Err(e) = clone.set_read_timeout(Some(ESCALATED_READ_TIMEOUT)) {
                warn!(error = %e, "failed to escalate read timeout after a transient socket error");
            }
        }))
    }
}

#[cfg(unix)]
impl Stream for std::os::unix::net::UnixStream {
    type Reader = std::os::unix::net::UnixStream;
    type Writer = std::os::unix::net::UnixStream;

    fn split(self) -> (Self::Reader, Self::Writer) {
        let writer = self.try_clone().expect("UnixStream::try_clone");
        (self, writer)
    }

    fn set_timeouts(&self, read: Option<Duration>, write: Option<Duration>) {
        apply_socket_timeouts(
            read,
            write,
            |d| self.set_read_timeout(d),
            |d| self.set_write_timeout(d),
        );
    }

    fn escalate_hook(reader: &Self::Reader) -> Option<framer::EscalateTimeout> {
        let clone = reader.try_clone().ok()?;
        Some(Box::new(move || {
            if let Err(e) = clone.set_read_timeout(Some(ESCALATED_READ_TIMEOUT)) {
                warn!(error = %e, "failed to escalate read timeout after a transient socket error");
            }
        }))
    }
}

/// Apply a pair of optional timeouts through setter closures, translating
/// spec §5's `Some(Duration::ZERO)` ("non-blocking") into the smallest
/// representable positive duration — `set_read_timeout`/`set_write_timeout`
/// reject an actual zero duration on both `TcpStream` and `UnixStream`.
fn apply_socket_timeouts(
    read: Option<Duration>,
    write: Option<Duration>,
    mut set_read: impl FnMut(Option<Duration>) -> io::Result<()>,
    mut set_write: impl FnMut(Option<Duration>) -> io::Result<()>,
) {
    let nonblocking_floor = Duration::from_nanos(1);
    let normalize = |d: Duration| if d.is_zero() { nonblocking_floor } else { d };
    if let Err(e) = set_read(read.map(normalize)) {
        warn!(error = %e, "failed to apply configured read timeout");
    }
    if let Err(e) = set_write(write.map(normalize)) {
        warn!(error = %e, "failed to apply configured write timeout");
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Status {
    Open,
    Closed,
}

/// The composition root: owns the socket halves, the id/pending-request
/// registry, the hosted-object table, the writer pump, and the optional
/// root handler.
///
/// A `Connection` is always held behind an `Arc` — [`Connection::new_threaded`]
/// returns one directly — since remote stubs, bound methods, and the
/// reader thread itself all need their own handle to it.
pub struct Connection {
    id: ConnectionId,
    self_weak: Weak<Connection>,
    reader: Mutex<framer::Reader<BufReader<Box<dyn Read + Send>>>>,
    writer_pump: Arc<WriterPump>,
    registry: Arc<Registry>,
    hosted: Arc<HostedObjects>,
    root_handler: Mutex<Option<Arc<dyn Object>>>,
    status: Mutex<Status>,
    config: Config,
}

impl Connection {
    /// Build a connection over `stream` with the default [`Config`]
    /// (threaded dispatch, no timeouts) and no root handler.
    pub fn new_threaded<S: Stream>(stream: S, root_handler: Option<Arc<dyn Object>>) -> Arc<Connection> {
        Self::with_config(stream, root_handler, Config::default())
    }

    /// Build a connection with an explicit [`Config`].
    pub fn with_config<S: Stream>(
        stream: S,
        root_handler: Option<Arc<dyn Object>>,
        config: Config,
    ) -> Arc<Connection> {
        stream.set_timeouts(config.read_timeout, config.write_timeout);
        let (read_half, write_half) = stream.split();
        let escalate = S::escalate_hook(&read_half);
        let boxed_reader: Box<dyn Read + Send> = Box::new(read_half);
        let id = ConnectionId::random();
        Arc::new_cyclic(|weak| Connection {
            id,
            self_weak: weak.clone(),
            reader: Mutex::new(framer::Reader::with_escalation(BufReader::new(boxed_reader), escalate)),
            writer_pump: WriterPump::spawn(write_half),
            registry: Registry::new(),
            hosted: Arc::new(HostedObjects::new()),
            root_handler: Mutex::new(root_handler),
            status: Mutex::new(Status::Open),
            config,
        })
    }

    /// This connection's id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// This connection's configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// An `Arc` handle to this connection, for constructing values (remote
    /// stubs, proxies) that must outlive the borrow of `&self`.
    pub fn self_handle(&self) -> Arc<Connection> {
        self.self_weak.upgrade().expect("connection dropped its own strong reference")
    }

    /// The hosted-object table (spec §4.D).
    pub fn hosted_objects(&self) -> &HostedObjects {
        &self.hosted
    }

    /// The current root handler, if any.
    pub fn root_handler(&self) -> Option<Arc<dyn Object>> {
        self.root_handler.lock().expect("root handler lock poisoned").clone()
    }

    /// Replace the root handler.
    pub fn set_root_handler(&self, handler: Option<Arc<dyn Object>>) {
        *self.root_handler.lock().expect("root handler lock poisoned") = handler;
    }

    /// `true` once [`Connection::close`] has run.
    pub fn is_closed(&self) -> bool {
        *self.status.lock().expect("status lock poisoned") == Status::Closed
    }

    /// A [`crate::proxy::Proxy`] bound to this connection's root handler.
    pub fn proxy(self: &Arc<Self>) -> crate::proxy::Proxy {
        crate::proxy::Proxy::new(self.clone(), None)
    }

    /// Emit a request frame and register it, for `call`/`method`/`pipe`
    /// modes (spec §4.E).
    pub fn send_request(
        self: &Arc<Self>,
        qualified_method: &str,
        params: Option<Value>,
        kwparams: Option<Value>,
        pipe_mode: bool,
    ) -> Result<Request, CallError> {
        self.send_request_with_callback(qualified_method, params, kwparams, pipe_mode, None)
    }

    /// As [`Connection::send_request`], but registers a [`crate::request::ReplyCallback`]
    /// fired on every reply the request receives (spec §4.F).
    pub fn send_request_with_callback(
        self: &Arc<Self>,
        qualified_method: &str,
        params: Option<Value>,
        kwparams: Option<Value>,
        pipe_mode: bool,
        callback: Option<crate::request::ReplyCallback>,
    ) -> Result<Request, CallError> {
        if self.is_closed() {
            return Err(CallError::ConnectionClosed);
        }
        let id = self.registry.next_id();
        let request = self
            .registry
            .add_request_with_callback(id, pipe_mode, callback)
            .map_err(CallError::Local)?;
        let frame = build_request_frame(qualified_method, Some(id), params, kwparams);
        self.writer_pump.enqueue(frame.to_string());
        Ok(request)
    }

    /// Emit a notification frame (spec §4.E `notify`): no id, no response.
    pub fn send_notification(
        &self,
        qualified_method: &str,
        args: Vec<RpcValue>,
        kwargs: Vec<(String, RpcValue)>,
    ) -> Result<(), CallError> {
        if self.is_closed() {
            return Ok(());
        }
        let conn = self.self_handle();
        let (params, kwparams) = encode_params(&conn, &args, &kwargs)?;
        let frame = build_request_frame(qualified_method, None, params, kwparams);
        self.writer_pump.enqueue(frame.to_string());
        Ok(())
    }

    /// Enqueue an already-built response/request `Value` as a raw outbound
    /// frame. Used by the dispatcher to send replies.
    pub(crate) fn send_frame(&self, frame: &Value) {
        if !self.is_closed() {
            self.writer_pump.enqueue(frame.to_string());
        }
    }

    /// The pending-request registry (used by the dispatcher to deliver
    /// responses).
    pub(crate) fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Read and dispatch exactly one frame, blocking on the socket if
    /// needed. Returns `Ok(false)` on a clean peer close.
    pub fn read_and_dispatch(self: &Arc<Self>) -> Result<bool, ConnectionError> {
        let line = {
            let mut reader = self.reader.lock().expect("reader lock poisoned");
            match reader.read_frame() {
                Ok(line) => line,
                // Spec §7: frame-malformed (e.g. non-UTF-8 bytes before the
                // delimiter) is "logged and dropped; reader continues" — only
                // a transport-fatal framer error should end the connection.
                Err(e) if e.kind() != ErrorKind::TransportFatal => {
                    warn!(error = %e, "dropping malformed frame");
                    return Ok(true);
                }
                Err(e) => return Err(e.into()),
            }
        };
        let Some(line) = line else {
            return Ok(false);
        };
        let value: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "dropping malformed frame");
                return Ok(true);
            }
        };
        dispatcher::dispatch_frame(&self.self_handle(), value);
        Ok(true)
    }

    /// The blocking `serve` loop (spec §4.I): repeatedly read-and-dispatch
    /// until EOF, then close.
    pub fn serve(self: &Arc<Self>) -> Result<(), ConnectionError> {
        info!(connection = %self.id, "connection serve loop starting");
        loop {
            match self.read_and_dispatch() {
                Ok(true) => continue,
                Ok(false) => break,
                // Classify by `kind()`, not by matching the `Transport`
                // variant name: a `ConnectionError::Transport` can still wrap
                // a non-fatal `FramerError` (frame-malformed), which must not
                // end the connection (spec §7).
                Err(e) if e.kind() == ErrorKind::TransportFatal => {
                    debug!(error = %e, "transport error ending serve loop");
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        self.close();
        info!(connection = %self.id, "connection serve loop ended");
        Ok(())
    }

    /// Non-blocking drain (spec §4.I `dispatch_until_empty`): dispatch
    /// frames already buffered without blocking for new ones. Returns the
    /// count processed.
    ///
    /// This implementation checks the user-space buffer for a complete
    /// line before giving up, addressing the open question in spec §9(b)
    /// about OS-level readiness missing already-buffered bytes.
    pub fn dispatch_until_empty(self: &Arc<Self>) -> Result<usize, ConnectionError> {
        let mut count = 0;
        loop {
            let has_buffered_line = {
                let mut reader = self.reader.lock().expect("reader lock poisoned");
                reader.get_mut().fill_buf().map(|b| b.contains(&b'\n')).unwrap_or(false)
            };
            if !has_buffered_line {
                break;
            }
            match self.read_and_dispatch() {
                Ok(true) => count += 1,
                Ok(false) => break,
                // Same classify-by-kind rule as `serve`: only a
                // transport-fatal error should end the drain early.
                Err(e) if e.kind() == ErrorKind::TransportFatal => return Err(e),
                Err(_) => continue,
            }
        }
        Ok(count)
    }

    /// Spawn a background thread running [`Connection::serve`], for
    /// callers (tests, the demo binary) that need the foreground thread
    /// free to place outbound calls.
    pub fn spawn_serve(self: &Arc<Self>) -> std::thread::JoinHandle<()> {
        let conn = self.clone();
        std::thread::Builder::new()
            .name("linerpc-serve".into())
            .spawn(move || {
                if let Err(e) = conn.serve() {
                    error!(error = %e, "serve loop exited with an error");
                }
            })
            .expect("failed to spawn serve thread")
    }

    /// Idempotent teardown (spec §4.I `close`): abort the writer pump
    /// (waiting up to the configured grace period), run the root handler's
    /// shutdown hook and every hosted object's, then mark closed. Pending
    /// synchronous calls are woken with a connection-closed error.
    pub fn close(&self) {
        let mut status = self.status.lock().expect("status lock poisoned");
        if *status == Status::Closed {
            return;
        }
        *status = Status::Closed;
        drop(status);

        self.writer_pump.shutdown(self.config.close_grace);
        if let Some(handler) = self.root_handler.lock().expect("root handler lock poisoned").take() {
            handler.shutdown();
        }
        self.hosted.clear();
        self.registry.close_all();
        info!(connection = %self.id, "connection closed");
    }
}

impl Context for Connection {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    fn bind_method(&self, qualified_name: String) -> BoundMethod {
        BoundMethod::new(self.id, qualified_name)
    }
}

impl Connection {
    /// Equivalent to `Context::bind_method`, available without needing a
    /// `&dyn Context` in hand (used directly by tests and by
    /// [`crate::codec`]).
    pub fn bind_method_direct(&self, qualified_name: String) -> BoundMethod {
        BoundMethod::new(self.id, qualified_name)
    }
}

fn encode_params(
    conn: &Arc<Connection>,
    args: &[RpcValue],
    kwargs: &[(String, RpcValue)],
) -> Result<(Option<Value>, Option<Value>), CallError> {
    if !args.is_empty() {
        let params = Value::Array(args.iter().map(|v| codec::encode(conn, v)).collect::<Result<_, _>>()?);
        let kwparams = if kwargs.is_empty() {
            None
        } else {
            let mut map = serde_json::Map::with_capacity(kwargs.len());
            for (k, v) in kwargs {
                map.insert(k.clone(), codec::encode(conn, v)?);
            }
            Some(Value::Object(map))
        };
        Ok((Some(params), kwparams))
    } else if !kwargs.is_empty() {
        let mut map = serde_json::Map::with_capacity(kwargs.len());
        for (k, v) in kwargs {
            map.insert(k.clone(), codec::encode(conn, v)?);
        }
        Ok((Some(Value::Object(map)), None))
    } else {
        Ok((None, None))
    }
}

fn build_request_frame(method: &str, id: Option<u64>, params: Option<Value>, kwparams: Option<Value>) -> Value {
    let mut map = serde_json::Map::new();
    map.insert("method".to_owned(), Value::String(method.to_owned()));
    if let Some(id) = id {
        map.insert("id".to_owned(), Value::from(id));
    }
    if let Some(params) = params {
        map.insert("params".to_owned(), params);
    }
    if let Some(kwparams) = kwparams {
        map.insert("kwparams".to_owned(), kwparams);
    }
    Value::Object(map)
}

/// Build a response frame for `id` from a dispatch result, encoding a
/// result value through the class-hinting codec (spec §4.B) so a handler
/// returning a freshly-created [`Object`] or a bounced-back remote stub
/// still produces the correct wire shape.
pub(crate) fn build_response_frame(
    conn: &Connection,
    id: u64,
    reply: &Reply,
) -> Result<Value, crate::error::CodecError> {
    let mut map = serde_json::Map::new();
    match reply {
        Reply::Result(v) => {
            map.insert("result".to_owned(), codec::encode(conn, v)?);
            map.insert("error".to_owned(), Value::Null);
        }
        Reply::Error(msg) => {
            map.insert("result".to_owned(), Value::Null);
            map.insert("error".to_owned(), Value::String(msg.clone()));
        }
    }
    map.insert("id".to_owned(), Value::from(id));
    Ok(Value::Object(map))
}

/// Deliver a decoded response frame to the pending-request registry.
pub(crate) fn deliver_response(conn: &Connection, id: u64, reply: Reply) {
    if !conn.registry.deliver(id, reply) {
        debug!(id, "dropping response frame for an unknown (or already-closed) request id");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_read_timeout_is_applied_to_the_underlying_socket() {
        let (a, _b) = crate::test_support::duplex_pair();
        // A clone taken before construction still observes the timeout:
        // `set_read_timeout` is a property of the shared open-file
        // description, not something `try_clone`'s duplicate fd copies
        // independently.
        let probe = a.try_clone().expect("try_clone");
        let config = Config {
            read_timeout: Some(Duration::from_millis(50)),
            ..Config::default()
        };
        let _conn = Connection::with_config(a, None, config);
        assert_eq!(probe.read_timeout().unwrap(), Some(Duration::from_millis(50)));
    }

    #[test]
    fn close_is_idempotent_and_wakes_pending_requests() {
        let (a, _b) = crate::test_support::duplex_pair();
        let conn = Connection::new_threaded(a, None);
        let request = conn.registry.add_request(conn.registry.next_id(), false).unwrap();
        conn.close();
        conn.close();
        assert!(matches!(request.value(), Err(CallError::ConnectionClosed)));
    }
}

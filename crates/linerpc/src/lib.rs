//! `linerpc`: a bidirectional, symmetric, line-delimited JSON-RPC
//! connection engine over a reliable stream socket.
//!
//! Either peer may place calls on a [`Connection`] at any time — there is
//! no fixed client/server role at the protocol layer. A connection reads
//! newline-delimited JSON frames, correlates responses to outstanding
//! requests by id, and dispatches inbound method invocations against a
//! root handler and any number of locally-hosted objects exposed to the
//! peer under synthetic names.
//!
//! Out of scope, by design: the listener/accept loop that produces a
//! socket in the first place, handler-authoring macros, and logging
//! configuration (only the log *calls* are this crate's business). See
//! `linerpc-demo` for a minimal listener built on top of this crate.
//!
//! ```no_run
//! use std::sync::Arc;
//! use linerpc::{Connection, ConnectionBuilder};
//! use linerpc::object::{Context, MethodOutcome, Params, SimpleObject};
//!
//! let handler = Arc::new(
//!     SimpleObject::new().with_method("echo", |_ctx: &dyn Context, params: Params| {
//!         let value = params.arg(0).cloned().unwrap_or(linerpc::codec::RpcValue::from_json(serde_json::Value::Null));
//!         Ok(MethodOutcome::Value(value))
//!     }),
//! );
//! let stream = std::net::TcpStream::connect("127.0.0.1:0");
//! if let Ok(stream) = stream {
//!     let config = ConnectionBuilder::new().threaded(true).build();
//!     let conn = Connection::with_config(stream, Some(handler), config);
//!     let _ = conn.spawn_serve();
//! }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod framer;
pub mod ids;
pub mod object;
pub mod objmap;
pub mod proxy;
pub mod request;
pub mod test_support;
pub mod writer;

pub use codec::{BoundMethod, RemoteStub, RpcValue};
pub use config::{Config, ConnectionBuilder};
pub use connection::Connection;
pub use error::{CallError, CodecError, ConnectionError, DispatchError, ErrorKind, FramerError, HasKind, LocalError};
pub use ids::ConnectionId;
pub use object::{Method, MethodOutcome, MethodResult, Object, Params, SimpleObject};
pub use proxy::Proxy;
pub use request::{Reply, ReplyCallback, Request};

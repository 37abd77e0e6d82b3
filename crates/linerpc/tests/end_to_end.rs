//! Integration tests driving a real [`linerpc::Connection`] against a raw
//! socket peer, covering the end-to-end scenarios and invariants cataloged
//! in the design's testable-properties section: framing, the four-mode
//! proxy surface, pipe-mode multiplicity, notification silence, batch
//! dispatch, and hosted-object lifetime.
//!
//! Each test plays the role of "the other end of the wire" directly with a
//! raw [`UnixStream`] half rather than a second [`Connection`], so assertions
//! can pin the exact bytes that cross the socket instead of going through
//! another layer of decoding.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Duration;

use linerpc::object::{Context, MethodOutcome, Object, Params, SimpleObject};
use linerpc::{Connection, RpcValue};

fn as_i64(params: &Params, index: usize, name: &str) -> Result<i64, String> {
    let value = params
        .arg(index)
        .or_else(|| params.kwarg(name))
        .ok_or_else(|| format!("TypeError: missing argument {name:?}"))?;
    match value {
        RpcValue::Json(serde_json::Value::Number(n)) => {
            n.as_i64().ok_or_else(|| format!("TypeError: {name} is not an integer"))
        }
        _ => Err(format!("TypeError: {name} is not a number")),
    }
}

fn demo_handler() -> SimpleObject {
    SimpleObject::new()
        .with_method("echo", |_ctx: &dyn Context, params: Params| {
            let value = params.arg(0).cloned().unwrap_or_else(|| RpcValue::from_json(serde_json::Value::Null));
            Ok(MethodOutcome::Value(value))
        })
        .with_method("add", |_ctx: &dyn Context, params: Params| {
            let a = as_i64(&params, 0, "a")?;
            let b = as_i64(&params, 1, "b")?;
            Ok(MethodOutcome::Value(RpcValue::from_json(serde_json::Value::from(a + b))))
        })
        .with_method("boom", |_ctx: &dyn Context, _params: Params| {
            Err("RuntimeError: x".to_owned())
        })
        .with_method("ping", |_ctx: &dyn Context, _params: Params| {
            Ok(MethodOutcome::Value(RpcValue::from_json(serde_json::Value::from("pong"))))
        })
        .with_method("count", |_ctx: &dyn Context, params: Params| {
            let n = as_i64(&params, 0, "n")?;
            let values = (1..=n).map(|v| Ok(RpcValue::from_json(serde_json::Value::from(v))));
            Ok(MethodOutcome::Pipe(Box::new(values)))
        })
}

/// Start a server `Connection` over one half of an in-memory socket pair,
/// returning it plus the raw other half to play "client" with by hand.
fn spawn_server(handler: SimpleObject) -> (Arc<Connection>, UnixStream) {
    let (server_side, client_side) = linerpc::test_support::duplex_pair();
    let conn = Connection::new_threaded(server_side, Some(Arc::new(handler)));
    conn.spawn_serve();
    client_side
        .set_read_timeout(Some(Duration::from_millis(500)))
        .expect("set_read_timeout");
    (conn, client_side)
}

fn send_line(sock: &UnixStream, line: &str) {
    let mut sock = sock.try_clone().expect("try_clone for write");
    sock.write_all(line.as_bytes()).unwrap();
    sock.write_all(b"\n").unwrap();
}

fn read_line(sock: &UnixStream) -> std::io::Result<String> {
    let mut reader = BufReader::new(sock.try_clone().expect("try_clone for read"));
    let mut line = String::new();
    reader.read_line(&mut line)?;
    Ok(line)
}

fn read_value(sock: &UnixStream) -> serde_json::Value {
    let line = read_line(sock).expect("expected a reply frame");
    serde_json::from_str(line.trim_end()).expect("reply frame was not valid JSON")
}

#[test]
fn scenario_1_echo_returns_the_argument() {
    let (_conn, client) = spawn_server(demo_handler());
    send_line(&client, r#"{"method":"echo","id":1,"params":["hi"]}"#);
    let reply = read_value(&client);
    assert_eq!(reply, serde_json::json!({"result":"hi","error":null,"id":1}));
}

#[test]
fn scenario_2_add_with_keyword_params() {
    let (_conn, client) = spawn_server(demo_handler());
    send_line(&client, r#"{"method":"add","id":2,"params":{"a":2,"b":3}}"#);
    let reply = read_value(&client);
    assert_eq!(reply, serde_json::json!({"result":5,"error":null,"id":2}));
}

#[test]
fn scenario_3_handler_error_becomes_the_exact_wire_message() {
    let (_conn, client) = spawn_server(demo_handler());
    send_line(&client, r#"{"method":"boom","id":3}"#);
    let reply = read_value(&client);
    assert_eq!(
        reply,
        serde_json::json!({"result": null, "error": "RuntimeError: x", "id": 3})
    );
}

#[test]
fn scenario_4_notification_produces_no_reply_bytes_even_on_error() {
    let (_conn, client) = spawn_server(demo_handler());
    send_line(&client, r#"{"method":"boom"}"#);
    let err = read_line(&client).expect_err("a notification must never produce a reply");
    assert!(
        matches!(err.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut),
        "unexpected error kind: {err:?}"
    );
}

#[test]
fn scenario_5_pipe_call_yields_one_frame_per_value_sharing_the_id() {
    let (_conn, client) = spawn_server(demo_handler());
    send_line(&client, r#"{"method":"count","id":7,"params":[3]}"#);
    for expected in [1, 2, 3] {
        let reply = read_value(&client);
        assert_eq!(reply, serde_json::json!({"result": expected, "error": null, "id": 7}));
    }
}

#[test]
fn scenario_6_batch_dispatches_each_element_and_both_replies_arrive() {
    let (_conn, client) = spawn_server(demo_handler());
    send_line(&client, r#"[{"method":"ping","id":10},{"method":"ping","id":11}]"#);
    let mut seen_ids = std::collections::HashSet::new();
    for _ in 0..2 {
        let reply = read_value(&client);
        assert_eq!(reply["result"], serde_json::json!("pong"));
        assert_eq!(reply["error"], serde_json::Value::Null);
        seen_ids.insert(reply["id"].as_u64().unwrap());
    }
    assert_eq!(seen_ids, std::collections::HashSet::from([10, 11]));
}

#[test]
fn scenario_7_delete_removes_the_hosted_object_and_sends_no_reply() {
    let singleton: Arc<dyn Object> = Arc::new(SimpleObject::new());
    let singleton_for_method = singleton.clone();
    let handler = SimpleObject::new().with_method("get_singleton", move |_ctx: &dyn Context, _params: Params| {
        Ok(MethodOutcome::Value(RpcValue::Hosted(singleton_for_method.clone())))
    });
    let (conn, client) = spawn_server(handler);

    send_line(&client, r#"{"method":"get_singleton","id":1}"#);
    let reply = read_value(&client);
    let name = reply["result"]["__remoteobject__"]
        .as_str()
        .expect("expected a __remoteobject__ hint")
        .to_owned();
    assert_eq!(conn.hosted_objects().len(), 1);

    send_line(&client, &format!(r#"{{"method":"{name}.__delete__","id":99}}"#));
    let err = read_line(&client).expect_err("__delete__ must never produce a reply");
    assert!(matches!(err.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut));

    // Give the (possibly threaded) dispatch a moment to run, matching how a
    // real caller would only observe removal asynchronously.
    for _ in 0..50 {
        if conn.hosted_objects().is_empty() {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(conn.hosted_objects().is_empty());
}

#[test]
fn hosted_object_idempotence_over_the_wire() {
    let singleton: Arc<dyn Object> = Arc::new(SimpleObject::new());
    let singleton_for_method = singleton.clone();
    let handler = SimpleObject::new().with_method("get_singleton", move |_ctx: &dyn Context, _params: Params| {
        Ok(MethodOutcome::Value(RpcValue::Hosted(singleton_for_method.clone())))
    });
    let (conn, client) = spawn_server(handler);

    send_line(&client, r#"{"method":"get_singleton","id":1}"#);
    let first = read_value(&client)["result"]["__remoteobject__"].as_str().unwrap().to_owned();
    send_line(&client, r#"{"method":"get_singleton","id":2}"#);
    let second = read_value(&client)["result"]["__remoteobject__"].as_str().unwrap().to_owned();

    assert_eq!(first, second);
    assert_eq!(conn.hosted_objects().len(), 1);
}

#[test]
fn two_hosted_objects_coexist_under_distinct_names() {
    let first: Arc<dyn Object> = Arc::new(SimpleObject::new());
    let second: Arc<dyn Object> = Arc::new(SimpleObject::new());
    let first_for_method = first.clone();
    let second_for_method = second.clone();
    let handler = SimpleObject::new()
        .with_method("get_first", move |_ctx: &dyn Context, _params: Params| {
            Ok(MethodOutcome::Value(RpcValue::Hosted(first_for_method.clone())))
        })
        .with_method("get_second", move |_ctx: &dyn Context, _params: Params| {
            Ok(MethodOutcome::Value(RpcValue::Hosted(second_for_method.clone())))
        });
    let (conn, client) = spawn_server(handler);

    send_line(&client, r#"{"method":"get_first","id":1}"#);
    let first_name = read_value(&client)["result"]["__remoteobject__"].as_str().unwrap().to_owned();
    send_line(&client, r#"{"method":"get_second","id":2}"#);
    let second_name = read_value(&client)["result"]["__remoteobject__"].as_str().unwrap().to_owned();

    assert_ne!(first_name, second_name, "distinct hosted objects must not collide on a name");
    assert_eq!(conn.hosted_objects().len(), 2);

    // The bare `SimpleObject`s here expose no methods of their own, so a call
    // against either name still gets a proper error reply (not silence) --
    // this confirms the dispatcher actually resolved the dotted prefix to a
    // distinct object rather than dropping the frame.
    send_line(&client, &format!(r#"{{"method":"{first_name}.ping","id":3}}"#));
    let reply = read_value(&client);
    assert_eq!(
        reply,
        serde_json::json!({"result": null, "error": "no such method: \"ping\"", "id": 3})
    );
}

#[test]
fn unknown_top_level_shape_gets_an_error_reply_when_an_id_is_present() {
    let (_conn, client) = spawn_server(demo_handler());
    send_line(&client, r#"{"id":42,"something":"else"}"#);
    let reply = read_value(&client);
    assert_eq!(reply["id"], serde_json::json!(42));
    assert_eq!(reply["error"], serde_json::json!("UnknownFormat: unknown format"));
}

#[test]
fn malformed_json_is_dropped_and_the_connection_keeps_serving() {
    let (_conn, client) = spawn_server(demo_handler());
    send_line(&client, "not json at all {{{");
    send_line(&client, r#"{"method":"echo","id":5,"params":["still alive"]}"#);
    let reply = read_value(&client);
    assert_eq!(reply, serde_json::json!({"result":"still alive","error":null,"id":5}));
}

#[test]
fn framing_round_trip_over_a_real_socket() {
    let (_conn, client) = spawn_server(demo_handler());
    // Two requests written back-to-back in a single `write_all`, exercising
    // the reader's byte-accumulation loop rather than one line per syscall.
    let mut combined = String::new();
    combined.push_str(r#"{"method":"echo","id":1,"params":["a"]}"#);
    combined.push('\n');
    combined.push_str(r#"{"method":"echo","id":2,"params":["b"]}"#);
    combined.push('\n');
    client.try_clone().unwrap().write_all(combined.as_bytes()).unwrap();

    assert_eq!(read_value(&client), serde_json::json!({"result":"a","error":null,"id":1}));
    assert_eq!(read_value(&client), serde_json::json!({"result":"b","error":null,"id":2}));
}

#[test]
fn outbound_proxy_call_round_trips_against_a_real_peer() {
    // This direction exercises the *other* half of the engine: our own
    // `Connection` placing a synchronous call against a peer that replies by
    // hand, rather than us dispatching an inbound request.
    let (server_side, client_side) = linerpc::test_support::duplex_pair();
    let conn = Connection::new_threaded(server_side, None);
    conn.spawn_serve();

    let responder = std::thread::spawn(move || {
        let line = read_line(&client_side).expect("expected the outbound request frame");
        let request: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(request["method"], serde_json::json!("greet"));
        let id = request["id"].as_u64().unwrap();
        send_line(
            &client_side,
            &format!(r#"{{"result":"hello","error":null,"id":{id}}}"#),
        );
    });

    let proxy = conn.proxy();
    let result = proxy.call0("greet", &[serde_json::json!("world")]).expect("call should succeed");
    assert_eq!(result, serde_json::json!("hello"));

    responder.join().unwrap();
    conn.close();
}

#[test]
fn outbound_pipe_callback_fires_for_every_reply_as_it_arrives() {
    let (server_side, client_side) = linerpc::test_support::duplex_pair();
    let conn = Connection::new_threaded(server_side, None);
    conn.spawn_serve();

    let responder = std::thread::spawn(move || {
        let line = read_line(&client_side).expect("expected the outbound pipe request frame");
        let request: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        let id = request["id"].as_u64().unwrap();
        for v in [1, 2, 3] {
            send_line(&client_side, &format!(r#"{{"result":{v},"error":null,"id":{id}}}"#));
        }
        client_side
    });

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen_for_callback = seen.clone();
    let proxy = conn.proxy();
    let request = proxy
        .pipe_with_callback(
            "count",
            &[RpcValue::from_json(serde_json::json!(3))],
            &[],
            Box::new(move |reply| {
                if let linerpc::Reply::Result(v) = reply {
                    seen_for_callback.lock().unwrap().push(v.clone().into_json().unwrap());
                }
            }),
        )
        .expect("pipe call should succeed");

    for expected in [1, 2, 3] {
        let got = request.next().expect("pipe reply").expect("reply present");
        assert_eq!(got.unwrap().into_json().unwrap(), serde_json::json!(expected));
    }
    assert_eq!(*seen.lock().unwrap(), vec![serde_json::json!(1), serde_json::json!(2), serde_json::json!(3)]);

    request.close();
    responder.join().unwrap();
    conn.close();
}

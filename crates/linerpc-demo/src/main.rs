//! A minimal TCP listener and client exercising the `linerpc` connection
//! engine end to end.
//!
//! The accept loop here is intentionally thin — `linerpc` treats listeners
//! as an external collaborator, not part of its own surface. Run with
//! `listen <addr>` in one terminal and `connect <addr>` in another.

mod objects;

use std::net::{TcpListener, TcpStream};
use std::sync::Arc;

use linerpc::{Connection, ConnectionBuilder};

fn main() {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("listen") => {
            let addr = args.next().unwrap_or_else(|| "127.0.0.1:7878".to_owned());
            listen(&addr);
        }
        Some("connect") => {
            let addr = args.next().unwrap_or_else(|| "127.0.0.1:7878".to_owned());
            connect(&addr);
        }
        _ => {
            eprintln!("usage: linerpc-demo <listen|connect> [addr]");
            std::process::exit(2);
        }
    }
}

fn listen(addr: &str) {
    let listener = TcpListener::bind(addr).expect("failed to bind listener");
    tracing::info!(%addr, "listening");
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "failed to accept connection");
                continue;
            }
        };
        std::thread::spawn(move || serve_one(stream));
    }
}

fn serve_one(stream: TcpStream) {
    let handler = Arc::new(objects::root_handler());
    let config = ConnectionBuilder::new().threaded(true).build();
    let conn = Connection::with_config(stream, Some(handler), config);
    // `serve` also places outbound calls against its own peer in this demo
    // (the connection is symmetric, so either side may initiate), which is
    // why we run it on a background thread and keep going here.
    let _ = conn.serve();
}

fn connect(addr: &str) {
    let stream = TcpStream::connect(addr).expect("failed to connect");
    let handler = Arc::new(objects::root_handler());
    let config = ConnectionBuilder::new().threaded(true).build();
    let conn = Connection::with_config(stream, Some(handler), config);
    let _serve = conn.spawn_serve();

    let proxy = conn.proxy();

    match proxy.call0("echo", &[serde_json::json!("hi")]) {
        Ok(v) => println!("echo(\"hi\") = {v}"),
        Err(e) => eprintln!("echo failed: {e}"),
    }

    match proxy.call0("add", &[serde_json::json!(2), serde_json::json!(3)]) {
        Ok(v) => println!("add(2, 3) = {v}"),
        Err(e) => eprintln!("add failed: {e}"),
    }

    match proxy.call0("boom", &[]) {
        Ok(v) => println!("boom() = {v}"),
        Err(e) => println!("boom() raised: {e}"),
    }

    match proxy.pipe0("count", &[serde_json::json!(3)]) {
        Ok(request) => {
            while let Ok(Some(item)) = request.next() {
                match item {
                    Ok(v) => println!("count yielded {v:?}"),
                    Err(e) => {
                        println!("count failed mid-stream: {e}");
                        break;
                    }
                }
            }
            request.close();
        }
        Err(e) => eprintln!("count failed: {e}"),
    }

    conn.close();
}

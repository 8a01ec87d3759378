//! A minimal test-fixture "server" used by supervisor and coordinator integration tests.
//!
//! It understands exactly the contract the supervisor spawns a child with: a `--port=<port>`
//! argument (and the equivalent `FLEDGE_PORT` env var). It binds that port and then just accepts
//! and drops connections forever, which is all the readiness probe needs. Passing
//! `--exit-immediately=<code>` makes it exit with `<code>` without binding anything, so tests can
//! exercise the `BootError::ChildExited` path without a real crash-prone server.

use std::net::TcpListener;

fn main() {
    let mut port: Option<u16> = None;
    let mut exit_immediately: Option<i32> = None;

    for arg in std::env::args().skip(1) {
        if let Some(value) = arg.strip_prefix("--port=") {
            port = value.parse().ok();
        } else if let Some(value) = arg.strip_prefix("--exit-immediately=") {
            exit_immediately = Some(value.parse().unwrap_or(1));
        }
    }

    if let Some(code) = exit_immediately {
        eprintln!("fixture: exiting immediately with code {code}");
        std::process::exit(code);
    }

    let port = port
        .or_else(|| std::env::var("FLEDGE_PORT").ok().and_then(|v| v.parse().ok()))
        .expect("fixture requires --port=<port> or FLEDGE_PORT");

    let listener = TcpListener::bind(("127.0.0.1", port)).expect("fixture failed to bind port");
    loop {
        match listener.accept() {
            Ok((_socket, _addr)) => {}
            Err(_) => break,
        }
    }
}

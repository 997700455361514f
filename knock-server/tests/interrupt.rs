//! Runs the `knock-server` binary and drives it the way an operator would.
#![cfg(unix)]

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
const EXIT_TIMEOUT: Duration = Duration::from_secs(10);

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn spawn_server(port: u16) -> Child {
    Command::new(env!("CARGO_BIN_EXE_knock-server"))
        .env("CONFIG", "/nonexistent/knock.toml")
        .env("HOST", "127.0.0.1")
        .env("PORT", port.to_string())
        .env("RUST_LOG", "info")
        .env("NO_COLOR", "1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap()
}

fn connect_when_ready(server: &mut Child, addr: SocketAddr) -> TcpStream {
    let deadline = Instant::now() + STARTUP_TIMEOUT;
    loop {
        if let Ok(stream) = TcpStream::connect(addr) {
            return stream;
        }
        if let Some(status) = server.try_wait().unwrap() {
            panic!("server exited before listening: {status}");
        }
        assert!(Instant::now() < deadline, "server never started listening");
        thread::sleep(Duration::from_millis(20));
    }
}

fn wait_for_exit(mut server: Child) -> (ExitStatus, Output) {
    let deadline = Instant::now() + EXIT_TIMEOUT;
    loop {
        if let Some(status) = server.try_wait().unwrap() {
            let output = server.wait_with_output().unwrap();
            return (status, output);
        }
        if Instant::now() >= deadline {
            server.kill().unwrap();
            panic!("server did not exit");
        }
        thread::sleep(Duration::from_millis(20));
    }
}

fn send_sigint(server: &Child) {
    let status = Command::new("kill")
        .args(["-INT", &server.id().to_string()])
        .status()
        .unwrap();
    assert!(status.success());
}

#[test]
fn test_request_then_sigint_exits_with_zero() {
    let port = free_port();
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let mut server = spawn_server(port);

    let mut client = connect_when_ready(&mut server, addr);
    client
        .write_all(b"POST /submit HTTP/1.1\r\nHost: x\r\n\r\n")
        .unwrap();
    let mut response = String::new();
    client.read_to_string(&mut response).unwrap();
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.contains("Method: POST"));
    assert!(response.contains("Path: /submit"));

    // The response proves the signal listener was installed before bind.
    send_sigint(&server);

    let (status, output) = wait_for_exit(server);
    assert_eq!(status.code(), Some(0));
    let log = String::from_utf8_lossy(&output.stdout);
    assert!(log.contains("shutdown requested"), "log was: {log}");
    assert!(log.contains("server exited cleanly"), "log was: {log}");
}

#[test]
fn test_second_sigint_is_absorbed() {
    let port = free_port();
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let mut server = spawn_server(port);
    drop(connect_when_ready(&mut server, addr));

    send_sigint(&server);
    // Either delivered to a process still shutting down, or to one already gone.
    let _ = Command::new("kill")
        .args(["-INT", &server.id().to_string()])
        .stderr(Stdio::null())
        .status();

    let (status, _) = wait_for_exit(server);
    assert_eq!(status.code(), Some(0));
}

#[test]
fn test_bind_conflict_exits_with_one() {
    let occupied = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();

    let server = spawn_server(port);
    let (status, output) = wait_for_exit(server);
    assert_eq!(status.code(), Some(1));
    let log = String::from_utf8_lossy(&output.stdout);
    assert!(log.contains("knock-server failed"), "log was: {log}");
    drop(occupied);
}

//! Real loopback tests exercising the server's public API end to end:
//! a `TcpListener`, a handler, and a client socket, with no access to
//! anything the crate doesn't export.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use talon_config::ServerConfig;
use talon_core::HttpDate;
use talon_server::connection::worker_func;
use talon_server::EchoHandler;

async fn spawn_echo_server(config: Arc<ServerConfig>) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let clock = Arc::new(HttpDate::new(0));
    let handler = Arc::new(EchoHandler);
    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(v) => v,
                Err(_) => return,
            };
            let handler = Arc::clone(&handler);
            let config = Arc::clone(&config);
            let clock = Arc::clone(&clock);
            tokio::spawn(worker_func(stream, handler, config, clock));
        }
    });
    addr
}

#[tokio::test]
async fn round_trips_a_single_request() {
    let config = Arc::new(ServerConfig::default());
    let addr = spawn_echo_server(config).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"POST /echo HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\nhello")
        .await
        .unwrap();

    let mut buf = vec![0u8; 4096];
    let n = client.read(&mut buf).await.unwrap();
    let text = String::from_utf8_lossy(&buf[..n]);
    assert!(text.starts_with("HTTP/1.1 200"));
    assert!(text.contains("Server: talon"));
    assert!(text.contains("Date:"));
    assert!(text.ends_with("hello"));
}

#[tokio::test]
async fn keeps_connection_alive_across_pipelined_requests() {
    let config = Arc::new(ServerConfig::default());
    let addr = spawn_echo_server(config).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    for i in 0..3u8 {
        let body = format!("req-{i}");
        let req = format!(
            "POST /echo HTTP/1.1\r\nHost: x\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        client.write_all(req.as_bytes()).await.unwrap();
        let mut buf = vec![0u8; 4096];
        let n = client.read(&mut buf).await.unwrap();
        let text = String::from_utf8_lossy(&buf[..n]);
        assert!(text.ends_with(&body));
    }
}

#[tokio::test]
async fn connection_close_header_closes_after_response() {
    let config = Arc::new(ServerConfig::default());
    let addr = spawn_echo_server(config).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"GET /echo HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut buf = vec![0u8; 4096];
    let n = client.read(&mut buf).await.unwrap();
    assert!(n > 0);
    let n2 = client.read(&mut buf).await.unwrap();
    assert_eq!(n2, 0);
}

#[tokio::test]
async fn accepts_and_echoes_on_bound_port() {
    let mut config = ServerConfig::default();
    config.listen = "127.0.0.1:0".parse().unwrap();
    let listener = TcpListener::bind(config.listen).await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    config.listen = addr;

    let server = Arc::new(talon_server::Server::new(config, EchoHandler));
    let shutdown = server.shutdown_handle();
    let server_for_task = Arc::clone(&server);
    let run_task = tokio::spawn(async move { server_for_task.run().await });

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"GET /x HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
    let mut buf = vec![0u8; 4096];
    let n = client.read(&mut buf).await.unwrap();
    assert!(String::from_utf8_lossy(&buf[..n]).starts_with("HTTP/1.1 200"));

    shutdown.notify_one();
    let _ = tokio::time::timeout(std::time::Duration::from_secs(1), run_task).await;
}

//! Real loopback tests exercising the client through its public API:
//! pooled connections dialing an actual `TcpListener`, no private
//! internals.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

use talon_client::{Client, Dialer};
use talon_config::ClientConfig;
use talon_core::{Request, Response};

struct LoopbackDialer {
    addr: std::net::SocketAddr,
    dials: AtomicUsize,
}

impl Dialer for LoopbackDialer {
    type Stream = TcpStream;

    async fn dial(&self, _host: &str) -> std::io::Result<TcpStream> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let stream = TcpStream::connect(self.addr).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

async fn spawn_echo_server() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(v) => v,
                Err(_) => return,
            };
            tokio::spawn(async move {
                loop {
                    let mut buf = BytesMut::new();
                    let mut req = talon_core::Request::new();
                    let consumed = loop {
                        if let Ok(Some(consumed)) = req.read(&buf, 4096) {
                            break consumed;
                        }
                        let n = match stream.read_buf(&mut buf).await {
                            Ok(n) => n,
                            Err(_) => return,
                        };
                        if n == 0 {
                            return;
                        }
                    };
                    buf.advance(consumed);
                    let body = req.body().as_inline().unwrap_or(&[]).to_vec();
                    let mut resp = talon_core::Response::new();
                    resp.swap_body(body);
                    let mut out = Vec::new();
                    let _ = resp.write_to(&mut out);
                    if stream.write_all(&out).await.is_err() {
                        return;
                    }
                }
            });
        }
    });
    addr
}

#[tokio::test]
async fn do_request_round_trips_through_loopback() {
    let addr = spawn_echo_server().await;
    let dialer = LoopbackDialer { addr, dials: AtomicUsize::new(0) };
    let config = Arc::new(ClientConfig::default());
    let client = Client::new(dialer, config);

    let mut req = Request::new();
    req.header_mut().set_host(b"example.com");
    req.header_mut().set_request_uri(b"/echo");
    req.swap_body(b"hello".to_vec());
    let mut resp = Response::new();

    client.do_request(&mut req, &mut resp).await.unwrap();
    assert_eq!(resp.header().status_code(), 200);
    assert_eq!(resp.body().as_inline(), Some(&b"hello"[..]));
}

#[tokio::test]
async fn keep_alive_reuses_one_connection_for_ten_requests() {
    let addr = spawn_echo_server().await;
    let dialer = LoopbackDialer { addr, dials: AtomicUsize::new(0) };
    let config = Arc::new(ClientConfig::default());
    let client = Client::new(dialer, config);

    for _ in 0..10 {
        let mut req = Request::new();
        req.header_mut().set_host(b"example.com");
        req.header_mut().set_request_uri(b"/echo");
        let mut resp = Response::new();
        client.do_request(&mut req, &mut resp).await.unwrap();
        assert_eq!(resp.header().status_code(), 200);
    }

    assert_eq!(client.pool().total_for("example.com"), 1);
}

async fn spawn_slow_echo_server(delay: Duration) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(v) => v,
                Err(_) => return,
            };
            tokio::spawn(async move {
                let mut buf = BytesMut::new();
                let mut req = talon_core::Request::new();
                loop {
                    if let Ok(Some(consumed)) = req.read(&buf, 4096) {
                        buf.advance(consumed);
                        break;
                    }
                    if stream.read_buf(&mut buf).await.unwrap_or(0) == 0 {
                        return;
                    }
                }
                tokio::time::sleep(delay).await;
                let mut resp = talon_core::Response::new();
                resp.swap_body(b"late".to_vec());
                let mut out = Vec::new();
                let _ = resp.write_to(&mut out);
                let _ = stream.write_all(&out).await;
            });
        }
    });
    addr
}

#[tokio::test]
async fn client_timeout_does_not_return_connection_to_pool() {
    // Server sleeps 1s, client calls do_timeout with a 50ms budget.
    // Expect a Timeout error and the connection dropped rather than pooled.
    let addr = spawn_slow_echo_server(Duration::from_secs(1)).await;
    let dialer = LoopbackDialer { addr, dials: AtomicUsize::new(0) };
    let config = Arc::new(ClientConfig::default());
    let client = Client::new(dialer, config);

    let mut req = Request::new();
    req.header_mut().set_host(b"example.com");
    let mut resp = Response::new();

    let err = client
        .do_timeout(&mut req, &mut resp, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, talon_client::ClientError::Timeout));
    assert_eq!(client.pool().idle_count_for("example.com"), 0);
}

struct RoundRobinAddrDialer {
    addrs: Vec<std::net::SocketAddr>,
    next: AtomicUsize,
}

impl Dialer for RoundRobinAddrDialer {
    type Stream = TcpStream;

    async fn dial(&self, _host: &str) -> std::io::Result<TcpStream> {
        let idx = self.next.fetch_add(1, Ordering::SeqCst) % self.addrs.len();
        TcpStream::connect(self.addrs[idx]).await
    }
}

#[tokio::test]
async fn multi_host_round_robin_dials_each_address_evenly() {
    // Three addresses, nine requests, three dials per address
    // (round-robin; each request forces a fresh dial since none are
    // kept in the pool across hosts here).
    let counts: Vec<_> = (0..3).map(|_| Arc::new(AtomicUsize::new(0))).collect();
    let mut addrs = Vec::new();
    for counter in &counts {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        addrs.push(addr);
        let counter = Arc::clone(counter);
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(v) => v,
                    Err(_) => return,
                };
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut buf = BytesMut::new();
                    let mut req = talon_core::Request::new();
                    loop {
                        if let Ok(Some(consumed)) = req.read(&buf, 4096) {
                            buf.advance(consumed);
                            break;
                        }
                        if stream.read_buf(&mut buf).await.unwrap_or(0) == 0 {
                            return;
                        }
                    }
                    let mut resp = talon_core::Response::new();
                    resp.header_mut().set_connection_close(true);
                    let mut out = Vec::new();
                    let _ = resp.write_to(&mut out);
                    let _ = stream.write_all(&out).await;
                });
            }
        });
    }

    let dialer = RoundRobinAddrDialer { addrs, next: AtomicUsize::new(0) };
    let config = Arc::new(ClientConfig::default());
    let client = Client::new(dialer, config);

    for _ in 0..9 {
        let mut req = Request::new();
        req.header_mut().set_host(b"rr.example.com");
        req.header_mut().set_connection_close(true);
        let mut resp = Response::new();
        client.do_request(&mut req, &mut resp).await.unwrap();
    }

    for counter in &counts {
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }
}

async fn spawn_connection_dropping_server() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(v) => v,
                Err(_) => return,
            };
            tokio::spawn(async move {
                let mut buf = BytesMut::new();
                let mut req = talon_core::Request::new();
                loop {
                    if let Ok(Some(_)) = req.read(&buf, 4096) {
                        break;
                    }
                    if stream.read_buf(&mut buf).await.unwrap_or(0) == 0 {
                        return;
                    }
                }
                // drop the stream without writing a response
            });
        }
    });
    addr
}

#[tokio::test]
async fn idempotent_retries_exhausted_reports_attempt_count() {
    // Every dial succeeds but the peer closes without responding, so a
    // GET keeps retrying (idempotent, nothing received yet) until the
    // attempt budget runs out.
    let addr = spawn_connection_dropping_server().await;
    let dialer = LoopbackDialer { addr, dials: AtomicUsize::new(0) };
    let mut config = ClientConfig::default();
    config.max_idempotent_call_attempts = 3;
    let client = Client::new(dialer, Arc::new(config));

    let mut req = Request::new();
    req.header_mut().set_host(b"example.com");
    req.header_mut().set_request_uri(b"/echo");
    let mut resp = Response::new();

    let err = client.do_request(&mut req, &mut resp).await.unwrap_err();
    assert!(matches!(err, talon_client::ClientError::RetriesExhausted(3)));
}

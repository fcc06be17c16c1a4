use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crossbar::config::{
    BackendConfig, Config, HealthCheckConfig, LoggingConfig, PolicyKind, ServerConfig,
};
use crossbar::LoadBalancer;

/// Raw TCP backend serving a canned HTTP response, for byte-exact assertions
struct MockBackend {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
}

impl MockBackend {
    async fn spawn(response: &'static [u8]) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_counter = Arc::clone(&hits);

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let hits = Arc::clone(&hits_counter);
                tokio::spawn(async move {
                    // Read the request head, then answer and close
                    let mut buf = [0u8; 4096];
                    let mut head = Vec::new();
                    loop {
                        let n = socket.read(&mut buf).await.unwrap_or(0);
                        if n == 0 {
                            return;
                        }
                        head.extend_from_slice(&buf[..n]);
                        if head.windows(4).any(|w| w == b"\r\n\r\n") {
                            break;
                        }
                    }
                    hits.fetch_add(1, Ordering::SeqCst);
                    socket.write_all(response).await.ok();
                    socket.flush().await.ok();
                });
            }
        });

        Self { addr, hits }
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    fn config(&self, weight: u32) -> BackendConfig {
        BackendConfig {
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
            weight,
        }
    }
}

fn proxy_config(backends: Vec<BackendConfig>, algorithm: PolicyKind) -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            thread_pool_size: 8,
        },
        algorithm,
        backends,
        health_check: HealthCheckConfig {
            enabled: false,
            ..Default::default()
        },
        logging: LoggingConfig::default(),
    }
}

async fn send_request(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    stream.flush().await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    response
}

/// Like `send_request`, but keeps whatever arrived if the proxy hangs up
/// without draining our request (the close can surface as a reset)
async fn send_request_tolerant(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    stream.flush().await.unwrap();

    let mut response = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => response.extend_from_slice(&chunk[..n]),
        }
    }
    response
}

const GET_REQUEST: &[u8] = b"GET / HTTP/1.1\r\nHost: x\r\n\r\n";

#[tokio::test]
async fn test_single_backend_exact_passthrough() {
    const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";
    let backend = MockBackend::spawn(RESPONSE).await;

    let lb = LoadBalancer::new(proxy_config(
        vec![backend.config(1)],
        PolicyKind::RoundRobin,
    ));
    lb.start().await.unwrap();
    let addr = lb.local_addr().await.unwrap();

    let received = send_request(addr, GET_REQUEST).await;
    assert_eq!(received, RESPONSE);
    assert_eq!(backend.hits(), 1);

    lb.stop().await.unwrap();
}

#[tokio::test]
async fn test_weighted_round_robin_distribution() {
    const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";
    let backend_a = MockBackend::spawn(RESPONSE).await;
    let backend_b = MockBackend::spawn(RESPONSE).await;
    let backend_c = MockBackend::spawn(RESPONSE).await;

    let lb = LoadBalancer::new(proxy_config(
        vec![backend_a.config(1), backend_b.config(1), backend_c.config(2)],
        PolicyKind::RoundRobin,
    ));
    lb.start().await.unwrap();
    let addr = lb.local_addr().await.unwrap();

    // One full cycle of the total weight, twice over
    for _ in 0..8 {
        let received = send_request(addr, GET_REQUEST).await;
        assert_eq!(received, RESPONSE);
    }

    assert_eq!(backend_a.hits(), 2);
    assert_eq!(backend_b.hits(), 2);
    assert_eq!(backend_c.hits(), 4);

    lb.stop().await.unwrap();
}

#[tokio::test]
async fn test_all_backends_unavailable_yields_503() {
    const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";
    let backend = MockBackend::spawn(RESPONSE).await;

    let lb = LoadBalancer::new(proxy_config(
        vec![backend.config(1)],
        PolicyKind::RoundRobin,
    ));
    lb.start().await.unwrap();
    let addr = lb.local_addr().await.unwrap();

    for b in lb.backends().await.unwrap().iter() {
        b.set_available(false);
    }

    let received = send_request_tolerant(addr, GET_REQUEST).await;
    assert_eq!(
        received,
        b"HTTP/1.1 503 Service Unavailable\r\nContent-Type: text/plain\r\nContent-Length: 19\r\nConnection: close\r\n\r\nService Unavailable"
    );
    assert_eq!(backend.hits(), 0);

    lb.stop().await.unwrap();
}

#[tokio::test]
async fn test_chunked_response_exact_passthrough() {
    const RESPONSE: &[u8] =
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";
    let backend = MockBackend::spawn(RESPONSE).await;

    let lb = LoadBalancer::new(proxy_config(
        vec![backend.config(1)],
        PolicyKind::RoundRobin,
    ));
    lb.start().await.unwrap();
    let addr = lb.local_addr().await.unwrap();

    let received = send_request(addr, GET_REQUEST).await;
    assert_eq!(received, RESPONSE);

    lb.stop().await.unwrap();
}

#[tokio::test]
async fn test_close_delimited_response_passthrough() {
    // No Content-Length: the body runs until the backend closes
    const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nConnection: close\r\n\r\nstream until eof";
    let backend = MockBackend::spawn(RESPONSE).await;

    let lb = LoadBalancer::new(proxy_config(
        vec![backend.config(1)],
        PolicyKind::RoundRobin,
    ));
    lb.start().await.unwrap();
    let addr = lb.local_addr().await.unwrap();

    let received = send_request(addr, GET_REQUEST).await;
    assert_eq!(received, RESPONSE);

    lb.stop().await.unwrap();
}

#[tokio::test]
async fn test_ip_hash_routes_same_client_consistently() {
    const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";
    let backend_a = MockBackend::spawn(RESPONSE).await;
    let backend_b = MockBackend::spawn(RESPONSE).await;

    let lb = LoadBalancer::new(proxy_config(
        vec![backend_a.config(1), backend_b.config(1)],
        PolicyKind::IpHash,
    ));
    lb.start().await.unwrap();
    let addr = lb.local_addr().await.unwrap();

    // Same client IP both times, so both requests land on the same backend
    send_request(addr, GET_REQUEST).await;
    send_request(addr, GET_REQUEST).await;

    let hits = (backend_a.hits(), backend_b.hits());
    assert!(hits == (2, 0) || hits == (0, 2), "hits split: {:?}", hits);

    lb.stop().await.unwrap();
}

#[tokio::test]
async fn test_request_body_reaches_backend() {
    const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";
    let backend = MockBackend::spawn(RESPONSE).await;

    let lb = LoadBalancer::new(proxy_config(
        vec![backend.config(1)],
        PolicyKind::RoundRobin,
    ));
    lb.start().await.unwrap();
    let addr = lb.local_addr().await.unwrap();

    let request = b"POST /submit HTTP/1.1\r\nHost: x\r\nContent-Length: 11\r\n\r\nhello world";
    let received = send_request(addr, request).await;
    assert_eq!(received, RESPONSE);
    assert_eq!(backend.hits(), 1);

    lb.stop().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_requests_settle_to_zero_connections() {
    const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";
    let backend_a = MockBackend::spawn(RESPONSE).await;
    let backend_b = MockBackend::spawn(RESPONSE).await;

    let lb = LoadBalancer::new(proxy_config(
        vec![backend_a.config(1), backend_b.config(1)],
        PolicyKind::LeastConnections,
    ));
    lb.start().await.unwrap();
    let addr = lb.local_addr().await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..20 {
        tasks.push(tokio::spawn(async move {
            send_request(addr, GET_REQUEST).await
        }));
    }
    for task in tasks {
        let received = task.await.unwrap();
        assert_eq!(received, RESPONSE);
    }

    assert_eq!(backend_a.hits() + backend_b.hits(), 20);
    for backend in lb.backends().await.unwrap().iter() {
        assert_eq!(backend.active_connections(), 0);
    }

    lb.stop().await.unwrap();
}

#[tokio::test]
async fn test_backend_connect_refused_closes_client() {
    // Nothing listens on the backend port; the proxy logs and hangs up
    let lb = LoadBalancer::new(proxy_config(
        vec![BackendConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            weight: 1,
        }],
        PolicyKind::RoundRobin,
    ));
    lb.start().await.unwrap();
    let addr = lb.local_addr().await.unwrap();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(GET_REQUEST).await.ok();

    // The proxy hangs up without relaying anything; depending on timing the
    // close surfaces as a clean EOF or a reset
    let mut received = Vec::new();
    let _ = stream.read_to_end(&mut received).await;
    assert!(received.is_empty());

    lb.stop().await.unwrap();
}

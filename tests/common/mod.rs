#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;

/// Hand-built recursion-desired A/IN query, independent of the crate's own
/// encoder.
pub fn a_query(txid: u16, name: &str) -> Vec<u8> {
    let mut packet = vec![
        (txid >> 8) as u8,
        txid as u8,
        0x01,
        0x00, // RD
        0x00,
        0x01, // QDCOUNT
        0x00,
        0x00,
        0x00,
        0x00,
        0x00,
        0x00,
    ];
    for label in name.split('.') {
        packet.push(label.len() as u8);
        packet.extend_from_slice(label.as_bytes());
    }
    packet.push(0);
    packet.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]); // A IN
    packet
}

fn response_header(request: &[u8], ancount: u16) -> Vec<u8> {
    let mut end = 12;
    while request[end] != 0 {
        end += 1 + request[end] as usize;
    }
    end += 1 + 4; // root label + QTYPE + QCLASS

    let mut packet = Vec::new();
    packet.extend_from_slice(&request[0..2]);
    packet.extend_from_slice(&[0x81, 0x80]); // QR RD RA, NOERROR
    packet.extend_from_slice(&[0x00, 0x01]);
    packet.extend_from_slice(&ancount.to_be_bytes());
    packet.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
    packet.extend_from_slice(&request[12..end]);
    packet
}

/// Answer the query in `request` with a single A record.
pub fn a_response(request: &[u8], ttl: u32, addr: [u8; 4]) -> Vec<u8> {
    let mut packet = response_header(request, 1);
    packet.extend_from_slice(&[0xc0, 0x0c]); // name pointer to the question
    packet.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]); // A IN
    packet.extend_from_slice(&ttl.to_be_bytes());
    packet.extend_from_slice(&[0x00, 0x04]);
    packet.extend_from_slice(&addr);
    packet
}

/// NOERROR response with an empty answer section.
pub fn empty_response(request: &[u8]) -> Vec<u8> {
    response_header(request, 0)
}

/// Scriptable in-process DoH upstream.
#[derive(Debug, Default)]
pub struct MockDoh {
    pub requests: AtomicU64,
    /// Answer HTTP 502 to this many requests before succeeding.
    pub fail_first: AtomicU64,
    /// Stall each request this long before answering.
    pub delay_ms: AtomicU64,
    /// Answer with an empty answer section instead of an A record.
    pub empty_answer: AtomicBool,
    /// TTL of the answer record.
    pub answer_ttl: AtomicU64,
}

impl MockDoh {
    pub fn with_ttl(ttl: u32) -> Arc<Self> {
        let mock = Self::default();
        mock.answer_ttl.store(u64::from(ttl), Ordering::SeqCst);
        Arc::new(mock)
    }

    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }
}

async fn handle(State(mock): State<Arc<MockDoh>>, body: Bytes) -> (StatusCode, Vec<u8>) {
    mock.requests.fetch_add(1, Ordering::SeqCst);

    let delay = mock.delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    let should_fail = mock
        .fail_first
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if should_fail {
        return (StatusCode::BAD_GATEWAY, Vec::new());
    }

    if mock.empty_answer.load(Ordering::SeqCst) {
        return (StatusCode::OK, empty_response(&body));
    }
    let ttl = mock.answer_ttl.load(Ordering::SeqCst) as u32;
    (StatusCode::OK, a_response(&body, ttl, [192, 0, 2, 53]))
}

/// Serve `mock` on an ephemeral local port, returning its address.
pub async fn spawn_mock_doh(mock: Arc<MockDoh>) -> SocketAddr {
    let app = Router::new()
        .route("/dns-query", post(handle))
        .with_state(mock);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock DoH listener");
    let addr = listener.local_addr().expect("mock DoH local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve mock DoH");
    });
    addr
}

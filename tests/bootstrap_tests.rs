use std::time::{Duration, Instant};

use bifrost::bootstrap::{bootstrap_endpoint, resolve_host};
use bifrost::error::BootstrapError;
use reqwest::Url;
use tokio::net::UdpSocket;

mod common;

#[tokio::test]
async fn ip_literal_url_is_a_fixed_point() {
    let url = Url::parse("https://1.1.1.1/dns-query").unwrap();
    let started = Instant::now();
    let resolved = bootstrap_endpoint(&url, "127.0.0.1".parse().unwrap()).await;
    assert!(resolved.is_none());
    // Short-circuit: no lookup, no timeout window.
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn ipv6_literal_url_is_a_fixed_point() {
    let url = Url::parse("https://[2606:4700::1111]/dns-query").unwrap();
    let resolved = bootstrap_endpoint(&url, "127.0.0.1".parse().unwrap()).await;
    assert!(resolved.is_none());
}

#[tokio::test]
async fn resolves_hostname_via_local_responder() {
    let responder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let server = responder.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = [0u8; 512];
        let (len, peer) = responder.recv_from(&mut buf).await.unwrap();
        let response = common::a_response(&buf[..len], 300, [93, 184, 216, 34]);
        responder.send_to(&response, peer).await.unwrap();
    });

    let addr = resolve_host("example.com", server, Duration::from_secs(2))
        .await
        .expect("responder answers");
    assert_eq!(addr.octets(), [93, 184, 216, 34]);
}

#[tokio::test]
async fn lookup_times_out_without_answer() {
    // Bound but silent: the query is received and ignored.
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let server = silent.local_addr().unwrap();

    let result = resolve_host("example.com", server, Duration::from_millis(200)).await;
    assert!(matches!(result, Err(BootstrapError::Timeout)));
}

#[tokio::test]
async fn malformed_answer_is_an_error() {
    let responder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let server = responder.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = [0u8; 512];
        let (_, peer) = responder.recv_from(&mut buf).await.unwrap();
        responder.send_to(&buf[..3], peer).await.unwrap();
    });

    let result = resolve_host("example.com", server, Duration::from_secs(2)).await;
    assert!(matches!(result, Err(BootstrapError::Wire(_))));
}

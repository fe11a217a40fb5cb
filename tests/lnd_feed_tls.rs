//! Settlement feed over TLS
//!
//! LND's REST listener only speaks TLS with a self-signed certificate. These
//! tests stand up such a listener locally and drive the consumer through
//! `LndFeedConnector` against it.

use invoice_kit::issuer::LndConfig;
use invoice_kit::notify::NotificationDispatcher;
use invoice_kit::settlement::{FeedConnector, LndFeedConnector};
use invoice_kit::{
    Error, InvoiceConfig, InvoiceRegistry, IssuedInvoice, RequestFingerprint, Result,
    SettlementConsumer,
};
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

#[derive(Default)]
struct RecordingDispatcher {
    messages: Mutex<Vec<String>>,
}

impl NotificationDispatcher for RecordingDispatcher {
    async fn notify(&self, message: &str) -> Result<()> {
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

/// Self-signed acceptor, like a stock LND `tls.cert`.
fn self_signed_acceptor() -> TlsAcceptor {
    let certified = rcgen::generate_simple_self_signed(vec![
        "localhost".to_string(),
        "127.0.0.1".to_string(),
    ])
    .expect("Failed to generate certificate");
    let cert = certified.cert.der().clone();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der()));

    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .expect("protocol versions")
    .with_no_client_auth()
    .with_single_cert(vec![cert], key)
    .expect("Failed to build TLS config");

    TlsAcceptor::from(Arc::new(config))
}

/// TLS listener answering one request with `response`, then closing.
async fn serve_tls_once(response: &'static [u8]) -> (LndConfig, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let address = listener.local_addr().expect("addr").to_string();
    let acceptor = self_signed_acceptor();

    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.expect("accept");
        let mut stream = acceptor.accept(socket).await.expect("TLS handshake");

        let mut request = Vec::new();
        let mut buf = [0u8; 512];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut buf).await.expect("read request");
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }

        stream.write_all(response).await.expect("write");
        stream.shutdown().await.expect("shutdown");
        String::from_utf8_lossy(&request).to_lowercase()
    });

    (LndConfig::new(address, "0201abcd"), server)
}

/// Test 1: Settlement Over A Self-Signed TLS Feed
#[tokio::test]
async fn test_settlement_over_self_signed_tls() {
    let _ = env_logger::builder().is_test(true).try_init();

    let (config, server) = serve_tls_once(
        b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nConnection: close\r\n\r\n\
          {\"result\":{\"payment_request\":\"lnbc1-open\",\"state\":\"OPEN\"},\"error\":null}\n\
          {\"result\":{\"payment_request\":\"lnbc1-paid\",\"state\":\"SETTLED\"},\"error\":null}\n",
    )
    .await;
    assert!(config.tls);

    let registry = InvoiceRegistry::new(InvoiceConfig::default());
    registry
        .get_or_create(&RequestFingerprint::new("A1", "XY123", 2), |_| async {
            Ok(IssuedInvoice::new("lnbc1-paid", Duration::from_secs(300)))
        })
        .await
        .expect("Failed to get invoice");

    let dispatcher = Arc::new(RecordingDispatcher::default());
    let consumer = SettlementConsumer::new(registry.clone(), Arc::clone(&dispatcher));
    let mut connector = LndFeedConnector::new(config).expect("connector");

    let report = consumer.run(&mut connector).await.expect("run");

    assert_eq!(report.events, 2);
    assert_eq!(report.settled, 1);
    assert_eq!(report.notified, 1);
    assert_eq!(*dispatcher.messages.lock().unwrap(), vec!["A1 XY123 2"]);
    assert!(!registry.is_live("lnbc1-paid"));

    let request = server.await.expect("server");
    assert!(request.starts_with("get /v1/invoices/subscribe"));
    assert!(request.contains("grpc-metadata-macaroon: 0201abcd"));
}

/// Test 2: Refused Subscription Over TLS
#[tokio::test]
async fn test_refused_subscription_over_tls() {
    let (config, server) = serve_tls_once(
        b"HTTP/1.1 403 Forbidden\r\nContent-Length: 17\r\nConnection: close\r\n\r\nverification fail",
    )
    .await;

    let mut connector = LndFeedConnector::new(config).expect("connector");
    match connector.connect().await {
        Err(Error::StreamTermination(msg)) => assert!(msg.contains("403")),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("subscription should be refused"),
    }
    server.await.expect("server");
}

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rustls::pki_types::CertificateDer;
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tungstenite::protocol::Message as WsMessage;

use super::message::Frame;
use super::session::{Endpoint, Session, SessionOptions, SessionState, generate_client_id};
use super::tls::TlsSettings;
use crate::tests::mock_broker::MockBroker;
use crate::utils::Error;

fn quick_options() -> SessionOptions {
    SessionOptions {
        connect_timeout: Duration::from_secs(2),
        shutdown_timeout: Duration::from_millis(500),
    }
}

async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

fn message_frame(topic: &str, payload: &[u8]) -> WsMessage {
    let frame = Frame::Message {
        topic: topic.to_string(),
        payload: payload.to_vec(),
        timestamp: 0,
    };
    WsMessage::Text(frame.encode().unwrap().into())
}

// testdata/tls: `ca` signs `server` (127.0.0.1, localhost) and `client`;
// `other_ca` is an unrelated authority
fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("testdata/tls")
        .join(name)
}

fn read_certs(name: &str) -> Vec<CertificateDer<'static>> {
    let pem = std::fs::read(fixture(name)).unwrap();
    rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

/// Serves WebSockets over TLS, requiring a client certificate signed by the
/// test CA, and answers `connect` with `connack`.
async fn start_tls_broker() -> SocketAddr {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let mut roots = RootCertStore::empty();
    for cert in read_certs("ca.pem") {
        roots.add(cert).unwrap();
    }
    let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
        .build()
        .unwrap();

    let key_pem = std::fs::read(fixture("server.key")).unwrap();
    let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
        .unwrap()
        .unwrap();
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_client_cert_verifier(verifier)
        .with_single_cert(read_certs("server.pem"), key)
        .unwrap();
    let acceptor = TlsAcceptor::from(Arc::new(config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                let Ok(tls) = acceptor.accept(tcp).await else {
                    return;
                };
                let Ok(ws) = tokio_tungstenite::accept_async(tls).await else {
                    return;
                };
                let (mut sink, mut source) = ws.split();
                while let Some(Ok(msg)) = source.next().await {
                    let WsMessage::Text(text) = msg else {
                        continue;
                    };
                    if let Ok(Frame::Connect { .. }) = Frame::decode(&text) {
                        let ack = (Frame::ConnAck {}).encode().unwrap();
                        let _ = sink.send(WsMessage::Text(ack.into())).await;
                    }
                }
            });
        }
    });
    addr
}

#[test]
fn test_frame_wire_shape() {
    let frame = Frame::Publish {
        topic: "emqx/test".to_string(),
        payload: b"hi".to_vec(),
        timestamp: 7,
    };
    let value: serde_json::Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
    assert_eq!(value["type"], "publish");
    assert_eq!(value["topic"], "emqx/test");
    assert_eq!(value["payload"], serde_json::json!([104, 105]));
    assert_eq!(value["timestamp"], 7);

    let connack = Frame::decode(r#"{"type":"connack"}"#).unwrap();
    assert_eq!(connack, Frame::ConnAck {});
}

#[test]
fn test_message_frame_into_message() {
    let frame = Frame::decode(
        r#"{"type":"message","topic":"a/b","payload":[111,107],"timestamp":1}"#,
    )
    .unwrap();
    let message = frame.into_message().unwrap();
    assert_eq!(message.topic, "a/b");
    assert_eq!(message.payload_str(), Some("ok"));

    let connack = Frame::ConnAck {};
    assert!(connack.into_message().is_none());
}

#[test]
fn test_endpoint_url() {
    let plain = Endpoint::new("localhost", 1883);
    assert_eq!(plain.url(), "ws://localhost:1883/");

    let secure = plain.with_tls(TlsSettings::new("ca.pem", "client.pem", "client.key"));
    assert_eq!(secure.url(), "wss://localhost:1883/");
}

#[test]
fn test_generated_client_ids_are_unique() {
    let a = generate_client_id("publisher");
    let b = generate_client_id("publisher");
    assert!(a.starts_with("publisher-"));
    assert_ne!(a, b);
}

#[test]
fn test_tls_missing_files_is_auth_error() {
    let settings = TlsSettings::new(
        "/nonexistent/ca.pem",
        "/nonexistent/c.pem",
        "/nonexistent/k.pem",
    );
    let err = settings.client_config().unwrap_err();
    assert!(matches!(err, Error::Auth { .. }), "{err}");
}

#[test]
fn test_tls_empty_ca_is_auth_error() {
    let dir = TempDir::new().unwrap();
    let ca = dir.path().join("ca.pem");
    std::fs::write(&ca, "not a certificate").unwrap();

    let settings = TlsSettings::new(&ca, dir.path().join("c.pem"), dir.path().join("k.pem"));
    let err = settings.client_config().unwrap_err();
    assert!(err.to_string().contains("no certificates found"), "{err}");
}

#[tokio::test]
async fn test_send_and_receive_require_connection() {
    let session = Session::new(Endpoint::new("127.0.0.1", 1), "idle", quick_options());
    assert_eq!(session.state(), SessionState::Disconnected);

    let err = session
        .send(&Frame::Subscribe {
            topic: "a".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotConnected));
    assert!(matches!(session.receive(), Err(Error::NotConnected)));
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let session = Session::new(Endpoint::new("127.0.0.1", 1), "idle", quick_options());
    session.disconnect().await;
    session.disconnect().await;
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn test_connect_refused_port_fails_with_connection_error() {
    let port = closed_port().await;
    let session = Session::new(Endpoint::new("127.0.0.1", port), "lonely", quick_options());

    let err = session.connect().await.unwrap_err();
    assert!(matches!(err, Error::Connection { .. }), "{err}");
    assert!(err.is_retryable());
    assert_eq!(session.state(), SessionState::Failed);
}

#[tokio::test]
async fn test_bad_certificates_fail_before_network() {
    let port = closed_port().await;
    let endpoint = Endpoint::new("127.0.0.1", port).with_tls(TlsSettings::new(
        "/nonexistent/ca.pem",
        "/nonexistent/c.pem",
        "/nonexistent/k.pem",
    ));
    let session = Session::new(endpoint, "secure", quick_options());

    let err = session.connect().await.unwrap_err();
    assert!(matches!(err, Error::Auth { .. }), "{err}");
    assert!(!err.is_retryable());
    assert_eq!(session.state(), SessionState::Failed);
}

#[tokio::test]
async fn test_connect_lifecycle_against_broker() {
    let broker = MockBroker::start().await;
    let session = Session::new(broker.endpoint(), "lifecycle", quick_options());
    let mut states = session.state_changes();

    session.connect().await.unwrap();
    assert_eq!(session.state(), SessionState::Connected);
    assert!(states.has_changed().unwrap());
    assert_eq!(*states.borrow_and_update(), SessionState::Connected);

    let err = session.connect().await.unwrap_err();
    assert!(matches!(err, Error::AlreadyConnected));

    session.disconnect().await;
    assert_eq!(session.state(), SessionState::Disconnected);
    broker.wait_for_clients(0).await;

    let frames = broker.frames_from("lifecycle");
    assert_eq!(
        frames,
        vec![
            Frame::Connect {
                client_id: "lifecycle".to_string()
            },
            Frame::Disconnect {},
        ]
    );

    // reconnect after an explicit disconnect
    session.connect().await.unwrap();
    assert!(session.is_connected());
    session.disconnect().await;
}

#[tokio::test]
async fn test_refused_connect_is_connection_error() {
    let broker = MockBroker::start().await;
    broker.refuse_connections("client id rejected");
    let session = Session::new(broker.endpoint(), "refused", quick_options());

    let err = session.connect().await.unwrap_err();
    assert!(err.to_string().contains("client id rejected"), "{err}");
    assert_eq!(session.state(), SessionState::Failed);
}

#[tokio::test]
async fn test_receive_once_per_connection() {
    let broker = MockBroker::start().await;
    let session = Session::new(broker.endpoint(), "reader", quick_options());
    session.connect().await.unwrap();

    let incoming = session.receive().unwrap();
    assert!(matches!(session.receive(), Err(Error::ReceiverInUse)));
    drop(incoming);

    session.disconnect().await;
    session.connect().await.unwrap();
    assert!(session.receive().is_ok());
    session.disconnect().await;
}

#[tokio::test]
async fn test_disconnect_unblocks_pending_receive() {
    let broker = MockBroker::start().await;
    let session = Session::new(broker.endpoint(), "blocked", quick_options());
    session.connect().await.unwrap();

    let mut incoming = session.receive().unwrap();
    let reader = tokio::spawn(async move { incoming.next().await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    session.disconnect().await;

    let next = tokio::time::timeout(Duration::from_secs(1), reader)
        .await
        .expect("receive stayed blocked after disconnect")
        .unwrap();
    assert!(next.is_none());
}

#[tokio::test]
async fn test_broker_close_marks_session_failed() {
    let broker = MockBroker::start().await;
    let session = Session::new(broker.endpoint(), "dropped", quick_options());
    session.connect().await.unwrap();
    broker.wait_for_clients(1).await;

    let mut incoming = session.receive().unwrap();
    broker.drop_connections();

    let next = tokio::time::timeout(Duration::from_secs(2), incoming.next())
        .await
        .unwrap();
    assert!(next.is_none());
    assert_eq!(session.state(), SessionState::Failed);

    let err = session
        .send(&Frame::Subscribe {
            topic: "a".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotConnected));

    // Failed -> Connected is allowed
    session.connect().await.unwrap();
    assert!(session.is_connected());
    session.disconnect().await;
}

#[tokio::test]
async fn test_malformed_frames_are_skipped() {
    let broker = MockBroker::start().await;
    let session = Session::new(broker.endpoint(), "picky", quick_options());
    session.connect().await.unwrap();
    broker.wait_for_clients(1).await;

    let mut incoming = session.receive().unwrap();
    broker.send_to_all(WsMessage::Text("{not json".into()));
    broker.send_to_all(message_frame("a", b"x"));

    let frame = tokio::time::timeout(Duration::from_secs(2), incoming.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame.into_message().unwrap().payload, b"x".to_vec());
    session.disconnect().await;
}

#[tokio::test]
async fn test_incoming_as_stream_ends_on_disconnect() {
    let broker = MockBroker::start().await;
    let session = Session::new(broker.endpoint(), "streamer", quick_options());
    session.connect().await.unwrap();
    broker.wait_for_clients(1).await;

    let mut frames = pin!(session.receive().unwrap().into_stream());
    broker.send_to_all(message_frame("sensors/kitchen/temp", b"21"));

    let frame = tokio::time::timeout(Duration::from_secs(2), frames.next())
        .await
        .unwrap()
        .unwrap();
    let message = frame.into_message().unwrap();
    assert_eq!(message.topic, "sensors/kitchen/temp");
    assert_eq!(message.payload_str(), Some("21"));

    session.disconnect().await;
    let end = tokio::time::timeout(Duration::from_secs(1), frames.next())
        .await
        .expect("stream stayed open after disconnect");
    assert!(end.is_none());
}

#[tokio::test]
async fn test_stale_incoming_leaves_new_connection_alone() {
    let broker = MockBroker::start().await;
    let session = Session::new(broker.endpoint(), "again", quick_options());
    session.connect().await.unwrap();
    let mut stale = session.receive().unwrap();

    session.disconnect().await;
    session.connect().await.unwrap();

    let next = tokio::time::timeout(Duration::from_secs(1), stale.next())
        .await
        .unwrap();
    assert!(next.is_none());
    assert_eq!(session.state(), SessionState::Connected);
    session.disconnect().await;
}

#[tokio::test]
async fn test_mutual_tls_connect() {
    let addr = start_tls_broker().await;
    let tls = TlsSettings::new(
        fixture("ca.pem"),
        fixture("client.pem"),
        fixture("client.key"),
    );
    let endpoint = Endpoint::new("127.0.0.1", addr.port()).with_tls(tls);
    assert!(endpoint.url().starts_with("wss://"));

    let session = Session::new(endpoint, "subscriber", quick_options());
    session.connect().await.unwrap();
    assert_eq!(session.state(), SessionState::Connected);

    session.disconnect().await;
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn test_untrusted_broker_certificate_is_auth_error() {
    let addr = start_tls_broker().await;
    // the broker's certificate does not chain to this CA
    let tls = TlsSettings::new(
        fixture("other_ca.pem"),
        fixture("client.pem"),
        fixture("client.key"),
    );
    let endpoint = Endpoint::new("127.0.0.1", addr.port()).with_tls(tls);
    let session = Session::new(endpoint, "subscriber", quick_options());

    let err = session.connect().await.unwrap_err();
    assert!(matches!(err, Error::Auth { .. }), "{err}");
    assert!(!err.is_retryable());
    assert_eq!(session.state(), SessionState::Failed);
}

mod common;

use std::sync::Arc;
use std::time::Duration;

use acarshub::datalink_ingestor::{DatalinkIngestor, DatalinkPipeline};
use acarshub::datalink_sources::ZmqDatalinkSource;
use acarshub::iata::IataResolver;
use acarshub::message::MessageType;
use acarshub::normalizer::Normalizer;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use zeromq::{PubSocket, Socket, SocketSend, ZmqMessage};

use common::{spawn_test_registry, wait_for_snapshot};

fn acars_payload(icao: u32, tail: &str) -> String {
    format!(
        r#"{{"timestamp": 1700000000.0, "tail": "{}", "icao": {}, "label": "H1", "text": "HELLO"}}"#,
        tail, icao
    )
}

/// Publish `payload` every 20 ms until `stop` fires, then close the socket
fn publish_until(mut publisher: PubSocket, payload: String, stop: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_millis(20)) => {
                    let _ = publisher.send(ZmqMessage::from(payload.clone())).await;
                }
            }
        }
        let _ = publisher.close().await;
    })
}

async fn bind_publisher(endpoint: &str) -> PubSocket {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let mut publisher = PubSocket::new();
        match publisher.bind(endpoint).await {
            Ok(_) => return publisher,
            Err(e) if tokio::time::Instant::now() < deadline => {
                tracing::debug!("rebind of {} failed: {}", endpoint, e);
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Err(e) => panic!("could not rebind {}: {}", endpoint, e),
        }
    }
}

#[tokio::test]
async fn test_subscription_recovers_after_publisher_restart() {
    let mut publisher = PubSocket::new();
    let endpoint = publisher.bind("tcp://127.0.0.1:0").await.unwrap().to_string();

    let cancel = CancellationToken::new();
    let (registry, _worker) = spawn_test_registry(cancel.child_token());
    let normalizer = Arc::new(Normalizer::new(Arc::new(IataResolver::empty())));
    let pipeline = DatalinkPipeline::new(MessageType::Acars, normalizer, registry.clone());
    let source = ZmqDatalinkSource::new(&endpoint).with_idle_timeout(Duration::from_secs(1));
    let ingestor = DatalinkIngestor::new(Box::new(source), pipeline)
        .with_reconnect_delay(Duration::from_millis(100))
        .spawn(cancel.child_token());

    let first_stop = CancellationToken::new();
    let first = publish_until(publisher, acars_payload(2162, "N12345"), first_stop.clone());
    let snapshot = wait_for_snapshot(&registry, |s| s.len() == 1).await;
    assert_eq!(snapshot.len(), 1);

    first_stop.cancel();
    first.await.unwrap();

    let second_stop = CancellationToken::new();
    let restarted = bind_publisher(&endpoint).await;
    let second = publish_until(restarted, acars_payload(11259375, "N54321"), second_stop.clone());

    let snapshot = wait_for_snapshot(&registry, |s| s.len() == 2).await;
    assert_eq!(snapshot.len(), 2);
    assert!(snapshot.iter().any(|a| a.registration.as_deref() == Some("N54321")));
    assert!(!ingestor.is_finished());

    ingestor.close().await;
    second_stop.cancel();
    second.await.unwrap();
    cancel.cancel();
}

mod common;

use std::time::Duration;

use acarshub::adsb_ingestor::{PositionIngestor, PositionIngestorConfig};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use common::{spawn_test_registry, wait_for_snapshot};

fn fast_config(port: u16) -> PositionIngestorConfig {
    PositionIngestorConfig {
        initial_backoff: Duration::from_millis(20),
        max_backoff: Duration::from_millis(50),
        ..PositionIngestorConfig::new("127.0.0.1", port)
    }
}

#[tokio::test]
async fn test_stream_objects_split_across_reads() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let cancel = CancellationToken::new();
    let (registry, _worker) = spawn_test_registry(cancel.child_token());
    let ingestor = PositionIngestor::new(fast_config(port), registry.clone());
    let counters = ingestor.counters();
    let handle = ingestor.spawn(cancel.child_token());

    let (mut socket, _) = listener.accept().await.unwrap();
    socket
        .write_all(br#"{"now": 1700000000.0, "hex": "a1b2c3", "fli"#)
        .await
        .unwrap();
    socket.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    socket
        .write_all(
            br#"ght": "DAL42  ", "lat": 40.6, "lon": -73.7, "alt_baro": "ground"}
garbage {"now": "later"}{"now": 1700000000.5, "hex": "c0ffee", "r": "N1", "t": "B738"}"#,
        )
        .await
        .unwrap();

    let snapshot = wait_for_snapshot(&registry, |s| s.len() == 2).await;
    assert_eq!(snapshot.len(), 2);

    let dal = snapshot
        .iter()
        .find(|a| a.icao_hex.as_deref() == Some("A1B2C3"))
        .unwrap();
    assert_eq!(dal.callsign.as_deref(), Some("DAL42"));
    assert_eq!(dal.position_count, 1);
    let kinematics = dal.latest_position.as_ref().unwrap();
    assert_eq!(kinematics.latitude, Some(40.6));

    let other = snapshot
        .iter()
        .find(|a| a.icao_hex.as_deref() == Some("C0FFEE"))
        .unwrap();
    assert_eq!(other.registration.as_deref(), Some("N1"));
    assert_eq!(other.aircraft_type.as_deref(), Some("B738"));

    assert_eq!(counters.total(), 2);
    assert_eq!(counters.rejected(), 1);

    handle.close().await;
    cancel.cancel();
}

#[tokio::test]
async fn test_reconnects_after_server_closes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let cancel = CancellationToken::new();
    let (registry, _worker) = spawn_test_registry(cancel.child_token());
    let handle = PositionIngestor::new(fast_config(port), registry.clone()).spawn(cancel.child_token());

    let (mut first, _) = listener.accept().await.unwrap();
    first
        .write_all(br#"{"now": 1700000000.0, "hex": "a1b2c3", "lat": 1.0, "lon": 2.0}"#)
        .await
        .unwrap();
    wait_for_snapshot(&registry, |s| s.len() == 1).await;
    drop(first);

    let (mut second, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("ingestor should reconnect")
        .unwrap();
    second
        .write_all(br#"{"now": 1700000030.0, "hex": "a1b2c3", "lat": 1.5, "lon": 2.5}"#)
        .await
        .unwrap();

    let snapshot = wait_for_snapshot(&registry, |s| {
        s.len() == 1 && s[0].position_count == 2
    })
    .await;
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].position_count, 2);
    assert_eq!(snapshot[0].last_position_time, Some(1700000030.0));
    assert!(!handle.is_finished());

    handle.close().await;
    cancel.cancel();
}

#[tokio::test]
async fn test_close_while_server_unreachable() {
    // Grab a free port, then release it so connects are refused
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let cancel = CancellationToken::new();
    let (registry, _worker) = spawn_test_registry(cancel.child_token());
    let config = PositionIngestorConfig {
        initial_backoff: Duration::from_secs(3600),
        ..fast_config(port)
    };
    let handle = PositionIngestor::new(config, registry).spawn(cancel.child_token());
    assert_eq!(handle.name(), format!("ADS-B 127.0.0.1:{}", port));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!handle.is_finished());

    tokio::time::timeout(Duration::from_secs(5), handle.close())
        .await
        .expect("close should cut the backoff short");
    cancel.cancel();
}

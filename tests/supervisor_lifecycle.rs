//! End-to-end wiring of `StreamManager::start_stream`/`stop_stream` against a
//! real, harmless subprocess. Exercises spawn, read-loop cancellation, and
//! task join without waiting out the real restart backoff timeline.

use aviary_ingest::config::IngestConfig;
use aviary_ingest::manager::StreamManager;
use aviary_ingest::supervisor::{OutputEvent, Transport};
use std::collections::HashMap;
use std::time::Duration;

fn config_with_decoder(decoder_binary: &str) -> IngestConfig {
    IngestConfig {
        sample_rate: 8_000,
        bit_depth: 16,
        num_channels: 1,
        chunk_seconds: 1.0,
        overlap_seconds: 0.0,
        sound_level_interval: 5,
        healthy_data_threshold: 60.0,
        capture_duration_seconds: 10.0,
        decoder_binary: decoder_binary.to_string(),
        decoder_extra_params: vec![],
        urls: vec![],
        transports: HashMap::new(),
    }
}

/// `cat` with no arguments reads from its (piped, empty) stdin and exits
/// immediately once it hits EOF -- a stand-in decoder that spawns cleanly,
/// produces no bytes, and exits fast, so the supervisor's spawn/read/cleanup
/// path is exercised without a real RTSP source or the full restart backoff.
#[tokio::test]
async fn start_and_stop_stream_joins_its_background_task() {
    let manager = StreamManager::new(&config_with_decoder("cat")).unwrap();
    let (sink, mut rx) = tokio::sync::mpsc::channel::<OutputEvent>(16);

    manager.start_stream("rtsp://lifecycle", Transport::Tcp, sink).await.unwrap();
    assert_eq!(manager.get_active_streams().await, vec!["rtsp://lifecycle".to_string()]);

    // Give the supervisor a moment to spawn, observe EOF, and enter backoff.
    tokio::time::sleep(Duration::from_millis(200)).await;

    manager.stop_stream("rtsp://lifecycle").await.unwrap();
    assert!(manager.get_active_streams().await.is_empty());

    // No analysis chunks are expected from an empty decoder, but the sink
    // must have been dropped along with the supervisor task rather than
    // leaking the channel open.
    drop(manager);
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn health_check_reports_restart_activity_for_a_failing_decoder() {
    // A binary that always fails immediately drives the supervisor through
    // at least one failure/backoff cycle in well under a second.
    let manager = StreamManager::new(&config_with_decoder("false")).unwrap();
    let (sink, _rx) = tokio::sync::mpsc::channel::<OutputEvent>(16);

    manager.start_stream("rtsp://failing", Transport::Tcp, sink).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let health = manager.health_check().await;
    let snapshot = health.get("rtsp://failing").expect("health entry for started stream");
    assert!(snapshot.restart_count >= 1);
    assert!(!snapshot.is_healthy);

    manager.shutdown().await;
}

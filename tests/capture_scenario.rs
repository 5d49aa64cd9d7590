//! End-to-end capture-ring scenario: write a window of data, then read a
//! sub-segment back out once wall-clock time has passed its end.

use aviary_ingest::buffer::CaptureRegistry;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn writes_then_reads_a_subwindow_after_it_elapses() {
    // Scaled down from scenario S2's 60s/48kHz buffer so the test completes
    // quickly: a 6s buffer at 1kHz/2 bytes-per-sample. Byte offsets are
    // computed at whole-second granularity, so every timestamp here is a
    // whole second, matching how capture_read_segment addresses the ring.
    let sample_rate = 1_000u32;
    let bytes_per_sample = 2usize;
    let registry = CaptureRegistry::new(6.0, sample_rate, bytes_per_sample);
    registry.register("rtsp://scenario").await.unwrap();

    let t0 = aviary_ingest::time::now_secs();

    // Write 3s of incrementing 16-bit samples.
    let mut pcm = Vec::with_capacity(3 * sample_rate as usize * bytes_per_sample);
    for i in 0..(3 * sample_rate) {
        pcm.extend_from_slice(&(i as u16).to_le_bytes());
    }
    registry.write("rtsp://scenario", &pcm).await.unwrap();

    // Byte offsets floor to whole seconds, so request the half-open window
    // [1.5s, 2.5s) -- comfortably inside seconds 1 and 2 regardless of the
    // small scheduling delay between capturing `t0` and the ring's actual
    // `start_time` -- and wait for wall clock to pass its end before reading.
    tokio::time::sleep(Duration::from_millis(2600)).await;
    let segment = registry
        .read_segment("rtsp://scenario", t0 + 1.5, 1.0, CancellationToken::new())
        .await
        .unwrap();

    let expected_len = sample_rate as usize * bytes_per_sample;
    assert_eq!(segment.len(), expected_len);

    // The segment should match samples [1000..2000) of what was written.
    let expected: Vec<u8> = (1_000u32..2_000).flat_map(|i| (i as u16).to_le_bytes()).collect();
    assert_eq!(segment, expected);
}

#[tokio::test]
async fn read_segment_cancellation_unblocks_a_future_request() {
    let registry = CaptureRegistry::new(10.0, 8_000, 2);
    registry.register("s").await.unwrap();
    registry.write("s", &[0u8; 16]).await.unwrap();

    let cancel = CancellationToken::new();
    let cancel2 = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel2.cancel();
    });

    let far_future = aviary_ingest::time::now_secs() + 3600.0;
    let result = registry.read_segment("s", far_future, 1.0, cancel).await;
    assert!(result.is_err());
}

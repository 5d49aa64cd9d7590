//! Stream manager (C8): url-keyed registry of supervisors, reconciliation
//! against a configured URL set, and periodic orphan sweeps.

pub mod reaper;

use crate::buffer::{AnalysisRegistry, CaptureRegistry};
use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::rate_limit::RateLimiter;
use crate::soundlevel::SoundLevelRegistry;
use crate::supervisor::{HealthSnapshot, OutputSink, StreamSupervisor, SupervisorConfig, Transport};
use reaper::OrphanReaper;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};

struct TrackedStream {
    supervisor: Arc<StreamSupervisor>,
    task: JoinHandle<()>,
}

/// Registry of active [`StreamSupervisor`]s, keyed by source URL.
pub struct StreamManager {
    streams: RwLock<HashMap<String, TrackedStream>>,
    analysis: Arc<AnalysisRegistry>,
    capture: Arc<CaptureRegistry>,
    sound_level: Arc<SoundLevelRegistry>,
    rate_limiter: Arc<RateLimiter>,
    decoder_binary: String,
    decoder_extra_params: Vec<String>,
    sample_rate: u32,
    bytes_per_sample: usize,
    healthy_data_threshold: Duration,
    reaper: Arc<OrphanReaper>,
}

impl StreamManager {
    pub fn new(config: &IngestConfig) -> Result<Self> {
        let bytes_per_sample = (config.bit_depth / 8) as usize;
        let ring_capacity = 10 * 1024 * 1024;
        let analysis = Arc::new(AnalysisRegistry::new(
            ring_capacity,
            config.sample_rate,
            bytes_per_sample,
            config.chunk_seconds,
            config.overlap_seconds,
        )?);
        let capture = Arc::new(CaptureRegistry::new(
            config.capture_duration_seconds,
            config.sample_rate,
            bytes_per_sample,
        ));
        let sound_level =
            Arc::new(SoundLevelRegistry::new(config.sample_rate, config.sound_level_interval));

        Ok(Self {
            streams: RwLock::new(HashMap::new()),
            analysis,
            capture,
            sound_level,
            rate_limiter: Arc::new(RateLimiter::new()),
            decoder_binary: config.decoder_binary.clone(),
            decoder_extra_params: config.decoder_extra_params.clone(),
            sample_rate: config.sample_rate,
            bytes_per_sample,
            healthy_data_threshold: Duration::from_secs_f64(config.healthy_data_threshold),
            reaper: Arc::new(OrphanReaper::new(config.decoder_binary.clone())),
        })
    }

    pub async fn start_stream(&self, url: &str, transport: Transport, sink: OutputSink) -> Result<()> {
        let mut streams = self.streams.write().await;
        if streams.contains_key(url) {
            return Err(IngestError::resource_already_exists("stream", url));
        }

        let supervisor_config = SupervisorConfig {
            url: url.to_string(),
            transport,
            decoder_binary: self.decoder_binary.clone(),
            decoder_extra_params: self.decoder_extra_params.clone(),
            sample_rate: self.sample_rate,
            bytes_per_sample: self.bytes_per_sample,
            healthy_data_threshold: self.healthy_data_threshold,
        };
        let supervisor = Arc::new(StreamSupervisor::new(
            supervisor_config,
            self.analysis.clone(),
            self.capture.clone(),
            self.sound_level.clone(),
            sink,
            self.rate_limiter.clone(),
        )?);
        let task = tokio::spawn(supervisor.clone().run());
        streams.insert(url.to_string(), TrackedStream { supervisor, task });
        info!(url, "stream started");
        Ok(())
    }

    pub async fn stop_stream(&self, url: &str) -> Result<()> {
        let tracked = {
            let mut streams = self.streams.write().await;
            streams.remove(url).ok_or_else(|| IngestError::resource_missing("stream", url))?
        };
        tracked.supervisor.stop();
        let _ = tracked.task.await;
        info!(url, "stream stopped");
        Ok(())
    }

    pub async fn restart_stream(&self, url: &str) -> Result<()> {
        let streams = self.streams.read().await;
        let tracked = streams.get(url).ok_or_else(|| IngestError::resource_missing("stream", url))?;
        tracked.supervisor.restart(true).await;
        Ok(())
    }

    pub async fn get_active_streams(&self) -> Vec<String> {
        self.streams.read().await.keys().cloned().collect()
    }

    pub async fn health_check(&self) -> HashMap<String, HealthSnapshot> {
        let streams = self.streams.read().await;
        let mut out = HashMap::with_capacity(streams.len());
        for (url, tracked) in streams.iter() {
            out.insert(url.clone(), tracked.supervisor.get_health_full().await);
        }
        out
    }

    async fn tracked_pids(&self) -> HashSet<u32> {
        self.streams.read().await.values().filter_map(|t| t.supervisor.current_pid()).collect()
    }

    /// One reconciliation pass: stop any supervisor whose url has fallen out
    /// of `desired_urls`, then sweep untracked decoder processes.
    pub async fn reconcile(&self, desired_urls: &[String]) {
        let desired: HashSet<&str> = desired_urls.iter().map(String::as_str).collect();
        let active = self.get_active_streams().await;
        for url in active {
            if !desired.contains(url.as_str()) {
                if let Err(e) = self.stop_stream(&url).await {
                    warn!(url, error = %e, "failed to stop undesired stream during reconciliation");
                }
            }
        }

        let tracked = self.tracked_pids().await;
        let reaper = self.reaper.clone();
        let result = tokio::task::spawn_blocking(move || reaper.sweep(&tracked)).await;
        match result {
            Ok(Ok(n)) if n > 0 => info!(count = n, "reaped orphan decoder processes"),
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "orphan reaper sweep failed"),
            Err(e) => warn!(error = %e, "orphan reaper task panicked"),
        }
    }

    /// Spawns a background task that reconciles against `desired_urls` (a
    /// live handle so config changes are picked up without a restart) every
    /// `interval`.
    pub fn start_monitoring(
        self: &Arc<Self>,
        interval: Duration,
        desired_urls: Arc<RwLock<Vec<String>>>,
    ) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let desired = desired_urls.read().await.clone();
                manager.reconcile(&desired).await;
            }
        })
    }

    pub async fn shutdown(&self) {
        let urls = self.get_active_streams().await;
        for url in urls {
            if let Err(e) = self.stop_stream(&url).await {
                warn!(url, error = %e, "error stopping stream during shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IngestConfig;

    fn test_config() -> IngestConfig {
        IngestConfig {
            sample_rate: 8_000,
            bit_depth: 16,
            num_channels: 1,
            chunk_seconds: 1.0,
            overlap_seconds: 0.0,
            sound_level_interval: 5,
            healthy_data_threshold: 60.0,
            capture_duration_seconds: 30.0,
            decoder_binary: "true".to_string(),
            decoder_extra_params: vec![],
            urls: vec![],
            transports: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn start_stream_rejects_duplicate_url() {
        let manager = StreamManager::new(&test_config()).unwrap();
        let (tx, _rx) = tokio::sync::mpsc::channel(10);
        manager.start_stream("rtsp://a", Transport::Tcp, tx.clone()).await.unwrap();
        assert!(manager.start_stream("rtsp://a", Transport::Tcp, tx).await.is_err());
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn stop_stream_on_unknown_url_is_resource_missing() {
        let manager = StreamManager::new(&test_config()).unwrap();
        assert!(manager.stop_stream("rtsp://nope").await.is_err());
    }

    #[tokio::test]
    async fn reconcile_stops_streams_not_in_desired_set() {
        let manager = StreamManager::new(&test_config()).unwrap();
        let (tx, _rx) = tokio::sync::mpsc::channel(10);
        manager.start_stream("rtsp://a", Transport::Tcp, tx).await.unwrap();
        manager.reconcile(&[]).await;
        assert!(manager.get_active_streams().await.is_empty());
    }
}

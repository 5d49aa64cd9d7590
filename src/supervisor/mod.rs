//! Decoder stream supervisor (C7)
//!
//! Owns a single decoder subprocess (typically ffmpeg pulling an RTSP feed),
//! drains its stdout into the buffer subsystem, and drives restart/backoff/
//! circuit-breaker lifecycle around it. One supervisor per configured URL.

pub mod data_rate;
pub mod process_group;

use crate::audio_level::{compute_audio_level, AudioLevel};
use crate::buffer::{AnalysisRegistry, CaptureRegistry};
use crate::error::Result;
use crate::pool::BytePool;
use crate::rate_limit::RateLimiter;
use crate::soundlevel::{SoundLevelRegistry, SoundLevelReport};
use data_rate::DataRateCalculator;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const READ_CHUNK_SIZE: usize = 64 * 1024;
const STDERR_RING_CAPACITY: usize = 16 * 1024;

const RESTART_BACKOFF_BASE: Duration = Duration::from_secs(5);
const RESTART_BACKOFF_MAX: Duration = Duration::from_secs(120);
const RESTART_BACKOFF_EXPONENT_CAP: u32 = 20;

const RAPID_FAILURE_RUNTIME: Duration = Duration::from_secs(5);
const CIRCUIT_OPEN_FAILURE_COUNT: u32 = 10;
const CIRCUIT_OPEN_RAPID_FAILURE_COUNT: u32 = 5;
const CIRCUIT_OPEN_COOLDOWN: Duration = Duration::from_secs(30);

const PROVEN_STABLE_RUNTIME: Duration = Duration::from_secs(30);
const PROVEN_STABLE_BYTES: u64 = 100 * 1024;

const DEFAULT_WATCHDOG_THRESHOLD: Duration = Duration::from_secs(60);
const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);

const DEFAULT_TIMEOUT_MICROS: u64 = 30_000_000;
const MIN_TIMEOUT_MICROS: u64 = 1_000_000;

/// Lifecycle states for one decoder subprocess.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Stopped,
    Backoff,
    CircuitOpen,
    Spawning,
    Running,
    Draining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
}

impl Transport {
    fn as_str(self) -> &'static str {
        match self {
            Transport::Tcp => "tcp",
            Transport::Udp => "udp",
        }
    }
}

/// Static configuration for one supervised stream.
pub struct SupervisorConfig {
    pub url: String,
    pub transport: Transport,
    pub decoder_binary: String,
    pub decoder_extra_params: Vec<String>,
    pub sample_rate: u32,
    pub bytes_per_sample: usize,
    pub healthy_data_threshold: Duration,
}

/// Point-in-time health report; never blocks on the read loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub is_healthy: bool,
    pub is_receiving: bool,
    pub last_data_received: f64,
    pub restart_count: u32,
    pub bytes_received: u64,
    pub bytes_per_sec: f64,
    pub circuit_open: bool,
}

/// A chunk-pool buffer that returns itself to the pool once every clone of
/// its enclosing `Arc` has been dropped, so a slow or multi-subscriber
/// downstream consumer doesn't need to hand it back explicitly.
struct PooledBuf {
    bytes: Vec<u8>,
    pool: Arc<BytePool>,
}

impl std::fmt::Debug for PooledBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuf").field("len", &self.bytes.len()).finish()
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        self.pool.put(std::mem::take(&mut self.bytes));
    }
}

impl std::ops::Deref for PooledBuf {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

/// One analysis-ring chunk plus its audio-level summary, delivered to the
/// downstream consumer via the bounded output sink.
#[derive(Debug, Clone)]
pub struct OutputChunk {
    pub source: String,
    pub timestamp: f64,
    bytes: Arc<PooledBuf>,
    pub audio_level: AudioLevel,
}

impl OutputChunk {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[derive(Debug, Clone)]
pub enum OutputEvent {
    Chunk(OutputChunk),
    SoundLevel(SoundLevelReport),
}

pub type OutputSink = mpsc::Sender<OutputEvent>;

struct Breaker {
    consecutive_failures: u32,
    consecutive_rapid_failures: u32,
    circuit_open_until: Option<Instant>,
}

impl Breaker {
    fn new() -> Self {
        Self { consecutive_failures: 0, consecutive_rapid_failures: 0, circuit_open_until: None }
    }

    fn is_open(&self) -> bool {
        matches!(self.circuit_open_until, Some(until) if Instant::now() < until)
    }

    fn record_failure(&mut self, runtime: Duration) {
        self.consecutive_failures += 1;
        if runtime < RAPID_FAILURE_RUNTIME {
            self.consecutive_rapid_failures += 1;
        } else {
            self.consecutive_rapid_failures = 0;
        }
        if self.consecutive_failures >= CIRCUIT_OPEN_FAILURE_COUNT
            || self.consecutive_rapid_failures >= CIRCUIT_OPEN_RAPID_FAILURE_COUNT
        {
            self.circuit_open_until = Some(Instant::now() + CIRCUIT_OPEN_COOLDOWN);
        }
    }

    fn record_stable_run(&mut self) {
        self.consecutive_failures = 0;
        self.consecutive_rapid_failures = 0;
    }
}

fn backoff_delay(restart_count: u32) -> Duration {
    let exponent = restart_count.saturating_sub(1).min(RESTART_BACKOFF_EXPONENT_CAP);
    let multiplier = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
    let delay = RESTART_BACKOFF_BASE.saturating_mul(multiplier.min(u32::MAX as u64) as u32);
    delay.min(RESTART_BACKOFF_MAX)
}

fn is_valid_timeout(value: &str) -> bool {
    !value.is_empty()
        && value.bytes().all(|b| b.is_ascii_digit())
        && value.parse::<u64>().map(|v| v >= MIN_TIMEOUT_MICROS).unwrap_or(false)
}

/// Validates a caller-supplied `-timeout <micros>` pair in place, or injects
/// the default if absent/invalid.
fn ensure_timeout_param(params: &mut Vec<String>) {
    if let Some(idx) = params.iter().position(|p| p == "-timeout") {
        let valid = params.get(idx + 1).map(|v| is_valid_timeout(v)).unwrap_or(false);
        if valid {
            return;
        }
        if params.get(idx + 1).is_some() {
            params.remove(idx + 1);
        }
        params.remove(idx);
    }
    params.push("-timeout".to_string());
    params.push(DEFAULT_TIMEOUT_MICROS.to_string());
}

/// Owns the lifecycle of a single decoder subprocess for one source.
pub struct StreamSupervisor {
    config: SupervisorConfig,
    analysis: Arc<AnalysisRegistry>,
    capture: Arc<CaptureRegistry>,
    sound_level: Arc<SoundLevelRegistry>,
    chunk_pool: Arc<BytePool>,
    sink: OutputSink,
    rate_limiter: Arc<RateLimiter>,

    last_data_time_ms: AtomicU64,
    total_bytes_received: AtomicU64,
    restart_count: AtomicU32,
    dropped_chunks: AtomicU64,
    current_pid: AtomicU32,

    breaker: Mutex<Breaker>,
    state: Mutex<SupervisorState>,
    data_rate: Mutex<DataRateCalculator>,
    stderr_ring: Mutex<VecDeque<u8>>,

    stream_created_at: Instant,
    stop: CancellationToken,
    restart_requested: Notify,
    clear_backoff_on_restart: std::sync::atomic::AtomicBool,
}

impl StreamSupervisor {
    pub fn new(
        config: SupervisorConfig,
        analysis: Arc<AnalysisRegistry>,
        capture: Arc<CaptureRegistry>,
        sound_level: Arc<SoundLevelRegistry>,
        sink: OutputSink,
        rate_limiter: Arc<RateLimiter>,
    ) -> Result<Self> {
        let chunk_pool = Arc::new(BytePool::new(analysis.chunk_size())?);
        Ok(Self {
            config,
            analysis,
            capture,
            sound_level,
            chunk_pool,
            sink,
            rate_limiter,
            last_data_time_ms: AtomicU64::new(0),
            total_bytes_received: AtomicU64::new(0),
            restart_count: AtomicU32::new(0),
            dropped_chunks: AtomicU64::new(0),
            current_pid: AtomicU32::new(0),
            breaker: Mutex::new(Breaker::new()),
            state: Mutex::new(SupervisorState::Stopped),
            data_rate: Mutex::new(DataRateCalculator::new()),
            stderr_ring: Mutex::new(VecDeque::with_capacity(STDERR_RING_CAPACITY)),
            stream_created_at: Instant::now(),
            stop: CancellationToken::new(),
            restart_requested: Notify::new(),
            clear_backoff_on_restart: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    pub async fn state(&self) -> SupervisorState {
        *self.state.lock().await
    }

    async fn set_state(&self, new_state: SupervisorState) {
        *self.state.lock().await = new_state;
    }

    /// Builds the decoder argv: transport flag, validated/injected timeout,
    /// user params, then the fixed output spec (s16le mono @ sample_rate,
    /// stdout).
    fn spawn_argv(&self) -> Vec<String> {
        let mut params = self.config.decoder_extra_params.clone();
        ensure_timeout_param(&mut params);

        let mut argv = vec!["-rtsp_transport".to_string(), self.config.transport.as_str().to_string()];
        argv.push("-i".to_string());
        argv.push(self.config.url.clone());
        argv.extend(params);
        argv.push("-f".to_string());
        argv.push("s16le".to_string());
        argv.push("-ac".to_string());
        argv.push("1".to_string());
        argv.push("-ar".to_string());
        argv.push(self.config.sample_rate.to_string());
        argv.push("-".to_string());
        argv
    }

    /// Runs the supervisor state machine until `stop()` is called. Intended
    /// to be spawned as a background task by the owning manager.
    pub async fn run(self: Arc<Self>) {
        self.analysis.register(&self.config.url).ok();
        if let Err(e) = self.capture.register(&self.config.url).await {
            warn!(url = %self.config.url, error = %e, "capture registration failed");
        }
        if let Err(e) = self.sound_level.register(&self.config.url).await {
            warn!(url = %self.config.url, error = %e, "sound level registration failed");
        }

        loop {
            if self.stop.is_cancelled() {
                break;
            }

            if self.breaker.lock().await.is_open() {
                self.set_state(SupervisorState::CircuitOpen).await;
                let wait_until = self.breaker.lock().await.circuit_open_until;
                if let Some(until) = wait_until {
                    tokio::select! {
                        _ = tokio::time::sleep_until(until.into()) => {},
                        _ = self.stop.cancelled() => break,
                    }
                }
                continue;
            }

            self.set_state(SupervisorState::Spawning).await;
            let argv = self.spawn_argv();
            let spawn_result = self.spawn_decoder(&argv);

            let mut child = match spawn_result {
                Ok(child) => child,
                Err(e) => {
                    error!(url = %self.config.url, error = %e, "failed to spawn decoder");
                    self.record_failure(Duration::ZERO).await;
                    self.backoff_and_wait().await;
                    continue;
                }
            };

            self.set_state(SupervisorState::Running).await;
            let process_start = Instant::now();
            let bytes_before_run = self.total_bytes_received.load(Ordering::Relaxed);
            self.current_pid.store(child.id().unwrap_or(0), Ordering::Relaxed);

            self.read_loop(&mut child).await;

            let _ = child.kill().await;
            if let Some(pid) = child.id() {
                process_group::kill_process_group(pid);
            }
            self.current_pid.store(0, Ordering::Relaxed);

            let runtime = process_start.elapsed();
            let bytes_this_run = self.total_bytes_received.load(Ordering::Relaxed) - bytes_before_run;
            info!(url = %self.config.url, ?runtime, bytes_this_run, "decoder exited");

            self.record_failure(runtime).await;
            if runtime >= PROVEN_STABLE_RUNTIME && bytes_this_run >= PROVEN_STABLE_BYTES {
                self.breaker.lock().await.record_stable_run();
            }

            if self.stop.is_cancelled() {
                break;
            }
            self.backoff_and_wait().await;
        }

        self.set_state(SupervisorState::Stopped).await;
        self.analysis.remove(&self.config.url).ok();
        let _ = self.capture.remove(&self.config.url).await;
        let _ = self.sound_level.remove(&self.config.url).await;
    }

    fn spawn_decoder(&self, argv: &[String]) -> std::io::Result<tokio::process::Child> {
        let mut cmd = Command::new(&self.config.decoder_binary);
        cmd.args(argv).stdout(Stdio::piped()).stderr(Stdio::piped()).stdin(Stdio::null());
        process_group::setup_process_group(&mut cmd);
        cmd.spawn()
    }

    async fn record_failure(&self, runtime: Duration) {
        self.restart_count.fetch_add(1, Ordering::Relaxed);
        self.breaker.lock().await.record_failure(runtime);
    }

    async fn backoff_and_wait(&self) {
        if self.clear_backoff_on_restart.swap(false, Ordering::AcqRel) {
            self.restart_count.store(0, Ordering::Relaxed);
            return;
        }
        self.set_state(SupervisorState::Backoff).await;
        let delay = backoff_delay(self.restart_count.load(Ordering::Relaxed));
        tokio::select! {
            _ = tokio::time::sleep(delay) => {},
            _ = self.restart_requested.notified() => {},
            _ = self.stop.cancelled() => {},
        }
    }

    async fn read_loop(&self, child: &mut tokio::process::Child) {
        let mut stdout = match child.stdout.take() {
            Some(s) => s,
            None => return,
        };
        let mut stderr = child.stderr.take();
        let mut buf = vec![0u8; READ_CHUNK_SIZE];

        loop {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => return,
                _ = self.restart_requested.notified() => return,
                n = stdout.read(&mut buf) => {
                    match n {
                        Ok(0) => return,
                        Ok(n) => self.on_bytes_read(&buf[..n]).await,
                        Err(e) => {
                            warn!(url = %self.config.url, error = %e, "decoder stdout read error");
                            return;
                        }
                    }
                }
                _ = async {
                    if let Some(stderr) = stderr.as_mut() {
                        let mut chunk = [0u8; 4096];
                        match stderr.read(&mut chunk).await {
                            Ok(0) | Err(_) => std::future::pending::<()>().await,
                            Ok(n) => self.on_stderr_read(&chunk[..n]).await,
                        }
                    } else {
                        std::future::pending::<()>().await
                    }
                } => {}
            }
        }
    }

    async fn on_stderr_read(&self, bytes: &[u8]) {
        let mut ring = self.stderr_ring.lock().await;
        for &b in bytes {
            if ring.len() >= STDERR_RING_CAPACITY {
                ring.pop_front();
            }
            ring.push_back(b);
        }
    }

    async fn on_bytes_read(&self, bytes: &[u8]) {
        let now_ms = crate::time::now_secs() * 1000.0;
        self.last_data_time_ms.store(now_ms as u64, Ordering::Relaxed);
        self.total_bytes_received.fetch_add(bytes.len() as u64, Ordering::Relaxed);
        self.data_rate.lock().await.record(bytes.len() as u64, Instant::now());

        if let Err(e) = self.analysis.write(&self.config.url, bytes) {
            warn!(url = %self.config.url, error = %e, "analysis ring write failed");
        }
        if let Err(e) = self.capture.write(&self.config.url, bytes).await {
            warn!(url = %self.config.url, error = %e, "capture ring write failed");
        }

        match self.analysis.read_chunk(&self.config.url, &self.chunk_pool) {
            Ok(Some(chunk)) => self.emit_chunk(chunk).await,
            Ok(None) => {}
            Err(e) => warn!(url = %self.config.url, error = %e, "chunk read failed"),
        }

        match self.sound_level.process_audio(&self.config.url, bytes).await {
            Ok(Some(report)) => self.emit(OutputEvent::SoundLevel(report)).await,
            Ok(None) => {}
            Err(e) => warn!(url = %self.config.url, error = %e, "sound level processing failed"),
        }
    }

    async fn emit_chunk(&self, bytes: Vec<u8>) {
        let audio_level = compute_audio_level(&bytes);
        let chunk = OutputChunk {
            source: self.config.url.clone(),
            timestamp: crate::time::now_secs(),
            bytes: Arc::new(PooledBuf { bytes, pool: self.chunk_pool.clone() }),
            audio_level,
        };
        self.emit(OutputEvent::Chunk(chunk)).await;
    }

    async fn emit(&self, event: OutputEvent) {
        if self.sink.try_send(event).is_err() {
            self.dropped_chunks.fetch_add(1, Ordering::Relaxed);
            if self.rate_limiter.should_log(&format!("sink_full:{}", self.config.url), Duration::from_secs(5)) {
                warn!(url = %self.config.url, "output sink full, dropping chunk");
            }
        }
    }

    pub fn dropped_chunks(&self) -> u64 {
        self.dropped_chunks.load(Ordering::Relaxed)
    }

    /// PID of the currently running decoder subprocess, if any. Used by the
    /// orphan reaper to distinguish tracked from untracked decoder processes.
    pub fn current_pid(&self) -> Option<u32> {
        match self.current_pid.load(Ordering::Relaxed) {
            0 => None,
            pid => Some(pid),
        }
    }

    /// Point-in-time health snapshot. Never blocks on the read loop: the
    /// data-rate and circuit-breaker state are picked up via `try_lock` and
    /// fall back to their last-known-safe default (`0.0` / not open) if
    /// either lock is momentarily held by the running decoder task.
    pub fn get_health(&self) -> HealthSnapshot {
        let last_data_ms = self.last_data_time_ms.load(Ordering::Relaxed);
        let last_data_received = last_data_ms as f64 / 1000.0;
        let now = crate::time::now_secs();
        let age = now - last_data_received;
        let is_healthy = last_data_ms != 0 && age <= self.config.healthy_data_threshold.as_secs_f64();

        let bytes_per_sec = self
            .data_rate
            .try_lock()
            .map(|mut guard| guard.bytes_per_sec(Instant::now()))
            .unwrap_or(0.0);
        let circuit_open = self.breaker.try_lock().map(|guard| guard.is_open()).unwrap_or(false);

        HealthSnapshot {
            is_healthy,
            is_receiving: is_healthy,
            last_data_received,
            restart_count: self.restart_count.load(Ordering::Relaxed),
            bytes_received: self.total_bytes_received.load(Ordering::Relaxed),
            bytes_per_sec,
            circuit_open,
        }
    }

    /// Async variant of [`Self::get_health`] that awaits the data-rate and
    /// circuit-breaker locks instead of skipping them when briefly held.
    pub async fn get_health_full(&self) -> HealthSnapshot {
        let mut snap = self.get_health();
        snap.bytes_per_sec = self.data_rate.lock().await.bytes_per_sec(Instant::now());
        snap.circuit_open = self.breaker.lock().await.is_open();
        snap
    }

    /// Watchdog tick: if data has gone stale past the configured threshold,
    /// trigger an immediate restart.
    pub async fn check_watchdog(&self) {
        let last_data_ms = self.last_data_time_ms.load(Ordering::Relaxed);
        if last_data_ms == 0 {
            if self.stream_created_at.elapsed() >= DEFAULT_GRACE_PERIOD {
                debug!(url = %self.config.url, "still no data past grace period; leaving recovery to backoff/circuit breaker");
            }
            return;
        }
        let last_data = last_data_ms as f64 / 1000.0;
        let age = Duration::from_secs_f64((crate::time::now_secs() - last_data).max(0.0));
        if age > DEFAULT_WATCHDOG_THRESHOLD {
            warn!(url = %self.config.url, ?age, "watchdog detected stale stream, restarting");
            self.restart(false).await;
        }
    }

    pub fn stop(&self) {
        self.stop.cancel();
        self.restart_requested.notify_waiters();
    }

    pub async fn restart(&self, clear_backoff: bool) {
        if clear_backoff {
            self.clear_backoff_on_restart.store(true, Ordering::Release);
        }
        self.restart_requested.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_validation_accepts_and_rejects_correctly() {
        let mut params = vec!["-timeout".to_string(), "2000000".to_string()];
        ensure_timeout_param(&mut params);
        assert_eq!(params, vec!["-timeout", "2000000"]);

        let mut params = vec!["-timeout".to_string(), "abc".to_string()];
        ensure_timeout_param(&mut params);
        assert_eq!(params, vec!["-timeout", &DEFAULT_TIMEOUT_MICROS.to_string()]);

        let mut params = vec!["-timeout".to_string(), "500".to_string()];
        ensure_timeout_param(&mut params);
        assert_eq!(params, vec!["-timeout", &DEFAULT_TIMEOUT_MICROS.to_string()]);

        let mut params: Vec<String> = vec![];
        ensure_timeout_param(&mut params);
        assert_eq!(params, vec!["-timeout", &DEFAULT_TIMEOUT_MICROS.to_string()]);
    }

    #[test]
    fn backoff_delay_is_monotonic_and_capped() {
        assert_eq!(backoff_delay(1), RESTART_BACKOFF_BASE);
        assert_eq!(backoff_delay(2), RESTART_BACKOFF_BASE * 2);
        assert_eq!(backoff_delay(3), RESTART_BACKOFF_BASE * 4);
        assert_eq!(backoff_delay(100), RESTART_BACKOFF_MAX);
    }

    #[test]
    fn circuit_breaker_opens_after_threshold_failures() {
        let mut breaker = Breaker::new();
        for _ in 0..9 {
            breaker.record_failure(Duration::from_secs(10));
        }
        assert!(!breaker.is_open());
        breaker.record_failure(Duration::from_secs(10));
        assert!(breaker.is_open());
    }

    #[test]
    fn circuit_breaker_opens_after_rapid_failure_burst() {
        let mut breaker = Breaker::new();
        for _ in 0..5 {
            breaker.record_failure(Duration::from_millis(100));
        }
        assert!(breaker.is_open());
    }

    #[test]
    fn stable_run_resets_failure_counters() {
        let mut breaker = Breaker::new();
        for _ in 0..9 {
            breaker.record_failure(Duration::from_secs(10));
        }
        breaker.record_stable_run();
        assert_eq!(breaker.consecutive_failures, 0);
        breaker.record_failure(Duration::from_secs(10));
        assert!(!breaker.is_open());
    }
}

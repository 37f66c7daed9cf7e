use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lock-free counters for the matching engine's hot paths.
#[derive(Debug)]
pub struct Stats {
    pub frames_received: AtomicU64,
    pub frames_malformed: AtomicU64,
    pub sessions_started: AtomicU64,
    pub sessions_matched: AtomicU64,
    pub sessions_timed_out: AtomicU64,
    pub sounds_aggregated: AtomicU64,
    pub key_provisioning_failures: AtomicU64,
    pub link_probe_failures: AtomicU64,
}

impl Stats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            frames_received: AtomicU64::new(0),
            frames_malformed: AtomicU64::new(0),
            sessions_started: AtomicU64::new(0),
            sessions_matched: AtomicU64::new(0),
            sessions_timed_out: AtomicU64::new(0),
            sounds_aggregated: AtomicU64::new(0),
            key_provisioning_failures: AtomicU64::new(0),
            link_probe_failures: AtomicU64::new(0),
        })
    }

    #[inline(always)]
    pub fn record_frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_frame_malformed(&self) {
        self.frames_malformed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_session_matched(&self) {
        self.sessions_matched.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_session_timed_out(&self) {
        self.sessions_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_sound_aggregated(&self) {
        self.sounds_aggregated.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_key_provisioning_failure(&self) {
        self.key_provisioning_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_link_probe_failure(&self) {
        self.link_probe_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot and reset counters, return rates
    pub fn snapshot_and_reset(&self, elapsed: Duration) -> StatsSnapshot {
        let secs = elapsed.as_secs_f64().max(0.001);

        StatsSnapshot {
            frames_per_sec: (self.frames_received.swap(0, Ordering::Relaxed) as f64) / secs,
            malformed: self.frames_malformed.swap(0, Ordering::Relaxed),
            sessions_started: self.sessions_started.swap(0, Ordering::Relaxed),
            sessions_matched: self.sessions_matched.swap(0, Ordering::Relaxed),
            sessions_timed_out: self.sessions_timed_out.swap(0, Ordering::Relaxed),
            sounds_aggregated: self.sounds_aggregated.swap(0, Ordering::Relaxed),
            key_provisioning_failures: self.key_provisioning_failures.swap(0, Ordering::Relaxed),
            link_probe_failures: self.link_probe_failures.swap(0, Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
pub struct StatsSnapshot {
    pub frames_per_sec: f64,
    pub malformed: u64,
    pub sessions_started: u64,
    pub sessions_matched: u64,
    pub sessions_timed_out: u64,
    pub sounds_aggregated: u64,
    pub key_provisioning_failures: u64,
    pub link_probe_failures: u64,
}

/// Background stats reporter task
pub async fn stats_reporter(stats: Arc<Stats>, interval_secs: u64) {
    if interval_secs == 0 {
        // Stats disabled — park forever
        std::future::pending::<()>().await;
        return;
    }

    let interval = Duration::from_secs(interval_secs);
    let mut last = Instant::now();

    loop {
        tokio::time::sleep(interval).await;
        let now = Instant::now();
        let elapsed = now - last;
        last = now;

        let snap = stats.snapshot_and_reset(elapsed);
        println!(
            "[STATS] frames: {:.0}/s | sessions: started={} matched={} timed_out={} | sounds={} | errors: malformed={} key_prov={} link_probe={}",
            snap.frames_per_sec,
            snap.sessions_started,
            snap.sessions_matched,
            snap.sessions_timed_out,
            snap.sounds_aggregated,
            snap.malformed,
            snap.key_provisioning_failures,
            snap.link_probe_failures
        );
    }
}

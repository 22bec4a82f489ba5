// crates/connectivity/src/lib.rs

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lotse_config::ConnectivityConfig;
use lotse_core::{ConnectivityState, LotseError, LotseResult};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

/// One reachability probe against the remote inference cluster.
#[derive(Debug, Clone, Copy)]
pub struct ProbeOutcome {
    pub success: bool,
    pub latency: Duration,
}

#[async_trait]
pub trait ProbeTransport: Send + Sync {
    async fn probe(&self) -> ProbeOutcome;
}

/// HTTP health-check probe.
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(config: &ConnectivityConfig) -> LotseResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.probe_timeout_ms))
            .build()
            .map_err(|e| LotseError::Network(e.to_string()))?;

        Ok(Self {
            client,
            url: config.probe_url.clone(),
        })
    }
}

#[async_trait]
impl ProbeTransport for HttpProbe {
    async fn probe(&self) -> ProbeOutcome {
        let started = Instant::now();
        let success = match self.client.get(&self.url).send().await {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                debug!(url = %self.url, "Probe failed: {err}");
                false
            }
        };

        ProbeOutcome {
            success,
            latency: started.elapsed(),
        }
    }
}

/// Rolling-window state machine behind the monitor. Downward transitions
/// apply one adjacency step per observation; upward transitions additionally
/// require `recovery_hold_count` consecutive successes per step.
pub struct StateTracker {
    config: ConnectivityConfig,
    window: VecDeque<ProbeOutcome>,
    consecutive_failures: usize,
    consecutive_successes: usize,
    current: ConnectivityState,
}

impl StateTracker {
    pub fn new(config: ConnectivityConfig) -> Self {
        Self {
            config,
            window: VecDeque::new(),
            consecutive_failures: 0,
            consecutive_successes: 0,
            current: ConnectivityState::Online,
        }
    }

    pub fn current(&self) -> ConnectivityState {
        self.current
    }

    pub fn observe(&mut self, outcome: ProbeOutcome) -> ConnectivityState {
        self.window.push_back(outcome);
        while self.window.len() > self.config.window {
            self.window.pop_front();
        }

        if outcome.success {
            self.consecutive_successes += 1;
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
            self.consecutive_successes = 0;
        }

        let success_rate = self.success_rate();
        let latency_ok = self
            .mean_success_latency()
            .map(|mean| mean <= Duration::from_millis(self.config.degraded_latency_ms))
            .unwrap_or(false);
        let healthy = success_rate >= self.config.degraded_success_rate && latency_ok;

        let mut desired = if self.consecutive_failures >= self.config.offline_failure_count {
            ConnectivityState::Offline
        } else if healthy {
            ConnectivityState::Online
        } else {
            ConnectivityState::Degraded
        };

        // Hold-down: recovering states must earn each upward step.
        if rank(desired) < rank(self.current)
            && self.consecutive_successes < self.config.recovery_hold_count
        {
            desired = self.current;
        }

        let next = self.current.step_toward(desired);
        if next != self.current {
            if rank(next) < rank(self.current) {
                // Each recovered step restarts the hold-down for the next
                // one, and drops the failure history that earned the old
                // state so the fresh state is judged on fresh probes.
                self.consecutive_successes = 0;
                self.window.clear();
            }
            self.current = next;
        }

        self.current
    }

    fn success_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 1.0;
        }
        let successes = self.window.iter().filter(|o| o.success).count();
        successes as f64 / self.window.len() as f64
    }

    fn mean_success_latency(&self) -> Option<Duration> {
        let latencies: Vec<Duration> = self
            .window
            .iter()
            .filter(|o| o.success)
            .map(|o| o.latency)
            .collect();
        if latencies.is_empty() {
            return None;
        }
        Some(latencies.iter().sum::<Duration>() / latencies.len() as u32)
    }
}

fn rank(state: ConnectivityState) -> u8 {
    match state {
        ConnectivityState::Online => 0,
        ConnectivityState::Degraded => 1,
        ConnectivityState::Offline => 2,
    }
}

#[derive(Debug)]
enum ControlMessage {
    Shutdown { ack: oneshot::Sender<()> },
}

/// Periodically probes the cloud and publishes the health state over a
/// watch channel, so dispatcher and coordinator reads never wait on a probe
/// in flight.
pub struct ConnectivityMonitor {
    config: ConnectivityConfig,
    transport: Arc<dyn ProbeTransport>,
    state_tx: watch::Sender<ConnectivityState>,
    control_tx: Option<mpsc::Sender<ControlMessage>>,
    task: Option<JoinHandle<()>>,
}

impl ConnectivityMonitor {
    pub fn new(config: ConnectivityConfig) -> LotseResult<Self> {
        let transport = Arc::new(HttpProbe::new(&config)?);
        Ok(Self::with_transport(config, transport))
    }

    pub fn with_transport(config: ConnectivityConfig, transport: Arc<dyn ProbeTransport>) -> Self {
        let (state_tx, _) = watch::channel(ConnectivityState::Online);
        Self {
            config,
            transport,
            state_tx,
            control_tx: None,
            task: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.state_tx.subscribe()
    }

    pub fn start(&mut self) -> LotseResult<()> {
        if self.task.is_some() {
            return Err(LotseError::Connectivity(
                "Monitor already running".to_string(),
            ));
        }

        let (control_tx, mut control_rx) = mpsc::channel(1);
        let transport = Arc::clone(&self.transport);
        let state_tx = self.state_tx.clone();
        let mut tracker = StateTracker::new(self.config.clone());
        let interval = Duration::from_millis(self.config.probe_interval_ms);

        let task = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    control = control_rx.recv() => {
                        match control {
                            Some(ControlMessage::Shutdown { ack }) => {
                                info!("Connectivity monitor shutting down");
                                let _ = ack.send(());
                            }
                            None => {
                                info!("Connectivity monitor control channel closed");
                            }
                        }
                        break;
                    }
                    _ = ticker.tick() => {
                        let outcome = transport.probe().await;
                        let previous = tracker.current();
                        let next = tracker.observe(outcome);

                        debug!(
                            success = outcome.success,
                            latency_ms = outcome.latency.as_millis() as u64,
                            state = %next,
                            "Probe completed"
                        );

                        if next != previous {
                            info!(from = %previous, to = %next, "Connectivity state changed");
                            if state_tx.send(next).is_err() {
                                warn!("All connectivity subscribers dropped");
                            }
                        }
                    }
                }
            }
        });

        self.control_tx = Some(control_tx);
        self.task = Some(task);
        info!(
            probe_interval_ms = self.config.probe_interval_ms,
            "Connectivity monitor started"
        );
        Ok(())
    }

    pub async fn stop(&mut self) -> LotseResult<()> {
        let tx = self
            .control_tx
            .take()
            .ok_or_else(|| LotseError::Connectivity("Monitor not running".to_string()))?;
        let task = self
            .task
            .take()
            .ok_or_else(|| LotseError::Connectivity("Monitor not running".to_string()))?;

        let (ack_tx, ack_rx) = oneshot::channel();
        tx.send(ControlMessage::Shutdown { ack: ack_tx })
            .await
            .map_err(|err| LotseError::Connectivity(err.to_string()))?;

        if ack_rx.await.is_err() {
            warn!("Connectivity monitor shutdown acknowledgement was dropped");
        }

        task.await
            .map_err(|err| LotseError::Connectivity(err.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn config() -> ConnectivityConfig {
        ConnectivityConfig {
            window: 4,
            degraded_success_rate: 0.75,
            degraded_latency_ms: 100,
            offline_failure_count: 3,
            recovery_hold_count: 2,
            probe_interval_ms: 10,
            ..ConnectivityConfig::default()
        }
    }

    fn success(ms: u64) -> ProbeOutcome {
        ProbeOutcome {
            success: true,
            latency: Duration::from_millis(ms),
        }
    }

    fn failure() -> ProbeOutcome {
        ProbeOutcome {
            success: false,
            latency: Duration::from_millis(0),
        }
    }

    #[test]
    fn stays_online_while_healthy() {
        let mut tracker = StateTracker::new(config());
        for _ in 0..8 {
            assert_eq!(tracker.observe(success(20)), ConnectivityState::Online);
        }
    }

    #[test]
    fn never_skips_degraded_on_the_way_down() {
        let mut tracker = StateTracker::new(config());
        tracker.observe(success(20));

        let mut states = Vec::new();
        for _ in 0..6 {
            states.push(tracker.observe(failure()));
        }

        let first_offline = states
            .iter()
            .position(|s| *s == ConnectivityState::Offline)
            .expect("should reach offline");
        assert!(first_offline > 0);
        assert_eq!(states[first_offline - 1], ConnectivityState::Degraded);
    }

    #[test]
    fn high_latency_degrades_without_failures() {
        let mut tracker = StateTracker::new(config());
        for _ in 0..4 {
            tracker.observe(success(500));
        }
        assert_eq!(tracker.current(), ConnectivityState::Degraded);
    }

    #[test]
    fn recovery_requires_hold_down_per_step() {
        let mut tracker = StateTracker::new(config());
        for _ in 0..6 {
            tracker.observe(failure());
        }
        assert_eq!(tracker.current(), ConnectivityState::Offline);

        // One success is not enough to leave Offline.
        assert_eq!(tracker.observe(success(20)), ConnectivityState::Offline);
        // The second consecutive success steps up one level only.
        assert_eq!(tracker.observe(success(20)), ConnectivityState::Degraded);
        // Hold-down restarts before the Degraded -> Online step.
        assert_eq!(tracker.observe(success(20)), ConnectivityState::Degraded);
        assert_eq!(tracker.observe(success(20)), ConnectivityState::Online);
    }

    #[test]
    fn flapping_does_not_oscillate() {
        let mut tracker = StateTracker::new(config());
        for _ in 0..6 {
            tracker.observe(failure());
        }
        assert_eq!(tracker.current(), ConnectivityState::Offline);

        // Alternating success/failure never satisfies the hold-down.
        for _ in 0..6 {
            tracker.observe(success(20));
            tracker.observe(failure());
            assert_eq!(tracker.current(), ConnectivityState::Offline);
        }
    }

    struct ScriptedProbe {
        outcomes: Mutex<VecDeque<ProbeOutcome>>,
    }

    #[async_trait]
    impl ProbeTransport for ScriptedProbe {
        async fn probe(&self) -> ProbeOutcome {
            self.outcomes.lock().pop_front().unwrap_or(ProbeOutcome {
                success: false,
                latency: Duration::from_millis(0),
            })
        }
    }

    #[tokio::test]
    async fn monitor_publishes_transitions() {
        let outcomes: VecDeque<ProbeOutcome> = std::iter::repeat(failure()).take(12).collect();
        let transport = Arc::new(ScriptedProbe {
            outcomes: Mutex::new(outcomes),
        });

        let mut monitor = ConnectivityMonitor::with_transport(config(), transport);
        let mut rx = monitor.subscribe();
        monitor.start().expect("monitor starts");

        let mut seen = vec![*rx.borrow()];
        while *rx.borrow() != ConnectivityState::Offline {
            tokio::time::timeout(Duration::from_secs(1), rx.changed())
                .await
                .expect("state change within deadline")
                .expect("sender alive");
            seen.push(*rx.borrow());
        }

        assert_eq!(
            seen,
            vec![
                ConnectivityState::Online,
                ConnectivityState::Degraded,
                ConnectivityState::Offline
            ]
        );

        monitor.stop().await.expect("monitor stops");
    }
}

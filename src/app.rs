// src/app.rs

use std::sync::Arc;

use lotse_config::LotseConfig;
use lotse_connectivity::ConnectivityMonitor;
use lotse_core::{LotseError, LotseResult};
use lotse_dialogue::{AudioSink, SimulatedSink};
use lotse_dispatch::{LocalProvider, RemoteProvider};
use lotse_observability::MetricsCollector;
use tokio::signal;
use tracing::{error, info, warn};

use crate::pipeline::Orchestrator;
use crate::sources::{
    AudioSegmentSource, FrameSource, SilentAudioSource, SimulatedAudioSource,
    SimulatedFrameSource,
};

pub struct LotseApp {
    config: LotseConfig,
    monitor: ConnectivityMonitor,
    orchestrator: Orchestrator,
    metrics: Arc<MetricsCollector>,
}

impl LotseApp {
    pub fn new(config: LotseConfig) -> LotseResult<Self> {
        info!("Initializing LOTSE components...");

        let metrics = Arc::new(MetricsCollector::new());
        let monitor = ConnectivityMonitor::new(config.connectivity.clone())?;

        let remote = Arc::new(RemoteProvider::new(
            config.dispatch.remote.clone(),
            config.dialogue.speech_sample_rate,
        )?);
        let local = Arc::new(LocalProvider::new(
            config.dispatch.local.clone(),
            config.dialogue.speech_sample_rate,
        ));

        let sink = build_sink(&config);
        let orchestrator = Orchestrator::new(
            config.clone(),
            remote,
            local,
            monitor.subscribe(),
            sink,
            Arc::clone(&metrics),
        );

        Ok(Self {
            config,
            monitor,
            orchestrator,
            metrics,
        })
    }

    pub async fn run(&mut self) -> LotseResult<()> {
        info!("Starting LOTSE orchestrator...");

        self.monitor.start()?;

        let (frames, audio) = self.build_sources();
        self.orchestrator.start(frames, audio)?;

        self.wait_for_shutdown().await?;

        self.orchestrator.stop().await?;
        self.monitor.stop().await?;

        info!(
            health = ?self.metrics.get_health_status(),
            "LOTSE shut down"
        );
        Ok(())
    }

    fn build_sources(&self) -> (Box<dyn FrameSource>, Box<dyn AudioSegmentSource>) {
        if !self.config.simulation.enabled {
            // Camera and microphone integrations are deployment plumbing
            // that lives outside this crate; without one wired in, the
            // scripted sources keep the orchestrator observable.
            warn!("No sensor integration configured; falling back to simulated sources");
        }

        let frames = Box::new(SimulatedFrameSource::from_config(&self.config.simulation));
        let audio: Box<dyn AudioSegmentSource> =
            if self.config.simulation.scripted_utterances.is_empty() {
                Box::new(SilentAudioSource)
            } else {
                Box::new(SimulatedAudioSource::from_config(&self.config.simulation))
            };

        (frames, audio)
    }

    async fn wait_for_shutdown(&self) -> LotseResult<()> {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal");
                Ok(())
            }
            Err(e) => {
                error!("Failed to listen for shutdown signal: {}", e);
                Err(LotseError::Unknown(e.to_string()))
            }
        }
    }
}

#[cfg(feature = "hardware-audio")]
fn build_sink(config: &LotseConfig) -> Arc<dyn AudioSink> {
    match lotse_dialogue::HardwareSink::new(config.dialogue.device.as_deref()) {
        Ok(sink) => Arc::new(sink),
        Err(err) => {
            warn!("Falling back to simulated audio sink: {err}");
            Arc::new(SimulatedSink::new())
        }
    }
}

#[cfg(not(feature = "hardware-audio"))]
fn build_sink(_config: &LotseConfig) -> Arc<dyn AudioSink> {
    Arc::new(SimulatedSink::new())
}

pub mod app;
pub mod pipeline;
pub mod sources;

pub use app::LotseApp;
pub use pipeline::{Orchestrator, SpokenUtterance};
pub use sources::{
    AudioSegmentSource, FrameSource, SilentAudioSource, SimulatedAudioSource,
    SimulatedFrameSource,
};

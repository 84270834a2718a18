//! The per-utterance orchestration core: topic registry, STT-response
//! cache, generation pipeline, last-command state and timing history.

pub mod cache;
pub mod perf_log;
pub mod pipeline;
pub mod prompt;
pub mod status;
pub mod timing;
pub mod topics;

pub use cache::{normalize, CacheEntry, CacheStats, SttResponseCache};
pub use perf_log::{PerfRecord, PerformanceLog};
pub use pipeline::{
    DispatchSummary, GenerateRequest, GenerateResponse, GenerationPipeline, PipelineDeps,
    UpstreamTiming,
};
pub use status::{CommandStatus, LastCommand, LastCommandStore};
pub use timing::{CommandHistory, Stage, TimedCommand, Trend, TrendReport};
pub use topics::{
    GrammarConfig, Heartbeat, HeartbeatStatus, HeartbeatSummary, HeartbeatUpdate, LiveStatus,
    Topic, TopicRegistry, TopicSettings, TopicUpdate,
};

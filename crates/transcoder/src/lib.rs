pub mod config;
pub mod error;
pub mod job;
pub mod scan;
pub mod ffprobe;
pub mod eligibility;
pub mod policy;
pub mod encoder;
pub mod orchestrator;
pub mod validate;
pub mod replace;
pub mod nzbget;
pub mod pipeline;

pub use config::RunConfig;
pub use error::RunError;
pub use job::FileJob;
pub use ffprobe::{FFProbeData, FFProbeStream, Prober, StreamDescriptor, StreamKind};
pub use encoder::Encoder;
pub use replace::Remuxer;
pub use pipeline::{run, RunStatus, RunSummary, Toolchain};

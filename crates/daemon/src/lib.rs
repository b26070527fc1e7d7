pub mod encoding;
pub mod config;
pub mod tools;
pub mod metadata;
pub mod ffprobe;
pub mod convert;
pub mod status;
pub mod backup;
pub mod scan;
pub mod pipeline;
pub mod orchestrator;

#[cfg(all(test, unix))]
mod test_support;

pub use config::{ConvertConfig, DaemonConfig};
pub use status::{ProcessStatus, ProcessedDatabase};
pub use tools::ToolLocations;
pub use orchestrator::{Orchestrator, RunReport};
pub use pipeline::PipelineError;

//! Adapters and plumbing for running translation evaluations: HTTP model
//! endpoints, a compiler probe, sample manifests and result telemetry.

pub mod config;
pub mod generator;
pub mod probe;
pub mod samples;
pub mod telemetry;

pub use config::{CompilerConfig, ModelEndpoint, RunnerConfig};
pub use generator::{HttpGenerator, ModelRegistry};
pub use probe::CompilerProbe;
pub use samples::SampleManifest;
pub use telemetry::{read_results, TelemetryRecord, TelemetrySink};

pub mod client;
pub mod config;
pub mod crd;
pub mod fixtures;
pub mod golden;
pub mod prometheus;
pub mod sampler;
pub mod storage;
pub mod upgrade;
pub mod virtctl;
pub mod vm;

// Re-exports for the pieces nearly every test touches
pub use crate::config::TestConfig;
pub use crate::fixtures::TestNamespace;
pub use crate::sampler::TimeoutSampler;

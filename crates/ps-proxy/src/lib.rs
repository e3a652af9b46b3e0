//! HTTP proxy service: configuration, the fetch/rewrite/inject pipeline, the
//! response packager, and the blocking server that ties them together.

pub mod config;
pub mod package;
pub mod pipeline;
pub mod server;

pub use config::ProxyConfig;
pub use config::TrustStore;
pub use package::ProxyResponse;
pub use package::package;
pub use pipeline::PipelineOutcome;
pub use pipeline::ProxyPipeline;
pub use server::ProxyHandle;
pub use server::start;
pub use server::start_with_pipeline;

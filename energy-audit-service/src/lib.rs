pub mod analytics;
pub mod api;
pub mod config;
pub mod coordinator;
pub mod metrics_server;
pub mod observability;
pub mod pipeline;
pub mod registration;
pub mod seed;
pub mod sinks;
pub mod sources;
pub mod store;
pub mod transform;

pub use coordinator::{Coordinator, CoordinatorError, IngestionSession, IngestionSettings};
pub use pipeline::{Envelope, Pipeline};

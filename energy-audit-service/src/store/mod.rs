//! Reading store: storage backends plus the reactive layer the rest of the
//! service reads through.

mod backend;
mod live;
mod memory;
mod postgres;

pub use backend::StorageBackend;
pub use live::{LiveQuery, LiveStore};
pub use memory::MemoryBackend;
pub use postgres::PgBackend;

use std::sync::Arc;

use meter_client::domain::{Meter, Reading};
use sqlx::postgres::PgPoolOptions;

use crate::config::{StorageConfig, StorageKind};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("meter '{0}' already exists")]
    DuplicateMeter(String),
    #[error("meter '{0}' does not exist")]
    UnknownMeter(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Backend failures may succeed on retry; the others never will.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}

/// Meters and readings captured at the same instant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub meters: Vec<Meter>,
    pub readings: Vec<Reading>,
}

/// Build the backend selected by `[storage]`.
pub async fn connect(cfg: &StorageConfig) -> anyhow::Result<Arc<dyn StorageBackend>> {
    match cfg.kind {
        StorageKind::Memory => Ok(Arc::new(MemoryBackend::new())),
        StorageKind::Postgres => {
            let uri = cfg
                .uri
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("storage.uri is required when storage.kind = \"postgres\""))?;
            let pool = PgPoolOptions::new()
                .max_connections(cfg.max_connections)
                .connect(uri)
                .await?;
            tracing::info!(max_connections = cfg.max_connections, "connected to postgres");
            Ok(Arc::new(PgBackend::new(pool)))
        }
    }
}

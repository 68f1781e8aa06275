//! Application state.

use std::sync::Arc;

use agent_ledger_core::{LedgerError, RateLimiter};
use agent_ledger_store::{Ledger, MemoryStore, Store};

use crate::config::{ServiceConfig, StoreBackend};
use crate::error::ApiError;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The ledger engine.
    pub ledger: Arc<Ledger>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Per-user skill rate limits.
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    /// Create a new application state over an opened store.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the configured quota defaults are inconsistent.
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Result<Self, LedgerError> {
        let ledger = Ledger::with_quota_defaults(store, config.quota_defaults)?;
        Ok(Self {
            ledger: Arc::new(ledger),
            config,
            rate_limiter: Arc::new(RateLimiter::new()),
        })
    }

    /// Open the configured store backend and build the state.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened or the backend was not compiled in.
    pub fn open(config: ServiceConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let store: Arc<dyn Store> = match config.store_backend {
            StoreBackend::Memory => {
                tracing::warn!("Using in-memory store - data is lost on restart");
                Arc::new(MemoryStore::new())
            }
            #[cfg(feature = "rocksdb-backend")]
            StoreBackend::RocksDb => {
                tracing::info!(path = %config.data_dir, "Opening RocksDB store");
                Arc::new(agent_ledger_store::RocksStore::open(&config.data_dir)?)
            }
            #[cfg(not(feature = "rocksdb-backend"))]
            StoreBackend::RocksDb => {
                return Err(
                    "the rocksdb backend is not compiled in; enable feature rocksdb-backend"
                        .into(),
                );
            }
        };
        Ok(Self::new(store, config)?)
    }

    /// Run a blocking ledger call off the async runtime.
    ///
    /// # Errors
    ///
    /// Returns the ledger error mapped to an API error, or `Internal` if the task panicked.
    pub async fn run<T, F>(&self, op: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: FnOnce(&Ledger) -> agent_ledger_core::Result<T> + Send + 'static,
    {
        let ledger = Arc::clone(&self.ledger);
        tokio::task::spawn_blocking(move || op(&ledger))
            .await
            .map_err(|e| ApiError::Internal(format!("ledger task failed: {e}")))?
            .map_err(ApiError::from)
    }
}

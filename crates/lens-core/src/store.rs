//! Read-only access to the transaction snapshot.
//!
//! The core depends only on [`TransactionStore`]; ingestion lives elsewhere.

use crate::error::{LensError, Result};
use crate::types::{normalize_corridor, select_transactions, QueryFilter, Transaction};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Read contract the aggregator depends on.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Transactions matching the filter, in snapshot order.
    async fn list_transactions(&self, filter: &QueryFilter) -> Result<Vec<Transaction>>;

    /// Distinct corridor keys in canonical form, sorted.
    async fn corridors(&self) -> Result<Vec<String>> {
        let all = self.list_transactions(&QueryFilter::all()).await?;
        let keys: BTreeSet<String> = all.iter().map(|t| normalize_corridor(&t.corridor)).collect();
        Ok(keys.into_iter().collect())
    }
}

/// Immutable in-memory snapshot. Cloning shares the underlying records.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    transactions: Arc<Vec<Transaction>>,
    reference_date: Option<NaiveDate>,
}

impl InMemoryStore {
    pub fn new(transactions: Vec<Transaction>) -> Self {
        Self {
            transactions: Arc::new(transactions),
            reference_date: None,
        }
    }

    /// Anchor the 7d / 30d windows at a fixed date instead of the latest transaction.
    pub fn with_reference_date(mut self, reference_date: Option<NaiveDate>) -> Self {
        self.reference_date = reference_date;
        self
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

#[async_trait]
impl TransactionStore for InMemoryStore {
    async fn list_transactions(&self, filter: &QueryFilter) -> Result<Vec<Transaction>> {
        Ok(select_transactions(
            &self.transactions,
            filter,
            self.reference_date,
        ))
    }
}

/// Snapshot backed by a JSON file holding an array of transactions.
///
/// The file is read on first use and the parsed snapshot is kept for the lifetime of
/// the store. A failed load is not cached, so a later call retries.
pub struct JsonFileStore {
    path: PathBuf,
    reference_date: Option<NaiveDate>,
    snapshot: OnceCell<InMemoryStore>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            reference_date: None,
            snapshot: OnceCell::new(),
        }
    }

    pub fn with_reference_date(mut self, reference_date: Option<NaiveDate>) -> Self {
        self.reference_date = reference_date;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the snapshot has been loaded yet.
    pub fn is_loaded(&self) -> bool {
        self.snapshot.initialized()
    }

    async fn snapshot(&self) -> Result<&InMemoryStore> {
        self.snapshot
            .get_or_try_init(|| async {
                let transactions = load_snapshot(&self.path).await?;
                info!(
                    "Loaded {} transactions from {}",
                    transactions.len(),
                    self.path.display()
                );
                Ok::<_, LensError>(
                    InMemoryStore::new(transactions).with_reference_date(self.reference_date),
                )
            })
            .await
    }
}

#[async_trait]
impl TransactionStore for JsonFileStore {
    async fn list_transactions(&self, filter: &QueryFilter) -> Result<Vec<Transaction>> {
        let snapshot = self.snapshot().await?;
        snapshot.list_transactions(filter).await
    }
}

/// Read and parse the snapshot file. Every failure maps to `DataUnavailable`.
async fn load_snapshot(path: &Path) -> Result<Vec<Transaction>> {
    debug!("Reading transaction snapshot from {:?}", path);
    let json = tokio::fs::read_to_string(path).await.map_err(|e| {
        warn!("Failed to read transaction snapshot {:?}: {}", path, e);
        LensError::DataUnavailable(format!("cannot read {}: {}", path.display(), e))
    })?;
    let transactions: Vec<Transaction> = serde_json::from_str(&json).map_err(|e| {
        warn!("Failed to parse transaction snapshot {:?}: {}", path, e);
        LensError::DataUnavailable(format!("cannot parse {}: {}", path.display(), e))
    })?;
    Ok(transactions)
}

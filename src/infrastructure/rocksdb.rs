use crate::domain::orchestration::HistoryEvent;
use crate::domain::ports::{OrchestrationHistory, VelocityAggregateStore};
use crate::domain::transaction::Amount;
use crate::domain::velocity::{VelocityAggregate, VelocityKey};
use crate::error::{Result, ScreeningError};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, ErrorKind, OptimisticTransactionDB, Options};
use rust_decimal::Decimal;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Column Family for daily velocity aggregates, keyed by `tenant/yyyy-mm-dd`.
pub const CF_VELOCITY: &str = "velocity";
/// Column Family for the step log of active orchestration instances.
pub const CF_HISTORY: &str = "history";
/// Column Family for the step log of terminal orchestration instances.
pub const CF_ARCHIVE: &str = "archive";

pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 16;

type Txn<'db> = rocksdb::Transaction<'db, OptimisticTransactionDB>;

/// A persistent store for velocity aggregates and orchestration history.
///
/// Every update is a read-modify-write inside an optimistic transaction. A
/// commit that loses a race against a concurrent writer is retried from a
/// fresh read, up to `max_conflict_retries` times.
///
/// This struct is thread-safe (`Clone` shares the underlying database).
#[derive(Clone)]
pub struct RocksDbStore {
    db: Arc<OptimisticTransactionDB>,
    max_conflict_retries: u32,
}

impl RocksDbStore {
    /// Opens or creates a database at `path` with the required column families.
    pub fn open<P: AsRef<Path>>(path: P, max_conflict_retries: u32) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let families = [CF_VELOCITY, CF_HISTORY, CF_ARCHIVE]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));
        let db = OptimisticTransactionDB::open_cf_descriptors(&opts, path, families)?;

        Ok(Self {
            db: Arc::new(db),
            max_conflict_retries: max_conflict_retries.max(1),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| ScreeningError::Fatal(format!("column family {} not found", name)))
    }

    fn read_aggregate(&self, bytes: &[u8], key: &VelocityKey) -> Result<VelocityAggregate> {
        let aggregate: VelocityAggregate = serde_json::from_slice(bytes).map_err(|e| {
            ScreeningError::Fatal(format!("corrupt velocity record {}: {}", key, e))
        })?;
        aggregate.validate()?;
        Ok(aggregate)
    }

    fn read_events(&self, bytes: &[u8], instance_id: &str) -> Result<Vec<HistoryEvent>> {
        serde_json::from_slice(bytes).map_err(|e| {
            ScreeningError::Fatal(format!("corrupt history of {}: {}", instance_id, e))
        })
    }

    /// Runs `op` in one transaction. `None` means the commit hit a conflict.
    fn try_commit<T>(&self, op: &mut impl FnMut(&Txn<'_>) -> Result<T>) -> Result<Option<T>> {
        let txn = self.db.transaction();
        let value = op(&txn)?;
        match txn.commit() {
            Ok(()) => Ok(Some(value)),
            Err(e) if matches!(e.kind(), ErrorKind::Busy | ErrorKind::TryAgain) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn transact<T>(
        &self,
        key: &str,
        mut op: impl FnMut(&Txn<'_>) -> Result<T> + Send,
    ) -> Result<T> {
        for attempt in 1..=self.max_conflict_retries {
            if let Some(value) = self.try_commit(&mut op)? {
                return Ok(value);
            }
            debug!(key, attempt, "transaction conflict, retrying");
            tokio::task::yield_now().await;
        }
        Err(ScreeningError::ConcurrencyConflict(key.to_string()).escalate_conflict())
    }
}

#[async_trait]
impl VelocityAggregateStore for RocksDbStore {
    async fn get_processed(&self, key: &VelocityKey) -> Result<Decimal> {
        let cf = self.cf(CF_VELOCITY)?;
        match self.db.get_cf(cf, key.storage_key())? {
            Some(bytes) => Ok(self.read_aggregate(&bytes, key)?.payment_processed),
            None => Ok(Decimal::ZERO),
        }
    }

    async fn increment_processed(
        &self,
        key: &VelocityKey,
        amount: Amount,
        idempotency_key: &str,
    ) -> Result<Decimal> {
        let storage_key = key.storage_key();
        self.transact(&storage_key, |txn| {
            let cf = self.cf(CF_VELOCITY)?;
            let mut aggregate = match txn.get_for_update_cf(cf, &storage_key, true)? {
                Some(bytes) => self.read_aggregate(&bytes, key)?,
                None => VelocityAggregate::new(key),
            };
            if aggregate.is_applied(idempotency_key) {
                return Ok(aggregate.payment_processed);
            }
            let total = aggregate.apply(amount, idempotency_key)?;
            txn.put_cf(cf, &storage_key, serde_json::to_vec(&aggregate)?)?;
            Ok(total)
        })
        .await
    }
}

#[async_trait]
impl OrchestrationHistory for RocksDbStore {
    async fn load(&self, instance_id: &str) -> Result<Vec<HistoryEvent>> {
        for name in [CF_HISTORY, CF_ARCHIVE] {
            if let Some(bytes) = self.db.get_cf(self.cf(name)?, instance_id)? {
                return self.read_events(&bytes, instance_id);
            }
        }
        Ok(Vec::new())
    }

    async fn append(&self, instance_id: &str, event: &HistoryEvent) -> Result<()> {
        self.transact(instance_id, |txn| {
            if txn.get_for_update_cf(self.cf(CF_ARCHIVE)?, instance_id, true)?.is_some() {
                return Err(ScreeningError::Fatal(format!(
                    "instance {} is archived",
                    instance_id
                )));
            }
            let cf = self.cf(CF_HISTORY)?;
            let mut events = match txn.get_for_update_cf(cf, instance_id, true)? {
                Some(bytes) => self.read_events(&bytes, instance_id)?,
                None => Vec::new(),
            };
            events.push(event.clone());
            txn.put_cf(cf, instance_id, serde_json::to_vec(&events)?)?;
            Ok(())
        })
        .await
    }

    async fn archive(&self, instance_id: &str) -> Result<()> {
        self.transact(instance_id, |txn| {
            let active = self.cf(CF_HISTORY)?;
            if let Some(bytes) = txn.get_for_update_cf(active, instance_id, true)? {
                txn.put_cf(self.cf(CF_ARCHIVE)?, instance_id, bytes)?;
                txn.delete_cf(active, instance_id)?;
            }
            Ok(())
        })
        .await
    }
}

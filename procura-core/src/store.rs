//! Storage traits and in-memory implementations.
//!
//! The durable store is an external collaborator: any document or relational
//! store works provided it offers get/put plus a conditional update
//! (compare-and-set) on a single record. The traits here are that boundary;
//! the in-memory implementations back tests and single-process deployments.
//!
//! Two logical collections: `mandates` keyed by mandate id, and
//! `transactions` keyed by transaction id with secondary lookups by
//! `(mandate_id, status)` for the capacity check and by
//! `(principal_id, created_at)` for history queries.

use crate::error::{Error, Result};
use crate::mandate::{Mandate, MandateId, MandateStatus};
use crate::transaction::{Transaction, TransactionId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Durable, keyed storage for mandates.
#[async_trait]
pub trait MandateStore: Send + Sync {
    /// Insert or overwrite a mandate record.
    async fn put(&self, mandate: &Mandate) -> Result<()>;

    /// Fetch a mandate by id.
    async fn get(&self, id: &MandateId) -> Result<Option<Mandate>>;

    /// Conditionally transition a mandate's status.
    ///
    /// Applies the transition only if the stored status equals `expected`
    /// (compare-and-set). Returns `Ok(true)` when the transition was
    /// applied, `Ok(false)` when the stored status did not match, and
    /// `Err(MandateNotFound)` for an unknown id.
    async fn set_status(
        &self,
        id: &MandateId,
        expected: MandateStatus,
        new: MandateStatus,
        reason: Option<String>,
    ) -> Result<bool>;

    /// All mandates for a principal, newest first.
    async fn list_for_principal(&self, principal_id: &str) -> Result<Vec<Mandate>>;
}

/// Durable, keyed storage for transactions.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Insert or overwrite a transaction record (including its audit trail).
    async fn put(&self, transaction: &Transaction) -> Result<()>;

    /// Fetch a transaction by id.
    async fn get(&self, id: &TransactionId) -> Result<Option<Transaction>>;

    /// Count transactions against a mandate that hold capacity
    /// (`pending` or `completed`).
    async fn count_active(&self, mandate_id: &MandateId) -> Result<u32>;

    /// Transactions for a principal, newest first, paginated.
    async fn list_for_principal(
        &self,
        principal_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Transaction>>;

    /// Pending transactions created before `cutoff`, for reconciliation.
    async fn list_pending_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Transaction>>;
}

/// In-memory mandate store.
#[derive(Debug, Default)]
pub struct MemoryMandateStore {
    records: RwLock<HashMap<String, Mandate>>,
}

impl MemoryMandateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MandateStore for MemoryMandateStore {
    async fn put(&self, mandate: &Mandate) -> Result<()> {
        let mut records = self.records.write().await;
        records.insert(mandate.id().as_str().to_string(), mandate.clone());
        Ok(())
    }

    async fn get(&self, id: &MandateId) -> Result<Option<Mandate>> {
        let records = self.records.read().await;
        Ok(records.get(id.as_str()).cloned())
    }

    async fn set_status(
        &self,
        id: &MandateId,
        expected: MandateStatus,
        new: MandateStatus,
        reason: Option<String>,
    ) -> Result<bool> {
        // The write lock spans read-compare-write, which is what gives this
        // implementation its compare-and-set semantics.
        let mut records = self.records.write().await;
        let mandate = records
            .get_mut(id.as_str())
            .ok_or_else(|| Error::MandateNotFound(id.to_string()))?;

        if mandate.status() != expected {
            return Ok(false);
        }
        match new {
            MandateStatus::Revoked => {
                mandate.revoke(reason.unwrap_or_else(|| "revoked".to_string()))
            }
            MandateStatus::Expired => mandate.mark_expired(),
            MandateStatus::Suspended => mandate.suspend()?,
            MandateStatus::Active => mandate.reinstate()?,
        }
        Ok(true)
    }

    async fn list_for_principal(&self, principal_id: &str) -> Result<Vec<Mandate>> {
        let records = self.records.read().await;
        let mut mandates: Vec<Mandate> = records
            .values()
            .filter(|m| m.principal_id() == principal_id)
            .cloned()
            .collect();
        mandates.sort_by_key(|m| std::cmp::Reverse(m.created_at()));
        Ok(mandates)
    }
}

/// In-memory transaction store.
#[derive(Debug, Default)]
pub struct MemoryTransactionStore {
    records: RwLock<HashMap<String, Transaction>>,
}

impl MemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStore for MemoryTransactionStore {
    async fn put(&self, transaction: &Transaction) -> Result<()> {
        let mut records = self.records.write().await;
        records.insert(transaction.id().as_str().to_string(), transaction.clone());
        Ok(())
    }

    async fn get(&self, id: &TransactionId) -> Result<Option<Transaction>> {
        let records = self.records.read().await;
        Ok(records.get(id.as_str()).cloned())
    }

    async fn count_active(&self, mandate_id: &MandateId) -> Result<u32> {
        let records = self.records.read().await;
        let count = records
            .values()
            .filter(|t| t.mandate_id() == mandate_id && t.status().holds_capacity())
            .count();
        Ok(count as u32)
    }

    async fn list_for_principal(
        &self,
        principal_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Transaction>> {
        let records = self.records.read().await;
        let mut transactions: Vec<Transaction> = records
            .values()
            .filter(|t| t.principal_id() == principal_id)
            .cloned()
            .collect();
        transactions.sort_by_key(|t| std::cmp::Reverse(t.created_at()));
        Ok(transactions.into_iter().skip(offset).take(limit).collect())
    }

    async fn list_pending_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Transaction>> {
        let records = self.records.read().await;
        let mut stale: Vec<Transaction> = records
            .values()
            .filter(|t| {
                t.status() == crate::transaction::TransactionStatus::Pending
                    && t.created_at() < cutoff
            })
            .cloned()
            .collect();
        stale.sort_by_key(|t| t.created_at());
        Ok(stale)
    }
}

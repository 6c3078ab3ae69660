//! In-memory deposit ledger
//!
//! Used by tests and by the node's dev mode. A single write lock covers every
//! mutation, which serializes allocations exactly like the row lock does in
//! PostgreSQL.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use tessera_types::{
    Amount, AssignmentEvent, Deposit, DepositHold, DepositId, DepositQuery, HoldId, NewDeposit,
};

use crate::{require_positive, DepositLedger, LedgerError, Result};

#[derive(Debug, Clone)]
struct DepositEntry {
    deposit: Deposit,
    assignments: Vec<AssignmentEvent>,
}

impl DepositEntry {
    fn assigned(&self) -> Amount {
        self.assignments.iter().map(|a| a.amount).sum()
    }

    fn remaining(&self) -> Amount {
        self.deposit.amount.saturating_sub(self.assigned())
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    /// Keyed by id, so iteration is insertion order
    deposits: BTreeMap<i64, DepositEntry>,
    by_transfer_uid: HashMap<String, i64>,
    holds: Vec<DepositHold>,
    next_id: i64,
}

impl LedgerState {
    fn entry(&self, deposit_id: DepositId) -> Result<&DepositEntry> {
        self.deposits
            .get(&deposit_id.0)
            .ok_or(LedgerError::NotFound { deposit_id })
    }

    fn held(&self, deposit_id: DepositId) -> Amount {
        self.holds
            .iter()
            .filter(|h| h.deposit_id == deposit_id)
            .map(|h| h.amount)
            .sum()
    }

    fn free(&self, entry: &DepositEntry) -> Amount {
        entry.remaining().saturating_sub(self.held(entry.deposit.id))
    }

    fn matching<'a>(&'a self, query: &'a DepositQuery) -> impl Iterator<Item = &'a DepositEntry> {
        self.deposits
            .values()
            .filter(move |e| query.matches(&e.deposit) && !e.deposit.is_fully_assigned())
    }

    /// Append an assignment, marking the deposit once nothing remains
    fn record_assignment(
        &mut self,
        deposit_id: DepositId,
        amount: Amount,
        target_reference: &str,
    ) -> Result<AssignmentEvent> {
        let entry = self
            .deposits
            .get_mut(&deposit_id.0)
            .ok_or(LedgerError::NotFound { deposit_id })?;

        let remaining = entry.remaining();
        let after = remaining
            .checked_sub(amount)
            .ok_or(LedgerError::InsufficientRemaining {
                deposit_id,
                available: remaining,
                requested: amount,
            })?;

        let now = Utc::now();
        let event = AssignmentEvent {
            deposit_id,
            amount,
            target_reference: target_reference.to_string(),
            created_at: now,
        };
        entry.assignments.push(event.clone());
        if after.is_zero() {
            entry.deposit.assigned_at = Some(now);
        }
        Ok(event)
    }
}

/// Deposit ledger held entirely in memory
#[derive(Clone, Default)]
pub struct InMemoryDepositLedger {
    state: Arc<RwLock<LedgerState>>,
    fail_settlement: Arc<AtomicBool>,
}

impl InMemoryDepositLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outstanding holds under a reference
    pub async fn holds(&self, reference: &str) -> Vec<DepositHold> {
        let state = self.state.read().await;
        state
            .holds
            .iter()
            .filter(|h| h.reference == reference)
            .cloned()
            .collect()
    }

    /// Make subsequent settlements fail as if the database were down
    pub fn set_fail_settlement(&self, fail: bool) {
        self.fail_settlement.store(fail, Ordering::SeqCst);
    }

    /// Number of ingested deposits
    pub async fn len(&self) -> usize {
        self.state.read().await.deposits.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl DepositLedger for InMemoryDepositLedger {
    async fn ingest(&self, deposit: NewDeposit) -> Result<Deposit> {
        let mut state = self.state.write().await;

        if let Some(id) = state.by_transfer_uid.get(&deposit.transfer_uid) {
            debug!(transfer_uid = %deposit.transfer_uid, deposit_id = id, "Deposit already ingested");
            return Ok(state.entry(DepositId(*id))?.deposit.clone());
        }

        state.next_id += 1;
        let id = state.next_id;
        let stored = Deposit {
            id: DepositId(id),
            tx_hash: deposit.tx_hash,
            transfer_uid: deposit.transfer_uid.clone(),
            chain_id: deposit.chain_id,
            depositor: deposit.depositor,
            token: deposit.token,
            amount: deposit.amount,
            assigned_at: None,
            created_at: Utc::now(),
        };
        state.by_transfer_uid.insert(deposit.transfer_uid, id);
        state.deposits.insert(
            id,
            DepositEntry {
                deposit: stored.clone(),
                assignments: Vec::new(),
            },
        );

        info!(deposit_id = id, amount = %stored.amount, depositor = %stored.depositor, "Deposit ingested");
        Ok(stored)
    }

    async fn get(&self, deposit_id: DepositId) -> Result<Deposit> {
        let state = self.state.read().await;
        Ok(state.entry(deposit_id)?.deposit.clone())
    }

    async fn remaining(&self, deposit_id: DepositId) -> Result<Amount> {
        let state = self.state.read().await;
        Ok(state.entry(deposit_id)?.remaining())
    }

    async fn find_with_sufficient_remaining(
        &self,
        query: &DepositQuery,
        min_amount: Amount,
    ) -> Result<Option<Deposit>> {
        let state = self.state.read().await;
        let found = state
            .matching(query)
            .find(|e| state.free(e) >= min_amount)
            .map(|e| e.deposit.clone());
        Ok(found)
    }

    async fn find_next_with_any_remaining(&self, query: &DepositQuery) -> Result<Option<Deposit>> {
        let state = self.state.read().await;
        let found = state
            .matching(query)
            .find(|e| state.free(e).is_positive())
            .map(|e| e.deposit.clone());
        Ok(found)
    }

    async fn total_available(&self, query: &DepositQuery) -> Result<Amount> {
        let state = self.state.read().await;
        let total = state.matching(query).map(|e| state.free(e)).sum();
        Ok(total)
    }

    async fn assign(
        &self,
        deposit_id: DepositId,
        amount: Amount,
        target_reference: &str,
    ) -> Result<AssignmentEvent> {
        require_positive(amount, "Assignment")?;

        let mut state = self.state.write().await;
        let free = state.free(state.entry(deposit_id)?);
        if amount > free {
            return Err(LedgerError::InsufficientRemaining {
                deposit_id,
                available: free,
                requested: amount,
            });
        }

        let event = state.record_assignment(deposit_id, amount, target_reference)?;
        debug!(deposit_id = %deposit_id, amount = %amount, target_reference, "Deposit assigned");
        Ok(event)
    }

    async fn assignments(&self, deposit_id: DepositId) -> Result<Vec<AssignmentEvent>> {
        let state = self.state.read().await;
        Ok(state.entry(deposit_id)?.assignments.clone())
    }

    async fn hold(
        &self,
        deposit_id: DepositId,
        amount: Amount,
        reference: &str,
        target_reference: &str,
    ) -> Result<DepositHold> {
        require_positive(amount, "Hold")?;

        let mut state = self.state.write().await;
        let free = state.free(state.entry(deposit_id)?);
        if amount > free {
            return Err(LedgerError::InsufficientRemaining {
                deposit_id,
                available: free,
                requested: amount,
            });
        }

        let hold = DepositHold {
            id: HoldId::new(),
            deposit_id,
            amount,
            reference: reference.to_string(),
            target_reference: target_reference.to_string(),
            created_at: Utc::now(),
        };
        state.holds.push(hold.clone());
        debug!(deposit_id = %deposit_id, amount = %amount, reference, "Deposit hold placed");
        Ok(hold)
    }

    async fn settle_holds(&self, reference: &str) -> Result<Vec<AssignmentEvent>> {
        if self.fail_settlement.load(Ordering::SeqCst) {
            return Err(LedgerError::Database {
                message: "ledger unavailable".to_string(),
            });
        }

        let mut state = self.state.write().await;

        let (settling, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.holds)
            .into_iter()
            .partition(|h| h.reference == reference);
        state.holds = kept;

        // Apply against a copy so a failure leaves the ledger untouched
        let snapshot = state.deposits.clone();
        let mut events = Vec::with_capacity(settling.len());
        let mut failure = None;
        for hold in &settling {
            match state.record_assignment(hold.deposit_id, hold.amount, &hold.target_reference) {
                Ok(event) => events.push(event),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        if let Some(e) = failure {
            state.deposits = snapshot;
            state.holds.extend(settling);
            return Err(e);
        }

        if !events.is_empty() {
            info!(reference, count = events.len(), "Deposit holds settled");
        }
        Ok(events)
    }

    async fn release_holds(&self, reference: &str) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.holds.len();
        state.holds.retain(|h| h.reference != reference);
        let released = (before - state.holds.len()) as u64;
        if released > 0 {
            debug!(reference, released, "Deposit holds released");
        }
        Ok(released)
    }

    async fn held_references(&self) -> Result<Vec<String>> {
        let state = self.state.read().await;
        let references: BTreeSet<String> =
            state.holds.iter().map(|h| h.reference.clone()).collect();
        Ok(references.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_types::Address;

    fn depositor() -> Address {
        Address::parse("0x00000000000000000000000000000000000000d1").unwrap()
    }

    fn token() -> Address {
        Address::parse("0x00000000000000000000000000000000000000aa").unwrap()
    }

    fn query() -> DepositQuery {
        DepositQuery::new(depositor(), token(), 1)
    }

    fn amount(s: &str) -> Amount {
        Amount::parse(s).unwrap()
    }

    fn new_deposit(uid: &str, value: &str) -> NewDeposit {
        NewDeposit {
            tx_hash: format!("0x{}", uid),
            transfer_uid: uid.to_string(),
            chain_id: 1,
            depositor: depositor(),
            token: token(),
            amount: amount(value),
        }
    }

    async fn assert_conserved(ledger: &InMemoryDepositLedger, id: DepositId) {
        let deposit = ledger.get(id).await.unwrap();
        let remaining = ledger.remaining(id).await.unwrap();
        let assigned: Amount = ledger
            .assignments(id)
            .await
            .unwrap()
            .iter()
            .map(|a| a.amount)
            .sum();
        assert_eq!(deposit.amount, remaining.checked_add(assigned).unwrap());
        assert_eq!(deposit.assigned_at.is_some(), remaining.is_zero());
    }

    #[tokio::test]
    async fn test_ingest_is_idempotent() {
        let ledger = InMemoryDepositLedger::new();

        let first = ledger.ingest(new_deposit("t1", "700")).await.unwrap();
        let again = ledger.ingest(new_deposit("t1", "999")).await.unwrap();

        assert_eq!(first.id, again.id);
        assert_eq!(again.amount, amount("700"));
        assert_eq!(ledger.len().await, 1);
    }

    #[tokio::test]
    async fn test_fifo_selection() {
        let ledger = InMemoryDepositLedger::new();
        let d1 = ledger.ingest(new_deposit("t1", "500")).await.unwrap();
        let _d2 = ledger.ingest(new_deposit("t2", "500")).await.unwrap();

        let found = ledger
            .find_with_sufficient_remaining(&query(), amount("100"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, d1.id);
    }

    #[tokio::test]
    async fn test_starvation_sequence() {
        let ledger = InMemoryDepositLedger::new();
        let d1 = ledger.ingest(new_deposit("t1", "700")).await.unwrap();

        ledger.assign(d1.id, amount("650"), "vault:1").await.unwrap();

        assert!(ledger
            .find_with_sufficient_remaining(&query(), amount("100"))
            .await
            .unwrap()
            .is_none());
        let next = ledger.find_next_with_any_remaining(&query()).await.unwrap();
        assert_eq!(next.map(|d| d.id), Some(d1.id));

        let err = ledger.assign(d1.id, amount("100"), "vault:1").await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientRemaining { .. }));
        assert_eq!(ledger.remaining(d1.id).await.unwrap(), amount("50"));

        ledger.assign(d1.id, amount("50"), "vault:1").await.unwrap();
        assert!(ledger.remaining(d1.id).await.unwrap().is_zero());
        assert!(ledger.get(d1.id).await.unwrap().assigned_at.is_some());
        assert_conserved(&ledger, d1.id).await;
    }

    #[tokio::test]
    async fn test_total_available() {
        let ledger = InMemoryDepositLedger::new();
        assert!(ledger.total_available(&query()).await.unwrap().is_zero());

        let d1 = ledger.ingest(new_deposit("t1", "300")).await.unwrap();
        ledger.ingest(new_deposit("t2", "200.5")).await.unwrap();
        ledger.assign(d1.id, amount("100"), "vault:1").await.unwrap();

        assert_eq!(
            ledger.total_available(&query()).await.unwrap(),
            amount("400.5")
        );

        let other = DepositQuery::new(depositor(), Address::zero(), 1);
        assert!(ledger.total_available(&other).await.unwrap().is_zero());
    }

    #[tokio::test]
    async fn test_rejects_non_positive_amount() {
        let ledger = InMemoryDepositLedger::new();
        let d1 = ledger.ingest(new_deposit("t1", "10")).await.unwrap();
        let err = ledger.assign(d1.id, Amount::zero(), "x").await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount { .. }));
    }

    #[tokio::test]
    async fn test_unknown_deposit() {
        let ledger = InMemoryDepositLedger::new();
        let err = ledger.remaining(DepositId(42)).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_assigns_never_exceed_remaining() {
        let ledger = InMemoryDepositLedger::new();
        let d1 = ledger.ingest(new_deposit("t1", "1000")).await.unwrap();

        let tasks: Vec<_> = (0..25)
            .map(|i| {
                let ledger = ledger.clone();
                tokio::spawn(async move {
                    ledger
                        .assign(d1.id, amount("100"), &format!("vault:{}", i))
                        .await
                })
            })
            .collect();

        let results = futures::future::join_all(tasks).await;
        let succeeded = results
            .into_iter()
            .filter(|r| matches!(r, Ok(Ok(_))))
            .count();

        assert_eq!(succeeded, 10);
        assert!(ledger.remaining(d1.id).await.unwrap().is_zero());
        assert_conserved(&ledger, d1.id).await;
    }

    #[tokio::test]
    async fn test_holds_block_rematching() {
        let ledger = InMemoryDepositLedger::new();
        let d1 = ledger.ingest(new_deposit("t1", "100")).await.unwrap();

        ledger
            .hold(d1.id, amount("80"), "int-a", "vault:1")
            .await
            .unwrap();

        assert!(ledger
            .find_with_sufficient_remaining(&query(), amount("50"))
            .await
            .unwrap()
            .is_none());
        assert_eq!(ledger.total_available(&query()).await.unwrap(), amount("20"));
        assert!(ledger.hold(d1.id, amount("30"), "int-b", "vault:2").await.is_err());
        assert!(ledger.assign(d1.id, amount("30"), "vault:2").await.is_err());

        // Holds do not touch remaining
        assert_eq!(ledger.remaining(d1.id).await.unwrap(), amount("100"));
    }

    #[tokio::test]
    async fn test_release_frees_value() {
        let ledger = InMemoryDepositLedger::new();
        let d1 = ledger.ingest(new_deposit("t1", "100")).await.unwrap();
        ledger.hold(d1.id, amount("60"), "int-a", "vault:1").await.unwrap();
        ledger.hold(d1.id, amount("40"), "int-a", "vault:1").await.unwrap();

        assert_eq!(ledger.release_holds("int-a").await.unwrap(), 2);
        assert_eq!(ledger.release_holds("int-a").await.unwrap(), 0);
        assert_eq!(ledger.total_available(&query()).await.unwrap(), amount("100"));
    }

    #[tokio::test]
    async fn test_settled_holds_become_assignments() {
        let ledger = InMemoryDepositLedger::new();
        let d1 = ledger.ingest(new_deposit("t1", "100")).await.unwrap();
        let d2 = ledger.ingest(new_deposit("t2", "50")).await.unwrap();
        ledger.hold(d1.id, amount("100"), "int-a", "bundle:1:vault:7").await.unwrap();
        ledger.hold(d2.id, amount("20"), "int-a", "bundle:1:vault:8").await.unwrap();
        ledger.hold(d2.id, amount("5"), "int-b", "bundle:2:vault:8").await.unwrap();

        let events = ledger.settle_holds("int-a").await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].target_reference, "bundle:1:vault:7");

        assert!(ledger.get(d1.id).await.unwrap().is_fully_assigned());
        assert_eq!(ledger.remaining(d2.id).await.unwrap(), amount("30"));
        assert!(ledger.holds("int-a").await.is_empty());
        assert_eq!(ledger.holds("int-b").await.len(), 1);
        assert_eq!(ledger.total_available(&query()).await.unwrap(), amount("25"));
        assert_conserved(&ledger, d1.id).await;
        assert_conserved(&ledger, d2.id).await;
    }

    #[tokio::test]
    async fn test_held_references_are_distinct() {
        let ledger = InMemoryDepositLedger::new();
        let d1 = ledger.ingest(new_deposit("t1", "100")).await.unwrap();
        assert!(ledger.held_references().await.unwrap().is_empty());

        ledger.hold(d1.id, amount("10"), "int-b", "vault:1").await.unwrap();
        ledger.hold(d1.id, amount("10"), "int-a", "vault:1").await.unwrap();
        ledger.hold(d1.id, amount("10"), "int-b", "vault:2").await.unwrap();
        assert_eq!(
            ledger.held_references().await.unwrap(),
            vec!["int-a".to_string(), "int-b".to_string()]
        );

        ledger.settle_holds("int-a").await.unwrap();
        assert_eq!(ledger.held_references().await.unwrap(), vec!["int-b".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_settlement_keeps_holds() {
        let ledger = InMemoryDepositLedger::new();
        let d1 = ledger.ingest(new_deposit("t1", "100")).await.unwrap();
        ledger.hold(d1.id, amount("40"), "int-a", "vault:1").await.unwrap();

        ledger.set_fail_settlement(true);
        let err = ledger.settle_holds("int-a").await.unwrap_err();
        assert!(err.class().is_retryable());
        assert_eq!(ledger.holds("int-a").await.len(), 1);

        ledger.set_fail_settlement(false);
        assert_eq!(ledger.settle_holds("int-a").await.unwrap().len(), 1);
        assert_eq!(ledger.remaining(d1.id).await.unwrap(), amount("60"));
    }
}

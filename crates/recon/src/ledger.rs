use std::collections::HashSet;

use crate::config::IdentityMode;
use crate::model::{BankTransaction, MatchRecord, TransactionKey};

/// Cumulative matching state shared by the passes.
///
/// Owns the ordered match list, the consumed transaction keys and the set of
/// invoice ids referenced by any record. Passes query it and append through
/// [`MatchLedger::record`], which refuses a second record for the same key.
#[derive(Debug)]
pub struct MatchLedger {
    identity: IdentityMode,
    consumed: HashSet<TransactionKey>,
    used_invoices: HashSet<String>,
    records: Vec<MatchRecord>,
}

impl MatchLedger {
    pub fn new(identity: IdentityMode) -> Self {
        Self {
            identity,
            consumed: HashSet::new(),
            used_invoices: HashSet::new(),
            records: Vec::new(),
        }
    }

    pub fn identity(&self) -> IdentityMode {
        self.identity
    }

    pub fn key_for(&self, txn: &BankTransaction) -> TransactionKey {
        TransactionKey::for_transaction(txn, self.identity)
    }

    pub fn is_transaction_consumed(&self, key: &TransactionKey) -> bool {
        self.consumed.contains(key)
    }

    pub fn is_invoice_used(&self, id: &str) -> bool {
        self.used_invoices.contains(id)
    }

    /// Append a record. Returns `false` (and drops it) if its transaction key
    /// was already consumed.
    pub fn record(&mut self, record: MatchRecord) -> bool {
        if !self.consumed.insert(record.transaction_key.clone()) {
            log::debug!(
                "ledger: transaction {} already consumed, dropping {} record",
                record.transaction_key,
                record.kind
            );
            return false;
        }
        for id in &record.invoice_ids {
            self.used_invoices.insert(id.clone());
        }
        self.records.push(record);
        true
    }

    pub fn records(&self) -> &[MatchRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<MatchRecord> {
        self.records
    }
}

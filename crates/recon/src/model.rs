use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Serialize, Serializer};

use crate::config::{IdentityMode, InvoiceExclusion};
use crate::normalize::canonical_name;

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

/// The three input tables the engine consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Invoices,
    Transactions,
    Households,
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invoices => write!(f, "invoices"),
            Self::Transactions => write!(f, "transactions"),
            Self::Households => write!(f, "households"),
        }
    }
}

/// Logical column a pass may depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Date,
    Name,
    Amount,
    Number,
    HouseholdCode,
    PersonSlot,
}

/// A required column that the loader could not find.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnGap {
    pub table: TableKind,
    pub field: Field,
    /// Configured column name (or discovery keywords) that failed to resolve.
    pub column: String,
}

// ---------------------------------------------------------------------------
// Input records
// ---------------------------------------------------------------------------

/// One outgoing invoice. Fields the loader could not parse stay `None`;
/// passes that need them skip the invoice.
#[derive(Debug, Clone, Serialize)]
pub struct Invoice {
    /// Zero-based position in the invoice table.
    pub row: usize,
    /// Invoice number as printed; `#<row>` when the table has no number column.
    pub number: String,
    pub date: Option<NaiveDate>,
    pub client: Option<String>,
    pub amount_cents: Option<i64>,
    /// Till (cash register) parsed out of the invoice number, empty if unknown.
    pub till: String,
}

impl Invoice {
    /// Date, client and amount when all three are present.
    pub fn complete(&self) -> Option<(NaiveDate, &str, i64)> {
        match (self.date, self.client.as_deref(), self.amount_cents) {
            (Some(d), Some(c), Some(a)) if !c.trim().is_empty() => Some((d, c, a)),
            _ => None,
        }
    }
}

/// One incoming bank credit. Only positive credits with a payer are loaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BankTransaction {
    /// Stable per-row identifier: `<sheet>#<row>`.
    pub row_id: String,
    pub date: NaiveDate,
    pub payer: String,
    pub amount_cents: i64,
    pub detail: String,
    pub voucher: String,
    pub concept: String,
    pub sheet: String,
}

/// Household registry entry: a code and its non-empty person slots in scan order.
#[derive(Debug, Clone, Serialize)]
pub struct Household {
    pub code: String,
    pub slots: Vec<String>,
}

/// Pre-loaded, normalized engine input.
#[derive(Debug, Clone, Default)]
pub struct ReconInput {
    pub invoices: Vec<Invoice>,
    pub transactions: Vec<BankTransaction>,
    pub households: Vec<Household>,
    /// Columns the loader could not resolve. Passes depending on them are skipped.
    pub gaps: Vec<ColumnGap>,
}

impl ReconInput {
    pub fn has_gap(&self, table: TableKind, field: Field) -> Option<&ColumnGap> {
        self.gaps.iter().find(|g| g.table == table && g.field == field)
    }
}

// ---------------------------------------------------------------------------
// Family resolution
// ---------------------------------------------------------------------------

/// Outcome of mapping a person name to a household.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FamilyCode {
    Found(String),
    /// The name did not match any registry entry.
    NotFound,
    /// The name was empty or absent.
    NotIdentified,
}

impl FamilyCode {
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Found(code) => Some(code),
            _ => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

impl fmt::Display for FamilyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Found(code) => write!(f, "{code}"),
            Self::NotFound => write!(f, "NOT_FOUND"),
            Self::NotIdentified => write!(f, "NOT_IDENTIFIED"),
        }
    }
}

impl Serialize for FamilyCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ---------------------------------------------------------------------------
// Transaction identity
// ---------------------------------------------------------------------------

/// Key under which a bank transaction is consumed by at most one match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransactionKey {
    /// (date, canonical payer, amount). Distinct rows sharing all three collide.
    Triple {
        date: NaiveDate,
        payer: String,
        amount_cents: i64,
    },
    /// Stable row identifier.
    Row(String),
}

impl TransactionKey {
    pub fn for_transaction(txn: &BankTransaction, mode: IdentityMode) -> Self {
        match mode {
            IdentityMode::Triple => Self::Triple {
                date: txn.date,
                payer: canonical_name(&txn.payer),
                amount_cents: txn.amount_cents,
            },
            IdentityMode::Row => Self::Row(txn.row_id.clone()),
        }
    }
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Triple { date, payer, amount_cents } => {
                write!(f, "{date}|{payer}|{}", format_cents(*amount_cents))
            }
            Self::Row(id) => write!(f, "{id}"),
        }
    }
}

impl Serialize for TransactionKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ---------------------------------------------------------------------------
// Match records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MatchKind {
    /// Pass 1: one invoice, identical date/name/amount.
    Exact,
    /// Pass 2: invoices sharing (date, till, family) summed against one credit.
    MultiInvoice,
    /// Pass 3: one invoice of the payer's family within the date window.
    FamilyPair,
    /// Pass 4: bounded subset of same-family invoices summing to the credit.
    FamilyCombination,
}

impl MatchKind {
    pub const ALL: [MatchKind; 4] = [
        Self::Exact,
        Self::MultiInvoice,
        Self::FamilyPair,
        Self::FamilyCombination,
    ];

    /// Tag written into reports.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Exact => "EXACT",
            Self::MultiInvoice => "MULTI_FACTURAS",
            Self::FamilyPair => "Grupo Familiar",
            Self::FamilyCombination => "MULTI_FACTURAS_FAMILIA_BANCO_PRIMERO",
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Exact => "MATCH_EXACTO",
            Self::MultiInvoice => "MATCH_MULTI_FACTURAS",
            Self::FamilyPair => "MATCH_GRUPO_FAMILIAR",
            Self::FamilyCombination => "MATCH_MULTI_FACTURAS_FAMILIA",
        }
    }

    pub fn coincidence(&self) -> &'static str {
        match self {
            Self::Exact => "100%",
            Self::FamilyPair => "FAMILIA",
            Self::MultiInvoice | Self::FamilyCombination => "AGREGADO",
        }
    }

    /// Short identifier used for pass names and sheet names.
    pub fn pass_name(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::MultiInvoice => "grouped",
            Self::FamilyPair => "family_pair",
            Self::FamilyCombination => "combinatorial",
        }
    }
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for MatchKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// How pass 4 arrived at its answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchProof {
    /// Candidates after presort and truncation.
    pub candidates: usize,
    pub combinations_evaluated: u64,
    /// Size of the accepted subset; 0 when nothing was accepted.
    pub group_size: usize,
    /// The per-transaction combination budget ran out.
    pub budget_hit: bool,
    /// Another subset of the same size also fits the amount.
    pub ambiguous: bool,
    /// Invoice ids of up to a few competing subsets (only with ambiguity detection).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<Vec<String>>,
}

/// One accepted linkage between invoice(s) and a bank transaction.
/// Created once by one pass, never mutated afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct MatchRecord {
    pub kind: MatchKind,
    pub status: &'static str,
    pub coincidence: &'static str,
    pub invoice_ids: Vec<String>,
    pub transaction_key: TransactionKey,
    pub transaction: BankTransaction,
    pub family: FamilyCode,
    pub invoice_total_cents: i64,
    pub transaction_amount_cents: i64,
    pub invoice_count: usize,
    pub tills: Vec<String>,
    pub invoice_dates: Vec<NaiveDate>,
    pub clients: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof: Option<SearchProof>,
}

impl MatchRecord {
    /// Build a record from the matched invoices. Tills and dates are
    /// deduplicated in first-seen order, client names are uppercased and sorted.
    pub fn new(
        kind: MatchKind,
        invoices: &[&Invoice],
        txn: &BankTransaction,
        key: TransactionKey,
        family: FamilyCode,
    ) -> Self {
        let mut tills: Vec<String> = Vec::new();
        let mut invoice_dates: Vec<NaiveDate> = Vec::new();
        let mut clients: Vec<String> = Vec::new();
        for inv in invoices {
            if !tills.contains(&inv.till) {
                tills.push(inv.till.clone());
            }
            if let Some(d) = inv.date {
                if !invoice_dates.contains(&d) {
                    invoice_dates.push(d);
                }
            }
            if let Some(c) = inv.client.as_deref() {
                let c = c.trim().to_uppercase();
                if !clients.contains(&c) {
                    clients.push(c);
                }
            }
        }
        clients.sort();

        Self {
            kind,
            status: kind.status(),
            coincidence: kind.coincidence(),
            invoice_ids: invoices.iter().map(|i| i.number.clone()).collect(),
            transaction_key: key,
            transaction: txn.clone(),
            family,
            invoice_total_cents: invoices
                .iter()
                .filter_map(|i| i.amount_cents)
                .fold(0, i64::saturating_add),
            transaction_amount_cents: txn.amount_cents,
            invoice_count: invoices.len(),
            tills,
            invoice_dates,
            clients,
            proof: None,
        }
    }

    pub fn with_proof(mut self, proof: SearchProof) -> Self {
        self.proof = Some(proof);
        self
    }

    /// Comma-joined invoice ids, as written in reports.
    pub fn invoice_ids_joined(&self) -> String {
        self.invoice_ids.join(",")
    }

    /// Comma-joined till numbers.
    pub fn tills_joined(&self) -> String {
        self.tills.join(",")
    }
}

// ---------------------------------------------------------------------------
// Pass statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum PassStatus {
    Completed,
    Disabled,
    /// A required column is missing; the pass did not run.
    Skipped(String),
    /// The pass deadline elapsed; matches found until then are kept.
    Interrupted(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct PassStats {
    pub kind: MatchKind,
    pub pass: &'static str,
    pub status: PassStatus,
    pub matches: usize,
    pub invoices_linked: usize,
    /// Transactions whose subset search hit the combination budget (pass 4).
    pub budget_exhausted: usize,
}

impl PassStats {
    pub fn new(kind: MatchKind, status: PassStatus) -> Self {
        Self {
            kind,
            pass: kind.pass_name(),
            status,
            matches: 0,
            invoices_linked: 0,
            budget_exhausted: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Summary + Output
// ---------------------------------------------------------------------------

/// Count of matches and matched invoice total for one family or till.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupTotal {
    pub key: String,
    pub matches: usize,
    pub matched_cents: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconSummary {
    pub invoices_total: usize,
    pub invoices_matched: usize,
    pub invoices_unmatched: usize,
    pub invoice_match_rate: f64,
    pub transactions_total: usize,
    pub transactions_matched: usize,
    pub transactions_unmatched: usize,
    pub transaction_match_rate: f64,
    pub matched_invoice_cents: i64,
    pub matches_by_kind: BTreeMap<String, usize>,
    pub top_families: Vec<GroupTotal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconMeta {
    pub config_name: String,
    pub engine_version: String,
    pub run_at: String,
    pub identity: IdentityMode,
    pub invoice_exclusion: InvoiceExclusion,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconResult {
    pub meta: ReconMeta,
    pub summary: ReconSummary,
    pub passes: Vec<PassStats>,
    pub matches: Vec<MatchRecord>,
    pub by_family: Vec<GroupTotal>,
    pub by_till: Vec<GroupTotal>,
    pub unmatched_invoices: Vec<Invoice>,
    pub unmatched_transactions: Vec<BankTransaction>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Render minor units as a decimal string with two places (`-12.05`).
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txn(payer: &str, cents: i64) -> BankTransaction {
        BankTransaction {
            row_id: "01.02#3".into(),
            date: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            payer: payer.into(),
            amount_cents: cents,
            detail: String::new(),
            voucher: String::new(),
            concept: String::new(),
            sheet: "01.02".into(),
        }
    }

    #[test]
    fn triple_key_ignores_case_and_padding() {
        let a = TransactionKey::for_transaction(&txn(" juan perez ", 70000), IdentityMode::Triple);
        let b = TransactionKey::for_transaction(&txn("JUAN PEREZ", 70000), IdentityMode::Triple);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "2024-01-05|JUAN PEREZ|700.00");
    }

    #[test]
    fn triple_key_payer_is_the_exact_pass_name() {
        let t = txn("  María Pérez ", 70000);
        let TransactionKey::Triple { payer, .. } = TransactionKey::for_transaction(&t, IdentityMode::Triple) else {
            panic!("expected a triple key");
        };
        assert_eq!(payer, canonical_name(&t.payer));
        assert_eq!(payer, "MARÍA PÉREZ");
    }

    #[test]
    fn row_key_uses_row_id() {
        let k = TransactionKey::for_transaction(&txn("x", 1), IdentityMode::Row);
        assert_eq!(k, TransactionKey::Row("01.02#3".into()));
    }

    #[test]
    fn family_code_display() {
        assert_eq!(FamilyCode::Found("F1".into()).to_string(), "F1");
        assert_eq!(FamilyCode::NotFound.to_string(), "NOT_FOUND");
        assert_eq!(FamilyCode::NotIdentified.to_string(), "NOT_IDENTIFIED");
        assert_eq!(serde_json::to_string(&FamilyCode::NotFound).unwrap(), "\"NOT_FOUND\"");
    }

    #[test]
    fn format_cents_handles_sign() {
        assert_eq!(format_cents(70000), "700.00");
        assert_eq!(format_cents(-1205), "-12.05");
        assert_eq!(format_cents(7), "0.07");
    }

    #[test]
    fn record_collects_tills_and_clients() {
        let inv = |n: &str, till: &str, client: &str, cents: i64| Invoice {
            row: 0,
            number: n.into(),
            date: NaiveDate::from_ymd_opt(2024, 1, 5),
            client: Some(client.into()),
            amount_cents: Some(cents),
            till: till.into(),
        };
        let a = inv("001-010-1", "010", "perez juan", 30000);
        let b = inv("001-010-2", "010", "Ana Perez", 40000);
        let t = txn("JUAN PEREZ", 70000);
        let key = TransactionKey::for_transaction(&t, IdentityMode::Triple);
        let rec = MatchRecord::new(MatchKind::MultiInvoice, &[&a, &b], &t, key, FamilyCode::Found("F1".into()));
        assert_eq!(rec.invoice_ids_joined(), "001-010-1,001-010-2");
        assert_eq!(rec.invoice_total_cents, 70000);
        assert_eq!(rec.invoice_count, 2);
        assert_eq!(rec.tills, vec!["010"]);
        assert_eq!(rec.clients, vec!["ANA PEREZ", "PEREZ JUAN"]);
        assert_eq!(rec.status, "MATCH_MULTI_FACTURAS");
    }
}

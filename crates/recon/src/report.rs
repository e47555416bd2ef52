use std::collections::{BTreeMap, HashMap, HashSet};

use crate::config::IdentityMode;
use crate::model::{
    BankTransaction, GroupTotal, Invoice, MatchKind, MatchRecord, ReconInput, ReconSummary, TransactionKey,
};

const TOP_FAMILIES: usize = 10;

/// Invoices referenced by no match record, in table order.
pub fn unmatched_invoices(input: &ReconInput, matches: &[MatchRecord]) -> Vec<Invoice> {
    let used: HashSet<&str> = matches
        .iter()
        .flat_map(|m| m.invoice_ids.iter().map(String::as_str))
        .collect();
    input
        .invoices
        .iter()
        .filter(|inv| !used.contains(inv.number.as_str()))
        .cloned()
        .collect()
}

/// Transactions whose identity key never entered the consumed set.
pub fn unmatched_transactions(
    input: &ReconInput,
    matches: &[MatchRecord],
    identity: IdentityMode,
) -> Vec<BankTransaction> {
    let consumed: HashSet<&TransactionKey> = matches.iter().map(|m| &m.transaction_key).collect();
    input
        .transactions
        .iter()
        .filter(|t| !consumed.contains(&TransactionKey::for_transaction(t, identity)))
        .cloned()
        .collect()
}

fn totals_by<F>(matches: &[MatchRecord], key: F) -> Vec<GroupTotal>
where
    F: Fn(&MatchRecord) -> String,
{
    let mut acc: BTreeMap<String, (usize, i64)> = BTreeMap::new();
    for m in matches {
        let entry = acc.entry(key(m)).or_default();
        entry.0 += 1;
        entry.1 = entry.1.saturating_add(m.invoice_total_cents);
    }
    let mut out: Vec<GroupTotal> = acc
        .into_iter()
        .map(|(key, (matches, matched_cents))| GroupTotal {
            key,
            matches,
            matched_cents,
        })
        .collect();
    // Stable: equal counts stay in key order.
    out.sort_by(|a, b| b.matches.cmp(&a.matches));
    out
}

/// Match count and matched invoice total per household code.
pub fn totals_by_family(matches: &[MatchRecord]) -> Vec<GroupTotal> {
    totals_by(matches, |m| m.family.to_string())
}

/// Match count and matched invoice total per till (comma-joined when a
/// record spans several).
pub fn totals_by_till(matches: &[MatchRecord]) -> Vec<GroupTotal> {
    totals_by(matches, |m| m.tills_joined())
}

fn rate(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

pub fn compute_summary(
    input: &ReconInput,
    matches: &[MatchRecord],
    unmatched_invoices: usize,
    unmatched_transactions: usize,
    by_family: &[GroupTotal],
) -> ReconSummary {
    let invoices_total = input.invoices.len();
    let transactions_total = input.transactions.len();
    let invoices_matched = invoices_total - unmatched_invoices;
    let transactions_matched = transactions_total - unmatched_transactions;

    let mut by_kind: HashMap<MatchKind, usize> = HashMap::new();
    for m in matches {
        *by_kind.entry(m.kind).or_default() += 1;
    }
    let matches_by_kind: BTreeMap<String, usize> = MatchKind::ALL
        .iter()
        .map(|k| (k.label().to_string(), by_kind.get(k).copied().unwrap_or(0)))
        .collect();

    ReconSummary {
        invoices_total,
        invoices_matched,
        invoices_unmatched: unmatched_invoices,
        invoice_match_rate: rate(invoices_matched, invoices_total),
        transactions_total,
        transactions_matched,
        transactions_unmatched: unmatched_transactions,
        transaction_match_rate: rate(transactions_matched, transactions_total),
        matched_invoice_cents: matches
            .iter()
            .map(|m| m.invoice_total_cents)
            .fold(0, i64::saturating_add),
        matches_by_kind,
        top_families: by_family.iter().take(TOP_FAMILIES).cloned().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FamilyCode;
    use chrono::NaiveDate;

    fn inv(number: &str, till: &str, cents: i64) -> Invoice {
        Invoice {
            row: 0,
            number: number.into(),
            date: NaiveDate::from_ymd_opt(2024, 1, 5),
            client: Some("ANA".into()),
            amount_cents: Some(cents),
            till: till.into(),
        }
    }

    fn txn(row: &str, payer: &str, cents: i64) -> BankTransaction {
        BankTransaction {
            row_id: row.into(),
            date: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            payer: payer.into(),
            amount_cents: cents,
            detail: String::new(),
            voucher: String::new(),
            concept: String::new(),
            sheet: "S".into(),
        }
    }

    fn record(kind: MatchKind, invs: &[&Invoice], t: &BankTransaction, fam: &str) -> MatchRecord {
        let key = TransactionKey::for_transaction(t, IdentityMode::Triple);
        MatchRecord::new(kind, invs, t, key, FamilyCode::Found(fam.into()))
    }

    #[test]
    fn residuals_and_totals() {
        let (a, b, c, d) = (inv("A", "10", 100), inv("B", "10", 200), inv("C", "11", 300), inv("D", "", 5));
        let (t1, t2, t3) = (txn("S#2", "ANA", 300), txn("S#3", "LUIS", 300), txn("S#4", "ZOE", 9));
        let input = ReconInput {
            invoices: vec![a.clone(), b.clone(), c.clone(), d],
            transactions: vec![t1.clone(), t2.clone(), t3],
            households: vec![],
            gaps: vec![],
        };
        let matches = vec![
            record(MatchKind::MultiInvoice, &[&a, &b], &t1, "F1"),
            record(MatchKind::Exact, &[&c], &t2, "F2"),
        ];

        let inv_left = unmatched_invoices(&input, &matches);
        assert_eq!(inv_left.len(), 1);
        assert_eq!(inv_left[0].number, "D");
        let txn_left = unmatched_transactions(&input, &matches, IdentityMode::Triple);
        assert_eq!(txn_left.len(), 1);
        assert_eq!(txn_left[0].row_id, "S#4");

        let fam = totals_by_family(&matches);
        assert_eq!(fam.len(), 2);
        assert_eq!(fam[0].key, "F1");
        assert_eq!(fam[0].matched_cents, 300);
        let till = totals_by_till(&matches);
        assert_eq!(till.iter().map(|t| t.key.as_str()).collect::<Vec<_>>(), vec!["10", "11"]);

        let summary = compute_summary(&input, &matches, inv_left.len(), txn_left.len(), &fam);
        assert_eq!(summary.invoices_matched, 3);
        assert_eq!(summary.invoice_match_rate, 75.0);
        assert_eq!(summary.transactions_matched, 2);
        assert_eq!(summary.matched_invoice_cents, 600);
        assert_eq!(summary.matches_by_kind["MULTI_FACTURAS"], 1);
        assert_eq!(summary.matches_by_kind["Grupo Familiar"], 0);
        assert_eq!(summary.top_families.len(), 2);
    }

    #[test]
    fn empty_rates_are_zero() {
        let summary = compute_summary(&ReconInput::default(), &[], 0, 0, &[]);
        assert_eq!(summary.invoice_match_rate, 0.0);
        assert_eq!(summary.transaction_match_rate, 0.0);
    }
}

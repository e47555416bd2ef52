use std::collections::HashMap;

use chrono::NaiveDate;

use crate::config::{InvoiceExclusion, ReconConfig};
use crate::family::FamilyResolver;
use crate::ledger::MatchLedger;
use crate::model::{FamilyCode, MatchKind, MatchRecord, PassStats, PassStatus, ReconInput};
use crate::normalize::canonical_name;

/// Pass 1: one invoice to one credit with identical date, name and amount.
///
/// Each complete invoice takes the first coincident transaction (table
/// order) whose key is still free. Under triple identity every coincident
/// transaction shares one key, so this records each coincidence once.
pub fn exact_pass(input: &ReconInput, resolver: &FamilyResolver, ledger: &mut MatchLedger) -> PassStats {
    let mut stats = PassStats::new(MatchKind::Exact, PassStatus::Completed);

    let mut by_triple: HashMap<(NaiveDate, String, i64), Vec<usize>> = HashMap::new();
    for (i, txn) in input.transactions.iter().enumerate() {
        by_triple
            .entry((txn.date, canonical_name(&txn.payer), txn.amount_cents))
            .or_default()
            .push(i);
    }

    for inv in &input.invoices {
        let Some((date, client, amount)) = inv.complete() else {
            continue;
        };
        let Some(hits) = by_triple.get(&(date, canonical_name(client), amount)) else {
            continue;
        };
        let free = hits.iter().map(|&i| &input.transactions[i]).find(|t| {
            let key = ledger.key_for(t);
            !ledger.is_transaction_consumed(&key)
        });
        let Some(txn) = free else {
            continue;
        };

        let key = ledger.key_for(txn);
        let family = resolver.resolve(Some(client));
        let record = MatchRecord::new(MatchKind::Exact, &[inv], txn, key, family);
        if ledger.record(record) {
            log::debug!("exact: invoice {} <- {}", inv.number, txn.row_id);
            stats.matches += 1;
            stats.invoices_linked += 1;
        }
    }

    stats
}

/// Strict amount comparison used by the family-pair pass.
fn within_strict(delta: i64, tolerance: i64) -> bool {
    if tolerance == 0 {
        delta == 0
    } else {
        delta.checked_abs().is_some_and(|d| d < tolerance)
    }
}

/// Pass 3: one free credit to one invoice of the payer's household.
///
/// Households are resolved with the substring heuristic on both sides. For
/// each transaction the first invoice (table order) within the amount
/// tolerance and date window wins.
pub fn family_pair_pass(
    input: &ReconInput,
    resolver: &FamilyResolver,
    ledger: &mut MatchLedger,
    config: &ReconConfig,
) -> PassStats {
    let mut stats = PassStats::new(MatchKind::FamilyPair, PassStatus::Completed);
    let tolerance = config.tolerance.amount_cents;
    let window = i64::from(config.tolerance.date_window_days);
    let unified = config.ledger.invoice_exclusion == InvoiceExclusion::Unified;

    let invoice_family: Vec<Option<&str>> = input
        .invoices
        .iter()
        .map(|inv| inv.client.as_deref().and_then(|c| resolver.resolve_by_substring(c)))
        .collect();

    for txn in &input.transactions {
        let key = ledger.key_for(txn);
        if ledger.is_transaction_consumed(&key) {
            continue;
        }
        let Some(payer_family) = resolver.resolve_by_substring(&txn.payer) else {
            continue;
        };

        let hit = input.invoices.iter().zip(&invoice_family).find(|(inv, fam)| {
            if **fam != Some(payer_family) {
                return false;
            }
            if unified && ledger.is_invoice_used(&inv.number) {
                return false;
            }
            let Some((date, _, amount)) = inv.complete() else {
                return false;
            };
            txn.amount_cents
                .checked_sub(amount)
                .is_some_and(|delta| within_strict(delta, tolerance))
                && (txn.date - date).num_days().abs() <= window
        });

        if let Some((inv, _)) = hit {
            let family = FamilyCode::Found(payer_family.to_string());
            let record = MatchRecord::new(MatchKind::FamilyPair, &[inv], txn, key, family);
            if ledger.record(record) {
                log::debug!("family pair: invoice {} <- {} ({payer_family})", inv.number, txn.row_id);
                stats.matches += 1;
                stats.invoices_linked += 1;
            }
        }
    }

    stats
}

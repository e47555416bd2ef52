use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;

use crate::family::FamilyResolver;
use crate::ledger::MatchLedger;
use crate::model::{FamilyCode, Invoice, MatchKind, MatchRecord, PassStats, PassStatus, ReconInput};

/// Invoices of one household issued on the same day at the same till.
#[derive(Debug)]
pub struct InvoiceGroup<'a> {
    pub date: NaiveDate,
    pub till: String,
    pub family: String,
    pub invoices: Vec<&'a Invoice>,
    pub total_cents: i64,
}

/// Group free, complete, resolvable invoices by (date, till, family). Only
/// groups of two or more are returned, ordered by key; members keep table
/// order.
pub fn group_invoices<'a>(
    input: &'a ReconInput,
    resolver: &FamilyResolver,
    ledger: &MatchLedger,
) -> Vec<InvoiceGroup<'a>> {
    let mut groups: BTreeMap<(NaiveDate, String, String), Vec<&'a Invoice>> = BTreeMap::new();
    for inv in &input.invoices {
        if ledger.is_invoice_used(&inv.number) {
            continue;
        }
        let Some((date, client, _)) = inv.complete() else {
            continue;
        };
        let FamilyCode::Found(code) = resolver.resolve(Some(client)) else {
            continue;
        };
        groups
            .entry((date, inv.till.clone(), code))
            .or_default()
            .push(inv);
    }

    groups
        .into_iter()
        .filter(|(_, members)| members.len() >= 2)
        .filter_map(|((date, till, family), invoices)| {
            let Some(total_cents) = checked_total(&invoices) else {
                log::warn!("grouped: {family} {date} till '{till}' total overflows, group skipped");
                return None;
            };
            Some(InvoiceGroup {
                date,
                till,
                family,
                invoices,
                total_cents,
            })
        })
        .collect()
}

fn checked_total(invoices: &[&Invoice]) -> Option<i64> {
    invoices
        .iter()
        .filter_map(|i| i.amount_cents)
        .try_fold(0i64, i64::checked_add)
}

/// Pass 2: a group's summed amount against one credit of the same day from
/// a payer of the same household. The first free qualifying credit in table
/// order is taken.
pub fn grouped_pass(input: &ReconInput, resolver: &FamilyResolver, ledger: &mut MatchLedger) -> PassStats {
    let mut stats = PassStats::new(MatchKind::MultiInvoice, PassStatus::Completed);
    let groups = group_invoices(input, resolver, ledger);
    log::debug!("grouped: {} candidate groups", groups.len());

    let mut by_date_amount: HashMap<(NaiveDate, i64), Vec<usize>> = HashMap::new();
    for (i, txn) in input.transactions.iter().enumerate() {
        by_date_amount.entry((txn.date, txn.amount_cents)).or_default().push(i);
    }
    let mut payer_family: HashMap<usize, FamilyCode> = HashMap::new();

    for group in &groups {
        let Some(hits) = by_date_amount.get(&(group.date, group.total_cents)) else {
            continue;
        };
        let mut chosen = None;
        for &i in hits {
            let txn = &input.transactions[i];
            let key = ledger.key_for(txn);
            if ledger.is_transaction_consumed(&key) {
                continue;
            }
            let family = payer_family
                .entry(i)
                .or_insert_with(|| resolver.resolve(Some(&txn.payer)));
            if family.code() == Some(group.family.as_str()) {
                chosen = Some((txn, key));
                break;
            }
        }

        if let Some((txn, key)) = chosen {
            let record = MatchRecord::new(
                MatchKind::MultiInvoice,
                &group.invoices,
                txn,
                key,
                FamilyCode::Found(group.family.clone()),
            );
            if ledger.record(record) {
                log::debug!(
                    "grouped: {} invoices of {} on {} till '{}' <- {}",
                    group.invoices.len(),
                    group.family,
                    group.date,
                    group.till,
                    txn.row_id
                );
                stats.matches += 1;
                stats.invoices_linked += group.invoices.len();
            }
        }
    }

    stats
}

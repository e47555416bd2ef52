use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::config::{CombinatorialConfig, InvoiceExclusion, ReconConfig};
use crate::family::FamilyResolver;
use crate::ledger::MatchLedger;
use crate::model::{
    BankTransaction, FamilyCode, Invoice, MatchKind, MatchRecord, PassStats, PassStatus, ReconInput,
    SearchProof,
};
use crate::normalize::{canonical_name, surname};

const MAX_ALTERNATIVES: usize = 3;
/// How often (in evaluated combinations) the pass deadline is polled.
const DEADLINE_POLL: u64 = 4096;

// ---------------------------------------------------------------------------
// Lexicographic k-combinations
// ---------------------------------------------------------------------------

/// k-combinations of `0..n` in lexicographic index order, produced in place.
#[derive(Debug, Clone)]
pub struct Combinations {
    n: usize,
    idx: Vec<usize>,
    started: bool,
    done: bool,
}

impl Combinations {
    pub fn new(n: usize, k: usize) -> Self {
        Self {
            n,
            idx: (0..k).collect(),
            started: false,
            done: k > n,
        }
    }

    /// Advance to the next combination. Returns `None` once exhausted.
    pub fn next_combination(&mut self) -> Option<&[usize]> {
        if self.done {
            return None;
        }
        if !self.started {
            self.started = true;
            return Some(&self.idx);
        }
        let k = self.idx.len();
        // Rightmost position that can still move right.
        let mut i = k;
        while i > 0 {
            i -= 1;
            if self.idx[i] < self.n - k + i {
                self.idx[i] += 1;
                for j in i + 1..k {
                    self.idx[j] = self.idx[j - 1] + 1;
                }
                return Some(&self.idx);
            }
        }
        self.done = true;
        None
    }
}

// ---------------------------------------------------------------------------
// Bounded first-fit search
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubsetSearch {
    /// Indices (into the candidate slice) of the accepted combination.
    pub accepted: Option<Vec<usize>>,
    pub evaluated: u64,
    pub budget_hit: bool,
    /// The pass deadline elapsed during the search.
    pub interrupted: bool,
    /// Other same-size combinations that also fit (ambiguity detection only).
    pub alternatives: Vec<Vec<usize>>,
    pub ambiguous: bool,
}

/// Try group sizes `2..=min(max_group_size, n)` in order and, within a size,
/// combinations in lexicographic order; accept the first whose sum is within
/// `tolerance` of `target`.
///
/// With `detect_ambiguity` the remaining combinations of the accepted size
/// are scanned for competitors; the accepted one does not change.
pub fn first_fitting_subset(
    amounts: &[i64],
    target: i64,
    tolerance: i64,
    config: &CombinatorialConfig,
    deadline: Option<Instant>,
) -> SubsetSearch {
    let mut out = SubsetSearch::default();
    let max_k = config.max_group_size.min(amounts.len());

    let evaluate = |combo: &[usize], out: &mut SubsetSearch| -> Option<bool> {
        if out.evaluated >= config.max_combinations {
            out.budget_hit = true;
            return None;
        }
        out.evaluated += 1;
        if out.evaluated % DEADLINE_POLL == 0 && deadline.is_some_and(|d| Instant::now() >= d) {
            out.interrupted = true;
            return None;
        }
        // An overflowing sum never fits.
        let fits = combo
            .iter()
            .try_fold(0i64, |acc, &i| acc.checked_add(amounts[i]))
            .and_then(|sum| sum.checked_sub(target))
            .is_some_and(|delta| delta.checked_abs().is_some_and(|d| d <= tolerance));
        Some(fits)
    };

    for k in 2..=max_k {
        let mut combos = Combinations::new(amounts.len(), k);
        while let Some(combo) = combos.next_combination() {
            match evaluate(combo, &mut out) {
                None => return out,
                Some(false) => {}
                Some(true) if out.accepted.is_none() => {
                    out.accepted = Some(combo.to_vec());
                    if !config.detect_ambiguity {
                        return out;
                    }
                }
                Some(true) => {
                    out.ambiguous = true;
                    if out.alternatives.len() < MAX_ALTERNATIVES {
                        out.alternatives.push(combo.to_vec());
                    }
                }
            }
        }
        if out.accepted.is_some() {
            break;
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Candidate pool
// ---------------------------------------------------------------------------

/// Order candidates nearest in date first, then larger amount, then earlier
/// date; ties keep table order.
fn presort(pool: &mut [&Invoice], txn: &BankTransaction) {
    let dist = |inv: &Invoice| inv.date.map(|d| (d - txn.date).num_days().abs()).unwrap_or(i64::MAX);
    pool.sort_by(|a, b| {
        dist(*a)
            .cmp(&dist(*b))
            .then_with(|| b.amount_cents.cmp(&a.amount_cents))
            .then_with(|| a.date.cmp(&b.date))
    });
}

/// Which invoices a transaction may draw from.
enum PoolRule<'a> {
    Family(&'a str),
    /// Payer's last word appears in the client name.
    Surname(String),
    /// Client name equals the payer name.
    FullName(String),
}

impl PoolRule<'_> {
    fn for_payer<'a>(payer: &str, family: &'a FamilyCode) -> PoolRule<'a> {
        match family.code() {
            Some(code) => PoolRule::Family(code),
            None => match surname(payer) {
                Some(last) => PoolRule::Surname(last),
                None => PoolRule::FullName(canonical_name(payer)),
            },
        }
    }

    fn admits(&self, client: &str, client_family: &FamilyCode) -> bool {
        match self {
            Self::Family(code) => client_family.code() == Some(*code),
            Self::Surname(last) => client.to_uppercase().contains(last.as_str()),
            Self::FullName(name) => canonical_name(client) == *name,
        }
    }
}

// ---------------------------------------------------------------------------
// Pass 4
// ---------------------------------------------------------------------------

/// Pass 4: one free credit against a bounded subset of its household's free
/// invoices whose amounts add up to the credit.
pub fn combinatorial_pass(
    input: &ReconInput,
    resolver: &FamilyResolver,
    ledger: &mut MatchLedger,
    config: &ReconConfig,
) -> PassStats {
    let mut stats = PassStats::new(MatchKind::FamilyCombination, PassStatus::Completed);
    let comb = &config.combinatorial;
    let tolerance = config.tolerance.amount_cents;
    let unified = config.ledger.invoice_exclusion == InvoiceExclusion::Unified;
    let deadline = comb
        .deadline_ms
        .map(|ms| Instant::now() + Duration::from_millis(ms));

    let client_family: Vec<FamilyCode> = input
        .invoices
        .iter()
        .map(|inv| resolver.resolve(inv.client.as_deref()))
        .collect();
    let mut used = vec![false; input.invoices.len()];

    for (t, txn) in input.transactions.iter().enumerate() {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            let msg = format!(
                "deadline of {} ms reached after {t} of {} transactions",
                comb.deadline_ms.unwrap_or_default(),
                input.transactions.len()
            );
            log::warn!("combinatorial: {msg}");
            stats.status = PassStatus::Interrupted(msg);
            break;
        }

        let key = ledger.key_for(txn);
        if ledger.is_transaction_consumed(&key) {
            continue;
        }

        let family = resolver.resolve(Some(&txn.payer));
        let rule = PoolRule::for_payer(&txn.payer, &family);

        let mut pool: Vec<&Invoice> = input
            .invoices
            .iter()
            .enumerate()
            .filter(|(i, inv)| {
                if used[*i] || (unified && ledger.is_invoice_used(&inv.number)) {
                    return false;
                }
                match inv.complete() {
                    Some((_, client, _)) => rule.admits(client, &client_family[*i]),
                    None => false,
                }
            })
            .map(|(_, inv)| inv)
            .collect();
        if pool.len() < 2 {
            continue;
        }

        presort(&mut pool, txn);
        pool.truncate(comb.max_candidates);
        let ordered = pool;

        let amounts: Vec<i64> = ordered.iter().filter_map(|inv| inv.amount_cents).collect();
        let search = first_fitting_subset(&amounts, txn.amount_cents, tolerance, comb, deadline);

        if search.budget_hit {
            stats.budget_exhausted += 1;
            log::warn!(
                "combinatorial: {} hit the budget of {} combinations over {} candidates",
                txn.row_id,
                comb.max_combinations,
                ordered.len()
            );
        }

        if let Some(accepted) = &search.accepted {
            let members: Vec<&Invoice> = accepted.iter().map(|&i| ordered[i]).collect();
            let ids = |combo: &Vec<usize>| -> Vec<String> {
                combo.iter().map(|&i| ordered[i].number.clone()).collect()
            };
            let proof = SearchProof {
                candidates: ordered.len(),
                combinations_evaluated: search.evaluated,
                group_size: members.len(),
                budget_hit: search.budget_hit,
                ambiguous: search.ambiguous,
                alternatives: search.alternatives.iter().map(ids).collect(),
            };
            if search.ambiguous {
                log::info!(
                    "combinatorial: {} has {} competing subsets of size {}",
                    txn.row_id,
                    search.alternatives.len(),
                    members.len()
                );
            }

            let record = MatchRecord::new(MatchKind::FamilyCombination, &members, txn, key, family)
                .with_proof(proof);
            if ledger.record(record) {
                // Invoice numbers are the invoice identity: duplicates share the flag.
                let numbers: HashSet<&str> = members.iter().map(|m| m.number.as_str()).collect();
                for (flag, inv) in used.iter_mut().zip(&input.invoices) {
                    if numbers.contains(inv.number.as_str()) {
                        *flag = true;
                    }
                }
                log::debug!(
                    "combinatorial: {} invoices <- {} after {} combinations",
                    members.len(),
                    txn.row_id,
                    search.evaluated
                );
                stats.matches += 1;
                stats.invoices_linked += members.len();
            }
        }

        if search.interrupted {
            let msg = format!(
                "deadline of {} ms reached while searching {}",
                comb.deadline_ms.unwrap_or_default(),
                txn.row_id
            );
            log::warn!("combinatorial: {msg}");
            stats.status = PassStatus::Interrupted(msg);
            break;
        }
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdentityMode;
    use crate::model::Household;
    use chrono::NaiveDate;

    fn all(n: usize, k: usize) -> Vec<Vec<usize>> {
        let mut c = Combinations::new(n, k);
        let mut out = Vec::new();
        while let Some(combo) = c.next_combination() {
            out.push(combo.to_vec());
        }
        out
    }

    #[test]
    fn combinations_are_lexicographic() {
        assert_eq!(
            all(4, 2),
            vec![vec![0, 1], vec![0, 2], vec![0, 3], vec![1, 2], vec![1, 3], vec![2, 3]]
        );
        assert_eq!(all(3, 3), vec![vec![0, 1, 2]]);
        assert!(all(2, 3).is_empty());
        assert_eq!(all(15, 8).len(), 6435);
    }

    #[test]
    fn first_fit_prefers_smaller_group_then_enumeration_order() {
        let cfg = CombinatorialConfig::default();
        // 300+700 (size 2) wins over 300+400+300 (size 3).
        let s = first_fitting_subset(&[30000, 40000, 30000, 70000], 100000, 1, &cfg, None);
        assert_eq!(s.accepted, Some(vec![0, 3]));
        // Among size-2 fits the lexicographically first wins.
        let s = first_fitting_subset(&[500, 500, 500], 1000, 0, &cfg, None);
        assert_eq!(s.accepted, Some(vec![0, 1]));
        assert!(!s.ambiguous);
    }

    #[test]
    fn ambiguity_detection_keeps_choice() {
        let cfg = CombinatorialConfig {
            detect_ambiguity: true,
            ..Default::default()
        };
        let s = first_fitting_subset(&[500, 500, 500], 1000, 0, &cfg, None);
        assert_eq!(s.accepted, Some(vec![0, 1]));
        assert!(s.ambiguous);
        assert_eq!(s.alternatives, vec![vec![0, 2], vec![1, 2]]);
    }

    #[test]
    fn budget_stops_search() {
        let cfg = CombinatorialConfig {
            max_combinations: 5,
            ..Default::default()
        };
        let s = first_fitting_subset(&[1, 2, 4, 8, 16], 31, 0, &cfg, None);
        assert!(s.budget_hit);
        assert_eq!(s.evaluated, 5);
        assert!(s.accepted.is_none());
    }

    #[test]
    fn overflowing_sums_never_fit() {
        let cfg = CombinatorialConfig::default();
        // i64::MAX + 1 wraps to i64::MIN, which is within 1 of i64::MIN.
        let s = first_fitting_subset(&[i64::MAX, 1, 5], i64::MIN, 1, &cfg, None);
        assert!(s.accepted.is_none());
        assert_eq!(s.evaluated, 4);
        let s = first_fitting_subset(&[i64::MAX, 7, 3, 4], 7, 0, &cfg, None);
        assert_eq!(s.accepted, Some(vec![2, 3]));
    }

    #[test]
    fn group_size_cap() {
        let cfg = CombinatorialConfig {
            max_group_size: 2,
            ..Default::default()
        };
        let s = first_fitting_subset(&[100, 100, 100], 300, 0, &cfg, None);
        assert!(s.accepted.is_none());
        assert_eq!(s.evaluated, 3);
    }

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 2, day).unwrap()
    }

    fn inv(number: &str, day: u32, client: &str, cents: i64) -> Invoice {
        Invoice {
            row: 0,
            number: number.into(),
            date: Some(d(day)),
            client: Some(client.into()),
            amount_cents: Some(cents),
            till: String::new(),
        }
    }

    fn txn(row: &str, day: u32, payer: &str, cents: i64) -> BankTransaction {
        BankTransaction {
            row_id: row.into(),
            date: d(day),
            payer: payer.into(),
            amount_cents: cents,
            detail: String::new(),
            voucher: String::new(),
            concept: String::new(),
            sheet: "S".into(),
        }
    }

    #[test]
    fn presort_orders_by_distance_then_amount() {
        let a = inv("a", 1, "X", 100);
        let b = inv("b", 10, "X", 500);
        let c = inv("c", 9, "X", 200);
        let e = inv("e", 11, "X", 200);
        let mut pool = vec![&a, &b, &c, &e];
        presort(&mut pool, &txn("t", 10, "X", 0));
        let order: Vec<&str> = pool.iter().map(|i| i.number.as_str()).collect();
        assert_eq!(order, vec!["b", "c", "e", "a"]);
    }

    fn family_input(amount: i64) -> ReconInput {
        ReconInput {
            invoices: vec![
                inv("1", 1, "LUIS GOMEZ", 30000),
                inv("2", 2, "ROSA GOMEZ", 40000),
                inv("3", 3, "LUIS GOMEZ", 30000),
            ],
            transactions: vec![txn("S#2", 5, "ROSA GOMEZ", amount)],
            households: vec![Household {
                code: "F2".into(),
                slots: vec!["LUIS GOMEZ".into(), "ROSA GOMEZ".into()],
            }],
            gaps: vec![],
        }
    }

    fn run_family(amount: i64) -> MatchLedger {
        let input = family_input(amount);
        let resolver = FamilyResolver::new(&input.households);
        let mut ledger = MatchLedger::new(IdentityMode::Triple);
        combinatorial_pass(&input, &resolver, &mut ledger, &ReconConfig::default());
        ledger
    }

    #[test]
    fn three_invoices_sum_to_credit() {
        let ledger = run_family(100000);
        assert_eq!(ledger.len(), 1);
        let rec = &ledger.records()[0];
        assert_eq!(rec.invoice_count, 3);
        assert_eq!(rec.invoice_total_cents, 100000);
        assert_eq!(rec.family, FamilyCode::Found("F2".into()));
        assert_eq!(rec.status, "MATCH_MULTI_FACTURAS_FAMILIA");
        let proof = rec.proof.as_ref().unwrap();
        assert_eq!(proof.candidates, 3);
        assert_eq!(proof.group_size, 3);
    }

    #[test]
    fn tolerance_boundary() {
        assert_eq!(run_family(99999).len(), 1);
        assert_eq!(run_family(99990).len(), 0);
    }

    #[test]
    fn surname_fallback_when_payer_unknown() {
        let mut input = family_input(70000);
        input.transactions[0].payer = "PEDRO GOMEZ".into();
        let resolver = FamilyResolver::new(&input.households);
        let mut ledger = MatchLedger::new(IdentityMode::Triple);
        combinatorial_pass(&input, &resolver, &mut ledger, &ReconConfig::default());
        assert_eq!(ledger.len(), 1);
        let rec = &ledger.records()[0];
        assert_eq!(rec.family, FamilyCode::NotFound);
        // Nearest first: invoice 3 (2 days), then 2 (3 days).
        assert_eq!(rec.invoice_ids, vec!["3", "2"]);
    }

    /// FAR1 and FAR2 alone sum to the credit but sit nine days away, behind
    /// fifteen small invoices dated on the credit day.
    fn crowded_input() -> ReconInput {
        let mut invoices = vec![inv("FAR1", 11, "LUIS GOMEZ", 2500), inv("FAR2", 11, "ROSA GOMEZ", 2500)];
        invoices.extend((1..=15).map(|n| inv(&format!("N{n}"), 20, "LUIS GOMEZ", 100)));
        ReconInput {
            invoices,
            transactions: vec![txn("S#2", 20, "LUIS GOMEZ", 5000)],
            households: family_input(0).households,
            gaps: vec![],
        }
    }

    #[test]
    fn candidates_beyond_cap_are_dropped_after_presort() {
        let input = crowded_input();
        let resolver = FamilyResolver::new(&input.households);
        let mut ledger = MatchLedger::new(IdentityMode::Triple);
        let stats = combinatorial_pass(&input, &resolver, &mut ledger, &ReconConfig::default());
        assert_eq!(stats.matches, 0);
        assert!(ledger.is_empty());
    }

    #[test]
    fn wider_cap_reaches_distant_pair() {
        let input = crowded_input();
        let resolver = FamilyResolver::new(&input.households);
        let mut ledger = MatchLedger::new(IdentityMode::Triple);
        let mut config = ReconConfig::default();
        config.combinatorial.max_candidates = 17;
        combinatorial_pass(&input, &resolver, &mut ledger, &config);
        assert_eq!(ledger.len(), 1);
        let rec = &ledger.records()[0];
        assert_eq!(rec.invoice_ids, vec!["FAR1", "FAR2"]);
        let proof = rec.proof.as_ref().unwrap();
        assert_eq!(proof.candidates, 17);
        // (15, 16) is the last of the C(17, 2) pairs.
        assert_eq!(proof.combinations_evaluated, 136);
    }

    #[test]
    fn legacy_flags_cover_duplicate_invoice_numbers() {
        let input = ReconInput {
            invoices: vec![
                inv("1", 1, "LUIS GOMEZ", 30000),
                inv("2", 2, "ROSA GOMEZ", 40000),
                inv("1", 3, "LUIS GOMEZ", 30000),
                inv("3", 3, "ROSA GOMEZ", 40000),
            ],
            transactions: vec![txn("S#2", 2, "LUIS GOMEZ", 70000), txn("S#3", 3, "LUIS GOMEZ", 70000)],
            households: family_input(0).households,
            gaps: vec![],
        };
        let resolver = FamilyResolver::new(&input.households);
        let mut ledger = MatchLedger::new(IdentityMode::Triple);
        let mut config = ReconConfig::default();
        config.ledger.invoice_exclusion = InvoiceExclusion::Legacy;
        combinatorial_pass(&input, &resolver, &mut ledger, &config);
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.records()[0].invoice_ids, vec!["2", "1"]);
    }

    #[test]
    fn invoices_claimed_earlier_are_excluded_when_unified() {
        let input = family_input(70000);
        let resolver = FamilyResolver::new(&input.households);
        let mut ledger = MatchLedger::new(IdentityMode::Triple);
        let other = txn("S#9", 1, "LUIS GOMEZ", 30000);
        let key = ledger.key_for(&other);
        ledger.record(MatchRecord::new(
            MatchKind::Exact,
            &[&input.invoices[2]],
            &other,
            key,
            FamilyCode::Found("F2".into()),
        ));
        combinatorial_pass(&input, &resolver, &mut ledger, &ReconConfig::default());
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.records()[1].invoice_ids, vec!["2", "1"]);
    }
}

// Property tests for the matching engine.
//
// Inputs are drawn from a small name/amount universe so that the passes
// actually collide: shared surnames, repeated amounts, same-day credits.

use std::collections::HashSet;

use chrono::NaiveDate;
use famrecon_recon::config::{IdentityMode, InvoiceExclusion};
use famrecon_recon::model::{BankTransaction, Household, Invoice};
use famrecon_recon::normalize::NameTokens;
use famrecon_recon::{run, FamilyResolver, ReconConfig, ReconInput};
use proptest::prelude::*;

fn config_256() -> ProptestConfig {
    ProptestConfig {
        cases: std::env::var("PROPTEST_CASES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(256),
        failure_persistence: None,
        ..ProptestConfig::default()
    }
}

const FIRST: [&str; 6] = ["JUAN", "ANA", "LUIS", "ROSA", "MARÍA", "José"];
const LAST: [&str; 4] = ["PEREZ", "GOMEZ", "DIAZ", "Núñez"];

// ============================================================================
// Generators
// ============================================================================

fn person() -> impl Strategy<Value = String> {
    (0..FIRST.len(), 0..LAST.len()).prop_map(|(f, l)| format!("{} {}", FIRST[f], LAST[l]))
}

fn payer() -> impl Strategy<Value = String> {
    prop_oneof![
        4 => person(),
        1 => (0..FIRST.len(), 0..LAST.len()).prop_map(|(f, l)| format!("{}, {}", LAST[l], FIRST[f])),
        1 => Just("DESCONOCIDO".to_string()),
    ]
}

fn registry() -> impl Strategy<Value = Vec<Household>> {
    prop::collection::vec(prop::collection::vec(person(), 1..4), 0..5).prop_map(|fams| {
        fams.into_iter()
            .enumerate()
            .map(|(i, slots)| Household {
                code: format!("F{}", i + 1),
                slots,
            })
            .collect()
    })
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
}

fn invoices() -> impl Strategy<Value = Vec<Invoice>> {
    prop::collection::vec((1u32..5, 0usize..3, person(), 1i64..6), 0..12).prop_map(|rows| {
        rows.into_iter()
            .enumerate()
            .map(|(i, (d, till, client, hundreds))| Invoice {
                row: i,
                number: format!("001-{till}-{i:04}"),
                date: Some(day(d)),
                client: Some(client),
                amount_cents: Some(hundreds * 10_000),
                till: till.to_string(),
            })
            .collect()
    })
}

fn transactions() -> impl Strategy<Value = Vec<BankTransaction>> {
    prop::collection::vec((1u32..5, payer(), 1i64..12), 0..8).prop_map(|rows| {
        rows.into_iter()
            .enumerate()
            .map(|(i, (d, payer, hundreds))| BankTransaction {
                row_id: format!("S#{}", i + 2),
                date: day(d),
                payer,
                amount_cents: hundreds * 10_000,
                detail: String::new(),
                voucher: String::new(),
                concept: String::new(),
                sheet: "S".into(),
            })
            .collect()
    })
}

fn recon_input() -> impl Strategy<Value = ReconInput> {
    (invoices(), transactions(), registry()).prop_map(|(invoices, transactions, households)| ReconInput {
        invoices,
        transactions,
        households,
        gaps: vec![],
    })
}

fn config(identity: IdentityMode, exclusion: InvoiceExclusion) -> ReconConfig {
    let mut c = ReconConfig::default();
    c.identity.mode = identity;
    c.ledger.invoice_exclusion = exclusion;
    c
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(config_256())]

    #[test]
    fn normalization_is_idempotent(name in "[A-Za-zÁÉÍÓÚÑáéíóúñ ,.-]{0,30}") {
        let once = NameTokens::new(&name);
        let twice = NameTokens::new(&once.to_string());
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn normalization_ignores_word_order(words in prop::collection::vec("[A-Z]{1,6}", 1..5)) {
        let forward = words.join(" ");
        let mut rev = words.clone();
        rev.reverse();
        prop_assert_eq!(NameTokens::new(&forward), NameTokens::new(&rev.join("  ")));
    }

    #[test]
    fn indexed_resolver_agrees_with_scan(households in registry(), names in prop::collection::vec(payer(), 1..10)) {
        let scan = FamilyResolver::new(&households);
        let indexed = FamilyResolver::indexed(&households);
        for name in &names {
            prop_assert_eq!(scan.resolve(Some(name)), indexed.resolve(Some(name)));
        }
    }

    #[test]
    fn transaction_keys_never_repeat(input in recon_input(), row in any::<bool>()) {
        let identity = if row { IdentityMode::Row } else { IdentityMode::Triple };
        let result = run(&config(identity, InvoiceExclusion::Unified), &input).unwrap();
        let mut seen = HashSet::new();
        for m in &result.matches {
            prop_assert!(seen.insert(m.transaction_key.clone()), "duplicate key {}", m.transaction_key);
        }
    }

    #[test]
    fn unified_mode_links_each_invoice_once(input in recon_input()) {
        let result = run(&config(IdentityMode::Triple, InvoiceExclusion::Unified), &input).unwrap();
        let mut seen = HashSet::new();
        for m in &result.matches {
            for id in &m.invoice_ids {
                prop_assert!(seen.insert(id.clone()), "invoice {} linked twice", id);
            }
        }
        prop_assert_eq!(result.unmatched_invoices.len() + seen.len(), input.invoices.len());
    }

    #[test]
    fn records_carry_source_amounts(input in recon_input(), legacy in any::<bool>()) {
        let exclusion = if legacy { InvoiceExclusion::Legacy } else { InvoiceExclusion::Unified };
        let result = run(&config(IdentityMode::Triple, exclusion), &input).unwrap();
        for m in &result.matches {
            let total: i64 = input
                .invoices
                .iter()
                .filter(|inv| m.invoice_ids.contains(&inv.number))
                .filter_map(|inv| inv.amount_cents)
                .sum();
            prop_assert_eq!(total, m.invoice_total_cents);
            prop_assert!((m.invoice_total_cents - m.transaction_amount_cents).abs() <= 1);
        }
    }

    #[test]
    fn determinism(input in recon_input()) {
        let c = ReconConfig::default();
        let a = run(&c, &input).unwrap();
        let b = run(&c, &input).unwrap();
        let view = |r: &famrecon_recon::ReconResult| -> Vec<(String, String, String)> {
            r.matches
                .iter()
                .map(|m| (m.kind.to_string(), m.transaction_key.to_string(), m.invoice_ids_joined()))
                .collect()
        };
        prop_assert_eq!(view(&a), view(&b));
        prop_assert_eq!(a.unmatched_transactions.len(), b.unmatched_transactions.len());
    }
}

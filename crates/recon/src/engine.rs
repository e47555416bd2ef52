use crate::combinatorial::combinatorial_pass;
use crate::config::ReconConfig;
use crate::error::ReconError;
use crate::family::FamilyResolver;
use crate::grouped::grouped_pass;
use crate::ledger::MatchLedger;
use crate::loader::{load_input, LoadReport};
use crate::matcher::{exact_pass, family_pair_pass};
use crate::model::{Field, MatchKind, PassStats, PassStatus, ReconInput, ReconMeta, ReconResult, TableKind};
use crate::report::{compute_summary, totals_by_family, totals_by_till, unmatched_invoices, unmatched_transactions};
use crate::table::Table;

/// Columns each pass cannot run without.
fn requirements(kind: MatchKind) -> &'static [(TableKind, Field)] {
    use Field::*;
    use TableKind::*;
    const CORE: [(TableKind, Field); 6] = [
        (Invoices, Date),
        (Invoices, Name),
        (Invoices, Amount),
        (Transactions, Date),
        (Transactions, Name),
        (Transactions, Amount),
    ];
    const FAMILY: [(TableKind, Field); 8] = [
        CORE[0],
        CORE[1],
        CORE[2],
        CORE[3],
        CORE[4],
        CORE[5],
        (Households, HouseholdCode),
        (Households, PersonSlot),
    ];
    const GROUPED: [(TableKind, Field); 9] = [
        CORE[0],
        CORE[1],
        CORE[2],
        CORE[3],
        CORE[4],
        CORE[5],
        (Households, HouseholdCode),
        (Households, PersonSlot),
        (Invoices, Number),
    ];
    match kind {
        MatchKind::Exact => &CORE,
        MatchKind::MultiInvoice => &GROUPED,
        MatchKind::FamilyPair | MatchKind::FamilyCombination => &FAMILY,
    }
}

/// First missing column a pass depends on, as an error.
fn missing_requirement(kind: MatchKind, input: &ReconInput) -> Option<ReconError> {
    requirements(kind).iter().find_map(|(table, field)| {
        input.has_gap(*table, *field).map(|gap| ReconError::MissingColumn {
            table: gap.table,
            column: gap.column.clone(),
        })
    })
}

fn enabled(config: &ReconConfig, kind: MatchKind) -> bool {
    let p = &config.passes;
    match kind {
        MatchKind::Exact => p.exact,
        MatchKind::MultiInvoice => p.grouped,
        MatchKind::FamilyPair => p.family_pair,
        MatchKind::FamilyCombination => p.combinatorial,
    }
}

/// Run the four passes in order over pre-loaded input.
///
/// A pass whose required column is missing is skipped and reported in
/// `passes`; the other passes still run.
pub fn run(config: &ReconConfig, input: &ReconInput) -> Result<ReconResult, ReconError> {
    config.validate()?;

    let resolver = FamilyResolver::with_index(&input.households, config.family.index);
    let mut ledger = MatchLedger::new(config.identity.mode);
    let mut passes = Vec::with_capacity(MatchKind::ALL.len());

    for kind in MatchKind::ALL {
        if !enabled(config, kind) {
            log::info!("pass {}: disabled", kind.pass_name());
            passes.push(PassStats::new(kind, PassStatus::Disabled));
            continue;
        }
        if let Some(err) = missing_requirement(kind, input) {
            log::warn!("pass {}: skipped, {err}", kind.pass_name());
            passes.push(PassStats::new(kind, PassStatus::Skipped(err.to_string())));
            continue;
        }

        log::info!("pass {}: start ({} matches so far)", kind.pass_name(), ledger.len());
        let stats = match kind {
            MatchKind::Exact => exact_pass(input, &resolver, &mut ledger),
            MatchKind::MultiInvoice => grouped_pass(input, &resolver, &mut ledger),
            MatchKind::FamilyPair => family_pair_pass(input, &resolver, &mut ledger, config),
            MatchKind::FamilyCombination => combinatorial_pass(input, &resolver, &mut ledger, config),
        };
        log::info!(
            "pass {}: {} matches, {} invoices linked",
            kind.pass_name(),
            stats.matches,
            stats.invoices_linked
        );
        passes.push(stats);
    }

    let matches = ledger.into_records();
    let unmatched_invoices = unmatched_invoices(input, &matches);
    let unmatched_transactions = unmatched_transactions(input, &matches, config.identity.mode);
    let by_family = totals_by_family(&matches);
    let by_till = totals_by_till(&matches);
    let summary = compute_summary(
        input,
        &matches,
        unmatched_invoices.len(),
        unmatched_transactions.len(),
        &by_family,
    );

    Ok(ReconResult {
        meta: ReconMeta {
            config_name: config.name.clone(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            run_at: chrono::Utc::now().to_rfc3339(),
            identity: config.identity.mode,
            invoice_exclusion: config.ledger.invoice_exclusion,
        },
        summary,
        passes,
        matches,
        by_family,
        by_till,
        unmatched_invoices,
        unmatched_transactions,
    })
}

/// Load raw tables and run. Returns the result together with the load report.
pub fn run_tables(
    config: &ReconConfig,
    invoices: &Table,
    transactions: &[Table],
    households: &Table,
) -> Result<(ReconResult, LoadReport), ReconError> {
    let (input, report) = load_input(config, invoices, transactions, households);
    let result = run(config, &input)?;
    Ok((result, report))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUSEHOLDS: &str = "\
Código,Persona_1,Persona_2
F1,JUAN PEREZ,ANA PEREZ
F2,LUIS GOMEZ,ROSA GOMEZ
";

    fn tables(invoices: &str, bank: &str) -> (Table, Vec<Table>, Table) {
        (
            Table::from_csv_str("ventas", invoices).unwrap(),
            vec![Table::from_csv_str("05.01", bank).unwrap()],
            Table::from_csv_str("familias", HOUSEHOLDS).unwrap(),
        )
    }

    #[test]
    fn all_four_passes_contribute() {
        let invoices = "\
mca_fecha,nro_factura,neto_gs,nombre
2024-01-05,001-\"010\"-1,150,MARTA DIAZ
2024-01-05,001-\"010\"-2,300,JUAN PEREZ
2024-01-05,001-\"010\"-3,400,ANA PEREZ
2024-01-04,001-\"011\"-4,250,ROSA GOMEZ
2024-01-02,001-\"012\"-5,300,LUIS GOMEZ
2024-01-03,001-\"013\"-6,400,ROSA GOMEZ
2024-01-04,001-\"014\"-7,300,LUIS GOMEZ
";
        let bank = "\
Fecha,Nombre,Crédito
05/01/2024,MARTA DIAZ,150
05/01/2024,PEREZ JUAN,700
05/01/2024,LUIS GOMEZ,250
05/01/2024,ROSA GOMEZ,1000
";
        let (inv, txn, hh) = tables(invoices, bank);
        let config = ReconConfig::default();
        let (result, report) = run_tables(&config, &inv, &txn, &hh).unwrap();

        assert!(report.gaps.is_empty());
        assert_eq!(report.tills_extracted, 7);
        let kinds: Vec<MatchKind> = result.matches.iter().map(|m| m.kind).collect();
        assert_eq!(
            kinds,
            vec![
                MatchKind::Exact,
                MatchKind::MultiInvoice,
                MatchKind::FamilyPair,
                MatchKind::FamilyCombination
            ]
        );
        assert_eq!(result.matches[3].invoice_count, 3);
        assert!(result.unmatched_invoices.is_empty());
        assert!(result.unmatched_transactions.is_empty());
        assert_eq!(result.summary.invoice_match_rate, 100.0);
        assert!(result.passes.iter().all(|p| p.status == PassStatus::Completed));
    }

    #[test]
    fn missing_household_code_skips_family_passes_only() {
        let invoices = "mca_fecha,nro_factura,neto_gs,nombre\n2024-01-05,1-1-1,150,MARTA DIAZ\n";
        let bank = "Fecha,Nombre,Monto\n2024-01-05,MARTA DIAZ,150\n";
        let inv = Table::from_csv_str("ventas", invoices).unwrap();
        let txn = vec![Table::from_csv_str("s", bank).unwrap()];
        let hh = Table::from_csv_str("familias", "Id,Persona_1\n1,MARTA DIAZ\n").unwrap();

        let (result, report) = run_tables(&ReconConfig::default(), &inv, &txn, &hh).unwrap();
        assert_eq!(report.gaps.len(), 1);
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.passes[0].status, PassStatus::Completed);
        for p in &result.passes[1..] {
            match &p.status {
                PassStatus::Skipped(reason) => assert!(reason.contains("households"), "{reason}"),
                other => panic!("expected skip, got {other:?}"),
            }
        }
    }

    #[test]
    fn disabled_passes_are_reported() {
        let (inv, txn, hh) = tables(
            "mca_fecha,nro_factura,neto_gs,nombre\n",
            "Fecha,Nombre,Crédito\n",
        );
        let config = ReconConfig::from_toml("[passes]\ngrouped = false\n").unwrap();
        let (result, _) = run_tables(&config, &inv, &txn, &hh).unwrap();
        assert_eq!(result.passes[1].status, PassStatus::Disabled);
        assert_eq!(result.passes.len(), 4);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = ReconConfig::default();
        config.combinatorial.max_group_size = 1;
        assert!(run(&config, &ReconInput::default()).is_err());
    }
}

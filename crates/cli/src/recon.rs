//! `famrecon run|validate|resolve`: config-driven reconciliation.

use std::path::{Path, PathBuf};

use clap::Subcommand;
use famrecon_recon::model::{format_cents, PassStatus};
use famrecon_recon::{FamilyResolver, LoadReport, ReconConfig, ReconInput, ReconResult, Table};

use crate::exit_codes::{EXIT_RECON_INVALID_CONFIG, EXIT_RECON_RESIDUALS, EXIT_RECON_RUNTIME};
use crate::CliError;

#[derive(Subcommand)]
pub enum ReconCommands {
    /// Run the four matching passes from a TOML config file
    #[command(after_help = "\
Examples:
  famrecon run recon.toml
  famrecon run recon.toml --json
  famrecon run recon.toml --output result.json --report conciliacion.xlsx
  famrecon run recon.toml --strict -q")]
    Run {
        /// Path to the recon TOML config file
        config: PathBuf,

        /// Output JSON to stdout instead of human summary
        #[arg(long)]
        json: bool,

        /// Write JSON output to file (overrides [output].json)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Write the xlsx report to file (overrides [output].report)
        #[arg(long)]
        report: Option<PathBuf>,

        /// Exit with a distinct code when invoices or credits remain unmatched
        #[arg(long)]
        strict: bool,
    },

    /// Validate a recon config without running
    #[command(after_help = "\
Examples:
  famrecon validate recon.toml")]
    Validate {
        /// Path to the recon TOML config file
        config: PathBuf,
    },

    /// Show which household each name resolves to
    #[command(after_help = "\
Examples:
  famrecon resolve recon.toml 'PEREZ JUAN' 'Lucía Gómez'
  famrecon resolve recon.toml 'ANA PEREZ' --json")]
    Resolve {
        /// Path to the recon TOML config file
        config: PathBuf,

        /// Names to resolve
        #[arg(required = true)]
        names: Vec<String>,

        /// Output JSON to stdout
        #[arg(long)]
        json: bool,
    },
}

pub fn cmd_recon(cmd: ReconCommands) -> Result<(), CliError> {
    match cmd {
        ReconCommands::Run { config, json, output, report, strict } => {
            cmd_recon_run(config, json, output, report, strict)
        }
        ReconCommands::Validate { config } => cmd_recon_validate(config),
        ReconCommands::Resolve { config, names, json } => cmd_recon_resolve(config, names, json),
    }
}

fn recon_err(code: u8, msg: impl Into<String>) -> CliError {
    CliError::new(code, msg)
}

fn load_config(config_path: &Path) -> Result<ReconConfig, CliError> {
    let config_str = std::fs::read_to_string(config_path)
        .map_err(|e| CliError::io(format!("cannot read config {}: {e}", config_path.display())))?;
    ReconConfig::from_toml(&config_str).map_err(|e| recon_err(EXIT_RECON_INVALID_CONFIG, e.to_string()))
}

/// Resolve a config-relative path against the config file's directory.
fn config_relative(config_path: &Path, file: &str) -> PathBuf {
    let base_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    base_dir.join(file)
}

fn require_input(config_path: &Path, key: &str, value: &str) -> Result<PathBuf, CliError> {
    if value.trim().is_empty() {
        return Err(recon_err(EXIT_RECON_INVALID_CONFIG, format!("[inputs].{key} is not set"))
            .with_hint(format!("add `{key} = \"<file>\"` under [inputs] in {}", config_path.display())));
    }
    Ok(config_relative(config_path, value))
}

fn read_households(config_path: &Path, config: &ReconConfig) -> Result<Table, CliError> {
    let path = require_input(config_path, "households", &config.inputs.households)?;
    famrecon_io::read_table(&path, config.inputs.households_sheet.as_deref()).map_err(CliError::io)
}

fn load_inputs(config_path: &Path, config: &ReconConfig) -> Result<(ReconInput, LoadReport), CliError> {
    let inputs = &config.inputs;
    let invoices_path = require_input(config_path, "invoices", &inputs.invoices)?;
    let transactions_path = require_input(config_path, "transactions", &inputs.transactions)?;

    let invoices =
        famrecon_io::read_table(&invoices_path, inputs.invoices_sheet.as_deref()).map_err(CliError::io)?;
    let transactions = famrecon_io::read_tables(&transactions_path, None).map_err(CliError::io)?;
    let households = read_households(config_path, config)?;

    tracing::debug!(
        "read {} invoice rows, {} statement sheet(s), {} household rows",
        invoices.len(),
        transactions.len(),
        households.len()
    );
    Ok(famrecon_recon::load_input(config, &invoices, &transactions, &households))
}

fn cmd_recon_run(
    config_path: PathBuf,
    json_output: bool,
    output_file: Option<PathBuf>,
    report_file: Option<PathBuf>,
    strict: bool,
) -> Result<(), CliError> {
    let config = load_config(&config_path)?;
    let (input, load) = load_inputs(&config_path, &config)?;

    let result = famrecon_recon::run(&config, &input).map_err(|e| recon_err(EXIT_RECON_RUNTIME, e.to_string()))?;

    // CLI flags win over the config's [output] section
    let json_path = output_file.or_else(|| config.output.json.as_deref().map(|p| config_relative(&config_path, p)));
    let report_path =
        report_file.or_else(|| config.output.report.as_deref().map(|p| config_relative(&config_path, p)));

    if let Some(ref path) = json_path {
        famrecon_io::json::export(&result, path).map_err(|e| CliError::io(format!("cannot write output: {e}")))?;
        eprintln!("wrote {}", path.display());
    }

    if let Some(ref path) = report_path {
        famrecon_io::xlsx::export_report(&input, &result, path)
            .map_err(|e| CliError::io(format!("cannot write report: {e}")))?;
        eprintln!("wrote {}", path.display());
    }

    if json_output {
        let json_str = serde_json::to_string_pretty(&result)
            .map_err(|e| recon_err(EXIT_RECON_RUNTIME, format!("JSON serialization error: {e}")))?;
        println!("{json_str}");
    }

    print_summary(&result, &load);

    let s = &result.summary;
    if strict && (s.invoices_unmatched > 0 || s.transactions_unmatched > 0) {
        return Err(recon_err(
            EXIT_RECON_RESIDUALS,
            format!(
                "{} invoice(s) and {} credit(s) left unmatched",
                s.invoices_unmatched, s.transactions_unmatched
            ),
        ));
    }

    Ok(())
}

fn print_summary(result: &ReconResult, load: &LoadReport) {
    let s = &result.summary;

    for gap in &load.gaps {
        eprintln!("missing column: {} {:?} ('{}')", gap.table, gap.field, gap.column);
    }
    if load.invoices.rows_incomplete + load.transactions.rows_skipped + load.households.rows_skipped > 0 {
        eprintln!(
            "rows: {} invoice(s) incomplete, {} credit(s) skipped, {} household(s) skipped",
            load.invoices.rows_incomplete, load.transactions.rows_skipped, load.households.rows_skipped
        );
    }

    eprintln!(
        "recon '{}': {} matches, invoices {}/{} ({:.1}%), credits {}/{} ({:.1}%), matched {}",
        result.meta.config_name,
        result.matches.len(),
        s.invoices_matched,
        s.invoices_total,
        s.invoice_match_rate,
        s.transactions_matched,
        s.transactions_total,
        s.transaction_match_rate,
        format_cents(s.matched_invoice_cents),
    );

    for pass in &result.passes {
        let status = match &pass.status {
            PassStatus::Completed => "completed".to_string(),
            PassStatus::Disabled => "disabled".to_string(),
            PassStatus::Skipped(reason) => format!("skipped ({reason})"),
            PassStatus::Interrupted(reason) => format!("interrupted ({reason})"),
        };
        eprintln!(
            "  {:<14} {:>5} matches {:>6} invoices  {}",
            pass.pass, pass.matches, pass.invoices_linked, status
        );
        if pass.budget_exhausted > 0 {
            eprintln!("  {:<14} {} credit(s) hit the combination budget", "", pass.budget_exhausted);
        }
    }

    if !s.top_families.is_empty() {
        let top: Vec<String> = s
            .top_families
            .iter()
            .take(5)
            .map(|t| format!("{} ({})", t.key, t.matches))
            .collect();
        eprintln!("top families: {}", top.join(", "));
    }
}

fn cmd_recon_validate(config_path: PathBuf) -> Result<(), CliError> {
    let config = load_config(&config_path)?;
    let p = &config.passes;
    let enabled: Vec<&str> = [
        ("exact", p.exact),
        ("grouped", p.grouped),
        ("family_pair", p.family_pair),
        ("combinatorial", p.combinatorial),
    ]
    .iter()
    .filter(|(_, on)| *on)
    .map(|(name, _)| *name)
    .collect();

    eprintln!(
        "valid: recon '{}' with passes [{}], identity {:?}, invoice exclusion {:?}",
        config.name,
        enabled.join(", "),
        config.identity.mode,
        config.ledger.invoice_exclusion,
    );
    Ok(())
}

#[derive(serde::Serialize)]
struct Resolution<'a> {
    name: &'a str,
    family: String,
    substring: Option<&'a str>,
}

fn cmd_recon_resolve(config_path: PathBuf, names: Vec<String>, json_output: bool) -> Result<(), CliError> {
    let config = load_config(&config_path)?;
    let table = read_households(&config_path, &config)?;
    let (households, _, gaps) = famrecon_recon::loader::load_households(&table, &config.columns.households);
    if let Some(gap) = gaps.first() {
        return Err(recon_err(
            EXIT_RECON_RUNTIME,
            format!("households table has no {:?} column ('{}')", gap.field, gap.column),
        ));
    }

    let resolver = FamilyResolver::with_index(&households, config.family.index);
    let rows: Vec<Resolution> = names
        .iter()
        .map(|name| Resolution {
            name,
            family: resolver.resolve(Some(name)).to_string(),
            substring: resolver.resolve_by_substring(name),
        })
        .collect();

    if json_output {
        let json_str = serde_json::to_string_pretty(&rows)
            .map_err(|e| recon_err(EXIT_RECON_RUNTIME, format!("JSON serialization error: {e}")))?;
        println!("{json_str}");
    } else {
        for r in &rows {
            println!("{}\t{}\t{}", r.name, r.family, r.substring.unwrap_or("-"));
        }
    }
    Ok(())
}

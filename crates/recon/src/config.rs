use serde::{Deserialize, Serialize};

use crate::error::ReconError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReconConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub inputs: InputsConfig,
    #[serde(default)]
    pub columns: ColumnsConfig,
    #[serde(default)]
    pub tolerance: ToleranceConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub family: FamilyConfig,
    #[serde(default)]
    pub combinatorial: CombinatorialConfig,
    #[serde(default)]
    pub passes: PassesConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

fn default_name() -> String {
    "reconciliation".into()
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Input file locations, relative to the config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InputsConfig {
    #[serde(default)]
    pub invoices: String,
    #[serde(default)]
    pub transactions: String,
    #[serde(default)]
    pub households: String,
    /// Sheet to read from the invoices workbook (first sheet if absent).
    #[serde(default)]
    pub invoices_sheet: Option<String>,
    #[serde(default)]
    pub households_sheet: Option<String>,
}

// ---------------------------------------------------------------------------
// Column mapping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ColumnsConfig {
    #[serde(default)]
    pub invoices: InvoiceColumns,
    #[serde(default)]
    pub transactions: TransactionColumns,
    #[serde(default)]
    pub households: HouseholdColumns,
}

/// Invoice columns are named exactly (case-insensitive, trimmed).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InvoiceColumns {
    pub date: String,
    pub number: String,
    pub amount: String,
    pub client: String,
}

impl Default for InvoiceColumns {
    fn default() -> Self {
        Self {
            date: "mca_fecha".into(),
            number: "nro_factura".into(),
            amount: "neto_gs".into(),
            client: "nombre".into(),
        }
    }
}

/// Bank statements vary in layout, so their columns are discovered by
/// case-insensitive keyword containment. A header is assigned to the first
/// role (in field order) whose keywords it contains; the first header per
/// role wins.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransactionColumns {
    pub name: Vec<String>,
    pub date: Vec<String>,
    pub amount: Vec<String>,
    pub detail: Vec<String>,
    pub voucher: Vec<String>,
    pub concept: Vec<String>,
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for TransactionColumns {
    fn default() -> Self {
        Self {
            name: words(&["nombre", "cliente", "titular", "beneficiario"]),
            date: words(&["fecha", "date", "fec"]),
            amount: words(&["crédito", "credito", "monto", "importe", "amount", "valor"]),
            detail: words(&["detalle", "descrip"]),
            voucher: words(&["comprobante"]),
            concept: words(&["concepto"]),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HouseholdColumns {
    /// Exact code column; falls back to the first header containing
    /// `codigo` or `code`.
    pub code: String,
    /// Headers containing this marker are person slots.
    pub person_marker: String,
}

impl Default for HouseholdColumns {
    fn default() -> Self {
        Self {
            code: "Código".into(),
            person_marker: "persona".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Matching behaviour
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToleranceConfig {
    /// Allowed amount difference in minor units.
    pub amount_cents: i64,
    /// Allowed date distance for the family-pair pass.
    pub date_window_days: u32,
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        Self {
            amount_cents: 1,
            date_window_days: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityMode {
    /// Transactions are keyed by (date, payer, amount).
    #[default]
    Triple,
    /// Transactions are keyed by their stable row id.
    Row,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub mode: IdentityMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceExclusion {
    /// Every pass excludes invoices already claimed by any earlier match.
    #[default]
    Unified,
    /// Family-pair ignores earlier claims; combinatorial only tracks its own.
    Legacy,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub invoice_exclusion: InvoiceExclusion,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FamilyConfig {
    /// Build a token index over the registry instead of scanning it per lookup.
    pub index: bool,
}

impl Default for FamilyConfig {
    fn default() -> Self {
        Self { index: true }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CombinatorialConfig {
    pub max_candidates: usize,
    pub max_group_size: usize,
    /// Combinations evaluated per transaction before giving up on it.
    pub max_combinations: u64,
    /// Wall-clock budget for the whole pass.
    pub deadline_ms: Option<u64>,
    pub detect_ambiguity: bool,
}

impl Default for CombinatorialConfig {
    fn default() -> Self {
        Self {
            max_candidates: 15,
            max_group_size: 8,
            max_combinations: 250_000,
            deadline_ms: None,
            detect_ambiguity: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PassesConfig {
    pub exact: bool,
    pub grouped: bool,
    pub family_pair: bool,
    pub combinatorial: bool,
}

impl Default for PassesConfig {
    fn default() -> Self {
        Self {
            exact: true,
            grouped: true,
            family_pair: true,
            combinatorial: true,
        }
    }
}

impl PassesConfig {
    fn any_enabled(&self) -> bool {
        self.exact || self.grouped || self.family_pair || self.combinatorial
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub json: Option<String>,
    #[serde(default)]
    pub report: Option<String>,
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl ReconConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: ReconConfig =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        let comb = &self.combinatorial;
        if comb.max_group_size < 2 {
            return Err(ReconError::ConfigValidation(format!(
                "combinatorial.max_group_size must be at least 2, got {}",
                comb.max_group_size
            )));
        }
        if comb.max_candidates < 2 {
            return Err(ReconError::ConfigValidation(format!(
                "combinatorial.max_candidates must be at least 2, got {}",
                comb.max_candidates
            )));
        }
        if comb.max_combinations == 0 {
            return Err(ReconError::ConfigValidation(
                "combinatorial.max_combinations must be positive".into(),
            ));
        }

        if self.tolerance.amount_cents < 0 {
            return Err(ReconError::ConfigValidation(format!(
                "tolerance.amount_cents must not be negative, got {}",
                self.tolerance.amount_cents
            )));
        }

        let tx = &self.columns.transactions;
        for (role, list) in [
            ("name", &tx.name),
            ("date", &tx.date),
            ("amount", &tx.amount),
            ("detail", &tx.detail),
            ("voucher", &tx.voucher),
            ("concept", &tx.concept),
        ] {
            if list.iter().all(|k| k.trim().is_empty()) {
                return Err(ReconError::ConfigValidation(format!(
                    "columns.transactions.{role}: keyword list is empty"
                )));
            }
        }

        if self.columns.households.person_marker.trim().is_empty() {
            return Err(ReconError::ConfigValidation(
                "columns.households.person_marker must not be empty".into(),
            ));
        }

        if !self.passes.any_enabled() {
            return Err(ReconError::ConfigValidation(
                "at least one pass must be enabled".into(),
            ));
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
name = "Colegio marzo"

[inputs]
invoices = "ventas.xlsx"
transactions = "extracto.xlsx"
households = "familias.xlsx"
households_sheet = "Familias"

[columns.invoices]
date = "fecha"
number = "factura"
amount = "total"
client = "cliente"

[columns.households]
code = "Codigo_Familia"

[tolerance]
amount_cents = 5
date_window_days = 2

[identity]
mode = "row"

[ledger]
invoice_exclusion = "legacy"

[combinatorial]
max_candidates = 10
max_group_size = 4
deadline_ms = 2000
detect_ambiguity = true

[passes]
family_pair = false

[output]
json = "out.json"
report = "out.xlsx"
"#;

    #[test]
    fn parse_full() {
        let c = ReconConfig::from_toml(FULL).unwrap();
        assert_eq!(c.name, "Colegio marzo");
        assert_eq!(c.inputs.households_sheet.as_deref(), Some("Familias"));
        assert!(c.inputs.invoices_sheet.is_none());
        assert_eq!(c.columns.invoices.amount, "total");
        assert_eq!(c.columns.households.code, "Codigo_Familia");
        assert_eq!(c.columns.households.person_marker, "persona");
        assert_eq!(c.tolerance.amount_cents, 5);
        assert_eq!(c.tolerance.date_window_days, 2);
        assert_eq!(c.identity.mode, IdentityMode::Row);
        assert_eq!(c.ledger.invoice_exclusion, InvoiceExclusion::Legacy);
        assert_eq!(c.combinatorial.max_candidates, 10);
        assert_eq!(c.combinatorial.max_combinations, 250_000);
        assert_eq!(c.combinatorial.deadline_ms, Some(2000));
        assert!(c.combinatorial.detect_ambiguity);
        assert!(c.passes.exact);
        assert!(!c.passes.family_pair);
        assert_eq!(c.output.report.as_deref(), Some("out.xlsx"));
    }

    #[test]
    fn empty_document_uses_defaults() {
        let c = ReconConfig::from_toml("").unwrap();
        assert_eq!(c.name, "reconciliation");
        assert_eq!(c.columns.invoices.date, "mca_fecha");
        assert_eq!(c.columns.invoices.number, "nro_factura");
        assert_eq!(c.columns.invoices.amount, "neto_gs");
        assert_eq!(c.columns.invoices.client, "nombre");
        assert_eq!(c.columns.transactions.amount[0], "crédito");
        assert_eq!(c.tolerance.amount_cents, 1);
        assert_eq!(c.tolerance.date_window_days, 1);
        assert_eq!(c.identity.mode, IdentityMode::Triple);
        assert_eq!(c.ledger.invoice_exclusion, InvoiceExclusion::Unified);
        assert!(c.family.index);
        assert_eq!(c.combinatorial.max_candidates, 15);
        assert_eq!(c.combinatorial.max_group_size, 8);
    }

    #[test]
    fn reject_group_size_below_two() {
        let err = ReconConfig::from_toml("[combinatorial]\nmax_group_size = 1\n").unwrap_err();
        assert!(err.to_string().contains("max_group_size"));
    }

    #[test]
    fn reject_zero_budget() {
        let err = ReconConfig::from_toml("[combinatorial]\nmax_combinations = 0\n").unwrap_err();
        assert!(matches!(err, ReconError::ConfigValidation(_)));
    }

    #[test]
    fn reject_negative_tolerance() {
        let err = ReconConfig::from_toml("[tolerance]\namount_cents = -1\n").unwrap_err();
        assert!(err.to_string().contains("amount_cents"));
    }

    #[test]
    fn reject_empty_keyword_list() {
        let err = ReconConfig::from_toml("[columns.transactions]\nvoucher = []\n").unwrap_err();
        assert!(err.to_string().contains("voucher"));
    }

    #[test]
    fn reject_all_passes_disabled() {
        let input = r#"
[passes]
exact = false
grouped = false
family_pair = false
combinatorial = false
"#;
        let err = ReconConfig::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("at least one pass"));
    }

    #[test]
    fn reject_unknown_identity_mode() {
        let err = ReconConfig::from_toml("[identity]\nmode = \"uuid\"\n").unwrap_err();
        assert!(matches!(err, ReconError::ConfigParse(_)));
    }
}

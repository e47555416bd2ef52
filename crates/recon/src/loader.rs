use std::collections::BTreeSet;

use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;

use crate::config::{HouseholdColumns, InvoiceColumns, ReconConfig, TransactionColumns};
use crate::error::ReconError;
use crate::model::{BankTransaction, ColumnGap, Field, Household, Invoice, ReconInput, TableKind};
use crate::table::Table;

// ---------------------------------------------------------------------------
// Load report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct TableLoad {
    pub rows_read: usize,
    pub rows_loaded: usize,
    /// Rows dropped because a required cell could not be parsed.
    pub rows_skipped: usize,
    /// Rows dropped by eligibility rules (non-positive credit, blank payer).
    pub rows_filtered: usize,
    /// Rows kept with at least one unusable field.
    pub rows_incomplete: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub invoices: TableLoad,
    pub transactions: TableLoad,
    pub households: TableLoad,
    pub sheets: Vec<String>,
    pub gaps: Vec<ColumnGap>,
    pub tills_extracted: usize,
    pub distinct_tills: usize,
}

// ---------------------------------------------------------------------------
// Cell parsing
// ---------------------------------------------------------------------------

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y", "%Y/%m/%d"];

/// Largest accepted money magnitude in minor units (10^13 whole units).
/// Sums of thousands of such amounts still fit in `i64`.
pub const MAX_AMOUNT_CENTS: i64 = 1_000_000_000_000_000;

/// Parse a date cell. Day-first formats are tried after ISO; a trailing
/// time part (`2024-01-05 00:00:00`, `2024-01-05T08:30`) is ignored.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let date_part = value
        .split(|c: char| c == ' ' || c == 'T')
        .next()
        .unwrap_or(value);
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
}

/// Parse a money cell into minor units.
///
/// Accepts currency symbols, spaces, a leading minus or parentheses, and
/// either `.` or `,` as decimal separator. When both appear, the last one is
/// the decimal separator. A lone separator followed by exactly three digits,
/// or a separator that repeats, groups thousands (`1.234` is 1234).
/// Magnitudes above [`MAX_AMOUNT_CENTS`] are rejected.
pub fn parse_amount_cents(value: &str) -> Option<i64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    let negative = trimmed.starts_with('-') || (trimmed.starts_with('(') && trimmed.ends_with(')'));
    let body: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    if !body.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let decimal_sep = match (body.rfind('.'), body.rfind(',')) {
        (Some(d), Some(c)) => Some(if d > c { '.' } else { ',' }),
        (Some(_), None) => lone_decimal(&body, '.'),
        (None, Some(_)) => lone_decimal(&body, ','),
        (None, None) => None,
    };

    let (int_part, frac_part) = match decimal_sep {
        Some(sep) => {
            let pos = body.rfind(sep)?;
            (&body[..pos], &body[pos + 1..])
        }
        None => (body.as_str(), ""),
    };
    let int_digits: String = int_part.chars().filter(char::is_ascii_digit).collect();

    let units: i128 = if int_digits.is_empty() { 0 } else { int_digits.parse().ok()? };
    let mut cents = units.checked_mul(100)?;
    let frac: Vec<u32> = frac_part.chars().filter_map(|c| c.to_digit(10)).collect();
    let tens = frac.first().copied().unwrap_or(0) as i128;
    let ones = frac.get(1).copied().unwrap_or(0) as i128;
    cents = cents.checked_add(tens * 10 + ones)?;
    if frac.get(2).is_some_and(|d| *d >= 5) {
        cents = cents.checked_add(1)?;
    }
    if cents > i128::from(MAX_AMOUNT_CENTS) {
        return None;
    }
    if negative {
        cents = -cents;
    }
    i64::try_from(cents).ok()
}

/// Decide whether a separator kind that is the only one present is decimal.
fn lone_decimal(body: &str, sep: char) -> Option<char> {
    if body.matches(sep).count() > 1 {
        return None;
    }
    let after = body.rsplit(sep).next().unwrap_or("");
    if after.len() == 3 {
        None
    } else {
        Some(sep)
    }
}

/// Pulls the till number out of an invoice number such as `001-"010"-0002238`.
#[derive(Debug, Clone)]
pub struct TillExtractor {
    quoted: Regex,
    plain: Regex,
}

impl Default for TillExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl TillExtractor {
    pub fn new() -> Self {
        Self {
            quoted: Regex::new(r#"^(\d+)-"(\d+)"-(\d+)"#).expect("static regex"),
            plain: Regex::new(r"^(\d+)-(\d+)-(\d+)").expect("static regex"),
        }
    }

    /// Second numeric group, or empty when neither pattern applies.
    pub fn extract(&self, number: &str) -> String {
        let number = number.trim();
        self.quoted
            .captures(number)
            .or_else(|| self.plain.captures(number))
            .and_then(|c| c.get(2))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Invoices
// ---------------------------------------------------------------------------

pub fn load_invoices(
    table: &Table,
    cols: &InvoiceColumns,
    tills: &TillExtractor,
) -> (Vec<Invoice>, TableLoad, Vec<ColumnGap>) {
    let mut gaps = Vec::new();
    let mut idx = |field: Field, name: &str| {
        let found = table.column(name);
        if found.is_none() {
            log::warn!("invoices '{}': column '{name}' not found", table.name);
            gaps.push(ColumnGap {
                table: TableKind::Invoices,
                field,
                column: name.to_string(),
            });
        }
        found
    };
    let date_idx = idx(Field::Date, &cols.date);
    let number_idx = idx(Field::Number, &cols.number);
    let amount_idx = idx(Field::Amount, &cols.amount);
    let client_idx = idx(Field::Name, &cols.client);

    let mut stats = TableLoad::default();
    let mut invoices = Vec::with_capacity(table.len());
    for row in 0..table.len() {
        stats.rows_read += 1;
        let number = match cell_at(table, row, number_idx) {
            "" => format!("#{}", row + 1),
            n => n.to_string(),
        };

        let mut incomplete = false;
        let date = match date_idx {
            Some(_) => {
                let raw = cell_at(table, row, date_idx);
                let parsed = parse_date(raw);
                if parsed.is_none() {
                    incomplete = true;
                    warn_row(ReconError::DateParse {
                        table: TableKind::Invoices,
                        row: number.clone(),
                        value: raw.to_string(),
                    });
                }
                parsed
            }
            None => None,
        };
        let amount_cents = match amount_idx {
            Some(_) => {
                let raw = cell_at(table, row, amount_idx);
                let parsed = parse_amount_cents(raw);
                if parsed.is_none() {
                    incomplete = true;
                    warn_row(ReconError::AmountParse {
                        table: TableKind::Invoices,
                        row: number.clone(),
                        value: raw.to_string(),
                    });
                }
                parsed
            }
            None => None,
        };
        let client = match cell_at(table, row, client_idx) {
            "" => {
                incomplete |= client_idx.is_some();
                None
            }
            c => Some(c.to_string()),
        };

        if incomplete {
            stats.rows_incomplete += 1;
        }
        let till = if number_idx.is_some() { tills.extract(&number) } else { String::new() };
        invoices.push(Invoice {
            row,
            number,
            date,
            client,
            amount_cents,
            till,
        });
        stats.rows_loaded += 1;
    }

    (invoices, stats, gaps)
}

fn cell_at(table: &Table, row: usize, idx: Option<usize>) -> &str {
    idx.map(|i| table.cell(row, i).trim()).unwrap_or("")
}

fn warn_row(err: ReconError) {
    log::warn!("{err}");
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy)]
struct TransactionIdx {
    name: Option<usize>,
    date: Option<usize>,
    amount: Option<usize>,
    detail: Option<usize>,
    voucher: Option<usize>,
    concept: Option<usize>,
}

/// Assign each header to the first role whose keywords it contains; the
/// first header per role is kept.
fn discover_transaction_columns(table: &Table, cols: &TransactionColumns) -> TransactionIdx {
    let mut found = TransactionIdx::default();
    let hits = |h: &str, words: &[String]| {
        words
            .iter()
            .filter(|w| !w.trim().is_empty())
            .any(|w| h.contains(&w.to_lowercase()))
    };
    for (i, header) in table.headers.iter().enumerate() {
        let h = header.to_lowercase();
        let slot = if hits(&h, &cols.name) {
            &mut found.name
        } else if hits(&h, &cols.date) {
            &mut found.date
        } else if hits(&h, &cols.amount) {
            &mut found.amount
        } else if hits(&h, &cols.detail) {
            &mut found.detail
        } else if hits(&h, &cols.voucher) {
            &mut found.voucher
        } else if hits(&h, &cols.concept) {
            &mut found.concept
        } else {
            continue;
        };
        if slot.is_none() {
            *slot = Some(i);
        }
    }
    found
}

/// Load bank credits from every sheet, in sheet order.
pub fn load_transactions(
    sheets: &[Table],
    cols: &TransactionColumns,
) -> (Vec<BankTransaction>, TableLoad, Vec<ColumnGap>) {
    let mut stats = TableLoad::default();
    let mut txns = Vec::new();
    let mut seen = [false; 3];

    for sheet in sheets {
        let found = discover_transaction_columns(sheet, cols);
        let critical = [
            (Field::Name, found.name),
            (Field::Date, found.date),
            (Field::Amount, found.amount),
        ];
        for (i, (_, idx)) in critical.iter().enumerate() {
            seen[i] |= idx.is_some();
        }
        let (Some(name_idx), Some(date_idx), Some(amount_idx)) =
            (found.name, found.date, found.amount)
        else {
            let missing: Vec<String> = critical
                .iter()
                .filter(|(_, idx)| idx.is_none())
                .map(|(f, _)| format!("{f:?}").to_lowercase())
                .collect();
            log::warn!(
                "transactions sheet '{}': no {} column, {} rows ignored",
                sheet.name,
                missing.join("/"),
                sheet.len()
            );
            stats.rows_read += sheet.len();
            stats.rows_skipped += sheet.len();
            continue;
        };

        log::debug!(
            "transactions sheet '{}': name={}, date={}, amount={}",
            sheet.name,
            sheet.headers[name_idx],
            sheet.headers[date_idx],
            sheet.headers[amount_idx]
        );

        let opt = |row: usize, idx: Option<usize>| {
            idx.map(|i| sheet.cell(row, i).trim().to_string()).unwrap_or_default()
        };

        for row in 0..sheet.len() {
            stats.rows_read += 1;
            // Header is spreadsheet row 1.
            let row_id = format!("{}#{}", sheet.name, row + 2);
            let payer = sheet.cell(row, name_idx).trim();
            let amount_raw = sheet.cell(row, amount_idx);
            let amount_cents = parse_amount_cents(amount_raw);

            match amount_cents {
                Some(a) if a > 0 && !payer.is_empty() => {}
                None if !amount_raw.trim().is_empty() => {
                    warn_row(ReconError::AmountParse {
                        table: TableKind::Transactions,
                        row: row_id,
                        value: amount_raw.to_string(),
                    });
                    stats.rows_skipped += 1;
                    continue;
                }
                _ => {
                    stats.rows_filtered += 1;
                    continue;
                }
            }
            let Some(amount_cents) = amount_cents else {
                continue;
            };

            let date_raw = sheet.cell(row, date_idx);
            let Some(date) = parse_date(date_raw) else {
                warn_row(ReconError::DateParse {
                    table: TableKind::Transactions,
                    row: row_id,
                    value: date_raw.to_string(),
                });
                stats.rows_skipped += 1;
                continue;
            };

            txns.push(BankTransaction {
                row_id,
                date,
                payer: payer.to_string(),
                amount_cents,
                detail: opt(row, found.detail),
                voucher: opt(row, found.voucher),
                concept: opt(row, found.concept),
                sheet: sheet.name.clone(),
            });
            stats.rows_loaded += 1;
        }
    }

    let mut gaps = Vec::new();
    for (i, (field, words)) in [
        (Field::Name, &cols.name),
        (Field::Date, &cols.date),
        (Field::Amount, &cols.amount),
    ]
    .into_iter()
    .enumerate()
    {
        if !seen[i] {
            gaps.push(ColumnGap {
                table: TableKind::Transactions,
                field,
                column: words.join("|"),
            });
        }
    }

    (txns, stats, gaps)
}

// ---------------------------------------------------------------------------
// Households
// ---------------------------------------------------------------------------

pub fn load_households(
    table: &Table,
    cols: &HouseholdColumns,
) -> (Vec<Household>, TableLoad, Vec<ColumnGap>) {
    let mut gaps = Vec::new();
    let mut stats = TableLoad::default();

    let code_idx = table
        .headers
        .iter()
        .position(|h| h.trim() == cols.code.trim())
        .or_else(|| table.column(&cols.code))
        .or_else(|| table.find_column("codigo"))
        .or_else(|| table.find_column("code"));

    let marker = cols.person_marker.to_lowercase();
    let mut slot_cols: Vec<(String, usize)> = table
        .headers
        .iter()
        .enumerate()
        .filter(|(_, h)| h.to_lowercase().contains(&marker))
        .map(|(i, h)| (h.clone(), i))
        .collect();
    slot_cols.sort();

    if slot_cols.is_empty() {
        log::warn!("households '{}': no person columns matching '{marker}'", table.name);
        gaps.push(ColumnGap {
            table: TableKind::Households,
            field: Field::PersonSlot,
            column: cols.person_marker.clone(),
        });
    }
    let Some(code_idx) = code_idx else {
        log::warn!("households '{}': code column '{}' not found", table.name, cols.code);
        gaps.push(ColumnGap {
            table: TableKind::Households,
            field: Field::HouseholdCode,
            column: cols.code.clone(),
        });
        stats.rows_read = table.len();
        stats.rows_skipped = table.len();
        return (Vec::new(), stats, gaps);
    };
    if table.headers[code_idx].trim() != cols.code.trim() {
        log::info!(
            "households '{}': using '{}' as code column",
            table.name,
            table.headers[code_idx]
        );
    }

    let mut households = Vec::with_capacity(table.len());
    for row in 0..table.len() {
        stats.rows_read += 1;
        let code = table.cell(row, code_idx).trim();
        if code.is_empty() {
            log::warn!("households '{}': row {} has no code, skipped", table.name, row + 2);
            stats.rows_skipped += 1;
            continue;
        }
        let slots = slot_cols
            .iter()
            .map(|(_, i)| table.cell(row, *i).trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        households.push(Household {
            code: code.to_string(),
            slots,
        });
        stats.rows_loaded += 1;
    }

    (households, stats, gaps)
}

// ---------------------------------------------------------------------------
// All inputs
// ---------------------------------------------------------------------------

/// Build engine input from raw tables. Missing columns are recorded as gaps,
/// never returned as errors, so that unaffected passes can still run.
pub fn load_input(
    config: &ReconConfig,
    invoices: &Table,
    transactions: &[Table],
    households: &Table,
) -> (ReconInput, LoadReport) {
    let tills = TillExtractor::new();
    let (invoices, inv_stats, mut gaps) = load_invoices(invoices, &config.columns.invoices, &tills);
    let (txns, txn_stats, txn_gaps) =
        load_transactions(transactions, &config.columns.transactions);
    let (households, hh_stats, hh_gaps) =
        load_households(households, &config.columns.households);
    gaps.extend(txn_gaps);
    gaps.extend(hh_gaps);

    let distinct: BTreeSet<&str> = invoices
        .iter()
        .map(|i| i.till.as_str())
        .filter(|t| !t.is_empty())
        .collect();
    let tills_extracted = invoices.iter().filter(|i| !i.till.is_empty()).count();

    log::info!(
        "loaded {} invoices ({} with till, {} distinct tills), {} transactions from {} sheet(s), {} households",
        invoices.len(),
        tills_extracted,
        distinct.len(),
        txns.len(),
        transactions.len(),
        households.len()
    );

    let report = LoadReport {
        invoices: inv_stats,
        transactions: txn_stats,
        households: hh_stats,
        sheets: transactions.iter().map(|t| t.name.clone()).collect(),
        gaps: gaps.clone(),
        tills_extracted,
        distinct_tills: distinct.len(),
    };
    let input = ReconInput {
        invoices,
        transactions: txns,
        households,
        gaps,
    };
    (input, report)
}

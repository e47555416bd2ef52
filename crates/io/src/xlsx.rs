// Excel import (calamine) and report export (rust_xlsxwriter)

use std::path::Path;
use std::time::Instant;

use calamine::{open_workbook_auto, Data, Reader, Sheets};
use chrono::{Duration, NaiveDate};
use famrecon_recon::model::{format_cents, GroupTotal, MatchKind, TransactionKey};
use famrecon_recon::{ReconInput, ReconResult, Table};
use rust_xlsxwriter::{Format, FormatAlign, Workbook as XlsxWorkbook, Worksheet};

/// Import every non-empty sheet of a workbook (xlsx, xls, xlsb, ods), or only
/// `only` when given. The first non-empty row of each sheet is its header.
pub fn import(path: &Path, only: Option<&str>) -> Result<Vec<Table>, String> {
    let start_time = Instant::now();
    let mut workbook: Sheets<_> = open_workbook_auto(path)
        .map_err(|e| format!("Failed to open Excel file {}: {}", path.display(), e))?;

    let sheet_names: Vec<String> = workbook.sheet_names().to_vec();
    if sheet_names.is_empty() {
        return Err(format!("{} contains no sheets", path.display()));
    }
    if let Some(name) = only {
        if !sheet_names.iter().any(|s| s == name) {
            return Err(format!(
                "{} has no sheet '{}' (sheets: {})",
                path.display(),
                name,
                sheet_names.join(", ")
            ));
        }
    }

    let mut tables = Vec::new();
    for sheet_name in &sheet_names {
        if only.is_some_and(|n| n != sheet_name) {
            continue;
        }
        let range = workbook
            .worksheet_range(sheet_name)
            .map_err(|e| format!("Failed to read sheet '{}': {}", sheet_name, e))?;

        let mut rows = range
            .rows()
            .map(|row| row.iter().map(cell_text).collect::<Vec<String>>())
            .filter(|row| row.iter().any(|c| !c.trim().is_empty()));

        let Some(header) = rows.next() else {
            log::debug!("sheet '{}' is empty, skipped", sheet_name);
            continue;
        };
        let headers = header.into_iter().map(|h| h.trim().to_string()).collect();
        tables.push(Table::new(sheet_name.clone(), headers, rows.collect()));
    }

    log::debug!(
        "read {} sheet(s) from {} in {} ms",
        tables.len(),
        path.display(),
        start_time.elapsed().as_millis()
    );
    Ok(tables)
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(n) => format_float(*n),
        Data::Int(n) => n.to_string(),
        Data::Bool(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
        Data::Error(e) => format!("#{:?}", e),
        Data::DateTime(dt) => serial_to_date(dt.as_f64()),
        // ISO text: keep the date part
        Data::DateTimeIso(s) => s.get(..10).unwrap_or(s).to_string(),
        Data::DurationIso(s) => s.clone(),
    }
}

/// Integers without decimals; fractional values rounded to cents so the
/// amount parser never sees a three-digit fraction.
fn format_float(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        let s = format!("{:.2}", n);
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

/// Excel 1900-system serial to `YYYY-MM-DD`. Time of day is dropped.
fn serial_to_date(serial: f64) -> String {
    let Some(epoch) = NaiveDate::from_ymd_opt(1899, 12, 30) else {
        return serial.to_string();
    };
    match epoch.checked_add_signed(Duration::days(serial.floor() as i64)) {
        Some(d) => d.format("%Y-%m-%d").to_string(),
        None => serial.to_string(),
    }
}

// ============================================================================
// Report export
// ============================================================================

#[derive(Debug, Default, Clone)]
pub struct ExportResult {
    pub sheets_exported: usize,
    pub rows_exported: usize,
    pub export_duration_ms: u128,
}

impl ExportResult {
    pub fn summary(&self) -> String {
        format!(
            "{} sheets, {} rows in {} ms",
            self.sheets_exported, self.rows_exported, self.export_duration_ms
        )
    }
}

/// Cell payload for report rows.
enum Cell {
    Text(String),
    Money(i64),
    Count(usize),
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell::Text(s.to_string())
    }
}

impl From<String> for Cell {
    fn from(s: String) -> Self {
        Cell::Text(s)
    }
}

struct Formats {
    header: Format,
    money: Format,
}

impl Formats {
    fn new() -> Self {
        Self {
            header: Format::new().set_bold().set_align(FormatAlign::Center),
            money: Format::new().set_num_format("#,##0.00"),
        }
    }
}

fn write_sheet(
    book: &mut XlsxWorkbook,
    formats: &Formats,
    name: &str,
    headers: &[&str],
    rows: Vec<Vec<Cell>>,
    result: &mut ExportResult,
) -> Result<(), String> {
    let worksheet: &mut Worksheet = book
        .add_worksheet()
        .set_name(name)
        .map_err(|e| format!("Failed to create sheet '{}': {}", name, e))?;

    for (col, h) in headers.iter().enumerate() {
        worksheet
            .write_string_with_format(0, col as u16, *h, &formats.header)
            .map_err(|e| format!("Failed to write header in '{}': {}", name, e))?;
    }

    for (r, row) in rows.iter().enumerate() {
        let xr = (r + 1) as u32;
        for (c, cell) in row.iter().enumerate() {
            let xc = c as u16;
            let written = match cell {
                Cell::Text(s) => worksheet.write_string(xr, xc, s).map(|_| ()),
                Cell::Money(cents) => worksheet
                    .write_number_with_format(xr, xc, *cents as f64 / 100.0, &formats.money)
                    .map(|_| ()),
                Cell::Count(n) => worksheet.write_number(xr, xc, *n as f64).map(|_| ()),
            };
            written.map_err(|e| format!("Failed to write '{}' row {}: {}", name, r + 2, e))?;
        }
    }

    if !headers.is_empty() {
        worksheet
            .set_freeze_panes(1, 0)
            .map_err(|e| format!("Failed to freeze header in '{}': {}", name, e))?;
        worksheet
            .autofilter(0, 0, rows.len() as u32, (headers.len() - 1) as u16)
            .map_err(|e| format!("Failed to set autofilter in '{}': {}", name, e))?;
    }
    worksheet.autofit();

    result.sheets_exported += 1;
    result.rows_exported += rows.len();
    Ok(())
}

const MATCH_HEADERS: [&str; 16] = [
    "Tipo",
    "Estado",
    "Coincidencia",
    "Facturas",
    "Cantidad_Facturas",
    "Fechas_Facturas",
    "Clientes",
    "Cajas",
    "Monto_Facturas",
    "Fecha_Banco",
    "Nombre_Banco",
    "Monto_Banco",
    "Familia",
    "Detalle",
    "Comprobante",
    "Hoja",
];

fn match_rows<'a>(matches: impl Iterator<Item = &'a famrecon_recon::MatchRecord>) -> Vec<Vec<Cell>> {
    matches
        .map(|m| {
            let dates: Vec<String> = m.invoice_dates.iter().map(|d| d.to_string()).collect();
            vec![
                m.kind.label().into(),
                m.status.into(),
                m.coincidence.into(),
                m.invoice_ids_joined().into(),
                Cell::Count(m.invoice_count),
                dates.join(",").into(),
                m.clients.join(" | ").into(),
                m.tills_joined().into(),
                Cell::Money(m.invoice_total_cents),
                m.transaction.date.to_string().into(),
                m.transaction.payer.clone().into(),
                Cell::Money(m.transaction_amount_cents),
                m.family.to_string().into(),
                m.transaction.detail.clone().into(),
                m.transaction.voucher.clone().into(),
                m.transaction.sheet.clone().into(),
            ]
        })
        .collect()
}

fn total_rows(totals: &[GroupTotal]) -> Vec<Vec<Cell>> {
    totals
        .iter()
        .map(|t| vec![t.key.clone().into(), Cell::Count(t.matches), Cell::Money(t.matched_cents)])
        .collect()
}

/// Sheet name for a match kind; Excel caps names at 31 characters.
fn kind_sheet_name(kind: MatchKind) -> String {
    let label = kind.label().replace(' ', "_");
    label.chars().take(31).collect()
}

/// Write the multi-sheet reconciliation workbook.
pub fn export_report(input: &ReconInput, result: &ReconResult, path: &Path) -> Result<ExportResult, String> {
    let start_time = Instant::now();
    let mut out = ExportResult::default();
    let formats = Formats::new();
    let mut book = XlsxWorkbook::new();

    write_sheet(&mut book, &formats, "Matches", &MATCH_HEADERS, match_rows(result.matches.iter()), &mut out)?;

    for kind in MatchKind::ALL {
        if !result.matches.iter().any(|m| m.kind == kind) {
            continue;
        }
        let rows = match_rows(result.matches.iter().filter(|m| m.kind == kind));
        write_sheet(&mut book, &formats, &kind_sheet_name(kind), &MATCH_HEADERS, rows, &mut out)?;
    }

    let total_headers = |key: &'static str| [key, "Matches", "Monto_Facturas"];
    write_sheet(
        &mut book,
        &formats,
        "Resumen_Familias",
        &total_headers("Familia"),
        total_rows(&result.by_family),
        &mut out,
    )?;
    write_sheet(
        &mut book,
        &formats,
        "Resumen_Cajas",
        &total_headers("Caja"),
        total_rows(&result.by_till),
        &mut out,
    )?;

    let invoice_rows = |invoices: &[famrecon_recon::Invoice]| -> Vec<Vec<Cell>> {
        invoices
            .iter()
            .map(|inv| {
                vec![
                    inv.number.clone().into(),
                    inv.date.map(|d| d.to_string()).unwrap_or_default().into(),
                    inv.client.clone().unwrap_or_default().into(),
                    match inv.amount_cents {
                        Some(c) => Cell::Money(c),
                        None => "".into(),
                    },
                    inv.till.clone().into(),
                ]
            })
            .collect()
    };
    let invoice_headers = ["Factura", "Fecha", "Cliente", "Monto", "Caja"];
    write_sheet(
        &mut book,
        &formats,
        "Facturas_Sin_Match",
        &invoice_headers,
        invoice_rows(&result.unmatched_invoices),
        &mut out,
    )?;

    let txn_headers = ["Fecha", "Nombre", "Monto", "Detalle", "Comprobante", "Concepto", "Hoja", "Fila"];
    let txn_rows: Vec<Vec<Cell>> = result
        .unmatched_transactions
        .iter()
        .map(|t| {
            vec![
                t.date.to_string().into(),
                t.payer.clone().into(),
                Cell::Money(t.amount_cents),
                t.detail.clone().into(),
                t.voucher.clone().into(),
                t.concept.clone().into(),
                t.sheet.clone().into(),
                t.row_id.clone().into(),
            ]
        })
        .collect();
    write_sheet(&mut book, &formats, "Operaciones_Sin_Match", &txn_headers, txn_rows, &mut out)?;

    let family_rows: Vec<Vec<Cell>> = input
        .households
        .iter()
        .flat_map(|h| h.slots.iter().map(move |s| vec![h.code.clone().into(), s.clone().into()]))
        .collect();
    write_sheet(&mut book, &formats, "Familias", &["Código", "Persona"], family_rows, &mut out)?;

    // Every loaded credit with the kind that consumed its identity key, if any
    let consumed_by = |t: &famrecon_recon::BankTransaction| {
        let key = TransactionKey::for_transaction(t, result.meta.identity);
        result
            .matches
            .iter()
            .find(|m| m.transaction_key == key)
            .map(|m| m.kind.label())
            .unwrap_or("")
    };
    let statement_rows: Vec<Vec<Cell>> = input
        .transactions
        .iter()
        .map(|t| {
            vec![
                t.sheet.clone().into(),
                t.row_id.clone().into(),
                t.date.to_string().into(),
                t.payer.clone().into(),
                Cell::Money(t.amount_cents),
                t.detail.clone().into(),
                t.voucher.clone().into(),
                t.concept.clone().into(),
                consumed_by(t).into(),
            ]
        })
        .collect();
    write_sheet(
        &mut book,
        &formats,
        "Extracto_Procesado",
        &["Hoja", "Fila", "Fecha", "Nombre", "Monto", "Detalle", "Comprobante", "Concepto", "Match"],
        statement_rows,
        &mut out,
    )?;

    write_sheet(
        &mut book,
        &formats,
        "Ventas_Con_Cajas",
        &invoice_headers,
        invoice_rows(&input.invoices),
        &mut out,
    )?;

    book.save(path)
        .map_err(|e| format!("Failed to save XLSX file {}: {}", path.display(), e))?;

    out.export_duration_ms = start_time.elapsed().as_millis();
    log::info!(
        "report written to {} ({} matched, {})",
        path.display(),
        format_cents(result.summary.matched_invoice_cents),
        out.summary()
    );
    Ok(out)
}

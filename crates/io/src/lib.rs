// File I/O: input tables and report outputs

pub mod csv;
pub mod json;
pub mod xlsx;

use std::path::Path;

use famrecon_recon::Table;

const SPREADSHEET_EXTENSIONS: [&str; 5] = ["xlsx", "xlsm", "xlsb", "xls", "ods"];

fn is_spreadsheet(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SPREADSHEET_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Read all tables of a file: every sheet of a workbook, or the single
/// table of a delimited text file. `sheet` restricts a workbook to one sheet.
pub fn read_tables(path: &Path, sheet: Option<&str>) -> Result<Vec<Table>, String> {
    if !path.exists() {
        return Err(format!("{}: file not found", path.display()));
    }
    if is_spreadsheet(path) {
        crate::xlsx::import(path, sheet)
    } else {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let table = if ext.eq_ignore_ascii_case("tsv") {
            crate::csv::import_with_delimiter(path, b'\t')?
        } else {
            crate::csv::import(path)?
        };
        Ok(vec![table])
    }
}

/// Read one table: the named sheet, or the first non-empty one.
pub fn read_table(path: &Path, sheet: Option<&str>) -> Result<Table, String> {
    read_tables(path, sheet)?
        .into_iter()
        .next()
        .ok_or_else(|| format!("{}: no data", path.display()))
}

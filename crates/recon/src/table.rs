use crate::error::ReconError;

/// Neutral tabular input: a named sheet of string cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    /// Sheet or file label. Transactions carry it into their row ids.
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(name: impl Into<String>, headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self {
            name: name.into(),
            headers,
            rows,
        }
    }

    /// Parse comma-separated text with a header row.
    pub fn from_csv_str(name: &str, csv_data: &str) -> Result<Self, ReconError> {
        Self::from_delimited(name, csv_data, b',')
    }

    /// Parse delimited text. The first record is the header (trimmed); rows
    /// whose cells are all blank are dropped. Empty text gives an empty table.
    pub fn from_delimited(name: &str, content: &str, delimiter: u8) -> Result<Self, ReconError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(content.as_bytes());

        let mut records = reader.records();
        let headers: Vec<String> = match records.next() {
            Some(first) => first
                .map_err(|e| ReconError::Io(format!("{name}: {e}")))?
                .iter()
                .map(|h| h.trim().to_string())
                .collect(),
            None => return Ok(Self::new(name, Vec::new(), Vec::new())),
        };

        let mut rows = Vec::new();
        for record in records {
            let record = record.map_err(|e| ReconError::Io(format!("{name}: {e}")))?;
            if record.iter().all(|f| f.trim().is_empty()) {
                continue;
            }
            rows.push(record.iter().map(str::to_string).collect());
        }

        Ok(Self::new(name, headers, rows))
    }

    /// Index of the header equal to `name`, ignoring case and padding.
    pub fn column(&self, name: &str) -> Option<usize> {
        let want = name.trim().to_lowercase();
        self.headers.iter().position(|h| h.trim().to_lowercase() == want)
    }

    /// Index of the first header whose lowercase form contains `needle`.
    pub fn find_column(&self, needle: &str) -> Option<usize> {
        let needle = needle.to_lowercase();
        self.headers
            .iter()
            .position(|h| h.to_lowercase().contains(&needle))
    }

    /// Cell text, empty when the row is short.
    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

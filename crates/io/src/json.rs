// JSON export

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use famrecon_recon::ReconResult;

/// Write the whole result as pretty-printed JSON.
pub fn export(result: &ReconResult, path: &Path) -> Result<(), String> {
    let file = File::create(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, result).map_err(|e| e.to_string())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    use famrecon_recon::{run, ReconConfig, ReconInput};

    #[test]
    fn test_json_export() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("result.json");

        let result = run(&ReconConfig::default(), &ReconInput::default()).unwrap();
        export(&result, &path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed["meta"]["config_name"], "reconciliation");
        assert_eq!(parsed["summary"]["invoices_total"], 0);
        assert_eq!(parsed["passes"].as_array().unwrap().len(), 4);
    }
}

//! JSON report export and loading

use crate::error::{IdtraceError, Result};
use crate::report::Report;
use std::path::Path;
use tracing::{info, warn};

/// Writes the report as pretty-printed JSON
pub fn export(report: &Report, output_path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(output_path, json)?;
    info!("JSON report saved to {}", output_path.display());
    Ok(())
}

/// Loads a report, logging any internal inconsistency
pub fn load(input_path: &Path) -> Result<Report> {
    let content = std::fs::read_to_string(input_path).map_err(|e| {
        IdtraceError::ReportError(format!("cannot read {}: {}", input_path.display(), e))
    })?;
    let report: Report = serde_json::from_str(&content)?;
    for problem in report.consistency_errors() {
        warn!("{}: {}", input_path.display(), problem);
    }
    Ok(report)
}

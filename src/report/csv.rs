//! CSV export (RFC 4180 compliant)

use crate::analysis::RiskScore;
use crate::error::Result;
use crate::report::Report;
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Escapes a field for CSV according to RFC 4180
fn escape_csv(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Writes scored candidates, one row per usage
pub fn write_candidates<W: Write>(scored: &[RiskScore], writer: &mut W) -> Result<()> {
    writeln!(
        writer,
        "id_value,id_type,risk_score,risk_level,method,url,location,field,reason"
    )?;

    for s in scored {
        for usage in &s.candidate.usages {
            let row = [
                escape_csv(&s.id_value),
                escape_csv(s.id_type.as_str()),
                s.score.to_string(),
                s.level.to_string(),
                escape_csv(&usage.method),
                escape_csv(&usage.url),
                usage.location.to_string(),
                escape_csv(usage.field.as_deref().unwrap_or("")),
                escape_csv(&s.candidate.reason),
            ];
            writeln!(writer, "{}", row.join(","))?;
        }
    }
    Ok(())
}

/// Writes one row per flow with its identifier lists
pub fn write_flows<W: Write>(report: &Report, writer: &mut W) -> Result<()> {
    writeln!(
        writer,
        "timestamp,method,url,status,request_id_count,response_id_count,request_ids,response_ids"
    )?;

    for flow in &report.flows {
        let join = |ids: &[crate::report::IdRef]| {
            ids.iter()
                .map(|i| i.value.as_str())
                .collect::<Vec<_>>()
                .join("; ")
        };
        let row = [
            flow.timestamp.to_rfc3339(),
            escape_csv(&flow.method),
            escape_csv(&flow.url),
            flow.status_code.map(|s| s.to_string()).unwrap_or_default(),
            flow.request_ids.len().to_string(),
            flow.response_ids.len().to_string(),
            escape_csv(&join(&flow.request_ids)),
            escape_csv(&join(&flow.response_ids)),
        ];
        writeln!(writer, "{}", row.join(","))?;
    }
    Ok(())
}

/// Exports scored candidates as a CSV file
pub fn export_candidates(scored: &[RiskScore], output_path: &Path) -> Result<()> {
    let file = std::fs::File::create(output_path)?;
    let mut writer = std::io::BufWriter::new(file);
    write_candidates(scored, &mut writer)?;
    writer.flush()?;
    info!("CSV report saved to {}", output_path.display());
    Ok(())
}

/// Exports the flow list as a CSV file
pub fn export_flows(report: &Report, output_path: &Path) -> Result<()> {
    let file = std::fs::File::create(output_path)?;
    let mut writer = std::io::BufWriter::new(file);
    write_flows(report, &mut writer)?;
    writer.flush()?;
    info!("CSV flow list saved to {}", output_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::rank;
    use crate::models::{Direction, IdOccurrence, IdType, IdorCandidate, Location, IDOR_REASON};
    use chrono::Utc;

    #[test]
    fn test_escape_csv() {
        assert_eq!(escape_csv("plain"), "plain");
        assert_eq!(escape_csv("a,b"), "\"a,b\"");
        assert_eq!(escape_csv("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_candidate_rows() {
        let usage = IdOccurrence {
            value: "9999".to_string(),
            id_type: IdType::Numeric,
            location: Location::Query,
            field: Some("id".to_string()),
            url: "https://a.com/orders?id=9999,1".to_string(),
            method: "GET".to_string(),
            timestamp: Utc::now(),
            direction: Direction::Request,
            flow_id: "f".to_string(),
        };
        let scored = rank(&[IdorCandidate {
            id_value: "9999".to_string(),
            id_type: IdType::Numeric,
            usages: vec![usage],
            reason: IDOR_REASON.to_string(),
        }]);

        let mut out = Vec::new();
        write_candidates(&scored, &mut out).expect("write");
        let text = String::from_utf8(out).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[1],
            "9999,numeric,50,medium,GET,\"https://a.com/orders?id=9999,1\",query,id,ID used in request but never seen in response"
        );
    }
}

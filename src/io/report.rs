// src/io/report.rs
//
// Structured query reports: the full JSON record per query plus a one-line
// CSV summary, written next to the input file unless an explicit output
// path is given.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::info;
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::models::{CompanyInfo, CompanyPartner, CompanyResolution, ResolutionOutcome};

#[derive(Debug, Clone, Serialize)]
pub struct PartnerQueryReport {
    pub identifier: String,
    pub name: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    pub companies: Vec<CompanyInfo>,
    pub elapsed_time_ms: u64,
    pub generated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PartnerQueryReport {
    pub fn from_outcome(
        identifier: &str,
        name: Option<&str>,
        outcome: &ResolutionOutcome,
        elapsed_time_ms: u64,
    ) -> Self {
        let mut report = Self {
            identifier: identifier.to_string(),
            name: name.map(|n| n.to_string()),
            status: outcome.status_str().to_string(),
            matched_name: None,
            matched_identifier: None,
            score: None,
            companies: Vec::new(),
            elapsed_time_ms,
            generated_at: Utc::now(),
            error: None,
        };
        match outcome {
            ResolutionOutcome::Found(matched) => {
                report.matched_name = Some(matched.partner.partner_name.clone());
                report.matched_identifier = Some(matched.partner.raw_identifier.clone());
                report.score = matched.score;
                report.companies = matched.companies.clone();
            }
            ResolutionOutcome::Listing(matches) => {
                report.companies = matches.iter().flat_map(|m| m.companies.clone()).collect();
            }
            ResolutionOutcome::NoNameMatch { best_score } => {
                report.score = Some(*best_score);
            }
            ResolutionOutcome::InvalidIdentifier | ResolutionOutcome::NotFound => {}
        }
        report
    }

    /// Storage faults become a report, not a propagated error: batch runs
    /// keep going and callers always get a structured row back.
    pub fn from_error(
        identifier: &str,
        name: Option<&str>,
        message: &str,
        elapsed_time_ms: u64,
    ) -> Self {
        Self {
            identifier: identifier.to_string(),
            name: name.map(|n| n.to_string()),
            status: "error".to_string(),
            matched_name: None,
            matched_identifier: None,
            score: None,
            companies: Vec::new(),
            elapsed_time_ms,
            generated_at: Utc::now(),
            error: Some(message.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CompanyQueryReport {
    pub cnpj: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cnpj_base: Option<String>,
    pub companies: Vec<CompanyInfo>,
    pub partners: Vec<CompanyPartner>,
    pub elapsed_time_ms: u64,
    pub generated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CompanyQueryReport {
    pub fn from_resolution(cnpj: &str, resolution: &CompanyResolution, elapsed_time_ms: u64) -> Self {
        let mut report = Self {
            cnpj: cnpj.to_string(),
            status: resolution.status_str().to_string(),
            cnpj_base: None,
            companies: Vec::new(),
            partners: Vec::new(),
            elapsed_time_ms,
            generated_at: Utc::now(),
            error: None,
        };
        if let CompanyResolution::Found {
            cnpj_base,
            companies,
            partners,
        } = resolution
        {
            report.cnpj_base = Some(cnpj_base.clone());
            report.companies = companies.clone();
            report.partners = partners.clone();
        }
        report
    }

    pub fn from_error(cnpj: &str, message: &str, elapsed_time_ms: u64) -> Self {
        Self {
            cnpj: cnpj.to_string(),
            status: "error".to_string(),
            cnpj_base: None,
            companies: Vec::new(),
            partners: Vec::new(),
            elapsed_time_ms,
            generated_at: Utc::now(),
            error: Some(message.to_string()),
        }
    }
}

/// `<input stem>_results.<ext>` next to the input file.
pub fn sibling_output_path(input: &Path, ext: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("lookup");
    input.with_file_name(format!("{}_results.{}", stem, ext))
}

pub fn write_json<T: Serialize>(path: &Path, reports: &[T]) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create output file {}", path.display()))?;
    serde_json::to_writer_pretty(file, reports)
        .with_context(|| format!("Failed to write JSON to {}", path.display()))?;
    info!("Wrote {} records to {}", reports.len(), path.display());
    Ok(())
}

pub fn write_partner_csv_summary(path: &Path, reports: &[PartnerQueryReport]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create summary file {}", path.display()))?;
    writer
        .write_record([
            "identifier",
            "name",
            "status",
            "score",
            "matched_name",
            "company_count",
            "companies",
        ])
        .context("Failed to write summary header")?;
    for report in reports {
        writer
            .write_record(partner_summary_row(report))
            .context("Failed to write summary row")?;
    }
    writer.flush().context("Failed to flush summary file")?;
    info!("Wrote summary for {} queries to {}", reports.len(), path.display());
    Ok(())
}

fn partner_summary_row(report: &PartnerQueryReport) -> [String; 7] {
    [
        report.identifier.clone(),
        report.name.clone().unwrap_or_default(),
        report.status.clone(),
        report.score.map(|s| format!("{:.3}", s)).unwrap_or_default(),
        report.matched_name.clone().unwrap_or_default(),
        report.companies.len().to_string(),
        report
            .companies
            .iter()
            .map(|c| c.company_name.as_str())
            .collect::<Vec<_>>()
            .join(", "),
    ]
}

pub fn write_company_csv_summary(path: &Path, reports: &[CompanyQueryReport]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create summary file {}", path.display()))?;
    writer
        .write_record([
            "cnpj",
            "cnpj_base",
            "status",
            "company_name",
            "status_label",
            "partner_count",
        ])
        .context("Failed to write summary header")?;
    for report in reports {
        let first = report.companies.first();
        writer
            .write_record([
                report.cnpj.clone(),
                report.cnpj_base.clone().unwrap_or_default(),
                report.status.clone(),
                first.map(|c| c.company_name.clone()).unwrap_or_default(),
                first.map(|c| c.status_label.clone()).unwrap_or_default(),
                report.partners.len().to_string(),
            ])
            .context("Failed to write summary row")?;
    }
    writer.flush().context("Failed to flush summary file")?;
    info!("Wrote summary for {} queries to {}", reports.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MatchedPartner, PartnerRecord};

    fn found_outcome() -> ResolutionOutcome {
        ResolutionOutcome::Found(Box::new(MatchedPartner {
            partner: PartnerRecord {
                row_id: 7,
                cnpj_base: "12345678".to_string(),
                partner_name: "MARIA DA SILVA".to_string(),
                raw_identifier: "***456789**".to_string(),
                cpf_core: "456789".to_string(),
            },
            score: Some(1.0),
            companies: Vec::new(),
        }))
    }

    #[test]
    fn test_found_report_carries_match_fields() {
        let report =
            PartnerQueryReport::from_outcome("123.456.789-01", Some("Maria Da Silva"), &found_outcome(), 12);
        assert_eq!(report.status, "found");
        assert_eq!(report.matched_name.as_deref(), Some("MARIA DA SILVA"));
        assert_eq!(report.matched_identifier.as_deref(), Some("***456789**"));
        assert_eq!(report.score, Some(1.0));
        assert_eq!(report.elapsed_time_ms, 12);
    }

    #[test]
    fn test_mismatch_report_carries_best_score() {
        let outcome = ResolutionOutcome::NoNameMatch { best_score: 0.42 };
        let report = PartnerQueryReport::from_outcome("12345678901", Some("X"), &outcome, 3);
        assert_eq!(report.status, "name_mismatch");
        assert_eq!(report.score, Some(0.42));
        assert!(report.matched_name.is_none());
        assert!(report.companies.is_empty());
    }

    #[test]
    fn test_error_report_shape() {
        let report = PartnerQueryReport::from_error("123", None, "connection refused", 5);
        assert_eq!(report.status, "error");
        assert_eq!(report.error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_sibling_output_path() {
        let path = sibling_output_path(Path::new("/data/socios.txt"), "json");
        assert_eq!(path, PathBuf::from("/data/socios_results.json"));
    }

    #[test]
    fn test_summary_row_formatting() {
        let report =
            PartnerQueryReport::from_outcome("123.456.789-01", Some("Maria"), &found_outcome(), 12);
        let row = partner_summary_row(&report);
        assert_eq!(row[2], "found");
        assert_eq!(row[3], "1.000");
        assert_eq!(row[5], "0");
    }
}

// src/matching/resolver.rs
//
// Orchestrates a lookup: derive the core, pick a query strategy, fetch the
// candidate set, score names, return the best match or a definite miss.

use anyhow::{Context, Result};
use log::debug;

use crate::matching::db::{
    count_populated_cores, fetch_candidates_by_core, fetch_candidates_by_raw_scan,
    fetch_company_legal_name, fetch_establishments, fetch_partners_for_base, EstablishmentRow,
    CANDIDATE_LIMIT, CORE_POPULATION_THRESHOLD,
};
use crate::matching::identifier::{core_is_usable, extract_cnpj_base, extract_cpf_core};
use crate::matching::name::{accepts, normalize_name, sequence_ratio};
use crate::models::{
    registration_status_label, CompanyInfo, CompanyResolution, MatchCandidate, MatchedPartner,
    PartnerRecord, ResolutionOutcome, COMPANY_NAME_UNAVAILABLE,
};
use crate::utils::db_connect::PgPool;
use crate::utils::schema_map::RegistrySchema;

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.7;

/// Resolves a raw (possibly masked/partial) CPF identifier, plus an optional
/// free-text name, to the best-matching partner record and its companies.
///
/// Never fails on a miss: not-found and name-mismatch are outcomes. Errors
/// surface only for storage faults; the connection is released on every exit
/// path by scope.
pub async fn resolve_partner(
    pool: &PgPool,
    schema: &RegistrySchema,
    raw_identifier: &str,
    name: Option<&str>,
    threshold: f64,
    limit: usize,
) -> Result<ResolutionOutcome> {
    let core = extract_cpf_core(raw_identifier);
    if !core_is_usable(&core) {
        debug!("Identifier '{}' yields unusable core '{}'", raw_identifier, core);
        return Ok(ResolutionOutcome::InvalidIdentifier);
    }

    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for partner resolution")?;

    let populated = count_populated_cores(&*conn, schema).await?;
    let candidates = if populated > CORE_POPULATION_THRESHOLD {
        debug!(
            "Derived core column is populated ({}+ rows); using indexed lookup for core {}",
            CORE_POPULATION_THRESHOLD, core
        );
        fetch_candidates_by_core(&*conn, schema, &core).await?
    } else {
        debug!(
            "Only {} rows carry a well-formed derived core; scanning raw identifiers for core {}",
            populated, core
        );
        fetch_candidates_by_raw_scan(&*conn, schema, &core).await?
    };

    if candidates.is_empty() {
        return Ok(ResolutionOutcome::NotFound);
    }
    debug!("{} candidates at core {}", candidates.len(), core);

    let query_name = match name {
        Some(n) if !normalize_name(n).is_empty() => n,
        _ => {
            // No name to score against: list matches, one per cnpj base.
            let cap = limit.min(CANDIDATE_LIMIT as usize);
            let mut listed = Vec::new();
            for record in distinct_by_base(candidates).into_iter().take(cap) {
                let companies = resolve_company_info(&*conn, schema, &record.cnpj_base).await?;
                listed.push(MatchedPartner {
                    partner: record,
                    score: None,
                    companies,
                });
            }
            return Ok(ResolutionOutcome::Listing(listed));
        }
    };

    let ranked = rank_candidates(candidates, &normalize_name(query_name));
    let best = &ranked[0];
    if !accepts(best.score, threshold) {
        debug!(
            "Best candidate '{}' scored {:.3}, below threshold {:.2}",
            best.record.partner_name, best.score, threshold
        );
        return Ok(ResolutionOutcome::NoNameMatch {
            best_score: best.score,
        });
    }

    let companies = resolve_company_info(&*conn, schema, &best.record.cnpj_base).await?;
    Ok(ResolutionOutcome::Found(Box::new(MatchedPartner {
        partner: best.record.clone(),
        score: Some(best.score),
        companies,
    })))
}

/// Scores every candidate's normalized name against the normalized query and
/// returns them sorted by descending score. The sort is stable, so equal
/// scores keep their original query order.
pub fn rank_candidates(records: Vec<PartnerRecord>, normalized_query: &str) -> Vec<MatchCandidate> {
    let mut ranked: Vec<MatchCandidate> = records
        .into_iter()
        .map(|record| {
            let score = sequence_ratio(normalized_query, &normalize_name(&record.partner_name));
            MatchCandidate { record, score }
        })
        .collect();
    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    ranked
}

/// Keeps the first record for each cnpj base, preserving query order.
pub fn distinct_by_base(records: Vec<PartnerRecord>) -> Vec<PartnerRecord> {
    let mut seen = std::collections::HashSet::new();
    records
        .into_iter()
        .filter(|r| seen.insert(r.cnpj_base.clone()))
        .collect()
}

/// Looks up a company by CNPJ: establishment rows with status labels plus
/// the partner list for the cnpj base.
pub async fn resolve_company(
    pool: &PgPool,
    schema: &RegistrySchema,
    cnpj: &str,
) -> Result<CompanyResolution> {
    let Some(base) = extract_cnpj_base(cnpj) else {
        return Ok(CompanyResolution::InvalidIdentifier);
    };

    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for company resolution")?;

    let companies = resolve_company_info(&*conn, schema, &base).await?;
    if companies.is_empty() {
        return Ok(CompanyResolution::NotFound);
    }
    let partners = fetch_partners_for_base(&*conn, schema, &base).await?;
    Ok(CompanyResolution::Found {
        cnpj_base: base,
        companies,
        partners,
    })
}

/// Builds labeled [`CompanyInfo`] rows for one cnpj base. The display name
/// is tried from the configured sources in priority order: the company
/// master's legal name, then the establishment's trade name; neither yields
/// the unavailable sentinel.
async fn resolve_company_info(
    client: &impl tokio_postgres::GenericClient,
    schema: &RegistrySchema,
    cnpj_base: &str,
) -> Result<Vec<CompanyInfo>> {
    let establishments = fetch_establishments(client, schema, cnpj_base).await?;
    if establishments.is_empty() {
        return Ok(Vec::new());
    }

    let legal_name = fetch_company_legal_name(client, schema, cnpj_base).await?;

    Ok(establishments
        .into_iter()
        .map(|row| company_info_from_row(row, legal_name.as_deref()))
        .collect())
}

fn company_info_from_row(row: EstablishmentRow, legal_name: Option<&str>) -> CompanyInfo {
    let status_code = row.status_code.unwrap_or_default();
    CompanyInfo {
        cnpj_base: row.cnpj_base,
        company_name: display_name(legal_name, row.trade_name.as_deref()),
        status_label: registration_status_label(&status_code),
        status_code,
        address: synthesize_address(row.street.as_deref(), row.number.as_deref()),
        district: row.district.filter(|s| field_is_present(s)),
        state: row.state.filter(|s| field_is_present(s)),
        primary_activity: row.primary_activity.filter(|s| field_is_present(s)),
    }
}

/// First non-empty name from the prioritized sources, or the sentinel.
pub fn display_name(legal_name: Option<&str>, trade_name: Option<&str>) -> String {
    [legal_name, trade_name]
        .into_iter()
        .flatten()
        .find(|s| field_is_present(s))
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| COMPANY_NAME_UNAVAILABLE.to_string())
}

/// Street + number, only when both fields actually carry a value.
pub fn synthesize_address(street: Option<&str>, number: Option<&str>) -> Option<String> {
    match (street, number) {
        (Some(s), Some(n)) if field_is_present(s) && field_is_present(n) => {
            Some(format!("{} {}", s.trim(), n.trim()))
        }
        _ => None,
    }
}

// Ingested CSVs leave literal null-ish markers behind in text columns.
fn field_is_present(value: &str) -> bool {
    let trimmed = value.trim();
    !trimmed.is_empty() && !matches!(trimmed.to_ascii_lowercase().as_str(), "null" | "none" | "nan")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64, base: &str, name: &str) -> PartnerRecord {
        PartnerRecord {
            row_id: id,
            cnpj_base: base.to_string(),
            partner_name: name.to_string(),
            raw_identifier: "***331355**".to_string(),
            cpf_core: "331355".to_string(),
        }
    }

    #[test]
    fn test_best_candidate_wins_not_first() {
        let records = vec![
            record(1, "11111111", "MARCO AURELIO PINTO"),
            record(2, "22222222", "MARIA DA SILVA"),
        ];
        let ranked = rank_candidates(records, &normalize_name("Maria Da Silva"));
        assert_eq!(ranked[0].record.cnpj_base, "22222222");
        assert_eq!(ranked[0].score, 1.0);
        assert!(ranked[1].score < ranked[0].score);
    }

    #[test]
    fn test_threshold_flip_found_to_mismatch() {
        let records = vec![
            record(1, "11111111", "MARIA DA SILVA COSTA"),
            record(2, "22222222", "JOSE ROBERTO LIMA"),
        ];
        let ranked = rank_candidates(records, &normalize_name("Maria da Silva"));
        let best = ranked[0].score;
        assert!(best > 0.7 && best < 1.0);
        // Same query, same best score; only the threshold decides the outcome.
        assert!(accepts(best, 0.7));
        assert!(!accepts(best, best + 0.01));
    }

    #[test]
    fn test_rank_is_stable_on_ties() {
        let records = vec![
            record(1, "11111111", "ANA LIMA"),
            record(2, "22222222", "ANA LIMA"),
        ];
        let ranked = rank_candidates(records, &normalize_name("Ana Lima"));
        assert_eq!(ranked[0].record.row_id, 1);
        assert_eq!(ranked[1].record.row_id, 2);
    }

    #[test]
    fn test_distinct_by_base_keeps_first() {
        let records = vec![
            record(1, "11111111", "A"),
            record(2, "11111111", "B"),
            record(3, "22222222", "C"),
        ];
        let distinct = distinct_by_base(records);
        assert_eq!(distinct.len(), 2);
        assert_eq!(distinct[0].row_id, 1);
        assert_eq!(distinct[1].row_id, 3);
    }

    #[test]
    fn test_display_name_priority() {
        assert_eq!(display_name(Some("ACME LTDA"), Some("ACME STORE")), "ACME LTDA");
        assert_eq!(display_name(None, Some("ACME STORE")), "ACME STORE");
        assert_eq!(display_name(Some("  "), Some("ACME STORE")), "ACME STORE");
        assert_eq!(display_name(None, None), COMPANY_NAME_UNAVAILABLE);
        assert_eq!(display_name(Some("null"), None), COMPANY_NAME_UNAVAILABLE);
    }

    #[test]
    fn test_address_needs_both_fields() {
        assert_eq!(
            synthesize_address(Some("RUA NILSO BRAUN"), Some("120")),
            Some("RUA NILSO BRAUN 120".to_string())
        );
        assert_eq!(synthesize_address(Some("RUA NILSO BRAUN"), None), None);
        assert_eq!(synthesize_address(None, Some("120")), None);
        assert_eq!(synthesize_address(Some("RUA X"), Some("null")), None);
        assert_eq!(synthesize_address(Some(""), Some("120")), None);
    }

    #[test]
    fn test_company_info_labels_status() {
        let row = EstablishmentRow {
            cnpj_base: "12345678".to_string(),
            status_code: Some("02".to_string()),
            primary_activity: Some("4723700".to_string()),
            street: Some("RUA A".to_string()),
            number: Some("10".to_string()),
            district: Some("CENTRO".to_string()),
            state: Some("SC".to_string()),
            trade_name: None,
        };
        let info = company_info_from_row(row, Some("ACME LTDA"));
        assert_eq!(info.status_label, "ATIVA");
        assert_eq!(info.status_code, "02");
        assert_eq!(info.company_name, "ACME LTDA");
        assert_eq!(info.address.as_deref(), Some("RUA A 10"));
    }
}

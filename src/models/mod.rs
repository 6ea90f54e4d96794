// src/models/mod.rs

use serde::Serialize;

/// One (company, partner) relationship row from the partner table.
///
/// `cpf_core` is the derived 6-digit lookup key; it is only trustworthy once
/// the backfill has populated it, which is why the resolver may fall back to
/// extracting from `raw_identifier` at query time.
#[derive(Debug, Clone, Serialize)]
pub struct PartnerRecord {
    pub row_id: i64,
    pub cnpj_base: String,
    pub partner_name: String,
    pub raw_identifier: String,
    pub cpf_core: String,
}

/// A partner record annotated with its name-similarity score for one query.
#[derive(Debug, Clone)]
pub struct MatchCandidate {
    pub record: PartnerRecord,
    pub score: f64,
}

/// One establishment row, with its registration status resolved to a label.
#[derive(Debug, Clone, Serialize)]
pub struct CompanyInfo {
    pub cnpj_base: String,
    pub company_name: String,
    pub status_code: String,
    pub status_label: String,
    pub address: Option<String>,
    pub district: Option<String>,
    pub state: Option<String>,
    pub primary_activity: Option<String>,
}

/// A resolved partner together with the companies sharing its cnpj base.
/// `score` is absent for bulk listings (no name supplied, nothing scored).
#[derive(Debug, Clone, Serialize)]
pub struct MatchedPartner {
    pub partner: PartnerRecord,
    pub score: Option<f64>,
    pub companies: Vec<CompanyInfo>,
}

/// Terminal outcome of a partner resolution. Not-found and no-match are
/// first-class results, not errors.
#[derive(Debug, Clone)]
pub enum ResolutionOutcome {
    /// Core extraction yielded fewer than 3 digits.
    InvalidIdentifier,
    /// No partner row carries the extracted core (on the selected query path).
    NotFound,
    /// Candidates exist but none reached the threshold; carries the best
    /// score seen, for diagnostics.
    NoNameMatch { best_score: f64 },
    /// Best-scoring candidate reached the threshold.
    Found(Box<MatchedPartner>),
    /// No name supplied: first matches at the core, distinct by cnpj base.
    Listing(Vec<MatchedPartner>),
}

impl ResolutionOutcome {
    /// Wire status string used by reports and the HTTP API.
    pub fn status_str(&self) -> &'static str {
        match self {
            ResolutionOutcome::InvalidIdentifier => "invalid_identifier",
            ResolutionOutcome::NotFound => "not_found",
            ResolutionOutcome::NoNameMatch { .. } => "name_mismatch",
            ResolutionOutcome::Found(_) | ResolutionOutcome::Listing(_) => "found",
        }
    }
}

/// A partner as listed under a company lookup.
#[derive(Debug, Clone, Serialize)]
pub struct CompanyPartner {
    pub partner_name: String,
    pub raw_identifier: String,
}

/// Outcome of a company-side lookup by CNPJ.
#[derive(Debug, Clone)]
pub enum CompanyResolution {
    /// Fewer than 8 digits: no cnpj base to look up.
    InvalidIdentifier,
    NotFound,
    Found {
        cnpj_base: String,
        companies: Vec<CompanyInfo>,
        partners: Vec<CompanyPartner>,
    },
}

impl CompanyResolution {
    pub fn status_str(&self) -> &'static str {
        match self {
            CompanyResolution::InvalidIdentifier => "invalid_identifier",
            CompanyResolution::NotFound => "not_found",
            CompanyResolution::Found { .. } => "found",
        }
    }
}

/// Shown when none of the configured company-name sources has a value.
pub const COMPANY_NAME_UNAVAILABLE: &str = "NOME INDISPONÍVEL";

/// Maps a registration status code to its label. Codes arrive either bare
/// ("2") or zero-padded ("02"); both forms map to the same label. The table
/// must stay byte-identical to what downstream consumers of this registry
/// already expect.
pub fn registration_status_label(code: &str) -> String {
    let trimmed = code.trim();
    let canonical = match trimmed.strip_prefix('0') {
        Some(rest) if !rest.is_empty() => rest,
        _ => trimmed,
    };
    let label = match canonical {
        "1" => "NULA",
        "2" => "ATIVA",
        "3" => "SUSPENSA",
        "4" => "INAPTA",
        "5" => "CANCELADA",
        "6" => "IRREGULAR",
        "7" => "LIQUIDAÇÃO EXTRAJUDICIAL",
        "8" => "BAIXADA",
        _ => return format!("DESCONHECIDA ({})", trimmed),
    };
    label.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_labels_bare_and_padded() {
        assert_eq!(registration_status_label("2"), "ATIVA");
        assert_eq!(registration_status_label("02"), "ATIVA");
        assert_eq!(registration_status_label("8"), "BAIXADA");
        assert_eq!(registration_status_label("08"), "BAIXADA");
        assert_eq!(registration_status_label("7"), "LIQUIDAÇÃO EXTRAJUDICIAL");
    }

    #[test]
    fn test_status_label_unknown_code() {
        assert_eq!(registration_status_label("9"), "DESCONHECIDA (9)");
        assert_eq!(registration_status_label("42"), "DESCONHECIDA (42)");
        assert_eq!(registration_status_label(""), "DESCONHECIDA ()");
    }

    #[test]
    fn test_status_label_whitespace() {
        assert_eq!(registration_status_label(" 2 "), "ATIVA");
    }

    #[test]
    fn test_outcome_status_strings() {
        assert_eq!(ResolutionOutcome::InvalidIdentifier.status_str(), "invalid_identifier");
        assert_eq!(ResolutionOutcome::NotFound.status_str(), "not_found");
        assert_eq!(
            ResolutionOutcome::NoNameMatch { best_score: 0.5 }.status_str(),
            "name_mismatch"
        );
    }
}

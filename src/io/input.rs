// src/io/input.rs
//
// Batch-input readers. Lists arrive as loose CSV exports (unknown delimiter,
// header names that may or may not say what the columns are) or as plain
// text, one record per line.

use anyhow::{bail, Context, Result};
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::Path;

use crate::matching::identifier::CNPJ_BASE_LEN;

/// One partner query: a free-text name and a raw identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartnerQuery {
    pub name: String,
    pub cpf: String,
}

const CSV_DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

// Formatted or bare 11-digit CPF anywhere in a line.
static CPF_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{3}\.?\d{3}\.?\d{3}-?\d{2}|\d{11})").unwrap());

/// Reads a partner list from a `.csv` or `.txt` file.
pub fn read_partner_queries(path: &Path) -> Result<Vec<PartnerQuery>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read input file {}", path.display()))?;
    let queries = if has_extension(path, "csv") {
        parse_partner_csv(&content)?
    } else {
        parse_partner_txt(&content)
    };
    if queries.is_empty() {
        bail!("No partner records found in {}", path.display());
    }
    debug!("Read {} partner queries from {}", queries.len(), path.display());
    Ok(queries)
}

/// Reads a CNPJ list from a `.csv` or `.txt` file. Entries are reduced to
/// digits; anything too short to carry a cnpj base is dropped.
pub fn read_company_list(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read input file {}", path.display()))?;
    let raw: Vec<String> = if has_extension(path, "csv") {
        parse_company_csv(&content)?
    } else {
        content.lines().map(|l| l.trim().to_string()).collect()
    };
    let cnpjs: Vec<String> = raw
        .iter()
        .map(|c| c.chars().filter(|ch| ch.is_ascii_digit()).collect::<String>())
        .filter(|c| c.len() >= CNPJ_BASE_LEN)
        .collect();
    if cnpjs.is_empty() {
        bail!("No usable CNPJ entries found in {}", path.display());
    }
    debug!("Read {} CNPJ entries from {}", cnpjs.len(), path.display());
    Ok(cnpjs)
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

/// Tries each known delimiter until one yields a header row where the name
/// and identifier columns can be located: a header containing "nome" /
/// "cpf", or failing that the first two columns.
pub fn parse_partner_csv(content: &str) -> Result<Vec<PartnerQuery>> {
    for delimiter in CSV_DELIMITERS {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_reader(content.as_bytes());
        let headers = match reader.headers() {
            Ok(h) => h.clone(),
            Err(_) => continue,
        };
        if headers.len() < 2 {
            continue;
        }

        let name_idx = find_column(&headers, "nome");
        let cpf_idx = find_column(&headers, "cpf");
        let (name_idx, cpf_idx) = match (name_idx, cpf_idx) {
            (Some(n), Some(c)) => (n, c),
            _ => (0, 1),
        };

        let mut queries = Vec::new();
        for record in reader.records() {
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    warn!("Skipping unparseable CSV record: {}", e);
                    continue;
                }
            };
            let name = record.get(name_idx).unwrap_or_default().trim();
            let cpf = record.get(cpf_idx).unwrap_or_default().trim();
            if name.is_empty() && cpf.is_empty() {
                continue;
            }
            queries.push(PartnerQuery {
                name: name.to_string(),
                cpf: cpf.to_string(),
            });
        }
        if !queries.is_empty() {
            return Ok(queries);
        }
    }
    bail!("Could not locate name/identifier columns with any known delimiter");
}

/// One record per line: `name;cpf` (also `,` or tab separated), or a line
/// ending in a recognizable CPF with the name in front of it.
pub fn parse_partner_txt(content: &str) -> Vec<PartnerQuery> {
    let mut queries = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split([';', ',', '\t']).collect();
        if parts.len() >= 2 {
            queries.push(PartnerQuery {
                name: parts[0].trim().to_string(),
                cpf: parts[1].trim().to_string(),
            });
        } else if let Some(m) = CPF_PATTERN.find(line) {
            queries.push(PartnerQuery {
                name: line[..m.start()].trim().to_string(),
                cpf: m.as_str().to_string(),
            });
        } else {
            warn!("Skipping line with no recognizable identifier: '{}'", line);
        }
    }
    queries
}

fn parse_company_csv(content: &str) -> Result<Vec<String>> {
    for delimiter in CSV_DELIMITERS {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_reader(content.as_bytes());
        let headers = match reader.headers() {
            Ok(h) => h.clone(),
            Err(_) => continue,
        };
        if headers.is_empty() {
            continue;
        }
        let idx = find_column(&headers, "cnpj").unwrap_or(0);

        let values: Vec<String> = reader
            .records()
            .filter_map(|r| r.ok())
            .filter_map(|r| r.get(idx).map(|v| v.trim().to_string()))
            .filter(|v| !v.is_empty())
            .collect();
        if !values.is_empty() {
            return Ok(values);
        }
    }
    bail!("Could not locate a CNPJ column with any known delimiter");
}

fn find_column(headers: &csv::StringRecord, needle: &str) -> Option<usize> {
    headers
        .iter()
        .position(|h| h.to_lowercase().contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_with_named_headers() {
        let content = "nome_socio,cpf_socio\nMaria da Silva,123.456.789-01\nJose Lima,***331355**\n";
        let queries = parse_partner_csv(content).unwrap();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].name, "Maria da Silva");
        assert_eq!(queries[0].cpf, "123.456.789-01");
    }

    #[test]
    fn test_csv_with_semicolons_and_swapped_columns() {
        let content = "cpf;nome\n123.456.789-01;Maria da Silva\n";
        let queries = parse_partner_csv(content).unwrap();
        assert_eq!(queries[0].name, "Maria da Silva");
        assert_eq!(queries[0].cpf, "123.456.789-01");
    }

    #[test]
    fn test_csv_without_recognizable_headers_uses_first_two_columns() {
        let content = "a|b\nMaria da Silva|12345678901\n";
        let queries = parse_partner_csv(content).unwrap();
        assert_eq!(queries[0].name, "Maria da Silva");
        assert_eq!(queries[0].cpf, "12345678901");
    }

    #[test]
    fn test_txt_with_separators() {
        let content = "Maria da Silva;123.456.789-01\nJose Lima\t11122233344\n\n";
        let queries = parse_partner_txt(content);
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[1].cpf, "11122233344");
    }

    #[test]
    fn test_txt_with_trailing_cpf() {
        let content = "Maria da Silva 123.456.789-01\nno identifier here\n";
        let queries = parse_partner_txt(content);
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].name, "Maria da Silva");
        assert_eq!(queries[0].cpf, "123.456.789-01");
    }

    #[test]
    fn test_company_csv_picks_cnpj_column() {
        let content = "empresa,cnpj\nAcme,12.345.678/0001-90\n";
        let values = parse_company_csv(content).unwrap();
        assert_eq!(values, vec!["12.345.678/0001-90"]);
    }
}

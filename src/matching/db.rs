// src/matching/db.rs

use anyhow::{Context, Result};
use tokio_postgres::GenericClient;

use crate::models::{CompanyPartner, PartnerRecord};
use crate::utils::schema_map::RegistrySchema;

/// Hard cap on candidate rows per lookup, on both query paths. A common
/// core can match an enormous candidate set.
pub const CANDIDATE_LIMIT: i64 = 100;

/// Above this many well-formed derived cores the indexed path is trusted;
/// below it the backfill clearly has not run and the resolver scans the raw
/// column instead.
pub const CORE_POPULATION_THRESHOLD: i64 = 1000;

/// One establishment row, raw from the store; labeling happens in the
/// resolver.
#[derive(Debug, Clone)]
pub struct EstablishmentRow {
    pub cnpj_base: String,
    pub status_code: Option<String>,
    pub primary_activity: Option<String>,
    pub street: Option<String>,
    pub number: Option<String>,
    pub district: Option<String>,
    pub state: Option<String>,
    pub trade_name: Option<String>,
}

/// Counts rows whose derived core is a well-formed 6-digit string. The count
/// is capped at [`CORE_POPULATION_THRESHOLD`] + 1; the strategy selector
/// only needs to know which side of the threshold the table is on.
pub async fn count_populated_cores(
    client: &impl GenericClient,
    schema: &RegistrySchema,
) -> Result<i64> {
    let sql = format!(
        "SELECT COUNT(*) FROM (
            SELECT 1 FROM {table}
            WHERE char_length({core}) = 6 AND {core} ~ '^[0-9]{{6}}$'
            LIMIT {cap}
        ) t",
        table = schema.partner_table,
        core = schema.partner_core_col,
        cap = CORE_POPULATION_THRESHOLD + 1,
    );
    let row = client
        .query_one(&sql, &[])
        .await
        .context("Failed to count populated derived cores")?;
    Ok(row.get(0))
}

/// Indexed path: exact-match lookup on the derived core column.
pub async fn fetch_candidates_by_core(
    client: &impl GenericClient,
    schema: &RegistrySchema,
    core: &str,
) -> Result<Vec<PartnerRecord>> {
    let sql = format!(
        "SELECT {id}, {group}, {name}, {raw}, {core}
         FROM {table}
         WHERE {core} = $1
         ORDER BY {id}
         LIMIT {limit}",
        id = schema.partner_id_col,
        group = schema.partner_group_col,
        name = schema.partner_name_col,
        raw = schema.partner_identifier_col,
        core = schema.partner_core_col,
        table = schema.partner_table,
        limit = CANDIDATE_LIMIT,
    );
    let rows = client
        .query(&sql, &[&core])
        .await
        .context("Failed to query candidates by derived core")?;
    Ok(rows.iter().map(partner_from_row).collect())
}

/// Scan path: derives the core from the raw identifier column in SQL, with
/// the same rule as [`crate::matching::identifier::extract_cpf_core`]: an
/// exactly-11-digit string takes the 4th..9th digits, anything else with at
/// least 6 digits takes the first 6 (masked `***XXXXXX**` values land here,
/// the mask leaves exactly the core visible). Slow by construction; only
/// used while the derived column is unpopulated, so a fresh database still
/// answers lookups instead of returning nothing.
pub async fn fetch_candidates_by_raw_scan(
    client: &impl GenericClient,
    schema: &RegistrySchema,
    core: &str,
) -> Result<Vec<PartnerRecord>> {
    let sql = format!(
        "SELECT {id}, {group}, {name}, {raw}, {core}
         FROM (
             SELECT {id}, {group}, {name}, {raw}, {core}, {digits} AS raw_digits
             FROM {table}
         ) s
         WHERE CASE
                 WHEN char_length(raw_digits) = 11 THEN substr(raw_digits, 4, 6)
                 WHEN char_length(raw_digits) >= 6 THEN left(raw_digits, 6)
               END = $1
         ORDER BY {id}
         LIMIT {limit}",
        id = schema.partner_id_col,
        group = schema.partner_group_col,
        name = schema.partner_name_col,
        raw = schema.partner_identifier_col,
        core = schema.partner_core_col,
        digits = schema.raw_digits_expr(),
        table = schema.partner_table,
        limit = CANDIDATE_LIMIT,
    );
    let rows = client
        .query(&sql, &[&core])
        .await
        .context("Failed to scan candidates by raw identifier")?;
    Ok(rows.iter().map(partner_from_row).collect())
}

fn partner_from_row(row: &tokio_postgres::Row) -> PartnerRecord {
    PartnerRecord {
        row_id: row.get(0),
        cnpj_base: row.get::<_, Option<String>>(1).unwrap_or_default(),
        partner_name: row.get::<_, Option<String>>(2).unwrap_or_default(),
        raw_identifier: row.get::<_, Option<String>>(3).unwrap_or_default(),
        cpf_core: row.get::<_, Option<String>>(4).unwrap_or_default(),
    }
}

/// All establishment rows for one cnpj base.
pub async fn fetch_establishments(
    client: &impl GenericClient,
    schema: &RegistrySchema,
    cnpj_base: &str,
) -> Result<Vec<EstablishmentRow>> {
    let sql = format!(
        "SELECT {group}, {status}, {activity}, {street}, {number}, {district}, {state}, {trade}
         FROM {table}
         WHERE {group} = $1",
        group = schema.company_group_col,
        status = schema.company_status_col,
        activity = schema.company_activity_col,
        street = schema.company_street_col,
        number = schema.company_number_col,
        district = schema.company_district_col,
        state = schema.company_state_col,
        trade = schema.company_trade_name_col,
        table = schema.company_table,
    );
    let rows = client
        .query(&sql, &[&cnpj_base])
        .await
        .context("Failed to query establishments for cnpj base")?;
    Ok(rows
        .iter()
        .map(|row| EstablishmentRow {
            cnpj_base: row.get::<_, Option<String>>(0).unwrap_or_default(),
            status_code: row.get(1),
            primary_activity: row.get(2),
            street: row.get(3),
            number: row.get(4),
            district: row.get(5),
            state: row.get(6),
            trade_name: row.get(7),
        })
        .collect())
}

/// Legal name from the company master table, if any.
pub async fn fetch_company_legal_name(
    client: &impl GenericClient,
    schema: &RegistrySchema,
    cnpj_base: &str,
) -> Result<Option<String>> {
    let sql = format!(
        "SELECT {name} FROM {table} WHERE {group} = $1 LIMIT 1",
        name = schema.company_name_col,
        table = schema.company_name_table,
        group = schema.company_name_group_col,
    );
    let rows = client
        .query(&sql, &[&cnpj_base])
        .await
        .context("Failed to query company legal name")?;
    Ok(rows.first().and_then(|row| row.get::<_, Option<String>>(0)))
}

/// Partner list for a company lookup.
pub async fn fetch_partners_for_base(
    client: &impl GenericClient,
    schema: &RegistrySchema,
    cnpj_base: &str,
) -> Result<Vec<CompanyPartner>> {
    let sql = format!(
        "SELECT {name}, {raw} FROM {table} WHERE {group} = $1 ORDER BY {id}",
        name = schema.partner_name_col,
        raw = schema.partner_identifier_col,
        table = schema.partner_table,
        group = schema.partner_group_col,
        id = schema.partner_id_col,
    );
    let rows = client
        .query(&sql, &[&cnpj_base])
        .await
        .context("Failed to query partners for cnpj base")?;
    Ok(rows
        .iter()
        .map(|row| CompanyPartner {
            partner_name: row.get::<_, Option<String>>(0).unwrap_or_default(),
            raw_identifier: row.get::<_, Option<String>>(1).unwrap_or_default(),
        })
        .collect())
}

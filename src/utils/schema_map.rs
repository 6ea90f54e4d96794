//! Explicit mapping of logical roles to physical table/column names.
//!
//! The registry tables come out of a bulk CSV ingestion, so the physical
//! names are configuration, not something to guess from column positions at
//! query time. The mapping is resolved once at startup from the environment
//! (with the standard registry layout as default) and handed to every
//! component that builds SQL.

use anyhow::{bail, Context, Result};
use log::info;
use std::collections::HashSet;
use std::env;

use crate::utils::db_connect::PgPool;

#[derive(Debug, Clone)]
pub struct RegistrySchema {
    /// Partner (socio) rows: one per (company, partner) relationship.
    pub partner_table: String,
    pub partner_id_col: String,
    pub partner_group_col: String,
    pub partner_name_col: String,
    pub partner_identifier_col: String,
    pub partner_core_col: String,

    /// Establishment rows: one per registered establishment.
    pub company_table: String,
    pub company_group_col: String,
    pub company_status_col: String,
    pub company_activity_col: String,
    pub company_street_col: String,
    pub company_number_col: String,
    pub company_district_col: String,
    pub company_state_col: String,
    pub company_trade_name_col: String,

    /// Company master rows: legal name per cnpj base.
    pub company_name_table: String,
    pub company_name_group_col: String,
    pub company_name_col: String,

    /// Maintenance objects owned by the backfill.
    pub checkpoint_table: String,
    pub core_index_name: String,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Default for RegistrySchema {
    fn default() -> Self {
        Self {
            partner_table: "socios".into(),
            partner_id_col: "id".into(),
            partner_group_col: "cnpj_basico".into(),
            partner_name_col: "nome_socio".into(),
            partner_identifier_col: "cpf_cnpj_socio".into(),
            partner_core_col: "cpf_miolo".into(),
            company_table: "estabelecimentos".into(),
            company_group_col: "cnpj_basico".into(),
            company_status_col: "situacao_cadastral".into(),
            company_activity_col: "cnae_fiscal_principal".into(),
            company_street_col: "logradouro".into(),
            company_number_col: "numero".into(),
            company_district_col: "bairro".into(),
            company_state_col: "uf".into(),
            company_trade_name_col: "nome_fantasia".into(),
            company_name_table: "empresas".into(),
            company_name_group_col: "cnpj_basico".into(),
            company_name_col: "razao_social".into(),
            checkpoint_table: "cpf_core_backfill_progress".into(),
            core_index_name: "idx_socios_cpf_miolo".into(),
        }
    }
}

impl RegistrySchema {
    /// Create the mapping from environment variables, falling back to the
    /// standard registry layout.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            partner_table: env_or("REGISTRY_PARTNER_TABLE", &defaults.partner_table),
            partner_id_col: env_or("REGISTRY_PARTNER_ID_COL", &defaults.partner_id_col),
            partner_group_col: env_or("REGISTRY_PARTNER_GROUP_COL", &defaults.partner_group_col),
            partner_name_col: env_or("REGISTRY_PARTNER_NAME_COL", &defaults.partner_name_col),
            partner_identifier_col: env_or(
                "REGISTRY_PARTNER_IDENTIFIER_COL",
                &defaults.partner_identifier_col,
            ),
            partner_core_col: env_or("REGISTRY_PARTNER_CORE_COL", &defaults.partner_core_col),
            company_table: env_or("REGISTRY_COMPANY_TABLE", &defaults.company_table),
            company_group_col: env_or("REGISTRY_COMPANY_GROUP_COL", &defaults.company_group_col),
            company_status_col: env_or("REGISTRY_COMPANY_STATUS_COL", &defaults.company_status_col),
            company_activity_col: env_or(
                "REGISTRY_COMPANY_ACTIVITY_COL",
                &defaults.company_activity_col,
            ),
            company_street_col: env_or("REGISTRY_COMPANY_STREET_COL", &defaults.company_street_col),
            company_number_col: env_or("REGISTRY_COMPANY_NUMBER_COL", &defaults.company_number_col),
            company_district_col: env_or(
                "REGISTRY_COMPANY_DISTRICT_COL",
                &defaults.company_district_col,
            ),
            company_state_col: env_or("REGISTRY_COMPANY_STATE_COL", &defaults.company_state_col),
            company_trade_name_col: env_or(
                "REGISTRY_COMPANY_TRADE_NAME_COL",
                &defaults.company_trade_name_col,
            ),
            company_name_table: env_or("REGISTRY_COMPANY_NAME_TABLE", &defaults.company_name_table),
            company_name_group_col: env_or(
                "REGISTRY_COMPANY_NAME_GROUP_COL",
                &defaults.company_name_group_col,
            ),
            company_name_col: env_or("REGISTRY_COMPANY_NAME_COL", &defaults.company_name_col),
            checkpoint_table: env_or("REGISTRY_CHECKPOINT_TABLE", &defaults.checkpoint_table),
            core_index_name: env_or("REGISTRY_CORE_INDEX_NAME", &defaults.core_index_name),
        }
    }

    pub fn log_config(&self) {
        info!(
            "Registry schema: partners={}({}, {}, {}, {}, {}), establishments={}, companies={}",
            self.partner_table,
            self.partner_id_col,
            self.partner_group_col,
            self.partner_name_col,
            self.partner_identifier_col,
            self.partner_core_col,
            self.company_table,
            self.company_name_table,
        );
    }

    /// SQL expression for the digits-only form of the raw identifier column.
    pub fn raw_digits_expr(&self) -> String {
        format!(
            "regexp_replace({}, '[^0-9]', '', 'g')",
            self.partner_identifier_col
        )
    }

    /// Checks that the mapped partner columns actually exist, so a typo in
    /// the environment fails at startup instead of at the first query.
    pub async fn validate(&self, pool: &PgPool) -> Result<()> {
        let conn = pool
            .get()
            .await
            .context("Failed to get DB connection for schema validation")?;

        let rows = conn
            .query(
                "SELECT column_name FROM information_schema.columns WHERE table_name = $1",
                &[&self.partner_table],
            )
            .await
            .context("Failed to query information_schema for the partner table")?;

        if rows.is_empty() {
            bail!("Partner table '{}' does not exist", self.partner_table);
        }

        let present: HashSet<String> = rows.iter().map(|r| r.get::<_, String>(0)).collect();
        let required = [
            &self.partner_id_col,
            &self.partner_group_col,
            &self.partner_name_col,
            &self.partner_identifier_col,
            &self.partner_core_col,
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|c| !present.contains(c.as_str()))
            .map(|c| c.as_str())
            .collect();
        if !missing.is_empty() {
            bail!(
                "Partner table '{}' is missing mapped columns: {}",
                self.partner_table,
                missing.join(", ")
            );
        }

        info!(
            "Schema validation OK: '{}' has all {} mapped columns",
            self.partner_table,
            required.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let schema = RegistrySchema::default();
        assert_eq!(schema.partner_table, "socios");
        assert_eq!(schema.partner_core_col, "cpf_miolo");
        assert_eq!(schema.company_table, "estabelecimentos");
        assert_eq!(schema.company_name_col, "razao_social");
    }

    #[test]
    fn test_env_override() {
        env::set_var("REGISTRY_PARTNER_TABLE", "socios_2024");
        let schema = RegistrySchema::from_env();
        assert_eq!(schema.partner_table, "socios_2024");
        assert_eq!(schema.partner_id_col, "id");
        env::remove_var("REGISTRY_PARTNER_TABLE");
    }

    #[test]
    fn test_raw_digits_expr() {
        let schema = RegistrySchema::default();
        assert_eq!(
            schema.raw_digits_expr(),
            "regexp_replace(cpf_cnpj_socio, '[^0-9]', '', 'g')"
        );
    }
}

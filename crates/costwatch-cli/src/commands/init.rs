//! `costwatch init` — write a costwatch.toml scaffold.

use std::path::Path;

use anyhow::bail;
use costwatch_core::config::DEFAULT_CONFIG_FILE;
use costwatch_core::{BillingTable, CostwatchConfig};

const PLACEHOLDER_TABLE: &str = "my-billing-project.billing_export.gcp_billing_export_v1_XXXXXX";

pub fn init(path: &Path, table: Option<&str>) -> anyhow::Result<()> {
    let table = match table {
        Some(raw) => BillingTable::parse(raw)?.to_string(),
        None => PLACEHOLDER_TABLE.to_string(),
    };

    let output = path.join(DEFAULT_CONFIG_FILE);
    if output.exists() {
        bail!("{} already exists", output.display());
    }

    std::fs::create_dir_all(path)?;
    let content = CostwatchConfig::scaffold(&table).to_toml_string()?;
    std::fs::write(&output, content)?;
    println!("✓ Generated {}", output.display());
    println!("  Secrets (SLACK_WEBHOOK_URL, GITHUB_TOKEN, GCP_SERVICE_ACCOUNT_KEY) are read from the environment.");
    Ok(())
}

//! `costwatch config` — print the effective settings.

use costwatch_core::CostwatchConfig;

pub fn show(file: CostwatchConfig) -> anyhow::Result<()> {
    let settings = super::resolve_settings(file)?;
    let entries = settings.describe();
    let width = entries.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    for (key, value) in entries {
        println!("{key:<width$}  {value}");
    }
    Ok(())
}

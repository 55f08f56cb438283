use crate::config::parse::load_config;
use crate::storage::{DuckDbStorage, LogStore};
use std::path::PathBuf;

pub async fn stats(config_path: Option<PathBuf>, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = super::require_config(config_path);
    let config = load_config(&config_path)?;

    let storage = DuckDbStorage::new(&config.storage.path, &config.storage.table)?;
    storage.init_schema().await?;
    let counts = storage.count_by_level().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&counts)?);
        return Ok(());
    }

    println!("{:<12} {:>10} {:>12}", "LEVEL", "RECORDS", "OCCURRENCES");
    for count in &counts {
        println!(
            "{:<12} {:>10} {:>12}",
            count.level.as_deref().unwrap_or("(none)"),
            count.records,
            count.occurrences
        );
    }
    let records: i64 = counts.iter().map(|c| c.records).sum();
    let occurrences: i64 = counts.iter().map(|c| c.occurrences).sum();
    println!("{:<12} {:>10} {:>12}", "total", records, occurrences);

    Ok(())
}

use crate::config::generate::generate_starter_config;
use crate::config::{default_config_path, expand_tilde, load_config};
use std::fs;
use std::path::{Path, PathBuf};

pub fn init(stdout: bool, path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_content = generate_starter_config();

    if stdout {
        print!("{}", config_content);
        return Ok(());
    }

    let config_path = path
        .map(|p| expand_tilde(&p))
        .unwrap_or_else(default_config_path);
    write_config(&config_content, &config_path)?;
    println!("Config file written to {}", config_path.display());
    Ok(())
}

fn write_config(config_content: &str, config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if config_path.exists() {
        return Err(format!(
            "Config file already exists at {}. Remove it first or use --stdout to print the config",
            config_path.display()
        )
        .into());
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }

    fs::write(config_path, config_content)?;
    Ok(())
}

pub fn validate(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path.ok_or("No config file found. Use --config to specify a path.")?;

    println!("Validating config file: {}", path.display());

    match load_config(&path) {
        Ok(config) => {
            println!("✓ Config is valid");
            println!("  storage:   {} (table {})", config.storage.path.display(), config.storage.table);
            println!(
                "  dedup:     {} (window {}m, cache ttl {}m)",
                if config.dedup.enabled { "enabled" } else { "disabled" },
                config.dedup.window_minutes,
                config.dedup.cache_ttl_minutes
            );
            println!(
                "  retention: {} (default {} days)",
                if config.retention.enabled { "enabled" } else { "disabled" },
                config.retention.default_days
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Config validation failed:\n{}", e);
            std::process::exit(1);
        }
    }
}

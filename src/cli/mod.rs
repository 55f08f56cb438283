pub mod config;
pub mod run;
pub mod stats;
pub mod sweep;

use std::path::PathBuf;

/// Unwrap a resolved config path or exit with a hint about where we looked.
pub(crate) fn require_config(config_path: Option<PathBuf>) -> PathBuf {
    match config_path {
        Some(path) => path,
        None => {
            eprintln!("Error: config not found");
            eprintln!("Searched locations:");
            eprintln!("  ~/.config/logsift/config.yml");
            eprintln!("  /etc/logsift/config.yml");
            eprintln!("\nUse --config <path> to specify a config file, or run 'logsift config init' to generate one.");
            std::process::exit(1);
        }
    }
}

use std::path::Path;

use colored::Colorize;

use deployflow_core::{CoreError, DeployConfig};

/// Load and validate the config file, reporting every problem at once.
pub async fn handle(config_path: &Path) -> anyhow::Result<()> {
    println!("Validating {}", config_path.display().to_string().cyan());

    match DeployConfig::load(config_path) {
        Ok(config) => {
            println!(
                "{}",
                format!(
                    "✓ Configuration is valid (environment '{}', region {})",
                    config.environment, config.region
                )
                .green()
                .bold()
            );
            Ok(())
        }
        Err(CoreError::ConfigurationInvalid(problems)) => {
            println!("{}", "✗ Configuration is invalid:".red().bold());
            for problem in &problems {
                println!("  • {problem}");
            }
            std::process::exit(1);
        }
        Err(err) => Err(err.into()),
    }
}

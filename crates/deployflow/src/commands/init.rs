use colored::Colorize;

use deployflow_core::{DeployConfig, EnvContext, StageLedger};

/// Clear the install ledger so the next install starts from the first stage.
pub async fn handle(config: DeployConfig) -> anyhow::Result<()> {
    let ctx = EnvContext::new(config);
    let ledger = StageLedger::new(&ctx.ledger_path);
    ledger.clear()?;
    println!(
        "{}",
        format!(
            "✓ Cleared install progress for '{}' ({})",
            ctx.config.environment,
            ledger.path().display()
        )
        .green()
    );
    println!("{}", "  The next 'deployflow install' starts from scratch.".dimmed());
    Ok(())
}

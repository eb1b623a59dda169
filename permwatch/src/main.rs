use clap::Parser;
use permwatch::{execute, init_subscriber_with_config, Cli, TracingConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_subscriber_with_config(TracingConfig {
        level: cli.global.verbose.then_some(tracing::Level::DEBUG),
        format: cli.global.log_format,
        ..Default::default()
    })?;

    let output = execute(cli).await?;
    if !output.is_empty() {
        print!("{}", output);
        if !output.ends_with('\n') {
            println!();
        }
    }
    Ok(())
}

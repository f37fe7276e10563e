use std::path::PathBuf;

use clap::Parser;

/// Bulk message dispatcher: deliver prepared campaigns at controlled,
/// endpoint-specific rates
#[derive(Debug, Parser)]
#[command(name = "herald", version, about)]
struct Args {
    /// Path to the TOML configuration
    #[arg(short, long, default_value = "herald.toml")]
    config: PathBuf,

    /// JSON-Lines row data; omit for a single send from the templates
    #[arg(short, long)]
    rows: Option<PathBuf>,

    /// Log each job instead of delivering it
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    herald_common::logging::init();

    let args = Args::parse();
    let config = herald::config::load(&args.config)?;
    let rows = args
        .rows
        .as_deref()
        .map(herald::read_rows)
        .transpose()?
        .unwrap_or_default();

    let summary = herald::run(config, rows, args.dry_run).await?;
    println!("{summary}");
    Ok(())
}

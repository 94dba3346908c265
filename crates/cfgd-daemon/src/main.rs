use cfgd_daemon::cli::{self, Cli};
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let snapshot = cli::run(cli).await?;

    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    std::process::exit(cli::exit_code(&snapshot));
}

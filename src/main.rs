use clap::Parser;
use review_export::cli::Args;
use review_export::commands::route_command;
use review_export::infrastructure::setup_logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env 中的 GOOGLE_CREDENTIALS_PATH / GOOGLE_SPREADSHEET_ID
    dotenvy::dotenv().ok();

    let args = Args::parse();
    setup_logging(args.logging_config()?)?;

    if !route_command(&args).await? {
        std::process::exit(1);
    }
    Ok(())
}

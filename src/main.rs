use anyhow::Result;
use clap::Parser;
use dotenvy::dotenv;
use moneytalks_advisor::config::{Cli, Command};
use moneytalks_advisor::face;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.config;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let keys = config.keys();
            let mark = |set: bool| if set { "✓" } else { "✗" };
            info!(
                "MoneyTalks Advisor API | Gemini {} | ElevenLabs {} | Nessie {}",
                mark(keys.gemini),
                mark(keys.elevenlabs),
                mark(keys.nessie)
            );
            face::serve(config.app_state(), config.port).await
        }
        Command::Search { budget } => {
            let result = config.car_search(None).run(budget).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
    }
}

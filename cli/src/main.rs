mod duel;

use clap::{Parser, Subcommand};
use rand::Rng;
use tracing_subscriber::EnvFilter;

use geoduel_core::{MATCH_ID_ALPHABET, MATCH_ID_LEN};

#[derive(Parser)]
#[command(name = "geoduel-cli", version, about = "Admin and simulation tools for geoduel matches")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Matches {
        #[command(subcommand)]
        command: MatchCommand,
    },
}

#[derive(Subcommand)]
enum MatchCommand {
    /// Generate a fresh match id (the relay room key).
    NewId,
    /// Drive a scripted two-player duel end to end against a live relay,
    /// with an in-memory document store standing in for the backend.
    Simulate {
        #[arg(long, env = "RELAY_WS_BASE_URL", default_value = "ws://127.0.0.1:8787")]
        base_url: String,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Matches { command } => match command {
            MatchCommand::NewId => {
                println!("{}", generate_match_id());
            }
            MatchCommand::Simulate { base_url } => {
                duel::run(&base_url).await?;
            }
        },
    }

    Ok(())
}

pub(crate) fn generate_match_id() -> String {
    let mut rng = rand::rng();
    let alphabet = MATCH_ID_ALPHABET.as_bytes();
    let mut id = String::with_capacity(MATCH_ID_LEN);
    for _ in 0..MATCH_ID_LEN {
        let idx = rng.random_range(0..alphabet.len());
        id.push(alphabet[idx] as char);
    }
    id
}

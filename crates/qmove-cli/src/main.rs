use clap::{Parser, Subcommand};
use std::process::ExitCode;

mod config;
mod migrate;


#[tokio::main]
pub async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    if let Err(e) = Cli::parse().run().await {
        eprintln!("{:#}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

#[derive(Debug, Parser)]
#[command(name = "qmove")]
#[command(about = "move messages between aws sqs queues, written in rust", long_about = None)]
pub struct Cli {
    /// Use LocalStack credentials (and http://localhost:4566 unless --endpoint is given)
    #[arg(long, global = true)]
    local: bool,

    /// Override the SQS endpoint URL
    #[arg(long, global = true)]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Move messages from one queue to another
    Move(migrate::MoveArgs),
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let endpoint = config::Endpoint {
            local: self.local,
            url: self.endpoint,
        };

        match self.command {
            Commands::Move(args) => args.run(&endpoint).await,
        }
    }
}

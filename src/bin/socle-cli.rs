use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use socle::config::load_settings;
use socle::control::ControlClient;
use socle::VERSION;

#[derive(Parser)]
#[command(name = "socle-cli")]
#[command(about = "Operator CLI for a running socle process", long_about = None)]
struct Cli {
    /// Project root used to read the control port and token.
    #[arg(short, long, default_value = ".")]
    root: PathBuf,

    /// Control port; overrides `control.port` from the settings.
    #[arg(short, long)]
    port: Option<u16>,

    /// Shared control token; overrides `control.token` from the settings.
    #[arg(short, long)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Put the server into maintenance mode
    Down,
    /// Bring the server back live
    Up,
    /// Print the version
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let enabled = match cli.command {
        Commands::Version => {
            println!("socle {VERSION}");
            return ExitCode::SUCCESS;
        }
        Commands::Down => true,
        Commands::Up => false,
    };

    let (port, token) = match (cli.port, &cli.token) {
        (Some(port), Some(token)) => (port, Some(token.clone())),
        _ => match load_settings(&cli.root) {
            Ok(settings) => (
                cli.port.or(settings.control.port).unwrap_or_default(),
                cli.token.clone().or(settings.control.token),
            ),
            Err(err) => {
                eprintln!("Error: {err}");
                return ExitCode::FAILURE;
            }
        },
    };
    if port == 0 {
        eprintln!("Error: no control port; set control.port or pass --port");
        return ExitCode::FAILURE;
    }

    let result = async {
        let mut client = ControlClient::connect(port).await?.with_token(token);
        client.set_maintenance(enabled).await
    }
    .await;

    match result {
        Ok(message) => {
            println!("{message}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}

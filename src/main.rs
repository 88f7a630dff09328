//! socle process entry point.
//!
//! Loads settings from the project root, bootstraps the requested entry and
//! runs it until shutdown.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use socle::config::load_settings;
use socle::{EntryRole, Socle, VERSION};

#[derive(Parser)]
#[command(name = "socle", version = VERSION)]
#[command(about = "Bootstrap and run a socle application", long_about = None)]
struct Args {
    /// Project root holding socle.toml, views/, public/ and TLS material.
    #[arg(short, long, default_value = ".")]
    root: PathBuf,

    /// Entry role: web, api (api/rest), rpc (api/rpc), worker or cli.
    #[arg(short, long, env = "SOCLE_ENTRY", default_value = "web")]
    entry: EntryRole,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let settings = match load_settings(&args.root) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("socle: {err}");
            return ExitCode::FAILURE;
        }
    };

    let socle = match Socle::initialize(args.root.clone(), args.entry, settings).await {
        Ok(socle) => socle,
        Err(err) => {
            tracing::error!(subsystem = %err.subsystem(), error = %err, "Bootstrap failed");
            eprintln!("socle: {}", error_chain(&err));
            return ExitCode::FAILURE;
        }
    };

    match socle.entry {
        EntryRole::Web | EntryRole::Api | EntryRole::Rpc => {
            let routes = socle.default_routes();
            if let Err(err) = socle.listen_and_serve(routes).await {
                eprintln!("socle: {}", error_chain(&err));
                return ExitCode::FAILURE;
            }
        }
        EntryRole::Worker => socle.run_worker().await,
        EntryRole::Cli => {
            println!("{} {} ({})", socle.app_name, socle.version, socle.entry);
            println!("cache: {:?}", socle.cache.kind());
            println!("jobs: {}", socle.scheduler.job_names().join(", "));
            socle.close().await;
        }
    }

    ExitCode::SUCCESS
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

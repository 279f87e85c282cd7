use clap::Parser;
use tracing_subscriber::EnvFilter;

use modhost::app::Application;
use modhost::args::{Args, Command};
use modhost::config::ConfigLoader;
use modhost::errors::AppError;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let args = Args::parse();

    let loader = match &args.config {
        Some(path) => ConfigLoader::with_file(path.clone()),
        None => ConfigLoader::new(),
    };
    let mut config = loader.load_config()?;
    init_tracing(&config.log.level);

    match args.command() {
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            let app = Application::boot(config)?;
            app.serve().await?;
        }
        Command::Routes => {
            let app = Application::boot(config)?;
            for (method, path) in app.routes().bindings() {
                println!("{:<7} {}", method.as_str(), path);
            }
        }
        Command::Modules => {
            let app = Application::boot(config)?;
            for (name, status) in app.orchestrator().registry().statuses() {
                println!("{:<16} {:?}", name, status);
            }
        }
        Command::Services => {
            let app = Application::boot(config)?;
            for (key, lifetime) in app.container().services() {
                println!("{:<10} {}", lifetime.to_string(), key);
            }
        }
    }

    Ok(())
}

/// `RUST_LOG` wins over the configured level.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

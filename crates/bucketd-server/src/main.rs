use bucketd_core::ShutdownSignal;
use bucketd_server::ServerConfig;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "bucketd", version, about = "Durable key-value store over HTTP")]
struct Cli {
    /// TOML config file. Flags override its values.
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Address to listen on [default: 0.0.0.0:8000].
    #[arg(long)]
    listen: Option<String>,

    /// Path of the store file [default: my.db].
    #[arg(long)]
    db: Option<PathBuf>,

    /// Path of the access log [default: access.log].
    #[arg(long)]
    access_log: Option<PathBuf>,

    /// Namespace holding all keys [default: kv].
    #[arg(long)]
    namespace: Option<String>,

    /// Enable debug logging.
    #[arg(long, short = 'v')]
    verbose: bool,
}

impl Cli {
    fn resolve(self) -> Result<ServerConfig, bucketd_server::ConfigError> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(db) = self.db {
            config.db_path = db;
        }
        if let Some(access_log) = self.access_log {
            config.access_log = access_log;
        }
        if let Some(namespace) = self.namespace {
            config.namespace = namespace;
        }
        Ok(config)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("BUCKETD_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    let config = match cli.resolve() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    info!(
        "store {} (namespace '{}'), access log {}",
        config.db_path.display(),
        config.namespace,
        config.access_log.display()
    );

    let signal = ShutdownSignal::new();
    if let Err(e) = signal.install_os_handler() {
        error!("{e}");
        return ExitCode::FAILURE;
    }

    match bucketd_server::serve(&config, &signal) {
        Ok(report) => {
            if !report.drained {
                warn!("{} request(s) abandoned at shutdown", report.abandoned);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

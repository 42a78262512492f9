//! tumblr-mirror: incremental media mirror for Tumblr blogs

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use reqwest::cookie::Jar;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use tumblr_mirror::{
    auth::Authenticator,
    config::{Config, LogFormat, LoggingConfig},
    scrape::{self, Scraper},
    store::MarkStore,
};

#[derive(Parser)]
#[command(name = "tumblr-mirror")]
#[command(about = "Incremental media mirror for Tumblr blogs")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "tumblr-mirror.toml")]
    config: PathBuf,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape every configured blog
    Sync,

    /// Write a commented default configuration file
    Init {
        /// Output directory
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Show the stored per-blog high-water marks
    Marks,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { path } => {
            setup_logging(cli.verbose, None)?;
            init_config(path)
        }
        Commands::Sync => {
            let config = Config::load(&cli.config)?;
            setup_logging(cli.verbose, Some(&config.logging))?;
            sync(config).await
        }
        Commands::Marks => {
            let config = Config::load(&cli.config)?;
            setup_logging(cli.verbose, Some(&config.logging))?;
            show_marks(config)
        }
    }
}

fn setup_logging(verbose: u8, configured: Option<&LoggingConfig>) -> Result<()> {
    let level = match verbose {
        0 => configured.map_or(Level::INFO, |logging| logging.level.as_tracing()),
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let format = configured.map_or(LogFormat::Text, |logging| logging.format);

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false);
    match format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Text => tracing::subscriber::set_global_default(builder.finish())?,
    }
    Ok(())
}

async fn sync(config: Config) -> Result<()> {
    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let jar = Arc::new(Jar::default());
    let client = scrape::build_client(jar)?;

    let auth = config
        .credentials()
        .map(|(user, pass)| Arc::new(Authenticator::new(client.clone(), user, pass)));

    let mut store = MarkStore::open(&config.state_file)?;
    let scraper = Scraper::new(client, &config, auth.clone());

    let result = scraper.sync(&config.blogs, &mut store, &cancel).await;

    if let Some(auth) = auth {
        if let Err(e) = auth.logout().await {
            warn!("failed to log out: {}", e);
        }
    }

    match result {
        Ok(()) => Ok(()),
        Err(err) if err.is_cancelled() => {
            info!("scrape aborted by signal");
            std::process::exit(130);
        }
        Err(err) => Err(err.into()),
    }
}

/// Cancel the root token on SIGINT/SIGQUIT/SIGTERM.
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut interrupt = match signal(SignalKind::interrupt()) {
                Ok(s) => s,
                Err(e) => {
                    warn!("failed to install signal handler: {}", e);
                    return;
                }
            };
            let mut quit = match signal(SignalKind::quit()) {
                Ok(s) => s,
                Err(e) => {
                    warn!("failed to install signal handler: {}", e);
                    return;
                }
            };
            let mut terminate = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    warn!("failed to install signal handler: {}", e);
                    return;
                }
            };

            tokio::select! {
                _ = interrupt.recv() => {}
                _ = quit.recv() => {}
                _ = terminate.recv() => {}
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("failed to install signal handler: {}", e);
                return;
            }
        }

        info!("termination signal received, shutting down");
        cancel.cancel();
    });
}

fn init_config(path: PathBuf) -> Result<()> {
    let config_path = path.join("tumblr-mirror.toml");

    let template = r#"# tumblr-mirror configuration

# API key for the public listing endpoint (required).
api_key = ""

# How many network operations may run at once.
concurrency = 24

# Where per-blog progress is remembered between runs.
state_file = "tumblr-mirror.marks.json"

# Account credentials. Only needed for blogs the public endpoint refuses;
# leave both out otherwise.
#username = "user@example.com"
#password = ""

[logging]
level = "info"
format = "text"

# One [[blogs]] block per blog to mirror.
#[[blogs]]
#name = "someone"                     # bare names become someone.tumblr.com
#target = "data/someone"              # download directory
#skip_reblogs = false                 # skip posts reblogged from elsewhere
#before = "2020-01-01T00:00:00Z"      # only posts older than this
#rescrape = false                     # ignore remembered progress once
"#;

    std::fs::write(&config_path, template)?;
    println!("Created configuration file: {}", config_path.display());
    Ok(())
}

fn show_marks(config: Config) -> Result<()> {
    let store = MarkStore::open(&config.state_file)?;

    let mut any = false;
    println!("\nStored high-water marks:");
    println!("========================");
    for (blog, id) in store.iter() {
        println!("{:<40} {}", blog, id);
        any = true;
    }
    if !any {
        println!("(none)");
    }

    Ok(())
}

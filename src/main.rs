//! Process launcher for ecosystem files: declarative lists of apps,
//! each with a command line, an environment, and a restart policy.

#![forbid(unsafe_code, future_incompatible)]
#![deny(
    missing_debug_implementations,
    nonstandard_style,
    missing_docs,
    unreachable_pub,
    missing_copy_implementations,
    unused_qualifications,
    clippy::unwrap_in_result,
    clippy::unwrap_used
)]

use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::WrapErr;
use ecolaunch::{
    config::{Config, ConfigFormat},
    RunOptions,
};
use tokio::{
    signal::unix::{signal, SignalKind},
    sync::mpsc,
};

#[derive(Debug, Parser)]
#[clap(about, long_about = None)]
struct Cli {
    /// Check the configuration file for errors, but do not start any
    /// processes.
    #[clap(long)]
    check: bool,

    /// Print the configuration in its canonical form, then exit.
    #[clap(long, conflicts_with = "check")]
    dump: bool,

    /// Only launch the app with this name (may be repeated).
    #[clap(long = "only", value_name = "NAME")]
    only: Vec<String>,

    config_file: PathBuf,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    // Crash the process on a panic anywhere (including in a background
    // Tokio task, since we want panic to mean "something is very wrong;
    // stop everything").
    std::panic::set_hook(Box::new(|info| {
        eprintln!("Process panicked: {info}");
        std::process::abort();
    }));

    // Set the RUST_LOG, if it hasn't been explicitly defined
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info")
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stdout)
        .init();

    // Parse the command line arguments.
    let cli = Cli::parse();

    // Read, parse, and check the config file.
    let mut config = Config::load(&cli.config_file)
        .await
        .wrap_err("Unable to load config file")?;

    if !cli.only.is_empty() {
        config
            .retain_apps(&cli.only)
            .wrap_err("Invalid `--only` selection")?;
    }

    config.validate().wrap_err("Invalid config file")?;

    if cli.dump {
        print!("{}", config.dump(ConfigFormat::from_path(&cli.config_file))?);
        return Ok(());
    }

    // We're done if this was only a config file check.
    if cli.check {
        tracing::info!(apps = %config.apps.len(), "Config file is valid");
        return Ok(());
    }

    // Create the external shutdown signal (used to stop every app on
    // UNIX signals).
    let (shutdown_sender, shutdown_receiver) = mpsc::unbounded_channel();

    for kind in [SignalKind::interrupt(), SignalKind::terminate()] {
        let mut stream = signal(kind).wrap_err("Failed to register signal handler")?;
        let shutdown_sender = shutdown_sender.clone();
        tokio::spawn(async move {
            while stream.recv().await.is_some() {
                if shutdown_sender.send(()).is_err() {
                    break;
                }
            }
        });
    }

    let options = RunOptions {
        base_dir: cli
            .config_file
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(|dir| dir.to_owned()),
        strip_ansi: !console::Term::stdout().is_term(),
    };

    ecolaunch::run(config, options, shutdown_receiver).await?;
    Ok(())
}

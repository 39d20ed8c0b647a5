//! Process launcher for ecosystem files: declarative lists of apps,
//! each with a command line, an environment, and a restart policy.

#![forbid(unsafe_code, future_incompatible)]
#![deny(
    missing_debug_implementations,
    nonstandard_style,
    // missing_docs,
    unreachable_pub,
    missing_copy_implementations,
    unused_qualifications,
    clippy::unwrap_in_result,
    clippy::unwrap_used
)]

use std::path::PathBuf;

use color_eyre::eyre::WrapErr;
use config::{Config, ConfigError};
use process::{Instance, InstanceOutcome};
use thiserror::Error;
use tokio::{
    sync::{mpsc, watch},
    task::JoinSet,
};

pub mod command;
pub mod config;
pub mod output;
pub mod process;

/// Errors returned by [`run`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration")]
    InvalidConfig(#[from] ConfigError),

    #[error("Startup aborted: {0:#}")]
    StartupAborted(color_eyre::Report),

    #[error("Apps errored: {}", .0.join(", "))]
    AppsErrored(Vec<String>),
}

/// Settings that come from the environment the launcher runs in, rather
/// than from the ecosystem file.
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    /// Directory that relative `cwd` settings are resolved against
    /// (usually the directory containing the ecosystem file).
    pub base_dir: Option<PathBuf>,

    /// Remove ANSI escape sequences from forwarded output.
    pub strip_ansi: bool,
}

/// Starts every instance of every app, then supervises them until
/// `shutdown` fires (which stops all instances) or until all of them
/// have finished on their own.
pub async fn run(
    config: Config,
    options: RunOptions,
    mut shutdown: mpsc::UnboundedReceiver<()>,
) -> Result<(), Error> {
    config.validate()?;

    let (stop_sender, stop_receiver) = watch::channel(false);
    let mut instances = JoinSet::new();

    // Start everything, in order. Any failure stops the instances that
    // already started.
    let mut position = 0usize;
    for app in &config.apps {
        for index in 0..app.instances {
            position += 1;
            let label = format!("{index}|{}", app.name);
            let started = Instance::start(
                app,
                index,
                options.base_dir.as_deref(),
                options.strip_ansi,
            )
            .wrap_err_with(|| format!("Unable to start app {:?} (instance {index})", app.name));

            match started {
                Ok(instance) => {
                    let stopping = stop_receiver.clone();
                    instances.spawn(async move {
                        (position, label, instance.supervise(stopping).await)
                    });
                }
                Err(report) => {
                    tracing::error!(%label, ?report, "Startup failed; stopping all instances");
                    let _ = stop_sender.send(true);
                    while instances.join_next().await.is_some() {}
                    return Err(Error::StartupAborted(report));
                }
            }
        }
    }

    tracing::info!(instances = %instances.len(), "All instances started");

    // Supervise until everything has finished.
    let mut listening = true;
    let mut errored = Vec::new();
    loop {
        tokio::select! {
            signal = shutdown.recv(), if listening => match signal {
                Some(()) => {
                    tracing::info!("Shutdown requested; stopping all instances");
                    let _ = stop_sender.send(true);
                    listening = false;
                }
                None => listening = false,
            },
            joined = instances.join_next() => match joined {
                None => break,
                Some(Ok((position, label, outcome))) => {
                    tracing::debug!(%label, ?outcome, "Instance finished");
                    if matches!(outcome, InstanceOutcome::Errored { .. }) {
                        errored.push((position, label));
                    }
                }
                Some(Err(err)) => {
                    tracing::error!(?err, "Instance supervisor failed");
                    errored.push((usize::MAX, String::from("<unknown>")));
                }
            },
        }
    }

    if errored.is_empty() {
        tracing::info!("All instances have stopped");
        Ok(())
    } else {
        // Report in declaration order, regardless of when each gave up.
        errored.sort_by_key(|(position, _)| *position);
        Err(Error::AppsErrored(
            errored.into_iter().map(|(_, label)| label).collect(),
        ))
    }
}

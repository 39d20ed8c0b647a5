//! Starts, restarts, and stops app instances.

use std::{path::Path, time::Duration};

use color_eyre::eyre::{self, eyre, WrapErr};
use tokio::{sync::watch, time::Instant};

use crate::{
    command::{Command, CommandSpec, ExitStatus},
    config::LaunchSpec,
    output::OutputOptions,
};

/// How an instance finished.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum InstanceOutcome {
    /// Stopped because the launcher was shutting down.
    Stopped,

    /// Exited and was not restarted (`autorestart` is off, or the exit
    /// code is one of the app's `stop_exit_codes`).
    Exited(ExitStatus),

    /// Gave up after too many unstable restarts, or could not be
    /// restarted at all.
    Errored { restarts: u32 },
}

/// Restart and stop policy for one instance, resolved from its
/// [`LaunchSpec`].
#[derive(Clone, Debug)]
struct Policy {
    autorestart: bool,
    max_restarts: u32,
    min_uptime: Duration,
    restart_delay: Duration,
    stop_exit_codes: Vec<i32>,
    kill_signal: nix::sys::signal::Signal,
    kill_timeout: Duration,
}

impl From<&LaunchSpec> for Policy {
    fn from(app: &LaunchSpec) -> Self {
        Self {
            autorestart: app.autorestart(),
            max_restarts: app.max_restarts(),
            min_uptime: app.min_uptime(),
            restart_delay: app.restart_delay(),
            stop_exit_codes: app.stop_exit_codes.clone(),
            kill_signal: app.kill_signal().into(),
            kill_timeout: app.kill_timeout(),
        }
    }
}

/// One running copy of an app.
#[derive(Debug)]
pub struct Instance {
    spec: CommandSpec,
    policy: Policy,
    command: Command,
}

impl Instance {
    /// Resolves everything needed to run instance `index` of `app`, then
    /// starts it.
    pub fn start(
        app: &LaunchSpec,
        index: u32,
        base_dir: Option<&Path>,
        strip_ansi: bool,
    ) -> eyre::Result<Self> {
        let spec = command_spec(app, index, base_dir, strip_ansi)?;
        tracing::info!(label = %spec.label, "Starting instance");

        let command = Command::run(&spec)?;
        tracing::info!(label = %spec.label, pid = %command.pid(), "Instance started");

        Ok(Self {
            spec,
            policy: app.into(),
            command,
        })
    }

    /// Supervises the instance until it finishes on its own or
    /// `stopping` becomes `true`.
    pub async fn supervise(mut self, mut stopping: watch::Receiver<bool>) -> InstanceOutcome {
        let label = self.spec.label.clone();
        let mut started = Instant::now();
        let mut unstable_restarts = 0;

        loop {
            let exited = tokio::select! {
                exit_status = self.command.wait() => Some(exit_status),
                _ = stop_requested(&mut stopping) => None,
            };

            let Some(exit_status) = exited else {
                self.stop().await;
                return InstanceOutcome::Stopped;
            };

            let uptime = started.elapsed();
            tracing::info!(%label, ?exit_status, ?uptime, "Instance exited");

            if !self.policy.autorestart {
                return InstanceOutcome::Exited(exit_status);
            }

            if let ExitStatus::Exited(exit_code) = exit_status {
                if self.policy.stop_exit_codes.contains(&exit_code) {
                    tracing::info!(%label, %exit_code, "Exit code does not trigger a restart");
                    return InstanceOutcome::Exited(exit_status);
                }
            }

            if uptime < self.policy.min_uptime {
                unstable_restarts += 1;
            } else {
                unstable_restarts = 0;
            }

            if unstable_restarts > self.policy.max_restarts {
                tracing::error!(%label, restarts = %self.policy.max_restarts, "Too many unstable restarts; giving up");
                return InstanceOutcome::Errored {
                    restarts: self.policy.max_restarts,
                };
            }

            if !self.policy.restart_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.policy.restart_delay) => {}
                    _ = stop_requested(&mut stopping) => return InstanceOutcome::Stopped,
                }
            }

            tracing::info!(%label, %unstable_restarts, "Restarting instance");
            match Command::run(&self.spec) {
                Ok(command) => {
                    self.command = command;
                    started = Instant::now();
                }
                Err(err) => {
                    tracing::error!(%label, ?err, "Unable to restart instance");
                    return InstanceOutcome::Errored {
                        restarts: unstable_restarts,
                    };
                }
            }
        }
    }

    /// Sends the kill signal to the instance's process group, escalating
    /// to `SIGKILL` if it is still running after the kill timeout.
    async fn stop(&mut self) {
        let label = &self.spec.label;
        tracing::info!(%label, signal = ?self.policy.kill_signal, "Stopping instance");

        if let Err(err) = self.command.kill(self.policy.kill_signal) {
            tracing::warn!(%label, ?err, "Error stopping instance");
        }

        match tokio::time::timeout(self.policy.kill_timeout, self.command.wait()).await {
            Ok(exit_status) => {
                tracing::debug!(%label, ?exit_status, "Instance stopped");
            }
            Err(_) => {
                tracing::warn!(%label, timeout = ?self.policy.kill_timeout, "Instance did not stop in time; sending SIGKILL");
                if let Err(err) = self.command.kill(nix::sys::signal::Signal::SIGKILL) {
                    tracing::warn!(%label, ?err, "Error killing instance");
                }

                let exit_status = self.command.wait().await;
                tracing::debug!(%label, ?exit_status, "Instance killed");
            }
        }
    }
}

/// Resolves when `stopping` is (or becomes) `true`. Never resolves if
/// the sender is dropped without requesting a stop.
async fn stop_requested(stopping: &mut watch::Receiver<bool>) {
    loop {
        if *stopping.borrow_and_update() {
            return;
        }

        if stopping.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn command_spec(
    app: &LaunchSpec,
    index: u32,
    base_dir: Option<&Path>,
    strip_ansi: bool,
) -> eyre::Result<CommandSpec> {
    let label = format!("{index}|{}", app.name);

    let args = app
        .argv()
        .wrap_err_with(|| format!("Invalid `args` for app {:?}", app.name))?;

    let mut env = app.environment.clone();
    env.insert(String::from("NODE_APP_INSTANCE"), index.to_string());

    let cwd = match (&app.cwd, base_dir) {
        (Some(cwd), Some(base_dir)) => Some(base_dir.join(cwd)),
        (cwd, _) => cwd.clone(),
    };

    let uid_gid = app
        .user
        .as_deref()
        .map(lookup_user)
        .transpose()
        .wrap_err_with(|| format!("Unable to resolve user for app {:?}", app.name))?;

    Ok(CommandSpec {
        label,
        program: app.command.clone(),
        args,
        env,
        cwd,
        uid_gid,
        output: OutputOptions {
            strip_ansi,
            timestamps: app.timestamps(),
        },
    })
}

fn lookup_user(name: &str) -> eyre::Result<(u32, u32)> {
    let user = users::get_user_by_name(name).ok_or_else(|| eyre!("Unknown user {name:?}"))?;
    Ok((user.uid(), user.primary_group_id()))
}

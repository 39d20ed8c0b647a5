//! Runs commands and monitors their completion.

use std::{
    collections::BTreeMap,
    os::unix::process::ExitStatusExt,
    path::PathBuf,
    process::Stdio,
};

use color_eyre::eyre::{self, WrapErr};
use command_group::{AsyncCommandGroup, AsyncGroupChild};
use nix::{sys::signal::Signal, unistd::Pid};
use tokio::sync::watch;
use tracing::Level;

use crate::output::{self, OutputOptions};

/// Exit status returned by a command.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ExitStatus {
    /// Command exited with the given exit code.
    Exited(i32),

    /// Command was killed by the given signal before it could exit.
    Killed(i32),
}

/// Everything needed to (re)start one instance of an app.
#[derive(Clone, Debug)]
pub struct CommandSpec {
    /// Output prefix and log name, e.g. `0|upsend`.
    pub label: String,
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
    pub uid_gid: Option<(u32, u32)>,
    pub output: OutputOptions,
}

/// Handle to a running command (and its process group).
#[derive(Debug)]
pub struct Command {
    label: String,
    exited: watch::Receiver<Option<ExitStatus>>,
    pgid: Pid,
}

impl Command {
    /// Spawns the command in a new process group, forwarding its output
    /// and monitoring it for completion.
    pub fn run(spec: &CommandSpec) -> eyre::Result<Self> {
        let CommandSpec {
            label,
            program,
            args,
            env,
            cwd,
            uid_gid,
            output,
        } = spec;

        tracing::event!(Level::DEBUG, %label, %program, ?args, ?uid_gid, "Running command");

        let mut command = tokio::process::Command::new(program);
        command.args(args).envs(env);

        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }

        if let Some((uid, gid)) = uid_gid {
            command.uid(*uid).gid(*gid);
        }

        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .group_spawn()
            .wrap_err_with(|| format!("Unable to run {program:?}"))?;
        let pid = child
            .id()
            .ok_or_else(|| eyre::eyre!("Unable to get PID of just-started process"))?;
        let pgid = Pid::from_raw(pid as i32);

        tracing::event!(Level::DEBUG, %label, %pgid, "Command running");

        if let Some(stdout) = child.inner().stdout.take() {
            output::forward(label.clone(), stdout, *output);
        }
        if let Some(stderr) = child.inner().stderr.take() {
            output::forward(label.clone(), stderr, *output);
        }

        let (sender, receiver) = watch::channel(None);
        monitor_process(label.clone(), pgid, child, sender);

        Ok(Self {
            label: label.clone(),
            exited: receiver,
            pgid,
        })
    }

    pub fn pid(&self) -> Pid {
        self.pgid
    }

    /// Sends a signal to every process in the command's process group.
    pub fn kill(&self, signal: Signal) -> eyre::Result<()> {
        tracing::event!(Level::DEBUG, label = %self.label, pgid = %self.pgid, ?signal, "Signaling process group");
        nix::sys::signal::killpg(self.pgid, signal)
            .wrap_err_with(|| format!("Unable to send {signal} to process group {}", self.pgid))?;
        Ok(())
    }

    /// Waits for the process to exit.
    pub async fn wait(&mut self) -> ExitStatus {
        loop {
            // Return the value immediately if we have one, otherwise
            // wait for the monitor to publish one.
            if let Some(exit_status) = *self.exited.borrow_and_update() {
                return exit_status;
            }

            if self.exited.changed().await.is_err() {
                // The monitor always publishes before dropping its
                // sender, so the final value is already in the channel.
                return self.exited.borrow().unwrap_or(ExitStatus::Killed(0));
            }
        }
    }
}

fn monitor_process(
    label: String,
    pgid: Pid,
    mut child: AsyncGroupChild,
    sender: watch::Sender<Option<ExitStatus>>,
) {
    tokio::spawn(async move {
        match child.wait().await {
            Err(err) => {
                tracing::event!(Level::ERROR, %label, ?err, "Error waiting for command to exit");
                let _ = sender.send(Some(ExitStatus::Killed(0)));
            }
            Ok(exit_status) => match (exit_status.code(), exit_status.signal()) {
                (Some(exit_code), _) => {
                    if exit_code == 0 {
                        tracing::event!(Level::DEBUG, %label, %pgid, "Command exited cleanly");
                    } else {
                        tracing::event!(Level::WARN, %label, %pgid, %exit_code, "Command exited with non-zero exit code");
                    }

                    let _ = sender.send(Some(ExitStatus::Exited(exit_code)));
                }
                (None, signal) => {
                    let signal = signal.unwrap_or(0);
                    tracing::event!(Level::DEBUG, %label, %pgid, %signal, "Command was killed");
                    let _ = sender.send(Some(ExitStatus::Killed(signal)));
                }
            },
        }
    });
}

//! External command execution.
//!
//! Substrates describe what to run as a [`CommandLine`] and hand it to a
//! [`Runner`]. The process runner is the only place a child is spawned.

use std::time::Duration;

use async_trait::async_trait;

/// A program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Prefix with `sudo` when `enabled`.
    pub fn sudo(self, enabled: bool) -> Self {
        if !enabled {
            return self;
        }
        let mut args = Vec::with_capacity(self.args.len() + 1);
        args.push(self.program);
        args.extend(self.args);
        Self {
            program: "sudo".to_string(),
            args,
        }
    }
}

impl std::fmt::Display for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Runs a command and returns its standard output.
///
/// A non-zero exit is an error carrying the command's standard error.
#[async_trait]
pub trait Runner: Send + Sync {
    async fn run(&self, cmd: &CommandLine) -> anyhow::Result<String>;
}

/// Spawns real child processes.
///
/// Children are killed when the future is dropped, so a cancelled scan task
/// does not leave stray `ssh` sessions behind.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill commands that run longer than `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

#[async_trait]
impl Runner for ProcessRunner {
    async fn run(&self, cmd: &CommandLine) -> anyhow::Result<String> {
        tracing::debug!("exec: {}", cmd);
        let mut command = tokio::process::Command::new(&cmd.program);
        command.args(&cmd.args).kill_on_drop(true);
        let child = command.output();

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child)
                .await
                .map_err(|_| anyhow::anyhow!("`{}` timed out after {:?}", cmd, limit))??,
            None => child.await?,
        };

        if !output.status.success() {
            anyhow::bail!(
                "`{}` exited with {}: {}",
                cmd,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records commands and answers from a script of `(needle, reply)` rules.
    ///
    /// The first rule whose needle occurs in the rendered command wins.
    /// `Err` replies make the command fail. Unmatched commands succeed with
    /// empty output.
    #[derive(Default)]
    pub struct ScriptedRunner {
        rules: Vec<(String, Result<String, String>)>,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        pub fn reply(mut self, needle: &str, out: &str) -> Self {
            self.rules.push((needle.to_string(), Ok(out.to_string())));
            self
        }

        pub fn fail(mut self, needle: &str) -> Self {
            self.rules
                .push((needle.to_string(), Err(format!("{needle} failed"))));
            self
        }

        pub fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Runner for ScriptedRunner {
        async fn run(&self, cmd: &CommandLine) -> anyhow::Result<String> {
            let line = cmd.to_string();
            self.seen.lock().unwrap().push(line.clone());
            for (needle, reply) in &self.rules {
                if line.contains(needle.as_str()) {
                    return reply.clone().map_err(|e| anyhow::anyhow!(e));
                }
            }
            Ok(String::new())
        }
    }
}

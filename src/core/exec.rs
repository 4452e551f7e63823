//! External-process execution capability.
//!
//! Every external tool (sops, terraform, git) is invoked through a [`Runner`]
//! so tests can stub invocations with [`MemRunner`] and assert on the exact
//! argument composition without forking processes.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;

use tracing::debug;

use crate::error::{ExecError, Result};

/// All options for running an external command.
#[derive(Debug, Clone, Default)]
pub struct Command {
    pub name: String,
    pub args: Vec<String>,
    /// Working directory for the child process.
    pub dir: Option<PathBuf>,
    /// Extra environment overlaid on the parent environment.
    pub env: BTreeMap<String, String>,
    /// Wire the child's stdio to the user's console instead of capturing.
    pub inherit_stdio: bool,
}

impl Command {
    pub fn new(name: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            args: args.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs(mut self, vars: BTreeMap<String, String>) -> Self {
        self.env.extend(vars);
        self
    }

    pub fn inherit_stdio(mut self) -> Self {
        self.inherit_stdio = true;
        self
    }

    /// The command line as it would appear in a shell, for logs and stubs.
    pub fn cmd_line(&self) -> String {
        if self.args.is_empty() {
            return self.name.clone();
        }
        format!("{} {}", self.name, self.args.join(" "))
    }
}

/// The outcome of running a command.
#[derive(Debug, Clone, Default)]
pub struct Output {
    pub cmd_line: String,
    /// Combined stdout + stderr. Empty when stdio was inherited.
    pub output: String,
}

/// Runs external commands.
pub trait Runner: Send + Sync {
    fn run(&self, cmd: Command) -> Result<Output>;
}

/// Checks whether a binary can be found on the PATH.
pub fn binary_exists(name: &str) -> bool {
    which::which(name).is_ok()
}

/// Resolves a binary on the PATH, erroring with an install hint otherwise.
pub fn find_binary(name: &str) -> Result<PathBuf> {
    which::which(name).map_err(|_| {
        ExecError::BinaryNotFound {
            name: name.to_string(),
        }
        .into()
    })
}

/// OS-backed runner using `std::process`.
#[derive(Debug, Default)]
pub struct OsRunner;

impl OsRunner {
    pub fn new() -> Self {
        Self
    }
}

impl Runner for OsRunner {
    fn run(&self, cmd: Command) -> Result<Output> {
        let cmd_line = cmd.cmd_line();
        debug!(cmd = %cmd_line, "running command");

        let mut child = std::process::Command::new(&cmd.name);
        child.args(&cmd.args);
        if let Some(dir) = &cmd.dir {
            child.current_dir(dir);
        }
        for (k, v) in &cmd.env {
            child.env(k, v);
        }

        if cmd.inherit_stdio {
            let status = child.status().map_err(|e| ExecError::Spawn {
                cmd: cmd_line.clone(),
                source: e,
            })?;
            if !status.success() {
                return Err(ExecError::Failed {
                    cmd: cmd_line,
                    output: format!("exit status {}", status.code().unwrap_or(-1)),
                }
                .into());
            }
            return Ok(Output {
                cmd_line,
                output: String::new(),
            });
        }

        child.stdout(Stdio::piped()).stderr(Stdio::piped());
        let out = child.output().map_err(|e| ExecError::Spawn {
            cmd: cmd_line.clone(),
            source: e,
        })?;

        // Diagnostics land on either stream depending on the tool; combine.
        let mut combined = String::from_utf8_lossy(&out.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&out.stderr));
        let combined = combined.trim_end().to_string();

        if !out.status.success() {
            return Err(ExecError::Failed {
                cmd: cmd_line,
                output: combined,
            }
            .into());
        }

        Ok(Output {
            cmd_line,
            output: combined,
        })
    }
}

/// In-memory runner that stubs calls by command-line prefix.
///
/// Registered stubs are matched with `starts_with` against the full command
/// line, so a stub for `"sops --decrypt"` matches any decrypt invocation.
#[derive(Default)]
pub struct MemRunner {
    inner: Mutex<MemRunnerState>,
}

#[derive(Default)]
struct MemRunnerState {
    calls: Vec<Command>,
    stubs: Vec<(String, std::result::Result<Output, String>)>,
}

impl MemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stubbed success for any command line starting with `prefix`.
    pub fn stub(&self, prefix: impl Into<String>, output: impl Into<String>) {
        self.inner.lock().unwrap().stubs.push((
            prefix.into(),
            Ok(Output {
                cmd_line: String::new(),
                output: output.into(),
            }),
        ));
    }

    /// Register a stubbed failure for any command line starting with `prefix`.
    /// The message becomes the failed command's combined output.
    pub fn stub_err(&self, prefix: impl Into<String>, message: impl Into<String>) {
        self.inner
            .lock()
            .unwrap()
            .stubs
            .push((prefix.into(), Err(message.into())));
    }

    /// Every command that was run, in order.
    pub fn calls(&self) -> Vec<Command> {
        self.inner.lock().unwrap().calls.clone()
    }

    /// Command lines of every recorded call.
    pub fn cmd_lines(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .map(Command::cmd_line)
            .collect()
    }
}

impl Runner for MemRunner {
    fn run(&self, cmd: Command) -> Result<Output> {
        let cmd_line = cmd.cmd_line();
        let mut state = self.inner.lock().unwrap();
        state.calls.push(cmd);

        for (prefix, stub) in &state.stubs {
            if cmd_line.starts_with(prefix.as_str()) {
                return match stub {
                    Ok(out) => Ok(Output {
                        cmd_line,
                        output: out.output.clone(),
                    }),
                    Err(msg) => Err(ExecError::Failed {
                        cmd: cmd_line,
                        output: msg.clone(),
                    }
                    .into()),
                };
            }
        }

        Err(ExecError::NoStub(cmd_line).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmd_line_joins_name_and_args() {
        let cmd = Command::new("sops", ["--decrypt", "--in-place", "f.yaml"]);
        assert_eq!(cmd.cmd_line(), "sops --decrypt --in-place f.yaml");

        let bare = Command::new("terraform", Vec::<String>::new());
        assert_eq!(bare.cmd_line(), "terraform");
    }

    #[test]
    fn mem_runner_matches_by_prefix() {
        let runner = MemRunner::new();
        runner.stub("git show", "{\"apps\":[]}");

        let out = runner
            .run(Command::new("git", ["show", "HEAD~1:app.json"]))
            .unwrap();
        assert_eq!(out.output, "{\"apps\":[]}");
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn mem_runner_unstubbed_command_errors() {
        let runner = MemRunner::new();
        let err = runner
            .run(Command::new("terraform", ["plan"]))
            .unwrap_err();
        assert!(err.to_string().contains("no stub for command"));
    }

    #[test]
    fn mem_runner_stubbed_error_carries_output() {
        let runner = MemRunner::new();
        runner.stub_err("sops --encrypt", "sops metadata not found");

        let err = runner
            .run(Command::new("sops", ["--encrypt", "--in-place", "x.yaml"]))
            .unwrap_err();
        assert!(err.to_string().contains("sops metadata not found"));
    }

    #[test]
    fn os_runner_captures_combined_output() {
        let out = OsRunner::new()
            .run(Command::new("echo", ["hello"]))
            .unwrap();
        assert_eq!(out.output, "hello");
    }
}

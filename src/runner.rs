// ─────────────────────────────────────────────────────────────────────────────
//  buildtools :: runner  —  process spawning capability
//
//  Every external tool (tar, gn, ninja, the accelerator client) is invoked
//  through `CommandRunner`, so pipeline stages can be driven by a fake runner
//  returning canned results.
// ─────────────────────────────────────────────────────────────────────────────

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{Result, ToolsError};

/// One external command: program, arguments, working dir and extra env.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    pub program:       String,
    pub args:          Vec<String>,
    pub cwd:           Option<PathBuf>,
    pub env:           Vec<(String, String)>,
    /// Let the child write straight to our terminal instead of capturing.
    pub inherit_stdio: bool,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into(), ..Default::default() }
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

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn envs<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.env.extend(vars);
        self
    }

    pub fn inherit_stdio(mut self) -> Self {
        self.inherit_stdio = true;
        self
    }

    /// Short tool name used in error messages (`/usr/bin/tar` → `tar`).
    pub fn tool_name(&self) -> String {
        Path::new(&self.program)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.clone())
    }

    /// Shell-ish rendering for verbose logs.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for a in &self.args {
            line.push(' ');
            if a.contains(' ') {
                line.push_str(&format!("'{}'", a));
            } else {
                line.push_str(a);
            }
        }
        line
    }
}

/// Result of a finished process. `status` is `None` when killed by a signal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Exit code to propagate; signal deaths map to 1.
    pub fn code(&self) -> i32 {
        self.status.unwrap_or(1)
    }
}

pub trait CommandRunner {
    fn run(&self, inv: &Invocation) -> Result<ProcessOutput>;
}

/// Runs commands with `std::process::Command`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, inv: &Invocation) -> Result<ProcessOutput> {
        log::debug!("$ {}", inv.command_line());

        let mut cmd = Command::new(&inv.program);
        cmd.args(&inv.args);
        if let Some(dir) = &inv.cwd {
            cmd.current_dir(dir);
        }
        for (k, v) in &inv.env {
            cmd.env(k, v);
        }

        let spawn_err = |e: std::io::Error| -> ToolsError {
            if e.kind() == ErrorKind::NotFound {
                ToolsError::ToolNotFound(inv.program.clone())
            } else {
                ToolsError::Io(e)
            }
        };

        if inv.inherit_stdio {
            let status = cmd
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .status()
                .map_err(spawn_err)?;
            return Ok(ProcessOutput { status: status.code(), ..Default::default() });
        }

        let out = cmd.output().map_err(spawn_err)?;
        Ok(ProcessOutput {
            status: out.status.code(),
            stdout: String::from_utf8_lossy(&out.stdout).to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).to_string(),
        })
    }
}

/// Run `inv` and turn a non-zero exit into `SubprocessFailure`.
pub fn run_checked(runner: &dyn CommandRunner, inv: &Invocation) -> Result<ProcessOutput> {
    let out = runner.run(inv)?;
    if !out.success() {
        if !out.stderr.trim().is_empty() {
            log::debug!("{} stderr:\n{}", inv.tool_name(), out.stderr.trim_end());
        }
        return Err(ToolsError::SubprocessFailure { tool: inv.tool_name(), code: out.code() });
    }
    Ok(out)
}

// ─────────────────────────────────────────────────────────────────────────────
//  Fake runner for unit tests
// ─────────────────────────────────────────────────────────────────────────────


#[cfg(test)]
mod tests {
    use super::fake::FakeRunner;
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn run_checked_maps_nonzero_exit_to_subprocess_failure() {
        let runner = FakeRunner::exiting(7);
        let inv = Invocation::new("/usr/bin/ninja").args(["-C", "out/Testing"]);
        match run_checked(&runner, &inv) {
            Err(ToolsError::SubprocessFailure { tool, code }) => {
                assert_eq!(tool, "ninja");
                assert_eq!(code, 7);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(runner.calls(), vec![inv]);
    }

    #[test]
    fn command_line_quotes_arguments_with_spaces() {
        let inv = Invocation::new("gn").args(["gen", "out/My Build"]);
        assert_eq!(inv.command_line(), "gn gen 'out/My Build'");
    }

    #[test]
    fn signal_death_exits_with_one() {
        let out = ProcessOutput { status: None, ..Default::default() };
        assert!(!out.success());
        assert_eq!(out.code(), 1);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  buildtools :: executor  —  gn gen + ninja
//
//  build:
//    1. cluster mode → accelerator must be authenticated
//    2. regeneration gate (or --force-gen) → write args.gn, `gn gen <out>`
//    3. accelerator compiler proxy (not on CI)
//    4. `ninja -C <out> [-j N] <target> [extra…]`, stdio inherited
//
//  A non-zero exit from gn or ninja surfaces as SubprocessFailure carrying
//  the tool's exit code.
// ─────────────────────────────────────────────────────────────────────────────

use std::fs;
use std::io::ErrorKind;

use crate::accelerator::Accelerator;
use crate::config::{AcceleratorMode, Config};
use crate::error::{Result, ToolsError};
use crate::regen::{DesiredArgs, ARGS_FILE};
use crate::runner::{run_checked, CommandRunner, Invocation};
use crate::sdk::Sdk;

/// One `bt build` request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildRequest {
    /// Falls back to `default_target`.
    pub target:    Option<String>,
    pub jobs:      Option<u32>,
    pub force_gen: bool,
    /// Passed to the executor after the target.
    pub extra:     Vec<String>,
}

pub struct Executor<'a> {
    cfg:    &'a Config,
    runner: &'a dyn CommandRunner,
    accel:  Option<&'a Accelerator<'a>>,
    sdk:    Option<&'a Sdk<'a>>,
}

impl<'a> Executor<'a> {
    pub fn new(cfg: &'a Config, runner: &'a dyn CommandRunner) -> Self {
        Self { cfg, runner, accel: None, sdk: None }
    }

    pub fn with_accelerator(mut self, accel: &'a Accelerator<'a>) -> Self {
        if accel.enabled() {
            self.accel = Some(accel);
        }
        self
    }

    pub fn with_sdk(mut self, sdk: &'a Sdk<'a>) -> Self {
        if sdk.applies() {
            self.sdk = Some(sdk);
        }
        self
    }

    /// Configured args plus whatever the accelerator contributes.
    pub fn desired_args(&self) -> DesiredArgs {
        let mut lines = self.cfg.gen.args.clone();
        if let Some(accel) = self.accel {
            lines.extend(accel.gn_args());
        }
        DesiredArgs::new(self.cfg.out_dir(), &lines)
    }

    /// `[env]` table, then accelerator, then SDK variables.
    pub fn build_env(&self) -> Vec<(String, String)> {
        let mut env: Vec<(String, String)> = self.cfg.env.iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(accel) = self.accel {
            env.extend(accel.executor_env());
        }
        if let Some(sdk) = self.sdk {
            env.extend(sdk.executor_env());
        }
        env
    }

    /// Run `gn gen` when the gate says so. Returns whether it ran.
    pub fn generate(&self, force: bool) -> Result<bool> {
        let args = self.desired_args();
        if !force && !args.needs_regeneration() {
            log::debug!("{} is up to date", args.out_dir.display());
            return Ok(false);
        }

        args.persist()?;
        let inv = Invocation::new(&self.cfg.generator)
            .arg("gen")
            .path_arg(&args.out_dir)
            .cwd(self.cfg.source_root())
            .envs(self.build_env())
            .inherit_stdio();

        if let Err(e) = run_checked(self.runner, &inv) {
            // Drop the persisted args so the next run regenerates.
            if let Err(rm) = fs::remove_file(args.out_dir.join(ARGS_FILE)) {
                if rm.kind() != ErrorKind::NotFound {
                    log::warn!("could not remove {}: {}", ARGS_FILE, rm);
                }
            }
            return Err(e);
        }
        Ok(true)
    }

    pub fn build_invocation(&self, req: &BuildRequest) -> Invocation {
        let target = req.target.clone().unwrap_or_else(|| self.cfg.default_target.clone());
        let jobs = req.jobs.or_else(|| self.accel.and_then(|a| a.default_jobs()));

        let mut inv = Invocation::new(&self.cfg.executor)
            .arg("-C")
            .path_arg(&self.cfg.out_dir());
        if let Some(j) = jobs {
            inv = inv.arg("-j").arg(j.to_string());
        }
        inv.arg(target)
            .args(req.extra.iter().cloned())
            .cwd(self.cfg.source_root())
            .envs(self.build_env())
            .inherit_stdio()
    }

    pub fn build(&self, req: &BuildRequest) -> Result<()> {
        if let Some(accel) = self.accel {
            if accel.mode() == AcceleratorMode::Cluster && !accel.is_authenticated()? {
                return Err(ToolsError::Other(
                    "accelerator is not authenticated, run `bt accel login` first".into(),
                ));
            }
        }

        self.generate(req.force_gen)?;

        if let Some(accel) = self.accel {
            accel.ensure_started()?;
        }

        let inv = self.build_invocation(req);
        log::debug!("building {}", inv.command_line());
        run_checked(self.runner, &inv).map(|_| ())
    }
}

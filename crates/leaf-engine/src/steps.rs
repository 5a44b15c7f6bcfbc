//! Execution of package install/sync/uninstall steps.
//!
//! Each step spawns a subprocess with its command `@{…}`-substituted,
//! cwd set to the package folder, and an environment built from the
//! process environment, the step's own pairs, the composed leaf
//! environment, and finally `LEAF_VERSION`. A non-zero exit is fatal
//! unless the step opts into `ignoreFail`.

use leaf_core::manifest::Step;
use leaf_core::{constants, Environment, Error, Result, VariableResolver};
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{debug, info, warn};

/// Runs the steps of one package.
#[derive(Debug)]
pub struct StepExecutor<'a> {
    /// Package folder, used as cwd and `@{DIR}`.
    folder: &'a Path,
    /// Bound variable resolver.
    resolver: &'a VariableResolver,
    /// Composed leaf environment.
    env: &'a Environment,
    /// Global verbose flag; inherits stdout when set.
    verbose: bool,
}

impl<'a> StepExecutor<'a> {
    /// Create an executor for a package folder.
    pub fn new(
        folder: &'a Path,
        resolver: &'a VariableResolver,
        env: &'a Environment,
        verbose: bool,
    ) -> Self {
        Self {
            folder,
            resolver,
            env,
            verbose,
        }
    }

    /// Run a step list. `phase` names the list in logs ("install",
    /// "sync", "uninstall"). When `ignore_all_failures` every step
    /// failure is downgraded to a warning (uninstall semantics).
    pub fn run_steps(
        &self,
        steps: &[Step],
        phase: &str,
        ignore_all_failures: bool,
    ) -> Result<()> {
        for (index, step) in steps.iter().enumerate() {
            if let Some(ref label) = step.label {
                info!(phase, "{label}");
            }
            match self.run_step(step) {
                Ok(()) => {}
                Err(err) if step.ignore_fail || ignore_all_failures => {
                    warn!(phase, index, %err, "step failed, continuing");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn run_step(&self, step: &Step) -> Result<()> {
        // Unresolved variables fail before anything is spawned.
        let command: Vec<String> = step
            .command
            .iter()
            .map(|arg| self.resolver.resolve(arg))
            .collect::<Result<_>>()
            .map_err(|err| Error::step_failed(err.to_string(), None))?;
        let Some((program, args)) = command.split_first() else {
            return Err(Error::step_failed("step has an empty command", None));
        };
        debug!(command = %command.join(" "), cwd = %self.folder.display(), "exec");

        let mut process = Command::new(program);
        process.args(args).current_dir(self.folder);
        for (key, value) in &step.env {
            if let Some(value) = value.as_str() {
                let value = self
                    .resolver
                    .resolve(value)
                    .map_err(|err| Error::step_failed(err.to_string(), None))?;
                process.env(key, value);
            }
        }
        for (key, value) in self.env.to_map() {
            process.env(key, value);
        }
        process.env("LEAF_VERSION", constants::LEAF_VERSION);

        let verbose = self.verbose || step.verbose;
        let output = if verbose {
            process
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .status()
                .map(|status| (status, Vec::new()))
        } else {
            process
                .stderr(Stdio::piped())
                .stdout(Stdio::piped())
                .output()
                .map(|out| {
                    let mut merged = out.stdout;
                    merged.extend_from_slice(&out.stderr);
                    (out.status, merged)
                })
        }
        .map_err(|e| {
            Error::step_failed(format!("cannot spawn '{program}': {e}"), None)
        })?;

        let (status, captured) = output;
        if !captured.is_empty() {
            debug!(output = %String::from_utf8_lossy(&captured).trim_end(), "step output");
        }
        if status.success() {
            Ok(())
        } else {
            Err(Error::step_failed(
                format!("'{}' exited with {status}", command.join(" ")),
                status.code(),
            )
            .with_hints(vec![
                "Re-run with --verbose to see the step output".to_string(),
            ]))
        }
    }
}

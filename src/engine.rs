//! Provisioning engine adapters

use levelrun::{
    ActionKind, ActionRunner, FailureCause, Invocation, ProcessStatus, ServiceDescriptor,
    run_with_timeout,
};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// Runs `terraform init` followed by plan or apply in the service directory
pub struct TerraformEngine {
    binary: String,
    init_timeout: Duration,
}

/// One engine step and the exit codes it treats as success
struct Step {
    name: &'static str,
    args: &'static [&'static str],
    ok_codes: &'static [i32],
}

const INIT: Step = Step {
    name: "init",
    args: &["init", "-no-color", "-input=false"],
    ok_codes: &[0],
};

// -detailed-exitcode: 0 no changes, 1 error, 2 changes present
const PLAN: Step = Step {
    name: "plan",
    args: &["plan", "-no-color", "-input=false", "-detailed-exitcode"],
    ok_codes: &[0, 2],
};

const APPLY: Step = Step {
    name: "apply",
    args: &["apply", "-auto-approve", "-no-color", "-input=false"],
    ok_codes: &[0],
};

impl TerraformEngine {
    pub fn new(binary: impl Into<String>, init_timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            init_timeout,
        }
    }

    fn run_step(
        &self,
        service: &ServiceDescriptor,
        step: &Step,
        budget: Duration,
        stdout: &mut String,
        stderr: &mut String,
    ) -> Result<(), FailureCause> {
        log::debug!("{}: {} {}", service.id, self.binary, step.args.join(" "));

        let mut command = Command::new(&self.binary);
        command
            .args(step.args)
            .current_dir(&service.path)
            .env("TF_IN_AUTOMATION", "1");

        let output = run_with_timeout(&mut command, budget).map_err(|e| FailureCause::SpawnFailed {
            step: step.name.to_string(),
            message: e.to_string(),
        })?;

        stdout.push_str(&output.stdout_str());
        stderr.push_str(&output.stderr_str());
        log::trace!(
            "{}: {} finished in {:.1}s",
            service.id,
            step.name,
            output.elapsed.as_secs_f64()
        );

        match output.status {
            ProcessStatus::Exited(code) if step.ok_codes.contains(&code) => Ok(()),
            ProcessStatus::Exited(code) => Err(FailureCause::NonZeroExit {
                step: step.name.to_string(),
                code,
            }),
            ProcessStatus::Signaled => Err(FailureCause::Terminated {
                step: step.name.to_string(),
            }),
            ProcessStatus::TimedOut => Err(FailureCause::TimedOut {
                step: step.name.to_string(),
                after_secs: budget.as_secs(),
            }),
        }
    }
}

impl ActionRunner for TerraformEngine {
    fn invoke(&self, service: &ServiceDescriptor, action: ActionKind, timeout: Duration) -> Invocation {
        let deadline = Instant::now().checked_add(timeout);
        let mut stdout = String::new();
        let mut stderr = String::new();

        let init_budget = self.init_timeout.min(timeout);
        if let Err(cause) = self.run_step(service, &INIT, init_budget, &mut stdout, &mut stderr) {
            return Invocation::failed(cause, stdout, stderr);
        }

        let step = match action {
            ActionKind::Inspect => &PLAN,
            ActionKind::Apply => &APPLY,
        };
        let remaining = deadline.map_or(timeout, |d| d.saturating_duration_since(Instant::now()));
        if remaining.is_zero() {
            let cause = FailureCause::TimedOut {
                step: step.name.to_string(),
                after_secs: timeout.as_secs(),
            };
            return Invocation::failed(cause, stdout, stderr);
        }

        match self.run_step(service, step, remaining, &mut stdout, &mut stderr) {
            Ok(()) => Invocation::succeeded(stdout, stderr),
            Err(cause) => Invocation::failed(cause, stdout, stderr),
        }
    }
}

/// Dry-run stand-in that never spawns the engine
pub struct SimulatedRunner;

impl ActionRunner for SimulatedRunner {
    fn invoke(&self, service: &ServiceDescriptor, action: ActionKind, _timeout: Duration) -> Invocation {
        log::info!("[DRY-RUN] {action} for {}", service.id);
        Invocation::succeeded(
            format!("[DRY-RUN] Simulated {action} for {}\n", service.id),
            "",
        )
    }
}

/// Check if a command exists
pub fn command_exists(cmd: &str) -> bool {
    Command::new("which")
        .arg(cmd)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}

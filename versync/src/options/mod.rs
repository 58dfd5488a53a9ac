use std::{io::IsTerminal as _, path::PathBuf, time::Duration};

use clap::{ColorChoice, Parser};
use versync_core::ServiceVariant;
use versync_engine::{Activation, RunOptions};
use versync_remote::{LockPolicy, RetryPolicy};

#[derive(Parser, Debug, Clone)]
pub struct Options {
    #[arg(short, long, global = true, default_value = "false")]
    pub verbose: bool,

    #[arg(long, global = true, default_value_t = ColorChoice::Auto)]
    pub color: ColorChoice,
}
impl Options {
    pub fn use_color(&self) -> bool {
        match self.color {
            ColorChoice::Always => true,
            ColorChoice::Never => false,
            ColorChoice::Auto => std::io::stderr().is_terminal(),
        }
    }
}

/// Where the emulated service and the observed state live.
#[derive(clap::Args, Debug, Clone)]
pub struct StoreArgs {
    /// Snapshot file of the emulated remote service
    #[arg(long, default_value = "versync-remote.json")]
    pub remote: PathBuf,

    /// Observed-state event log
    #[arg(long, default_value = "versync-state.json")]
    pub state: PathBuf,
}

#[derive(clap::Args, Debug, Clone)]
pub struct DesiredArgs {
    /// Desired configuration: a JSON object with one list of elements per kind
    #[arg(long, default_value = "versync.json")]
    pub desired: PathBuf,

    /// Service to reconcile. Overrides the `service` of the desired file.
    #[arg(long)]
    pub service: Option<String>,
}

/// How a reconciliation run talks to the service.
#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    /// Validate the new version but leave it inactive
    #[arg(long, default_value_t = false)]
    pub no_activate: bool,

    /// Apply to a new version, then abandon it without validating
    #[arg(long, default_value_t = false, conflicts_with = "no_activate")]
    pub dry_run: bool,

    /// How long to wait for another actor's edit lock
    #[arg(long, default_value_t = 45 * 60)]
    pub lock_timeout_secs: u64,

    /// Attempts per remote call, including the first
    #[arg(long, default_value_t = 4)]
    pub max_attempts: u32,

    /// Kinds applied at the same time; 1 applies them in order
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u32).range(1..))]
    pub parallel: u32,
}
impl RunArgs {
    pub fn run_options(&self) -> RunOptions {
        let activation = if self.dry_run {
            Activation::Discard
        } else if self.no_activate {
            Activation::LeaveInactive
        } else {
            Activation::Activate
        };
        RunOptions {
            activation,
            retry: RetryPolicy::default().with_max_attempts(self.max_attempts),
            lock: LockPolicy::default().with_timeout(Duration::from_secs(self.lock_timeout_secs)),
            max_parallel_kinds: self.parallel as usize,
        }
    }
}

pub fn parse_variant(s: &str) -> Result<ServiceVariant, String> {
    match s {
        "vcl" => Ok(ServiceVariant::Vcl),
        "compute" => Ok(ServiceVariant::Compute),
        other => Err(format!(
            "unknown service variant `{}`, expected `vcl` or `compute`",
            other
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Parser, Debug)]
    #[command(no_binary_name = true)]
    struct Wrapper {
        #[command(flatten)]
        run: RunArgs,
    }

    fn parse(args: &[&str]) -> Result<RunOptions, clap::Error> {
        Wrapper::try_parse_from(args).map(|w| w.run.run_options())
    }

    #[test]
    fn defaults_activate() {
        let options = parse(&[]).unwrap();
        assert_eq!(options, RunOptions::default());
    }

    #[test]
    fn activation_flags() {
        assert_eq!(
            parse(&["--no-activate"]).unwrap().activation,
            Activation::LeaveInactive
        );
        assert_eq!(parse(&["--dry-run"]).unwrap().activation, Activation::Discard);
        assert!(parse(&["--dry-run", "--no-activate"]).is_err());
    }

    #[test]
    fn tuning_flags() {
        let options = parse(&[
            "--max-attempts",
            "1",
            "--parallel",
            "1",
            "--lock-timeout-secs",
            "30",
        ])
        .unwrap();
        assert_eq!(options.retry.max_attempts, 1);
        assert_eq!(options.max_parallel_kinds, 1);
        assert_eq!(options.lock.timeout, Duration::from_secs(30));
        assert!(parse(&["--parallel", "0"]).is_err());
    }

    #[test]
    fn variants() {
        assert_eq!(parse_variant("compute"), Ok(ServiceVariant::Compute));
        assert!(parse_variant("edge").is_err());
    }
}

//! Command line interface.
//!
//! Two commands share one sandbox: `run` brings the container pair up
//! and holds it until interrupted; `validate` drives the runtime
//! contract against it. SIGINT/SIGTERM request cancellation rather
//! than exiting, so teardown always runs; a second signal force-exits.

use crate::config::types::{ErrorLevel, SandboxConfig, VetboxError};
use crate::contract::builtin::builtin_clauses;
use crate::contract::hooks::load_hook_clauses;
use crate::runtime::docker::DockerCli;
use crate::runtime::ContainerRuntime;
use crate::sandbox::{CancelFlag, ContainerSandbox};
use crate::scheduler::ContractScheduler;
use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use log::{error, info, warn};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Exit code for fatal aborts (build/start/graph errors), as opposed
/// to 1 for a failed validation.
const EXIT_FATAL: u8 = 2;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Append log output to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the sandbox and keep it running until interrupted
    Run {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Run the runtime contract against the sandboxed application
    Validate {
        #[command(flatten)]
        target: TargetArgs,
        /// Severity at or above which failures fail the run
        #[arg(long, default_value = "WARNING")]
        threshold: ErrorLevel,
        /// Only evaluate clauses carrying one of these tags
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
        /// Directory to discover hook clause definitions in
        #[arg(long)]
        hook_dir: Option<PathBuf>,
        /// Wall-clock budget for each hook process, in seconds
        #[arg(long, default_value_t = 30)]
        hook_timeout: u64,
        /// Emit the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct TargetArgs {
    /// Application configuration file; its directory is the build
    /// context for the application image
    #[arg(long)]
    config_file: Option<PathBuf>,
    /// Pre-built application image reference (skips the build)
    #[arg(long)]
    image: Option<String>,
    /// Application id injected into both containers
    #[arg(long)]
    app_id: Option<String>,
    /// Host port the application is published on
    #[arg(long, default_value_t = 8080)]
    application_port: u16,
    /// Host port the API-emulation container listens on
    #[arg(long, default_value_t = 10000)]
    api_port: u16,
    /// Base image the API container is derived from
    #[arg(long, default_value = "vetbox/api-base")]
    api_base_image: String,
    /// Seconds to wait for the application to become reachable
    #[arg(long, default_value_t = 30)]
    timeout: u64,
    /// Rebuild images without the build cache
    #[arg(long)]
    nocache: bool,
}

impl TargetArgs {
    fn into_config(self) -> SandboxConfig {
        let mut config = SandboxConfig {
            config_file: self.config_file,
            image: self.image,
            application_port: self.application_port,
            api_port: self.api_port,
            api_base_image: self.api_base_image,
            timeout_secs: self.timeout,
            nocache: self.nocache,
            ..SandboxConfig::default()
        };
        if let Some(app_id) = self.app_id {
            config.app_id = app_id;
        }
        config
    }
}

static CANCEL_FLAG: OnceLock<CancelFlag> = OnceLock::new();
static SIGNAL_SEEN: AtomicBool = AtomicBool::new(false);

extern "C" fn signal_handler(sig: i32) {
    // ASYNC-SIGNAL SAFETY: atomics and libc::write/_exit only.
    // The first signal flips the cancel flag and lets the run tear
    // down; a second one hard-exits.
    if SIGNAL_SEEN.swap(true, Ordering::SeqCst) {
        let msg = b"vetbox: killed\n";
        unsafe {
            libc::write(2, msg.as_ptr() as *const libc::c_void, msg.len());
            libc::_exit(128 + sig);
        }
    }
    if let Some(flag) = CANCEL_FLAG.get() {
        flag.cancel();
    }
}

fn setup_signal_handlers() -> CancelFlag {
    let flag = CANCEL_FLAG.get_or_init(CancelFlag::new).clone();
    unsafe {
        libc::signal(libc::SIGTERM, signal_handler as usize);
        libc::signal(libc::SIGINT, signal_handler as usize);
    }
    flag
}

fn init_logging(log_file: Option<&std::path::Path>) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(path) = log_file {
        match std::fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("could not open log file {}: {}", path.display(), e),
        }
    }
    builder.init();
}

pub fn run() -> ExitCode {
    let cancel = setup_signal_handlers();
    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref());

    match execute(cli.command, cancel) {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            eprintln!("vetbox: fatal: {e:#}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

fn execute(command: Commands, cancel: CancelFlag) -> Result<ExitCode> {
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerCli::new()?);
    match command {
        Commands::Run { target } => {
            let config = target.into_config();
            let mut sandbox = ContainerSandbox::with_cancel(runtime, config, cancel.clone())?;
            let outcome = hold_sandbox(&mut sandbox, &cancel);
            sandbox.stop();
            match outcome {
                Ok(()) | Err(VetboxError::Canceled) => Ok(ExitCode::SUCCESS),
                Err(e) => Err(e.into()),
            }
        }
        Commands::Validate {
            target,
            threshold,
            tags,
            hook_dir,
            hook_timeout,
            json,
        } => {
            let config = target.into_config();
            let mut clauses = builtin_clauses();
            if let Some(dir) = hook_dir {
                // Hooks are tied to a configuration target; a bare
                // image reference carries nothing for them to check
                // against.
                if config.config_file.is_some() {
                    clauses.extend(load_hook_clauses(&dir)?);
                } else {
                    warn!("ignoring --hook-dir: target is an image reference");
                }
            }
            let mut scheduler = ContractScheduler::new(clauses, threshold, tags)?
                .with_cancel(cancel.clone())
                .with_hook_timeout(Duration::from_secs(hook_timeout));
            let mut sandbox = ContainerSandbox::with_cancel(runtime, config, cancel)?;
            let report = scheduler.run(&mut sandbox)?;
            if json {
                println!("{}", report.to_json()?);
            } else {
                print!("{}", report.render());
            }
            Ok(if report.passed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

/// Keep the sandbox alive until cancellation or until a container
/// dies underneath it.
fn hold_sandbox(
    sandbox: &mut ContainerSandbox,
    cancel: &CancelFlag,
) -> std::result::Result<(), VetboxError> {
    sandbox.prepare()?;
    sandbox.start()?;
    info!("Sandbox is up; press Ctrl-C to stop");
    loop {
        if cancel.is_canceled() {
            return Err(VetboxError::Canceled);
        }
        if let Some(app) = sandbox.app_container() {
            if !app.running() {
                return Err(VetboxError::Runtime(
                    "application container stopped".to_string(),
                ));
            }
        }
        std::thread::sleep(Duration::from_millis(500));
    }
}

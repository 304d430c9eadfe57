use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use queue_runner::config::{BackoffRange, EntryConfig, RunPolicy, RunnerConfig, Verbosity};
use queue_runner::environment::ScriptLoader;
use queue_runner::error::{EXIT_FAILURE, EXIT_OK};
use queue_runner::identity::WorkerIdentity;
use queue_runner::logging;
use queue_runner::shutdown::install_shutdown_handler;
use queue_runner::worker::WorkerLoop;

#[derive(Parser, Debug)]
#[command(name = "queue-runner")]
#[command(version)]
#[command(about = "Run queued jobs from a shared directory, one worker at a time per claim")]
struct Args {
    /// Minimum backoff interval in seconds
    #[arg(long, default_value = "25")]
    min_wait: u64,

    /// Maximum backoff interval in seconds
    #[arg(long, default_value = "90")]
    max_wait: u64,

    /// Log file verbosity
    #[arg(short, long, value_enum, default_value = "info")]
    verbose: Verbosity,

    /// Shared root holding queue/, work/, done/ and temp/
    #[arg(long, default_value = "xpdata")]
    root: PathBuf,

    /// Exit after the first executed job instead of looping forever
    #[arg(long)]
    once: bool,

    /// Explicit 32-hex-character worker identity (default: derived from the machine)
    #[arg(long)]
    identity: Option<String>,

    /// Seconds after which a wait flag is considered stale (0 disables the sweep)
    #[arg(long, default_value = "900")]
    flag_ttl: u64,

    /// Allow a queued job to be claimed again after it ran
    #[arg(long)]
    no_claim_markers: bool,

    /// Leave finished working copies in work/ instead of moving them to done/
    #[arg(long)]
    no_archive: bool,

    /// Program used to run a job's entry point
    #[arg(long, default_value = "python3")]
    interpreter: String,
}

impl Args {
    fn into_config(self) -> anyhow::Result<RunnerConfig> {
        let mut config = RunnerConfig::new(self.root)
            .with_backoff(BackoffRange::from_secs(self.min_wait, self.max_wait))
            .with_verbosity(self.verbose)
            .with_policy(if self.once {
                RunPolicy::Once
            } else {
                RunPolicy::Forever
            })
            .with_flag_ttl((self.flag_ttl > 0).then(|| Duration::from_secs(self.flag_ttl)))
            .with_claim_markers(!self.no_claim_markers)
            .with_archive(!self.no_archive)
            .with_entry(EntryConfig {
                interpreter: self.interpreter,
                ..Default::default()
            });
        if let Some(raw) = self.identity {
            config = config.with_identity(WorkerIdentity::parse(&raw)?);
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let code = match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            EXIT_FAILURE
        }
    };
    std::process::exit(code);
}

async fn run(args: Args) -> anyhow::Result<i32> {
    let config = args.into_config()?;
    let (workspace, identity) = WorkerLoop::provision(&config).await?;

    // Dropped before exit so buffered log lines reach the file.
    let _log_guard = logging::attach(&workspace, &identity, config.verbosity)?;
    eprintln!("queue-runner v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Identity: {}", identity);
    eprintln!("   Root: {}", workspace.root().display());

    let shutdown = install_shutdown_handler()?;
    let loader = Arc::new(ScriptLoader::new(&config.entry));
    let mut worker = WorkerLoop::new(&config, workspace, identity, loader, shutdown).await?;

    match worker.run().await {
        Ok(_) => Ok(EXIT_OK),
        Err(e) => {
            tracing::error!(error = %e, exit_code = e.exit_code(), "Worker terminated");
            Ok(e.exit_code())
        }
    }
}

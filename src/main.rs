use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flowline::cli::{self, CancellationToken, CommandContext, OutputMode, WaitOptions};
use flowline::config::{FlowlineConfig, WorkflowDirs};
use flowline::logging;
use flowline::store::SqliteStore;
use flowline::workflow::{RunManager, StepClaimer};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "flowline")]
#[command(about = "Lightweight workflow orchestrator - hand out workflow steps to agents")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project directory (defaults to current)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Database file (overrides config)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Suppress normal output
    #[arg(long, global = true)]
    quiet: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a run of a workflow
    Run {
        /// Workflow id
        workflow: String,

        /// Task title
        #[arg(trailing_var_arg = true, required = true)]
        task: Vec<String>,

        /// Mark the run as a dry run
        #[arg(long)]
        dry_run: bool,
    },

    /// Show a run and its steps
    Status {
        /// Run id or unique prefix
        run: String,
    },

    /// List recent runs
    Runs {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Cancel a running run
    Cancel {
        /// Run id or unique prefix
        run: String,
    },

    /// Validate a workflow without running it
    Validate {
        /// Workflow id
        workflow: String,
    },

    /// List available workflows
    Workflows,

    /// Agent-facing step operations
    Step {
        #[command(subcommand)]
        command: StepCommands,
    },
}

#[derive(Subcommand)]
enum StepCommands {
    /// Claim the next pending step for an agent
    Claim {
        /// Qualified agent id (`<workflow>_<agent>`)
        agent_id: String,

        /// Keep polling until a step is available
        #[arg(long)]
        wait: bool,

        /// Poll interval in milliseconds (defaults to config)
        #[arg(long)]
        poll_ms: Option<u64>,
    },

    /// Record a claimed step's output
    Complete {
        step_id: String,

        /// Output text; read from stdin when omitted
        #[arg(long)]
        output: Option<String>,
    },

    /// Record a claimed step's failure
    Fail { step_id: String, error: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_guard = logging::init_logging(cli.debug, cli.quiet, cli.log_file.as_deref())?;
    let code = execute(cli).await?;

    // Flush the file writer; process::exit skips destructors
    drop(log_guard);
    std::process::exit(code);
}

async fn execute(args: Cli) -> Result<i32> {
    let project_dir = args.dir.as_deref();
    let config = FlowlineConfig::load(project_dir)?;

    let mode = OutputMode::from_flags(args.json, args.quiet);
    let handler = cli::create_handler(mode, args.debug);

    let workflows = Arc::new(WorkflowDirs::new(config.workflow_dirs(project_dir)?));

    // Commands that never touch the database
    let code = match args.command {
        Commands::Validate { ref workflow } => {
            Some(cli::validate_workflow(&workflows, workflow, &*handler))
        }
        Commands::Workflows => Some(cli::list_workflows(&workflows, &*handler)),
        _ => None,
    };
    if let Some(code) = code {
        return Ok(code);
    }

    let db_path = match args.db {
        Some(path) => path,
        None => config.database_path()?,
    };
    let busy_timeout = config.database.busy_timeout();
    let store = Arc::new(
        SqliteStore::open(&db_path, busy_timeout)
            .with_context(|| format!("opening run database {}", db_path.display()))?,
    );

    let ctx = CommandContext {
        workflows: workflows.clone(),
        manager: RunManager::new(workflows, store.clone()),
        claimer: Arc::new(StepClaimer::new(store)),
    };

    let code = match args.command {
        Commands::Run {
            workflow,
            task,
            dry_run,
        } => cli::start_run(&ctx, &workflow, &task.join(" "), dry_run, &*handler),

        Commands::Status { run } => cli::run_status(&ctx, &run, &*handler),

        Commands::Runs { limit } => cli::list_runs(&ctx, limit, &*handler),

        Commands::Cancel { run } => cli::cancel_run(&ctx, &run, &*handler),

        Commands::Step { command } => match command {
            StepCommands::Claim {
                agent_id,
                wait,
                poll_ms,
            } => {
                let token = CancellationToken::new();
                tokio::spawn(cli::setup_signal_handlers(token.clone()));

                let wait = wait.then(|| WaitOptions {
                    poll_interval: poll_ms
                        .map(Duration::from_millis)
                        .unwrap_or_else(|| config.worker.poll_interval()),
                });
                cli::claim_step(&ctx, &agent_id, wait, token, &*handler).await
            }

            StepCommands::Complete { step_id, output } => {
                let output = match output {
                    Some(text) => text,
                    None => {
                        let mut text = String::new();
                        std::io::stdin()
                            .read_to_string(&mut text)
                            .context("reading step output from stdin")?;
                        text
                    }
                };
                cli::complete_step(&ctx, &step_id, &output, &*handler)
            }

            StepCommands::Fail { step_id, error } => {
                cli::fail_step(&ctx, &step_id, &error, &*handler)
            }
        },

        Commands::Validate { .. } | Commands::Workflows => 0,
    };

    Ok(code)
}

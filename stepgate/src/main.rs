//! `stepgate` command-line entry point.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use stepgate::core::parser::parse_timestamp;
use stepgate::exit_codes;
use stepgate::hook::{HookResponse, handle_subagent_stop};
use stepgate::inspect::inspect_log;
use stepgate::io::clock::{SystemClock, TimeProvider};
use stepgate::io::config::{DEFAULT_CONFIG_PATH, GateConfig, load_config, write_config};
use stepgate::io::execution_log::JsonExecutionLog;
use stepgate::logging;

#[derive(Parser)]
#[command(
    name = "stepgate",
    version,
    about = "Phase gate for agent-driven TDD steps"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the default `.stepgate/config.toml` if missing.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Decide whether an agent may stop; reads the hook payload from stdin.
    SubagentStop {
        /// Config file (default: `<cwd>/.stepgate/config.toml`).
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print a read-only validation report for one step.
    Inspect {
        /// Execution log file.
        #[arg(long)]
        log: PathBuf,
        /// Step to validate.
        #[arg(long)]
        step: String,
        /// Task start time (RFC 3339) enabling pre-task checks.
        #[arg(long)]
        task_start: Option<String>,
        /// Config file (default: `./.stepgate/config.toml`).
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match cli.command {
        Command::Init { force } => report(cmd_init(force)),
        Command::SubagentStop { config } => cmd_subagent_stop(config.as_deref()),
        Command::Inspect {
            log,
            step,
            task_start,
            config,
        } => report(cmd_inspect(
            &log,
            &step,
            task_start.as_deref(),
            config.as_deref(),
        )),
    };
    std::process::exit(code);
}

fn report(result: Result<()>) -> i32 {
    match result {
        Ok(()) => exit_codes::OK,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    }
}

fn cmd_init(force: bool) -> Result<()> {
    let path = Path::new(DEFAULT_CONFIG_PATH);
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &GateConfig::default())?;
    println!("{}", path.display());
    Ok(())
}

fn cmd_subagent_stop(config: Option<&Path>) -> i32 {
    let mut payload = String::new();
    let response = match std::io::stdin().read_to_string(&mut payload) {
        Ok(_) => handle_subagent_stop(&payload, config),
        Err(err) => HookResponse::invalid(&anyhow::Error::new(err).context("read hook payload")),
    };
    println!("{}", response.render());
    response.exit_code
}

fn cmd_inspect(
    log: &Path,
    step: &str,
    task_start: Option<&str>,
    config: Option<&Path>,
) -> Result<()> {
    let config_path = config.map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), Path::to_path_buf);
    let config = load_config(&config_path)
        .with_context(|| format!("load config {}", config_path.display()))?;
    let schema = config.schema().context("build phase schema")?;
    let task_start_time = task_start
        .map(|raw| parse_timestamp(raw).ok_or_else(|| anyhow!("invalid --task-start '{raw}'")))
        .transpose()?;
    let report = inspect_log(
        &JsonExecutionLog,
        &schema,
        log,
        step,
        task_start_time,
        SystemClock.now(),
    )?;
    let rendered = serde_json::to_string_pretty(&report).context("serialize report")?;
    println!("{rendered}");
    Ok(())
}

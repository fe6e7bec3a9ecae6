use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use bourreau_core::app::{Operator, PollLoop, PollSettings, TaskView};
use bourreau_core::driver::shell_quote;
use bourreau_core::impls::{SHELL_TASK_TYPE, ShellParams};
use bourreau_core::parallelizer::{PARALLELIZER_TYPE, launch_group};
use bourreau_core::{EngineBuilder, EngineConfig};

#[derive(Parser)]
#[command(name = "bourreau")]
#[command(about = "Run shell tasks through the bourreau lifecycle engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create tasks running COMMAND and drive them until they are all done
    Run {
        /// TOML config file; defaults apply when omitted
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Number of tasks to create
        #[arg(long, default_value_t = 1)]
        count: usize,

        /// Run tasks in groups of this size inside one job (below 2: no groups)
        #[arg(long, default_value_t = 1)]
        group_size: usize,

        #[arg(last = true, required = true, value_name = "COMMAND")]
        command: Vec<String>,
    },
    /// Validate a config file and print the effective settings
    CheckConfig {
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("bourreau=info,bourreau_core=info")),
        )
        .init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Commands::Run {
            config,
            count,
            group_size,
            command,
        } => run(config, count, group_size, command).await,
        Commands::CheckConfig { config } => check_config(config),
    };
    match outcome {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn check_config(path: Option<PathBuf>) -> Result<ExitCode> {
    let config = EngineConfig::load(path.as_deref()).context("loading config")?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(ExitCode::SUCCESS)
}

async fn run(path: Option<PathBuf>, count: usize, group_size: usize, command: Vec<String>) -> Result<ExitCode> {
    // (A) 設定を読み込み engine を組み立てる
    let config = EngineConfig::load(path.as_deref()).context("loading config")?;
    std::fs::create_dir_all(&config.work_root)
        .with_context(|| format!("creating {}", config.work_root.display()))?;

    let engine = EngineBuilder::from_config(&config)
        .with_builtin_kinds()?
        .expect_task_types(&[SHELL_TASK_TYPE, PARALLELIZER_TYPE])
        .build()?;
    let operator = Operator::new(engine.clone());

    // (B) タスク投入（group_size が 2 以上なら wrapper でまとめる）
    let line = command.iter().map(|arg| shell_quote(arg)).collect::<Vec<_>>().join(" ");
    let params = ShellParams::new([line]).to_params();
    let batch = engine.new_batch_id();
    let tasks = (0..count)
        .map(|rank| engine.new_task(SHELL_TASK_TYPE, params.clone()).with_batch(batch, rank as u32))
        .collect();
    let report = launch_group(&engine, tasks, group_size).await?;
    info!(
        %batch,
        wrappers = report.wrappers.len(),
        independent = report.independent.len(),
        covered = report.covered,
        "tasks launched"
    );

    // (C) poll loop を起動し、全タスクが終端に達するか Ctrl-C まで待つ
    let poll = PollLoop::spawn(
        engine.clone(),
        PollSettings {
            interval: config.poll_interval(),
            max_parallel_advances: config.max_parallel_advances,
        },
    );

    let mut ticker = tokio::time::interval(config.poll_interval());
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted, terminating remaining tasks");
                for view in operator.batch_status(batch).await? {
                    if view.status.is_terminal() {
                        continue;
                    }
                    if let Err(e) = operator.terminate(view.id).await {
                        warn!(task_id = %view.id, error = %e, "terminate failed");
                    }
                }
                break;
            }
            _ = ticker.tick() => {
                if operator.status_counts(batch).await?.all_terminal() {
                    break;
                }
            }
        }
    }
    poll.shutdown_and_join().await;

    let views = operator.batch_status(batch).await?;
    print_table(&views);
    let counts = operator.status_counts(batch).await?;
    println!(
        "\n{} task(s): {} completed, {} failed, {} terminated",
        counts.total, counts.completed, counts.failed, counts.terminated
    );
    if counts.completed == counts.total {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn print_table(views: &[TaskView]) {
    println!("{:<28} {:<14} {:<32} {:>4} {:<10}", "TASK", "TYPE", "STATUS", "RUN", "JOB");
    for view in views {
        println!(
            "{:<28} {:<14} {:<32} {:>4} {:<10}",
            view.id.to_string(),
            view.task_type,
            view.status.to_string(),
            view.run_number,
            view.cluster_jobid.as_deref().unwrap_or("-"),
        );
    }
}

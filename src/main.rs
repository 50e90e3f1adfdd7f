//! Agentverse - agent runner
//!
//! Commands:
//! - `run --agent <id>`: run one agent from the config file
//! - `workflow`: run every agent along the workflow graph

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::Value;

use agentverse::core::logging;
use agentverse::{AgentOutcome, AgentverseError, Config, OrchestrationSession};

/// Agentverse - agent execution and multi-agent orchestration
#[derive(Parser, Debug)]
#[command(name = "agentverse")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Config file (defaults to AGENTVERSE_CONFIG, then ~/.config/agentverse/config.toml)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Session input; parsed as JSON when it is valid JSON, plain text otherwise
    #[arg(long, short = 'i', global = true)]
    input: Option<String>,

    /// Enable debug logging
    #[arg(long, short = 'd', global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a single agent
    Run {
        /// Agent id from the config file
        #[arg(long, short = 'a')]
        agent: String,
    },

    /// Run the multi-agent workflow
    Workflow,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref()).context("loading configuration")?;
    if args.debug {
        config.logging.level = "debug".to_string();
    }
    logging::init(&config.logging)?;

    let input = args
        .input
        .as_deref()
        .map(|raw| serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())))
        .unwrap_or(Value::Null);

    match args.command {
        Command::Run { agent } => run_agent(&config, &agent, input).await,
        Command::Workflow => run_workflow(&config, input).await,
    }
}

async fn run_agent(config: &Config, agent: &str, input: Value) -> anyhow::Result<()> {
    let session = OrchestrationSession::single_agent(config, agent)?;
    cancel_on_ctrl_c(&session);

    let outcome = match session.run(input).await {
        Ok(mut outcomes) => outcomes.remove(agent),
        Err(AgentverseError::WorkflowFailed { mut outcomes, .. }) => outcomes.remove(agent),
        Err(err) => return Err(err.into()),
    };

    let output = outcome
        .unwrap_or(AgentOutcome::Cancelled)
        .into_result(agent)?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run_workflow(config: &Config, input: Value) -> anyhow::Result<()> {
    let session = OrchestrationSession::from_config(config)?;
    cancel_on_ctrl_c(&session);

    match session.run(input).await {
        Ok(outcomes) => {
            print_outcomes(&outcomes)?;
            Ok(())
        }
        Err(err) => {
            if let Some(outcomes) = err.outcomes() {
                print_outcomes(outcomes)?;
            }
            Err(err.into())
        }
    }
}

fn print_outcomes(outcomes: &BTreeMap<String, AgentOutcome>) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(outcomes)?);
    Ok(())
}

fn cancel_on_ctrl_c(session: &OrchestrationSession) {
    let token = session.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling session");
            token.cancel();
        }
    });
}

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use flowsmith_core::WorkflowGraph;
use flowsmith_core::catalog::{NodeTypeCatalog, StaticNodeTypeCatalog, UnavailableCatalog};
use flowsmith_core::executions::{ExecutionStore, FileExecutionStore, NoExecutionStore};
use flowsmith_core::ports::ServicePortContract;
use flowsmith_llm::agent::conversation::{
    ChatRole, ConversationStore, ConversationWindow, FileConversationStore,
};
use flowsmith_llm::agent::tools::ExecutionContext;
use flowsmith_llm::agent::{
    Agent, AgentConfig, AgentEvent, AgentRequest, EventSink, ToolRegistry,
};
use flowsmith_llm::{LlmClient, LlmConfig};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "flowsmith", about = "Build or edit a workflow graph from a natural-language request")]
struct Args {
    /// What the user wants.
    request: String,

    /// Current workflow graph (JSON).
    #[arg(long)]
    graph: Option<PathBuf>,

    /// Installed node types (JSON array). Without it the registry is treated as unavailable.
    #[arg(long)]
    node_types: Option<PathBuf>,

    /// Execution history root, one subdirectory of JSON records per workflow.
    #[arg(long)]
    executions: Option<PathBuf>,

    #[arg(long)]
    workflow_id: Option<String>,

    /// Diagnostics already at hand for this request (JSON).
    #[arg(long)]
    execution_context: Option<PathBuf>,

    /// Conversation history directory.
    #[arg(long, requires = "session")]
    session_dir: Option<PathBuf>,

    #[arg(long, requires = "session_dir")]
    session: Option<String>,

    /// Model invocations allowed per request (at least 1).
    #[arg(long, default_value_t = flowsmith_llm::agent::DEFAULT_MAX_TURNS, value_parser = parse_max_turns)]
    max_turns: usize,

    #[arg(long, env = "FLOWSMITH_BASE_URL", default_value = "http://localhost:1234/v1")]
    base_url: String,

    #[arg(long, env = "FLOWSMITH_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long, env = "FLOWSMITH_MODEL", default_value = "local-model")]
    model: String,

    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,
}

fn parse_max_turns(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

fn init_tracing(log_dir: &Path) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log dir {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix("flowsmith")
        .filename_suffix("jsonl")
        .build(log_dir)
        .context("Failed to create log file appender")?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_filter = EnvFilter::new("debug");

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .with(
            fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(file_filter),
        )
        .init();

    Ok(guard)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {} {}", what, path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse {} {}", what, path.display()))
}

async fn save_exchange(
    store: &dyn ConversationStore,
    session: &str,
    request: &str,
    answer: &str,
    meta: serde_json::Value,
) -> Result<()> {
    store.append(session, ChatRole::User, request, None).await?;
    store
        .append(session, ChatRole::Assistant, answer, Some(meta))
        .await
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _guard = init_tracing(&args.log_dir)?;

    let existing_graph: Option<WorkflowGraph> = args
        .graph
        .as_deref()
        .map(|p| read_json(p, "workflow"))
        .transpose()?;
    let execution_context: Option<ExecutionContext> = args
        .execution_context
        .as_deref()
        .map(|p| read_json(p, "execution context"))
        .transpose()?;

    let catalog: Box<dyn NodeTypeCatalog> = match &args.node_types {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read node types {}", path.display()))?;
            Box::new(StaticNodeTypeCatalog::from_json(&text)?)
        }
        None => Box::new(UnavailableCatalog),
    };
    let executions: Box<dyn ExecutionStore> = match &args.executions {
        Some(dir) => Box::new(FileExecutionStore::new(dir)),
        None => Box::new(NoExecutionStore),
    };

    let config = AgentConfig {
        max_turns: args.max_turns,
        ..AgentConfig::default()
    };

    let sessions = args
        .session_dir
        .as_ref()
        .zip(args.session.as_deref())
        .map(|(dir, id)| (FileConversationStore::new(dir), id));
    let history = match &sessions {
        Some((store, id)) => match store.tail(id, config.history_window).await {
            Ok(entries) => ConversationWindow::from(entries),
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Could not load conversation history");
                ConversationWindow::new()
            }
        },
        None => ConversationWindow::new(),
    };

    let mut request = AgentRequest::new(args.request.clone()).with_history(history);
    if let Some(graph) = existing_graph {
        request = request.with_existing_graph(graph);
    }
    if let Some(id) = &args.workflow_id {
        request = request.with_workflow_id(id);
    }
    if let Some(context) = execution_context {
        request = request.with_execution_context(context);
    }

    let client = LlmClient::new(LlmConfig {
        base_url: args.base_url.clone(),
        api_key: args.api_key.clone(),
        model: args.model.clone(),
        ..LlmConfig::default()
    });
    info!(model = %args.model, base_url = %args.base_url, "Starting agent");

    let (tx, mut rx) = mpsc::channel::<AgentEvent>(64);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Ok(line) = serde_json::to_string(&event) {
                eprintln!("{}", line);
            }
        }
    });

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; cancelling after the current turn");
            ctrl_c.cancel();
        }
    });

    let registry = ToolRegistry::standard();
    let contract = ServicePortContract::builtin();
    let outcome = Agent::new(
        &client,
        &registry,
        catalog.as_ref(),
        executions.as_ref(),
        &contract,
    )
    .with_config(config)
    .with_events(EventSink::new(tx))
    .with_cancellation(cancel)
    .run(&request)
    .await;

    // The agent (and its sender) is gone; let the printer flush.
    printer.await.ok();

    let result = outcome?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if let Some((store, id)) = &sessions {
        let meta = json!({
            "graphChanged": !result.graph.is_no_change(),
            "missingNodeTypes": result.missing_node_types,
        });
        if let Err(e) = save_exchange(store, id, &args.request, &result.message, meta).await {
            warn!(error = %format!("{:#}", e), "Could not save conversation history");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_turns_defaults_and_accepts_positive_values() {
        let args = Args::try_parse_from(["flowsmith", "hi"]).unwrap();
        assert_eq!(args.max_turns, flowsmith_llm::agent::DEFAULT_MAX_TURNS);
        let args = Args::try_parse_from(["flowsmith", "hi", "--max-turns", "3"]).unwrap();
        assert_eq!(args.max_turns, 3);
    }

    #[test]
    fn zero_max_turns_is_rejected() {
        assert!(Args::try_parse_from(["flowsmith", "hi", "--max-turns", "0"]).is_err());
        assert!(Args::try_parse_from(["flowsmith", "hi", "--max-turns", "-1"]).is_err());
    }
}

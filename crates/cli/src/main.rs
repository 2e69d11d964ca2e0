//! `rusty-automation-tool` CLI entry-point.
//!
//! Available sub-commands:
//! - `serve`    — start the API server and its in-process gateway.
//! - `worker`   — start the run-stepper and continuation queue workers.
//! - `migrate`  — run pending database migrations.
//! - `validate` — validate a workflow definition JSON file.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use agent::{AgentError, ChatRequest, ChatResponse, LlmProvider, LoopDeps, SkillRegistry, ToolDeps};
use engine::models::{DslVersion, Workflow, WorkflowDefinition, WorkflowStatus};
use gateway::Gateway;
use nodes::agent_execute::AgentExecuteNode;
use nodes::condition::ConditionNode;
use nodes::connector::{ConnectorActionNode, ConnectorRegistry};
use nodes::http_request::{HttpRequestNode, ReqwestHttpClient};
use nodes::parallel_join::ParallelJoinNode;
use nodes::shell_run::{LocalShellSandbox, ShellRunNode};
use nodes::{EventEmitter, ExecutableNode, NodeRegistry};
use queue::{Worker, WorkerConfig};

mod config;

use config::AppConfig;

#[derive(Parser)]
#[command(
    name = "rusty-automation-tool",
    about = "High-performance workflow automation engine",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the REST API server.
    Serve {
        #[arg(long)]
        bind: Option<String>,
    },
    /// Start the run stepper and continuation workers that drain the
    /// durable queues.
    Worker,
    /// Run pending database migrations.
    Migrate {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow definition JSON file.
        path: std::path::PathBuf,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { bind } => {
            let cfg = AppConfig::from_env().expect("invalid configuration");
            let bind = bind.unwrap_or(cfg.bind.clone());
            info!("Starting API server on {bind}");

            let pool = db::pool::create_pool(&cfg.database_url, cfg.max_connections).await.expect("failed to connect to database");
            let gateway = Arc::new(Gateway::new(pool.clone(), cfg.selection_strategy()));

            api::serve(&bind, pool, gateway, cfg.default_organization_id, cfg.run_max_attempts_default).await.unwrap();
        }
        Command::Worker => {
            let cfg = AppConfig::from_env().expect("invalid configuration");
            info!("Starting run stepper and continuation workers");

            let pool = db::pool::create_pool(&cfg.database_url, cfg.max_connections).await.expect("failed to connect to database");
            let gateway = Arc::new(Gateway::new(pool.clone(), cfg.selection_strategy()));

            let registry = Arc::new(build_node_registry());
            let stepper_config = engine::StepperConfig { run_max_attempts_default: cfg.run_max_attempts_default, ..Default::default() };
            let stepper = Arc::new(engine::RunStepper::new(pool.clone(), registry, gateway.clone(), stepper_config));
            let continuation = Arc::new(engine::ContinuationHandler::new(pool.clone(), gateway.clone()));

            let run_worker = Worker::new(pool.clone(), stepper, WorkerConfig::default());
            let continuation_worker = Worker::new(pool, continuation, WorkerConfig::default());

            let run_shutdown = async {
                let _ = tokio::signal::ctrl_c().await;
            };
            let continuation_shutdown = async {
                let _ = tokio::signal::ctrl_c().await;
            };

            tokio::join!(run_worker.run(run_shutdown), continuation_worker.run(continuation_shutdown));
        }
        Command::Migrate { database_url } => {
            info!("Running migrations against {database_url}");
            let pool = db::pool::create_pool(&database_url, 2).await.expect("failed to connect to database");
            db::pool::run_migrations(&pool).await.expect("migration failed");
            info!("Migrations applied successfully");
        }
        Command::Validate { path } => {
            let content = std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("cannot read file {}: {e}", path.display()));

            #[derive(serde::Deserialize)]
            struct ValidateFile {
                #[serde(default = "default_dsl_version")]
                dsl_version: String,
                definition: Value,
            }
            fn default_dsl_version() -> String {
                "v2".to_string()
            }

            let file: ValidateFile = serde_json::from_str(&content).unwrap_or_else(|e| panic!("invalid JSON: {e}"));
            let dsl_version = DslVersion::parse(&file.dsl_version).unwrap_or_else(|e| panic!("invalid dslVersion: {e}"));
            let definition: WorkflowDefinition = serde_json::from_value(file.definition).unwrap_or_else(|e| panic!("invalid definition: {e}"));

            let probe = Workflow {
                id: Uuid::nil(),
                workflow_key: Uuid::nil(),
                name: path.display().to_string(),
                version: 0,
                dsl_version,
                status: WorkflowStatus::Draft,
                definition,
                created_at: chrono::Utc::now(),
            };

            match engine::validate_dag(&probe) {
                Ok(order) => {
                    println!("workflow is valid, execution order: {order:?}");
                }
                Err(e) => {
                    eprintln!("validation failed: {e}");
                    std::process::exit(1);
                }
            }
        }
    }
}

/// Every built-in node type, keyed the way workflow definitions name them
/// (spec §3/§4.4). `agent.run` is wired with an [`UnconfiguredLlmProvider`]
/// until an operator supplies a real one — see that type's doc comment.
fn build_node_registry() -> NodeRegistry {
    let mut registry: NodeRegistry = HashMap::new();

    registry.insert("condition".into(), Arc::new(ConditionNode) as Arc<dyn ExecutableNode>);
    registry.insert("parallel.join".into(), Arc::new(ParallelJoinNode));
    registry.insert("agent.execute".into(), Arc::new(AgentExecuteNode));
    registry.insert("http.request".into(), Arc::new(HttpRequestNode::new(ReqwestHttpClient::new())));
    registry.insert("shell.run".into(), Arc::new(ShellRunNode::new(LocalShellSandbox)));
    registry.insert("connector.action".into(), Arc::new(ConnectorActionNode::new(Arc::new(ConnectorRegistry::new()))));

    let tools = Arc::new(ToolDeps {
        shell_sandbox: Arc::new(LocalShellSandbox),
        connectors: Arc::new(ConnectorRegistry::new()),
        skills: Arc::new(SkillRegistry::new()),
    });
    let loop_deps = LoopDeps { provider: Arc::new(UnconfiguredLlmProvider), tools };
    registry.insert("agent.run".into(), Arc::new(agent::AgentRunNode::new(loop_deps)));

    registry
}

/// Placeholder [`LlmProvider`] wired in until an operator supplies a real
/// one (the provider HTTP clients are an external collaborator this system
/// doesn't implement — see `agent::provider`). Every call fails with
/// `LLM_AUTH_NOT_CONFIGURED`, the same wire code a missing credential
/// produces, so an `agent.run` node fails clearly rather than hanging.
struct UnconfiguredLlmProvider;

#[async_trait]
impl LlmProvider for UnconfiguredLlmProvider {
    fn provider_name(&self) -> &str {
        "unconfigured"
    }

    fn model(&self) -> &str {
        "none"
    }

    async fn chat(&self, _request: ChatRequest, _emit: &Arc<dyn EventEmitter>) -> Result<ChatResponse, AgentError> {
        Err(AgentError::LlmAuthNotConfigured)
    }
}

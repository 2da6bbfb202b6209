//! Application state wiring the execution core together.
//!
//! `AppState` pins the generic `Engine`/`AutomationEngine` to concrete SQLite
//! repositories, an in-process job queue, and the reference (echo/log)
//! capability-set implementations shipped by `loomwork-infra::workflow`.
//! Both CLI commands and REST handlers share one `AppState`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use loomwork_core::event::EventBus;
use loomwork_core::workflow::approval::{ApprovalManager, LoggingNotifier};
use loomwork_core::workflow::engine::{AutomationEngine, Engine, ExecutionJob, InProcessQueue};
use loomwork_core::workflow::step_runner::{AutomatedTaskExecutor, TaskExecutor};
use loomwork_infra::sqlite::approval::SqliteApprovalRepository;
use loomwork_infra::sqlite::pool::DatabasePool;
use loomwork_infra::sqlite::snapshot::SqliteSnapshotStore;
use loomwork_infra::sqlite::workflow::SqliteWorkflowRepository;
use loomwork_infra::workflow::{EchoAgentRuntime, EchoToolHandler};
use loomwork_types::config::EngineConfig;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Concrete `TaskExecutor` pinned to the reference agent/tool capabilities.
pub type ConcreteTaskExecutor = TaskExecutor<EchoAgentRuntime, EchoToolHandler>;

/// Concrete `AutomatedTaskExecutor` pinned to SQLite-backed approvals and
/// the reference, log-only notifier.
pub type ConcreteAutomatedExecutor = AutomatedTaskExecutor<
    EchoAgentRuntime,
    EchoToolHandler,
    SqliteApprovalRepository,
    LoggingNotifier,
>;

/// Concrete `Engine` pinned to SQLite persistence, the in-process queue, and
/// the plain (non-automated) dispatcher.
pub type ConcreteEngine = Engine<SqliteWorkflowRepository, InProcessQueue, ConcreteTaskExecutor>;

/// Concrete `AutomationEngine` pinned to the same collaborators plus the
/// TTL-backed SQLite snapshot store and the automated dispatcher.
pub type ConcreteAutomationEngine = AutomationEngine<
    SqliteWorkflowRepository,
    InProcessQueue,
    ConcreteTaskExecutor,
    ConcreteAutomatedExecutor,
    SqliteSnapshotStore,
    SqliteApprovalRepository,
>;

/// Shared application state: the wired engine, repositories, and the
/// approval manager CLI commands and HTTP handlers call directly (resolving
/// approvals happens outside step dispatch, so it is not reached through
/// the dispatcher trait).
#[derive(Clone)]
pub struct AppState {
    pub data_dir: PathBuf,
    pub config: EngineConfig,
    pub db_pool: DatabasePool,
    pub workflow_repo: Arc<SqliteWorkflowRepository>,
    pub engine: Arc<ConcreteEngine>,
    pub automation_engine: Arc<ConcreteAutomationEngine>,
    pub approvals: Arc<ApprovalManager<SqliteApprovalRepository, LoggingNotifier>>,
    /// Read-only handle for HTTP/CLI lookups (get-by-id, list-pending) that
    /// the `ApprovalManager` itself doesn't expose.
    pub approval_repo: Arc<SqliteApprovalRepository>,
    pub events: EventBus,
}

impl AppState {
    /// Connect to SQLite, run migrations, and wire the execution core.
    ///
    /// Returns the state together with the queue receiver so the caller
    /// (`main.rs`) can decide whether to spawn a long-running worker (the
    /// `serve` command) or drain one job inline (one-shot CLI submission).
    pub async fn init() -> anyhow::Result<(Self, mpsc::UnboundedReceiver<ExecutionJob>)> {
        let data_dir = resolve_data_dir();
        tokio::fs::create_dir_all(&data_dir).await?;

        let db_url = format!(
            "sqlite://{}?mode=rwc",
            data_dir.join("loomwork.db").display()
        );
        let db_pool = DatabasePool::new(&db_url).await?;
        let config = loomwork_infra::config::load_engine_config(&data_dir);

        let workflow_repo = Arc::new(SqliteWorkflowRepository::new(db_pool.clone()));
        let snapshots = Arc::new(SqliteSnapshotStore::new(db_pool.clone(), config.snapshot_ttl_secs));
        let approvals_for_executor = SqliteApprovalRepository::new(db_pool.clone());
        let approvals_for_resume = Arc::new(SqliteApprovalRepository::new(db_pool.clone()));
        let approvals_for_state = SqliteApprovalRepository::new(db_pool.clone());
        let approval_repo = Arc::new(SqliteApprovalRepository::new(db_pool.clone()));

        let events = EventBus::new(1024);
        let (queue, receiver) = InProcessQueue::new();

        let plain_dispatcher = Arc::new(TaskExecutor::new(EchoAgentRuntime, EchoToolHandler));
        let engine = Arc::new(Engine::new(
            workflow_repo.clone(),
            Arc::new(queue),
            plain_dispatcher,
            events.clone(),
        ));

        let approval_manager_for_executor = ApprovalManager::new(
            approvals_for_executor,
            LoggingNotifier,
            config.channel_fallback_order.clone(),
            config.resend_limit_per_tenant,
        );
        let automated_dispatcher = Arc::new(AutomatedTaskExecutor::new(
            TaskExecutor::new(EchoAgentRuntime, EchoToolHandler),
            approval_manager_for_executor,
            config.loop_safety_cap,
            config.default_approval_timeout_secs,
        ));
        let automation_engine = Arc::new(AutomationEngine::new(
            engine.clone(),
            automated_dispatcher,
            snapshots,
            approvals_for_resume,
        ));

        let approvals = Arc::new(ApprovalManager::new(
            approvals_for_state,
            LoggingNotifier,
            config.channel_fallback_order.clone(),
            config.resend_limit_per_tenant,
        ));

        Ok((
            Self {
                data_dir,
                config,
                db_pool,
                workflow_repo,
                engine,
                automation_engine,
                approvals,
                approval_repo,
                events,
            },
            receiver,
        ))
    }

    /// Run a freshly queued execution to completion (or until it pauses on
    /// an approval gate) in the current task. Used both by the `serve`
    /// worker loop and by the one-shot CLI `submit` path.
    pub async fn drive_execution(&self, execution_id: uuid::Uuid) -> anyhow::Result<()> {
        let cancellation = CancellationToken::new();
        self.automation_engine
            .execute_with_automation(execution_id, &cancellation)
            .await?;
        Ok(())
    }

    /// Continue a paused execution after its blocking approval has been
    /// resolved.
    pub async fn resume_execution(&self, execution_id: uuid::Uuid) -> anyhow::Result<()> {
        let cancellation = CancellationToken::new();
        self.automation_engine
            .resume_execution(execution_id, &cancellation)
            .await?;
        Ok(())
    }
}

/// Resolve the directory holding `loomwork.db` and `config.toml`.
///
/// `LOOMWORK_DATA_DIR` takes priority; otherwise defaults to
/// `~/.loomwork` (via `dirs::data_dir()`), falling back to `./loomwork-data`
/// when no home directory can be resolved (e.g. minimal containers).
fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("LOOMWORK_DATA_DIR") {
        return PathBuf::from(dir);
    }
    dirs::data_dir()
        .map(|d| d.join("loomwork"))
        .unwrap_or_else(|| Path::new("./loomwork-data").to_path_buf())
}

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};

use synapse::{
    a2a::SenderInfo,
    a2a_client::A2aClient,
    compliance::{render_banner, PolicyEngine},
    config::{ConfigLayer, SynapseConfig},
    events::{init_logging, log_file_path, EventEmitter},
    external::ExternalRegistry,
    file_history::ModificationRequest,
    file_safety::{FileSafetyManager, LockFilter, LockOutcome, LockRequest},
    input_router::{InputRouter, RouterDeps, SenderIdentity, SenderTasks, SystemClipboard},
    long_message::LongMessageStore,
    registry::{
        make_agent_id, AgentRegistry, DEFAULT_TRANSPORT_RETENTION_SECS, STATUS_READY,
    },
    reply_target::ReplyTargetStore,
    routing::{resolve_target, Resolution},
    server::{AgentIdentity, ServerState},
    task_store::{TaskStore, DEFAULT_POLL_INTERVAL},
    terminal::{GatedTerminal, StdoutTerminal},
};

const ENV_AGENT_ID: &str = "SYNAPSE_AGENT_ID";
const CLI_SENDER_ID: &str = "synapse-cli";
const TASK_PRUNE_INTERVAL: Duration = Duration::from_secs(60);
const FINISHED_TASK_MAX_AGE: Duration = Duration::from_secs(600);
const OPEN_TASK_MAX_AGE: Duration = Duration::from_secs(3600);
const REPLY_TARGET_MAX_AGE: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Parser)]
#[command(name = "synapse")]
#[command(about = "Coordinate terminal AI agents over A2A")]
struct Cli {
    /// Log level for this invocation (RUST_LOG still wins)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Enable file safety regardless of settings
    #[arg(long, global = true)]
    file_safety: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List live agents
    List,
    /// Send a message to another agent
    Send(SendCommand),
    /// Answer the agent that last asked this agent for a reply
    Reply(ReplyCommand),
    /// List senders waiting for a reply from an agent
    Pending {
        #[arg(long)]
        agent: Option<String>,
    },
    /// Cancel a task on another agent's server
    Cancel { target: String, task_id: String },
    /// Register an agent and serve its A2A endpoint
    Serve(ServeCommand),
    /// Inspect and manage file locks
    #[command(subcommand)]
    Locks(LocksCommand),
    /// Record a file modification
    Record(RecordCommand),
    /// Check whether an agent may write a file
    Validate {
        path: String,
        #[arg(long)]
        agent: String,
    },
    /// Show lock status and history for a file
    History {
        path: String,
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Show recent modifications
    Recent {
        #[arg(long, default_value = "20")]
        limit: usize,
        #[arg(long)]
        agent: Option<String>,
    },
    /// Show modifications recorded under a task
    Task { task_id: String },
    /// Summarise locks and modifications
    Stats,
    /// Delete modification records older than the retention window
    CleanupHistory {
        #[arg(long)]
        days: Option<i64>,
    },
    /// Manage external A2A agents
    #[command(subcommand)]
    External(ExternalCommand),
    /// Print the resolved configuration
    Config,
    /// Manage stored long messages
    #[command(subcommand)]
    Messages(MessagesCommand),
}

#[derive(Debug, clap::Args)]
struct SendCommand {
    /// Agent id, `type`, `type-port` or external alias
    target: String,
    #[arg(required = true)]
    message: Vec<String>,
    /// Wait for the target to reply
    #[arg(long)]
    response: bool,
    /// Sending agent id (defaults to $SYNAPSE_AGENT_ID)
    #[arg(long)]
    from: Option<String>,
    /// Seconds to wait for a reply
    #[arg(long, default_value = "60")]
    timeout: u64,
}

#[derive(Debug, clap::Args)]
struct ReplyCommand {
    #[arg(required = true)]
    message: Vec<String>,
    /// Replying agent id (defaults to $SYNAPSE_AGENT_ID)
    #[arg(long)]
    from: Option<String>,
    /// Sender to answer; the most recent one when omitted
    #[arg(long)]
    to: Option<String>,
}

#[derive(Debug, clap::Args)]
struct ServeCommand {
    #[arg(long)]
    agent_type: String,
    #[arg(long)]
    port: u16,
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    /// Emit JSON event lines on stderr
    #[arg(long)]
    json_output: bool,
}

#[derive(Debug, Subcommand)]
enum LocksCommand {
    /// List active locks
    List {
        #[arg(long)]
        agent: Option<String>,
        #[arg(long = "type")]
        agent_type: Option<String>,
        #[arg(long)]
        include_stale: bool,
    },
    /// Acquire or renew a lock
    Acquire {
        path: String,
        #[arg(long)]
        agent: String,
        #[arg(long, default_value = "300")]
        duration: i64,
        #[arg(long)]
        intent: Option<String>,
        #[arg(long)]
        task: Option<String>,
    },
    /// Show who holds a lock
    Check { path: String },
    /// Release a lock held by an agent
    Release {
        path: String,
        #[arg(long)]
        agent: String,
    },
    /// Remove a lock regardless of holder
    ForceUnlock { path: String },
    /// Remove expired locks, or locks of dead processes with --stale
    Cleanup {
        #[arg(long)]
        stale: bool,
    },
}

#[derive(Debug, clap::Args)]
struct RecordCommand {
    path: String,
    #[arg(long)]
    agent: String,
    #[arg(long)]
    task: String,
    /// CREATE, MODIFY or DELETE
    #[arg(long = "type", default_value = "MODIFY")]
    change_type: String,
    #[arg(long)]
    intent: Option<String>,
    #[arg(long)]
    lines: Option<String>,
}

#[derive(Debug, Subcommand)]
enum ExternalCommand {
    /// Discover an agent by URL and save it under an alias
    Add {
        url: String,
        #[arg(long)]
        alias: Option<String>,
    },
    List,
    Remove { alias: String },
}

#[derive(Debug, Subcommand)]
enum MessagesCommand {
    /// Delete long messages older than the TTL
    Cleanup,
    /// Print a stored long message
    Read { path: PathBuf },
}

fn explicit_layer(cli: &Cli) -> ConfigLayer {
    ConfigLayer {
        log_level: cli.log_level.clone(),
        file_safety_enabled: cli.file_safety.then_some(true),
        ..Default::default()
    }
}

fn agent_id_arg(explicit: Option<String>) -> Option<String> {
    explicit.or_else(|| {
        std::env::var(ENV_AGENT_ID)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_root = std::env::current_dir().context("failed to read current directory")?;
    let cfg = SynapseConfig::load(&project_root, Some(&explicit_layer(&cli)));
    init_logging(&cfg)?;

    match cli.command {
        Commands::List => run_list(&cfg),
        Commands::Send(cmd) => run_send(&cfg, cmd).await,
        Commands::Reply(cmd) => run_reply(&cfg, cmd).await,
        Commands::Pending { agent } => {
            let Some(agent_id) = agent_id_arg(agent) else {
                bail!("pass --agent or set {ENV_AGENT_ID}");
            };
            let store = ReplyTargetStore::new(&cfg.reply_target_dir);
            for sender in store.list_targets(&agent_id) {
                println!("{sender}");
            }
            Ok(())
        }
        Commands::Cancel { target, task_id } => run_cancel(&cfg, &target, &task_id).await,
        Commands::Serve(cmd) => run_serve(&cfg, cmd).await,
        Commands::Locks(cmd) => run_locks(&cfg, cmd),
        Commands::Record(cmd) => run_record(&cfg, cmd),
        Commands::Validate { path, agent } => {
            let manager = open_file_safety(&cfg)?;
            let validation = manager.validate_write(&path, &agent);
            if validation.allowed {
                println!("allowed");
            } else {
                println!(
                    "denied: {}",
                    validation.reason.as_deref().unwrap_or("locked")
                );
            }
            if !validation.context.is_empty() {
                println!("{}", validation.context);
            }
            Ok(())
        }
        Commands::History { path, limit } => {
            let manager = open_file_safety(&cfg)?;
            println!("{}", manager.get_file_context(&path, limit));
            Ok(())
        }
        Commands::Recent { limit, agent } => {
            let manager = open_file_safety(&cfg)?;
            let mods = manager.get_recent_modifications(limit, agent.as_deref());
            print_json(&mods)
        }
        Commands::Task { task_id } => {
            let manager = open_file_safety(&cfg)?;
            print_json(&manager.get_modifications_by_task(&task_id))
        }
        Commands::Stats => {
            let manager = open_file_safety(&cfg)?;
            print_json(&manager.get_statistics())
        }
        Commands::CleanupHistory { days } => {
            let manager = open_file_safety(&cfg)?;
            let days = days.unwrap_or(cfg.file_safety_retention_days);
            let removed = manager.cleanup_old_modifications(days);
            println!("removed {removed} modification record(s) older than {days} day(s)");
            Ok(())
        }
        Commands::External(cmd) => run_external(&cfg, cmd).await,
        Commands::Config => run_config(&cfg, &project_root),
        Commands::Messages(cmd) => {
            let store = LongMessageStore::from_config(&cfg);
            match cmd {
                MessagesCommand::Cleanup => {
                    let removed = store.cleanup_expired();
                    println!(
                        "removed {removed} expired message file(s) from {}",
                        store.dir().display()
                    );
                }
                MessagesCommand::Read { path } => print!("{}", store.read(&path)?),
            }
            Ok(())
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_list(cfg: &SynapseConfig) -> Result<()> {
    let registry = AgentRegistry::new(&cfg.registry_dir);
    let mut agents: Vec<_> = registry.get_live_agents().into_values().collect();
    if agents.is_empty() {
        println!("no live agents");
        return Ok(());
    }
    agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
    println!(
        "{:<28} {:<10} {:>6} {:<11} {:<9} DIR",
        "AGENT", "TYPE", "PORT", "STATUS", "TRANSPORT"
    );
    for agent in agents {
        let transport = registry
            .get_transport_display(&agent.agent_id, DEFAULT_TRANSPORT_RETENTION_SECS)
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<28} {:<10} {:>6} {:<11} {:<9} {}",
            agent.agent_id, agent.agent_type, agent.port, agent.status, transport, agent.working_dir
        );
    }
    Ok(())
}

async fn run_send(cfg: &SynapseConfig, cmd: SendCommand) -> Result<()> {
    let registry = Arc::new(AgentRegistry::new(&cfg.registry_dir));
    let client = A2aClient::new()?;

    let sender = agent_id_arg(cmd.from).and_then(|id| registry.get(&id));
    let (identity, sender_tasks, provider) = match &sender {
        Some(record) => (
            SenderIdentity {
                agent_id: record.agent_id.clone(),
                agent_type: Some(record.agent_type.clone()),
                endpoint: Some(record.endpoint.clone()),
            },
            SenderTasks::Remote {
                endpoint: record.endpoint.clone(),
            },
            record.agent_type.clone(),
        ),
        None => (
            SenderIdentity {
                agent_id: CLI_SENDER_ID.to_string(),
                agent_type: None,
                endpoint: None,
            },
            SenderTasks::None,
            String::new(),
        ),
    };

    let long_messages = Arc::new(LongMessageStore::from_config(cfg));
    let mut router = InputRouter::new(RouterDeps {
        identity,
        registry,
        external: Arc::new(ExternalRegistry::new(&cfg.external_dir)),
        long_messages: Arc::new(LongMessageStore::from_config(cfg)),
        client,
        policy: PolicyEngine::for_provider(&cfg.compliance, &provider),
        sender_tasks,
        clipboard: Arc::new(SystemClipboard),
    })
    .with_timeouts(Duration::from_secs(cmd.timeout), DEFAULT_POLL_INTERVAL);

    let message = cmd.message.join(" ");
    let result = router.send_to_agent(&cmd.target, &message, cmd.response).await;
    for line in router.take_feedback() {
        eprintln!("{line}");
    }
    let report = result?;
    if let Some(response) = report.response {
        println!("{response}");
    }
    Ok(())
}

async fn run_reply(cfg: &SynapseConfig, cmd: ReplyCommand) -> Result<()> {
    let Some(agent_id) = agent_id_arg(cmd.from) else {
        bail!("no replying agent: pass --from or set {ENV_AGENT_ID}");
    };
    let registry = AgentRegistry::new(&cfg.registry_dir);
    let store = ReplyTargetStore::new(&cfg.reply_target_dir);
    let Some((sender_id, target)) = store.load(&agent_id, cmd.to.as_deref()) else {
        bail!("no pending reply target for {agent_id}");
    };
    let Some(task_id) = target.sender_task_id.clone() else {
        bail!("reply target for {sender_id} carries no task id");
    };

    let own = registry.get(&agent_id);
    // Senders without a server of their own are answered through the
    // receiver-side task on this agent's server.
    let endpoint = match (&target.sender_endpoint, &own) {
        (Some(endpoint), _) => endpoint.clone(),
        (None, Some(record)) => record.endpoint.clone(),
        (None, None) => bail!("{agent_id} is not registered and {sender_id} left no endpoint"),
    };

    let client = A2aClient::new()?;
    let sender = SenderInfo {
        sender_id: agent_id.clone(),
        sender_type: own.as_ref().map(|record| record.agent_type.clone()),
        sender_endpoint: own.as_ref().map(|record| record.endpoint.clone()),
    };
    let text = cmd.message.join(" ");
    client
        .send_reply(&endpoint, sender, &task_id, &text)
        .await
        .with_context(|| format!("failed replying to {sender_id}"))?;
    store.pop(&agent_id, Some(&sender_id));
    eprintln!("replied to {sender_id}");
    Ok(())
}

async fn run_cancel(cfg: &SynapseConfig, target: &str, task_id: &str) -> Result<()> {
    let registry = AgentRegistry::new(&cfg.registry_dir);
    let endpoint = match resolve_target(&registry.get_live_agents(), target) {
        Resolution::Local(record) => record.endpoint,
        Resolution::Ambiguous(suggestions) => {
            bail!("'{target}' is ambiguous; use one of {}", suggestions.join(", "))
        }
        Resolution::NotFound => match ExternalRegistry::new(&cfg.external_dir).get(target) {
            Some(agent) => agent.url,
            None => bail!("no agent matches '{target}'"),
        },
    };
    let task = A2aClient::new()?.cancel_task(&endpoint, task_id).await?;
    println!("{} {}", task.id, task.status);
    Ok(())
}

async fn run_serve(cfg: &SynapseConfig, cmd: ServeCommand) -> Result<()> {
    let registry = Arc::new(AgentRegistry::new(&cfg.registry_dir));
    let agent_id = make_agent_id(&cmd.agent_type, cmd.port);
    let record = registry
        .register(&agent_id, &cmd.agent_type, cmd.port, STATUS_READY)
        .with_context(|| format!("failed to register {agent_id}"))?;
    let policy = PolicyEngine::for_provider(&cfg.compliance, &cmd.agent_type);
    let events = EventEmitter::new(cmd.json_output);
    let tasks = Arc::new(TaskStore::new());
    let reply_targets = Arc::new(ReplyTargetStore::new(&cfg.reply_target_dir));

    let state = ServerState {
        identity: AgentIdentity {
            agent_id: agent_id.clone(),
            agent_type: cmd.agent_type.clone(),
            port: cmd.port,
            endpoint: record.endpoint.clone(),
        },
        tasks: tasks.clone(),
        terminal: GatedTerminal::new(Arc::new(StdoutTerminal), policy),
        reply_targets: reply_targets.clone(),
        registry: registry.clone(),
        events: events.clone(),
    };

    let listener = tokio::net::TcpListener::bind((cmd.host.as_str(), cmd.port))
        .await
        .with_context(|| format!("failed to bind A2A server on port {}", cmd.port))?;
    eprintln!("[synapse] {agent_id} listening on {}", record.endpoint);
    events.emit(
        "agent_registered",
        json!({ "agent_id": agent_id, "port": cmd.port, "mode": policy.mode() }),
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(synapse::server::serve(listener, state, async move {
        let _ = shutdown_rx.await;
    }));

    let long_messages = Arc::new(LongMessageStore::from_config(cfg));
    let router = InputRouter::new(RouterDeps {
        identity: SenderIdentity {
            agent_id: agent_id.clone(),
            agent_type: Some(cmd.agent_type.clone()),
            endpoint: Some(record.endpoint.clone()),
        },
        registry: registry.clone(),
        external: Arc::new(ExternalRegistry::new(&cfg.external_dir)),
        long_messages: long_messages.clone(),
        client: A2aClient::new()?,
        policy,
        sender_tasks: SenderTasks::Local(tasks.clone()),
        clipboard: Arc::new(SystemClipboard),
    });

    // Routed sends may wait for a reply, so they run off the select loop.
    let (line_tx, router_task) = router.spawn_line_loop(|feedback| eprintln!("{feedback}"));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut prune = tokio::time::interval(TASK_PRUNE_INTERVAL);
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed reading stdin")? else {
                    break;
                };
                if line_tx.send(line).is_err() {
                    tracing::warn!(target = "synapse::serve", "input router stopped");
                    break;
                }
            }
            _ = prune.tick() => {
                let stale = tasks.expire_open(OPEN_TASK_MAX_AGE);
                let pruned = tasks.prune_finished(FINISHED_TASK_MAX_AGE);
                let expired = reply_targets.cleanup(&agent_id, REPLY_TARGET_MAX_AGE);
                let messages = long_messages.cleanup_expired();
                if stale + pruned + expired + messages > 0 {
                    tracing::debug!(target = "synapse::serve", stale, pruned, expired, messages, "swept expired serve state");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(target = "synapse::serve", agent_id = %agent_id, "shutting down");
                break;
            }
        }
    }

    drop(line_tx);
    router_task.abort();
    registry.unregister(&agent_id);
    let _ = shutdown_tx.send(());
    match server.await {
        Ok(result) => result.context("A2A server failed")?,
        Err(error) => tracing::warn!(target = "synapse::serve", error = %error, "server task ended abnormally"),
    }
    events.emit("agent_unregistered", json!({ "agent_id": agent_id }));
    Ok(())
}

fn open_file_safety(cfg: &SynapseConfig) -> Result<FileSafetyManager> {
    let manager = FileSafetyManager::from_config(cfg)
        .with_context(|| format!("failed to open {}", cfg.file_safety_db_path.display()))?;
    if !manager.is_enabled() {
        eprintln!(
            "file safety is disabled; pass --file-safety or set SYNAPSE_FILE_SAFETY_ENABLED=true"
        );
    }
    Ok(manager)
}

/// The CLI exits right away, so a lock is tied to the registered agent's
/// process, or failing that to the invoking shell.
fn holder_pid(cfg: &SynapseConfig, agent_id: &str) -> u32 {
    if let Some(record) = AgentRegistry::new(&cfg.registry_dir).get(agent_id) {
        return record.pid;
    }
    #[cfg(unix)]
    {
        std::os::unix::process::parent_id()
    }
    #[cfg(not(unix))]
    {
        std::process::id()
    }
}

fn run_locks(cfg: &SynapseConfig, cmd: LocksCommand) -> Result<()> {
    let manager = open_file_safety(cfg)?;
    match cmd {
        LocksCommand::List {
            agent,
            agent_type,
            include_stale,
        } => {
            let filter = LockFilter {
                agent_id: agent,
                agent_type,
                pid: None,
                include_stale,
            };
            print_json(&manager.list_locks(&filter))
        }
        LocksCommand::Acquire {
            path,
            agent,
            duration,
            intent,
            task,
        } => {
            let mut request = LockRequest::new(path, agent.clone())
                .duration_secs(duration)
                .pid(holder_pid(cfg, &agent));
            if let Some(record) = AgentRegistry::new(&cfg.registry_dir).get(&agent) {
                request = request.agent_type(record.agent_type);
            }
            if let Some(intent) = intent {
                request = request.intent(intent);
            }
            if let Some(task) = task {
                request = request.task_id(task);
            }
            let outcome = manager.acquire_lock(&request);
            print_json(&outcome)?;
            match outcome {
                LockOutcome::AlreadyLocked { holder, .. } => bail!("locked by {holder}"),
                LockOutcome::Failed { error } => bail!("lock failed: {error}"),
                LockOutcome::Acquired { .. } | LockOutcome::Renewed { .. } => Ok(()),
            }
        }
        LocksCommand::Check { path } => match manager.check_lock(&path)? {
            Some(lock) => print_json(&lock),
            None => {
                println!("unlocked");
                Ok(())
            }
        },
        LocksCommand::Release { path, agent } => {
            if !manager.release_lock(&path, &agent) {
                bail!("{agent} holds no lock on {path}");
            }
            println!("released {path}");
            Ok(())
        }
        LocksCommand::ForceUnlock { path } => {
            if manager.force_unlock(&path) {
                println!("unlocked {path}");
            } else {
                println!("{path} was not locked");
            }
            Ok(())
        }
        LocksCommand::Cleanup { stale } => {
            let removed = if stale {
                manager.cleanup_stale_locks()
            } else {
                manager.cleanup_expired_locks()
            };
            let kind = if stale { "stale" } else { "expired" };
            println!("removed {removed} {kind} lock(s)");
            Ok(())
        }
    }
}

fn run_record(cfg: &SynapseConfig, cmd: RecordCommand) -> Result<()> {
    let manager = open_file_safety(cfg)?;
    let mut request = ModificationRequest::new(cmd.path, cmd.agent, cmd.task, cmd.change_type);
    if let Some(intent) = cmd.intent {
        request = request.intent(intent);
    }
    if let Some(lines) = cmd.lines {
        request = request.affected_lines(lines);
    }
    match manager.record_modification(&request) {
        Some(id) => {
            println!("recorded modification {id}");
            Ok(())
        }
        None if !manager.is_enabled() => Ok(()),
        None => bail!("modification was not recorded (check the change type)"),
    }
}

async fn run_external(cfg: &SynapseConfig, cmd: ExternalCommand) -> Result<()> {
    let registry = ExternalRegistry::new(&cfg.external_dir);
    match cmd {
        ExternalCommand::Add { url, alias } => {
            let client = A2aClient::new()?;
            let agent = registry.discover(&client, &url, alias.as_deref()).await?;
            println!("added @{} → {}", agent.alias, agent.url);
        }
        ExternalCommand::List => {
            let agents = registry.list();
            if agents.is_empty() {
                println!("no external agents");
            }
            for agent in agents {
                println!("@{:<16} {:<40} {}", agent.alias, agent.url, agent.name);
            }
        }
        ExternalCommand::Remove { alias } => {
            if !registry.remove(&alias) {
                bail!("no external agent named {alias}");
            }
            println!("removed @{alias}");
        }
    }
    Ok(())
}

fn run_config(cfg: &SynapseConfig, project_root: &Path) -> Result<()> {
    let display = |path: &PathBuf| path.display().to_string();
    print_json(&json!({
        "project_root": project_root.display().to_string(),
        "file_safety": {
            "enabled": cfg.file_safety_enabled,
            "retention_days": cfg.file_safety_retention_days,
            "db_path": display(&cfg.file_safety_db_path),
        },
        "long_messages": {
            "dir": display(&cfg.long_message_dir),
            "threshold": cfg.long_message_threshold,
            "ttl_secs": cfg.long_message_ttl_secs,
        },
        "logging": {
            "level": cfg.log_level,
            "file": log_file_path(cfg).map(|path| path.display().to_string()),
        },
        "registry_dir": display(&cfg.registry_dir),
        "reply_target_dir": display(&cfg.reply_target_dir),
        "external_dir": display(&cfg.external_dir),
    }))?;
    println!("{}", render_banner(&cfg.compliance));
    Ok(())
}

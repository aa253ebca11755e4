use std::{path::Path, sync::Arc, time::Duration};

use synapse::{
    a2a::{SenderInfo, TaskState},
    a2a_client::A2aClient,
    compliance::{ComplianceMode, PolicyEngine},
    events::EventEmitter,
    external::ExternalRegistry,
    input_router::{InputRouter, RouteCommand, RouterDeps, SenderIdentity, SenderTasks, SystemClipboard},
    long_message::LongMessageStore,
    registry::{make_agent_id, AgentRecord, AgentRegistry, STATUS_READY},
    reply_target::ReplyTargetStore,
    server::{self, AgentIdentity, ServerState},
    task_store::TaskStore,
    terminal::{GatedTerminal, RecordingTerminal},
};
use tokio::sync::oneshot;

struct RunningAgent {
    agent_id: String,
    endpoint: String,
    tasks: Arc<TaskStore>,
    terminal: Arc<RecordingTerminal>,
    reply_targets: Arc<ReplyTargetStore>,
    _shutdown: oneshot::Sender<()>,
}

async fn start_agent(root: &Path, registry: &Arc<AgentRegistry>, agent_type: &str) -> RunningAgent {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let port = listener.local_addr().unwrap().port();
    let agent_id = make_agent_id(agent_type, port);
    let endpoint = format!("http://127.0.0.1:{port}");

    let mut record = AgentRecord::new(&agent_id, agent_type, port, STATUS_READY);
    record.endpoint = endpoint.clone();
    registry.register_record(&record).unwrap();

    let tasks = Arc::new(TaskStore::new());
    let terminal = Arc::new(RecordingTerminal::default());
    let reply_targets = Arc::new(ReplyTargetStore::new(root.join("reply")));
    let state = ServerState {
        identity: AgentIdentity {
            agent_id: agent_id.clone(),
            agent_type: agent_type.to_string(),
            port,
            endpoint: endpoint.clone(),
        },
        tasks: tasks.clone(),
        terminal: GatedTerminal::new(terminal.clone(), PolicyEngine::new(ComplianceMode::Auto)),
        reply_targets: reply_targets.clone(),
        registry: registry.clone(),
        events: EventEmitter::new(false),
    };
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(server::serve(listener, state, async move {
        let _ = shutdown_rx.await;
    }));

    RunningAgent {
        agent_id,
        endpoint,
        tasks,
        terminal,
        reply_targets,
        _shutdown: shutdown_tx,
    }
}

fn router_for(root: &Path, registry: &Arc<AgentRegistry>, agent: &RunningAgent, agent_type: &str) -> InputRouter {
    InputRouter::new(RouterDeps {
        identity: SenderIdentity {
            agent_id: agent.agent_id.clone(),
            agent_type: Some(agent_type.to_string()),
            endpoint: Some(agent.endpoint.clone()),
        },
        registry: registry.clone(),
        external: Arc::new(ExternalRegistry::new(root.join("external"))),
        long_messages: Arc::new(LongMessageStore::new(
            root.join("messages"),
            200,
            Duration::from_secs(3600),
        )),
        client: A2aClient::new().unwrap(),
        policy: PolicyEngine::new(ComplianceMode::Auto),
        sender_tasks: SenderTasks::Local(agent.tasks.clone()),
        clipboard: Arc::new(SystemClipboard),
    })
    .with_timeouts(Duration::from_secs(10), Duration::from_millis(50))
}

fn typed(router: &mut InputRouter, keys: &str) -> Option<RouteCommand> {
    let mut command = None;
    for c in keys.chars() {
        if let (_, Some(cmd)) = router.process_char(c) {
            command = Some(cmd);
        }
    }
    command
}

/// Gemini's side: wait for the saved reply target, then answer it.
async fn reply_when_asked(gemini_id: String, claude_id: String, store: Arc<ReplyTargetStore>, text: &'static str) {
    let client = A2aClient::new().unwrap();
    for _ in 0..200 {
        if let Some((_, target)) = store.load(&gemini_id, Some(&claude_id)) {
            let endpoint = target.sender_endpoint.expect("sender endpoint saved");
            let task_id = target.sender_task_id.expect("sender task saved");
            let sender = SenderInfo {
                sender_id: gemini_id.clone(),
                sender_type: Some("gemini".into()),
                sender_endpoint: None,
            };
            client
                .send_reply(&endpoint, sender, &task_id, text)
                .await
                .expect("reply delivered");
            store.pop(&gemini_id, Some(&claude_id));
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("no reply target was saved for {claude_id}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn at_mention_round_trip_returns_reply() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(AgentRegistry::new(dir.path().join("registry")));
    let claude = start_agent(&dir.path().join("claude"), &registry, "claude").await;
    let gemini = start_agent(&dir.path().join("gemini"), &registry, "gemini").await;

    let replier = tokio::spawn(reply_when_asked(
        gemini.agent_id.clone(),
        claude.agent_id.clone(),
        gemini.reply_targets.clone(),
        "pong",
    ));

    let mut router = router_for(dir.path(), &registry, &claude, "claude");
    let command = typed(&mut router, "@gemini --response \"ping\"\r").expect("line routed");
    assert_eq!(command.message, "ping");
    let report = router
        .send_to_agent(&command.target, &command.message, command.want_response)
        .await
        .expect("send succeeds");
    replier.await.unwrap();

    assert_eq!(report.response.as_deref(), Some("pong"));
    assert_eq!(router.last_response(), Some("pong"));
    let feedback = router.take_feedback().join("\n");
    assert!(feedback.contains("→ gemini"), "feedback was {feedback:?}");
    assert!(feedback.contains("← gemini"), "feedback was {feedback:?}");

    // The task lives on the sender; the receiver only saw terminal input.
    let task_id = report.task_id.unwrap();
    assert_eq!(claude.tasks.get(&task_id).unwrap().artifact_text(), "pong");
    assert!(gemini.tasks.list(None).is_empty());
    let injected = gemini.terminal.last_text().unwrap();
    assert!(injected.contains("[REPLY EXPECTED] ping"), "injected {injected:?}");
    assert!(injected.contains(&claude.agent_id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fire_and_forget_does_not_wait() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(AgentRegistry::new(dir.path().join("registry")));
    let claude = start_agent(&dir.path().join("claude"), &registry, "claude").await;
    let gemini = start_agent(&dir.path().join("gemini"), &registry, "gemini").await;

    let mut router = router_for(dir.path(), &registry, &claude, "claude");
    let target = format!("gemini-{}", gemini.endpoint.rsplit(':').next().unwrap());
    let report = router.send_to_agent(&target, "status?", false).await.unwrap();
    assert!(report.response.is_none());
    assert!(claude.tasks.list(None).is_empty());

    // A message without a sender task gets a receiver-side one, finished on delivery.
    let received = gemini.tasks.list(None);
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].status, TaskState::Completed);
    assert!(gemini.terminal.last_text().unwrap().ends_with("status?"));
    assert!(!gemini.terminal.last_text().unwrap().contains("[REPLY EXPECTED]"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn repeated_notifications_leave_nothing_open() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(AgentRegistry::new(dir.path().join("registry")));
    let claude = start_agent(&dir.path().join("claude"), &registry, "claude").await;
    let gemini = start_agent(&dir.path().join("gemini"), &registry, "gemini").await;

    let mut router = router_for(dir.path(), &registry, &claude, "claude");
    for n in 0..5 {
        router
            .send_to_agent("gemini", &format!("note {n}"), false)
            .await
            .unwrap();
    }
    let states: Vec<TaskState> = gemini.tasks.list(None).iter().map(|task| task.status).collect();
    assert_eq!(states, vec![TaskState::Completed; 5]);

    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(gemini.tasks.prune_finished(Duration::ZERO), 5);
    assert!(gemini.tasks.list(None).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dead_registry_entries_are_swept_before_sending() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(AgentRegistry::new(dir.path().join("registry")));
    let claude = start_agent(&dir.path().join("claude"), &registry, "claude").await;

    // Registered but nothing listens on this port.
    let ghost_port = {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap().port()
    };
    registry
        .register(&make_agent_id("codex", ghost_port), "codex", ghost_port, STATUS_READY)
        .unwrap();

    let mut router = router_for(dir.path(), &registry, &claude, "claude");
    let error = router.send_to_agent("codex", "hello", false).await.unwrap_err();
    assert!(error.to_string().contains("codex"));
    assert!(registry.get(&make_agent_id("codex", ghost_port)).is_none());
}

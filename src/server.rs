//! The agent's A2A HTTP server.
//!
//! A thin axum router over the task store and the gated terminal. Messages
//! that carry `in_reply_to` complete a sender-owned task; everything else is
//! injected into the terminal.

use std::{sync::Arc, time::Duration};

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing, Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::sync::broadcast;

use crate::{
    a2a::{AgentCard, CreateTaskRequest, SendMessageRequest, Task, TaskState},
    events::EventEmitter,
    helpers::{format_injection, strip_ansi},
    registry::{AgentRegistry, DEFAULT_TRANSPORT_RETENTION_SECS},
    reply_target::{ReplyTarget, ReplyTargetStore},
    task_store::{TaskEvent, TaskStore},
    terminal::{GatedTerminal, InjectError, InjectOutcome},
};

const WS_PING_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct AgentIdentity {
    pub agent_id: String,
    pub agent_type: String,
    pub port: u16,
    pub endpoint: String,
}

#[derive(Clone)]
pub struct ServerState {
    pub identity: AgentIdentity,
    pub tasks: Arc<TaskStore>,
    pub terminal: GatedTerminal,
    pub reply_targets: Arc<ReplyTargetStore>,
    pub registry: Arc<AgentRegistry>,
    pub events: EventEmitter,
}

#[derive(Debug, Deserialize, Default)]
struct ListTasksQuery {
    context_id: Option<String>,
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/.well-known/agent.json", routing::get(agent_card))
        .route("/status", routing::get(agent_status))
        .route("/tasks", routing::get(list_tasks))
        .route("/tasks/send", routing::post(send_message))
        .route("/tasks/create", routing::post(create_task))
        .route("/tasks/{id}", routing::get(get_task))
        .route("/tasks/{id}/cancel", routing::post(cancel_task))
        .route("/tasks/{id}/subscribe", routing::get(subscribe_task))
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: ServerState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let agent_id = state.identity.agent_id.clone();
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(target = "synapse::server", agent_id = %agent_id, %addr, "A2A server listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

fn error_envelope(status: StatusCode, code: &str, message: impl Into<String>) -> (StatusCode, Json<Value>) {
    (
        status,
        Json(json!({
            "error": {
                "code": code,
                "message": message.into(),
            }
        })),
    )
}

fn task_not_found(id: &str) -> (StatusCode, Json<Value>) {
    error_envelope(
        StatusCode::NOT_FOUND,
        "task_not_found",
        format!("task not found: {id}"),
    )
}

fn task_response(task: &Task) -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "task": task })))
}

async fn agent_card(State(state): State<ServerState>) -> Json<AgentCard> {
    let id = &state.identity;
    Json(AgentCard::for_agent(
        &id.agent_id,
        &id.agent_type,
        id.port,
        &id.endpoint,
    ))
}

async fn agent_status(State(state): State<ServerState>) -> Json<Value> {
    let id = &state.identity;
    let tasks = state.tasks.list(None);
    let open = tasks
        .iter()
        .filter(|task| !task.status.is_terminal())
        .count();
    Json(json!({
        "agent_id": id.agent_id,
        "agent_type": id.agent_type,
        "port": id.port,
        "status": state.terminal.inner().status(),
        "compliance_mode": state.terminal.policy().mode(),
        "transport": state
            .registry
            .get_transport_display(&id.agent_id, DEFAULT_TRANSPORT_RETENTION_SECS),
        "open_tasks": open,
        "total_tasks": tasks.len(),
    }))
}

async fn list_tasks(
    State(state): State<ServerState>,
    Query(query): Query<ListTasksQuery>,
) -> Json<Value> {
    Json(json!({ "tasks": state.tasks.list(query.context_id.as_deref()) }))
}

async fn get_task(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.tasks.get(&id) {
        Some(task) => task_response(&task),
        None => task_not_found(&id),
    }
}

async fn create_task(
    State(state): State<ServerState>,
    Json(request): Json<CreateTaskRequest>,
) -> (StatusCode, Json<Value>) {
    let task = state
        .tasks
        .create(request.message, request.context_id, request.metadata);
    let task = state
        .tasks
        .update_status(&task.id, TaskState::Working)
        .unwrap_or(task);
    tracing::debug!(target = "synapse::server", task_id = %task.id, "sender task created");
    state.events.emit(
        "task_status",
        json!({ "task_id": task.id, "status": task.status }),
    );
    task_response(&task)
}

async fn cancel_task(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<Value>) {
    let Some(task) = state.tasks.cancel(&id) else {
        return task_not_found(&id);
    };
    if let Err(error) = state.terminal.interrupt() {
        tracing::warn!(target = "synapse::server", task_id = %id, error = %error, "interrupt after cancel failed");
    }
    state.events.emit(
        "task_status",
        json!({ "task_id": task.id, "status": task.status }),
    );
    task_response(&task)
}

async fn send_message(
    State(state): State<ServerState>,
    Json(request): Json<SendMessageRequest>,
) -> (StatusCode, Json<Value>) {
    let SendMessageRequest {
        message,
        context_id,
        metadata,
    } = request;

    if let Some(reply_to) = metadata.in_reply_to.as_deref() {
        let text = message.text();
        return match state.tasks.complete_with_reply(reply_to, &text) {
            Some(task) => {
                tracing::info!(target = "synapse::server", task_id = %task.id, state = %task.status, "reply received");
                state.events.emit(
                    "task_status",
                    json!({ "task_id": task.id, "status": task.status }),
                );
                task_response(&task)
            }
            None => task_not_found(reply_to),
        };
    }

    let sender_id = metadata
        .sender
        .as_ref()
        .map(|sender| sender.sender_id.clone())
        .unwrap_or_else(|| "unknown".to_string());

    // Without a sender-owned task the receiver holds one so plain A2A
    // clients can poll for the result.
    let receiver_task = match metadata.sender_task_id {
        Some(_) => None,
        None => {
            let mut task_meta = Map::new();
            task_meta.insert("sender_id".to_string(), Value::String(sender_id.clone()));
            task_meta.insert(
                "response_expected".to_string(),
                Value::Bool(metadata.response_expected),
            );
            Some(
                state
                    .tasks
                    .create(message.clone(), context_id.clone(), task_meta),
            )
        }
    };
    let reply_task_id = metadata
        .sender_task_id
        .clone()
        .or_else(|| receiver_task.as_ref().map(|task| task.id.clone()))
        .unwrap_or_default();

    if let Some(sender) = &metadata.sender {
        let target = ReplyTarget::new(
            sender.sender_endpoint.clone(),
            Some(reply_task_id.clone()),
        );
        if let Err(error) =
            state
                .reply_targets
                .save(&state.identity.agent_id, &sender.sender_id, target)
        {
            tracing::warn!(target = "synapse::server", sender_id = %sender.sender_id, error = %error, "failed saving reply target");
        }
    }

    // Remote text must not drive the local terminal with escape sequences.
    let text = format_injection(
        &reply_task_id,
        &sender_id,
        &strip_ansi(&message.text()),
        metadata.response_expected,
    );
    let outcome = match state.terminal.inject(&text) {
        Ok(outcome) => outcome,
        Err(InjectError::Blocked(blocked)) => {
            if let Some(task) = &receiver_task {
                state
                    .tasks
                    .fail(&task.id, "compliance_blocked", &blocked.to_string());
            }
            tracing::warn!(target = "synapse::server", sender_id = %sender_id, mode = %blocked.mode, "inbound message blocked");
            return (
                StatusCode::FORBIDDEN,
                Json(json!({
                    "error": {
                        "code": "compliance_blocked",
                        "message": blocked.to_string(),
                        "mode": blocked.mode,
                        "action": blocked.action,
                    }
                })),
            );
        }
        Err(InjectError::Terminal(message)) => {
            if let Some(task) = &receiver_task {
                state.tasks.fail(&task.id, "terminal_error", &message);
            }
            return error_envelope(StatusCode::INTERNAL_SERVER_ERROR, "terminal_error", message);
        }
    };
    let delivery = match outcome {
        InjectOutcome::Submitted => "submitted",
        InjectOutcome::Prefilled => "prefilled",
    };
    tracing::info!(target = "synapse::server", sender_id = %sender_id, task_id = %reply_task_id, delivery, "message injected");
    state.events.emit(
        "message_received",
        json!({
            "sender_id": sender_id,
            "task_id": reply_task_id,
            "response_expected": metadata.response_expected,
            "delivery": delivery,
        }),
    );

    // Nothing will answer a fire-and-forget message, so its task ends at delivery.
    let settled = if metadata.response_expected {
        TaskState::Working
    } else {
        TaskState::Completed
    };
    let mut task = match receiver_task {
        Some(task) => state
            .tasks
            .update_status(&task.id, settled)
            .unwrap_or(task),
        None => {
            // Receipt only; the sender owns the real task.
            let mut receipt = Task::new(message, context_id);
            receipt.id = reply_task_id;
            receipt.status = TaskState::Working;
            receipt
        }
    };
    task.metadata
        .insert("delivery".to_string(), Value::String(delivery.to_string()));
    task_response(&task)
}

async fn subscribe_task(
    ws: WebSocketUpgrade,
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Response {
    let rx = state.tasks.subscribe();
    let Some(task) = state.tasks.get(&id) else {
        return task_not_found(&id).into_response();
    };
    ws.on_upgrade(move |socket| stream_task_events(socket, rx, task))
}

async fn send_event(socket: &mut WebSocket, event: &TaskEvent) -> bool {
    let Ok(text) = serde_json::to_string(event) else {
        return false;
    };
    socket.send(WsMessage::Text(text.into())).await.is_ok()
}

async fn stream_task_events(
    mut socket: WebSocket,
    mut rx: broadcast::Receiver<TaskEvent>,
    snapshot: Task,
) {
    let task_id = snapshot.id.clone();
    tracing::debug!(target = "synapse::server", task_id = %task_id, "task subscriber connected");

    let current = TaskEvent::Status {
        task_id: task_id.clone(),
        state: snapshot.status,
    };
    if !send_event(&mut socket, &current).await {
        return;
    }
    if snapshot.status.is_terminal() {
        let done = TaskEvent::Done {
            task_id: task_id.clone(),
            state: snapshot.status,
        };
        send_event(&mut socket, &done).await;
        let _ = socket.send(WsMessage::Close(None)).await;
        return;
    }

    let mut ping_interval = tokio::time::interval(WS_PING_INTERVAL);
    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) if event.task_id() == task_id => {
                        let done = matches!(event, TaskEvent::Done { .. });
                        if !send_event(&mut socket, &event).await || done {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(target = "synapse::server", task_id = %task_id, skipped, "task subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = ping_interval.tick() => {
                if socket.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }
    let _ = socket.send(WsMessage::Close(None)).await;
    tracing::debug!(target = "synapse::server", task_id = %task_id, "task subscriber disconnected");
}

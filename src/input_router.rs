//! `@agent` addressing typed into an agent's terminal.
//!
//! [`InputParser`] watches raw keystrokes and recognises
//! `@target [--response] message` lines. [`InputRouter`] then resolves the
//! target, sends the message over A2A and, when a response is wanted, waits
//! on a task owned by the sending side.

use std::{
    io::Write,
    process::{Command, Stdio},
    sync::{Arc, LazyLock},
    time::Duration,
};

use regex::Regex;
use serde_json::{Map, Value};
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    a2a::{Message, SendMessageRequest, SendMetadata, SenderInfo, Task, TaskState},
    a2a_client::A2aClient,
    compliance::{ActionType, ComplianceMode, Decision, PolicyEngine},
    external::ExternalRegistry,
    helpers::{ANSI_CYAN, ANSI_GREEN, ANSI_RED, ANSI_RESET, ANSI_YELLOW},
    long_message::LongMessageStore,
    process::PREFLIGHT_PORT_TIMEOUT,
    registry::{AgentRecord, AgentRegistry},
    routing::{resolve_target, Resolution},
    task_store::{TaskStore, DEFAULT_POLL_INTERVAL, DEFAULT_WAIT_TIMEOUT},
};

static ROUTE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^@([\w:-]+)(\s+--response)?\s+(.+)$").expect("route pattern is valid")
});

pub const TRANSPORT_OUTBOUND: &str = "HTTP→";
pub const TRANSPORT_INBOUND: &str = "→HTTP";

const CTRL_C: char = '\x03';
const CTRL_D: char = '\x04';
const CTRL_Z: char = '\x1a';
const ESC: char = '\x1b';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputState {
    Normal,
    InEscapeSequence,
}

/// A recognised `@target` line, ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteCommand {
    pub target: String,
    pub want_response: bool,
    pub message: String,
}

/// Parse a complete line. `None` means the line is ordinary input.
pub fn parse_route_line(line: &str) -> Option<RouteCommand> {
    let captures = ROUTE_PATTERN.captures(line)?;
    Some(RouteCommand {
        target: captures[1].to_string(),
        want_response: captures.get(2).is_some(),
        message: strip_matching_quotes(&captures[3]).to_string(),
    })
}

fn strip_matching_quotes(text: &str) -> &str {
    for quote in ['"', '\''] {
        if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote) {
            return &text[1..text.len() - 1];
        }
    }
    text
}

#[derive(Debug)]
pub struct InputParser {
    state: InputState,
    line: String,
}

impl Default for InputParser {
    fn default() -> Self {
        Self {
            state: InputState::Normal,
            line: String::new(),
        }
    }
}

impl InputParser {
    pub fn state(&self) -> InputState {
        self.state
    }

    pub fn buffer(&self) -> &str {
        &self.line
    }

    /// Feed one character. Returns what to pass on to the terminal, plus a
    /// command when a routed line was completed (its text is swallowed).
    pub fn process_char(&mut self, c: char) -> (String, Option<RouteCommand>) {
        if self.state == InputState::InEscapeSequence {
            if c.is_ascii_alphabetic() {
                self.state = InputState::Normal;
            }
            return (c.to_string(), None);
        }

        match c {
            ESC => {
                self.state = InputState::InEscapeSequence;
                (c.to_string(), None)
            }
            CTRL_C | CTRL_D | CTRL_Z => {
                self.line.clear();
                (c.to_string(), None)
            }
            '\x7f' | '\x08' => {
                self.line.pop();
                (c.to_string(), None)
            }
            '\r' | '\n' => {
                let line = std::mem::take(&mut self.line);
                match parse_route_line(&line) {
                    Some(command) => (String::new(), Some(command)),
                    None => (c.to_string(), None),
                }
            }
            _ => {
                self.line.push(c);
                (c.to_string(), None)
            }
        }
    }
}

/// Best-effort copy of a blocked message for manual pasting.
pub trait Clipboard: Send + Sync {
    fn copy(&self, text: &str) -> bool;
}

#[derive(Debug, Default)]
pub struct SystemClipboard;

impl Clipboard for SystemClipboard {
    fn copy(&self, text: &str) -> bool {
        const CANDIDATES: [(&str, &[&str]); 3] = [
            ("pbcopy", &[]),
            ("wl-copy", &[]),
            ("xclip", &["-selection", "clipboard"]),
        ];
        CANDIDATES
            .iter()
            .any(|(program, args)| pipe_to(program, args, text))
    }
}

fn pipe_to(program: &str, args: &[&str], text: &str) -> bool {
    let Ok(mut child) = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
    else {
        return false;
    };
    if let Some(mut stdin) = child.stdin.take() {
        if stdin.write_all(text.as_bytes()).is_err() {
            return false;
        }
    }
    child.wait().map(|status| status.success()).unwrap_or(false)
}

/// Where tasks for outbound messages live.
#[derive(Clone)]
pub enum SenderTasks {
    /// This process serves its own A2A endpoint.
    Local(Arc<TaskStore>),
    /// A separate invocation acting for an agent whose server is at `endpoint`.
    Remote { endpoint: String },
    /// No server of our own; the receiver's task is polled instead.
    None,
}

/// Who is sending.
#[derive(Debug, Clone)]
pub struct SenderIdentity {
    pub agent_id: String,
    pub agent_type: Option<String>,
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SendError {
    #[error("no agent matches '{target}'")]
    NotFound { target: String },
    #[error("'{target}' matches several agents; use one of {}", .suggestions.join(", "))]
    Ambiguous {
        target: String,
        suggestions: Vec<String>,
    },
    #[error("agent {agent_id} is no longer running")]
    AgentDead { agent_id: String },
    #[error("agent {agent_id} is not accepting connections on port {port}")]
    Unreachable { agent_id: String, port: u16 },
    #[error("routing blocked by compliance mode '{mode}'")]
    Blocked { mode: ComplianceMode, copied: bool },
    #[error("sending to {target} failed: {message}")]
    Transport { target: String, message: String },
    #[error("failed storing message: {0}")]
    Storage(String),
}

impl SendError {
    fn next_step(&self) -> String {
        match self {
            Self::NotFound { .. } => {
                "run `synapse list` to see running agents, or `synapse external add` for remote ones"
                    .to_string()
            }
            Self::Ambiguous { suggestions, .. } => format!("try {}", suggestions.join(" or ")),
            Self::AgentDead { .. } => "the stale registry entry was removed; restart the agent".to_string(),
            Self::Unreachable { .. } => "the agent may be starting up; retry in a moment".to_string(),
            Self::Blocked { copied: true, .. } => {
                "the message was copied to your clipboard; paste it yourself".to_string()
            }
            Self::Blocked { copied: false, .. } => {
                "copy the message manually, or switch to prefill/auto mode".to_string()
            }
            Self::Transport { .. } => "check that the agent's server is healthy".to_string(),
            Self::Storage(_) => "check the long-message directory permissions".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SendReport {
    pub target: String,
    pub agent_id: String,
    pub external: bool,
    pub task_id: Option<String>,
    pub state: Option<TaskState>,
    pub response: Option<String>,
}

pub struct RouterDeps {
    pub identity: SenderIdentity,
    pub registry: Arc<AgentRegistry>,
    pub external: Arc<ExternalRegistry>,
    pub long_messages: Arc<LongMessageStore>,
    pub client: A2aClient,
    pub policy: PolicyEngine,
    pub sender_tasks: SenderTasks,
    pub clipboard: Arc<dyn Clipboard>,
}

enum Destination {
    Local(AgentRecord),
    External { alias: String, url: String },
}

impl Destination {
    fn endpoint(&self) -> &str {
        match self {
            Self::Local(record) => &record.endpoint,
            Self::External { url, .. } => url,
        }
    }

    fn agent_id(&self) -> &str {
        match self {
            Self::Local(record) => &record.agent_id,
            Self::External { alias, .. } => alias,
        }
    }

    fn is_external(&self) -> bool {
        matches!(self, Self::External { .. })
    }
}

pub struct InputRouter {
    parser: InputParser,
    deps: RouterDeps,
    wait_timeout: Duration,
    poll_interval: Duration,
    feedback: Vec<String>,
    last_response: Option<String>,
}

impl InputRouter {
    pub fn new(deps: RouterDeps) -> Self {
        Self {
            parser: InputParser::default(),
            deps,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            feedback: Vec::new(),
            last_response: None,
        }
    }

    pub fn with_timeouts(mut self, wait_timeout: Duration, poll_interval: Duration) -> Self {
        self.wait_timeout = wait_timeout;
        self.poll_interval = poll_interval;
        self
    }

    pub fn process_char(&mut self, c: char) -> (String, Option<RouteCommand>) {
        self.parser.process_char(c)
    }

    pub fn state(&self) -> InputState {
        self.parser.state()
    }

    /// Drain pending feedback lines.
    pub fn take_feedback(&mut self) -> Vec<String> {
        std::mem::take(&mut self.feedback)
    }

    pub fn last_response(&self) -> Option<&str> {
        self.last_response.as_deref()
    }

    /// Feed one line and its terminator through the parser, running any
    /// routed command it completes.
    pub async fn run_line(&mut self, line: &str) {
        for c in line.chars().chain(std::iter::once('\n')) {
            if let (_, Some(command)) = self.process_char(c) {
                self.run_command(&command).await;
            }
        }
    }

    /// Move the router onto its own task, fed whole input lines. A send that
    /// waits for a reply holds up only that task. Feedback goes to `sink`
    /// after each line; dropping the sender ends the task.
    pub fn spawn_line_loop<F>(mut self, sink: F) -> (mpsc::UnboundedSender<String>, JoinHandle<()>)
    where
        F: Fn(String) + Send + 'static,
    {
        let (lines, mut rx) = mpsc::unbounded_channel::<String>();
        let handle = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                self.run_line(&line).await;
                for feedback in self.take_feedback() {
                    sink(feedback);
                }
            }
        });
        (lines, handle)
    }

    /// Run a parsed command; failures are reported through feedback.
    pub async fn run_command(&mut self, command: &RouteCommand) -> Option<SendReport> {
        self.send_to_agent(&command.target, &command.message, command.want_response)
            .await
            .ok()
    }

    pub async fn send_to_agent(
        &mut self,
        target: &str,
        message: &str,
        want_response: bool,
    ) -> Result<SendReport, SendError> {
        let target = target.trim().trim_start_matches('@').to_string();
        let result = self.send_inner(&target, message, want_response).await;
        if let Err(error) = &result {
            tracing::warn!(target = "synapse::router", target_name = %target, error = %error, "send failed");
            self.feedback.push(format!(
                "{ANSI_RED}✗ {error}{ANSI_RESET} ({})",
                error.next_step()
            ));
        }
        result
    }

    async fn send_inner(
        &mut self,
        target: &str,
        message: &str,
        want_response: bool,
    ) -> Result<SendReport, SendError> {
        self.check_route_output(message)?;
        let destination = self.resolve(target)?;
        if let Destination::Local(record) = &destination {
            self.preflight(record)?;
        }

        let sender_task = if want_response {
            self.create_sender_task(message).await?
        } else {
            None
        };
        let task_key = sender_task
            .as_ref()
            .map(|task| task.id.clone())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let prepared = self
            .deps
            .long_messages
            .prepare(message, &task_key, want_response)
            .map_err(|error| SendError::Storage(error.to_string()))?;

        let request = SendMessageRequest {
            message: Message::user_text(prepared.text()),
            context_id: None,
            metadata: SendMetadata {
                sender: Some(SenderInfo {
                    sender_id: self.deps.identity.agent_id.clone(),
                    sender_type: self.deps.identity.agent_type.clone(),
                    sender_endpoint: self.reply_endpoint(),
                }),
                response_expected: want_response,
                sender_task_id: sender_task.as_ref().map(|task| task.id.clone()),
                in_reply_to: None,
            },
        };

        self.set_transport(&destination, true);
        let sent = self
            .deps
            .client
            .send_message(destination.endpoint(), &request)
            .await;
        self.set_transport(&destination, false);

        let receiver_task = match sent {
            Ok(task) => task,
            Err(error) => {
                if let (Some(task), SenderTasks::Local(store)) =
                    (&sender_task, &self.deps.sender_tasks)
                {
                    store.fail(&task.id, "send_failed", &error.to_string());
                }
                return Err(SendError::Transport {
                    target: target.to_string(),
                    message: error.to_string(),
                });
            }
        };

        if let Destination::External { alias, .. } = &destination {
            self.deps.external.touch(alias);
        }
        self.feedback.push(sent_line(target, destination.is_external()));
        tracing::info!(target = "synapse::router", target_name = %target, agent_id = %destination.agent_id(), want_response, "message sent");

        let mut report = SendReport {
            target: target.to_string(),
            agent_id: destination.agent_id().to_string(),
            external: destination.is_external(),
            task_id: Some(
                sender_task
                    .as_ref()
                    .map_or_else(|| receiver_task.id.clone(), |task| task.id.clone()),
            ),
            state: None,
            response: None,
        };
        if !want_response {
            return Ok(report);
        }

        let finished = self
            .wait_for_reply(sender_task.as_ref(), &receiver_task, &destination)
            .await;
        match finished {
            Some(task) if task.status == TaskState::Completed => {
                let text = task.artifact_text();
                self.feedback
                    .push(response_line(target, &text, destination.is_external()));
                self.last_response = Some(text.clone());
                report.state = Some(task.status);
                report.response = Some(text);
            }
            Some(task) if task.status.is_terminal() => {
                let reason = task
                    .error
                    .as_ref()
                    .map(|error| error.message.clone())
                    .unwrap_or_else(|| task.status.to_string());
                self.feedback
                    .push(format!("{ANSI_RED}← {target}: {reason}{ANSI_RESET}"));
                report.state = Some(task.status);
            }
            other => {
                self.feedback.push(format!(
                    "{ANSI_YELLOW}… no response from {target} within {}s{ANSI_RESET}",
                    self.wait_timeout.as_secs()
                ));
                report.state = other.map(|task| task.status);
            }
        }
        Ok(report)
    }

    fn check_route_output(&mut self, message: &str) -> Result<(), SendError> {
        let policy = self.deps.policy;
        match (policy.check(ActionType::RouteOutput), policy.mode()) {
            (Decision::Allow, _) => Ok(()),
            (Decision::Deny, ComplianceMode::Prefill) => {
                self.feedback.push(format!(
                    "{ANSI_YELLOW}⏸ prefill mode: message will be typed and await confirmation{ANSI_RESET}"
                ));
                Ok(())
            }
            (Decision::Deny, mode) => {
                let copied = self.deps.clipboard.copy(message);
                Err(SendError::Blocked { mode, copied })
            }
        }
    }

    fn resolve(&self, target: &str) -> Result<Destination, SendError> {
        let live = self.deps.registry.get_live_agents();
        match resolve_target(&live, target) {
            Resolution::Local(record) => Ok(Destination::Local(record)),
            Resolution::Ambiguous(suggestions) => Err(SendError::Ambiguous {
                target: target.to_string(),
                suggestions,
            }),
            Resolution::NotFound => match self.deps.external.get(target) {
                Some(agent) => Ok(Destination::External {
                    alias: agent.alias,
                    url: agent.url,
                }),
                None => Err(SendError::NotFound {
                    target: target.to_string(),
                }),
            },
        }
    }

    fn preflight(&self, record: &AgentRecord) -> Result<(), SendError> {
        let liveness = self.deps.registry.liveness();
        if !liveness.is_process_alive(record.pid) {
            self.deps.registry.unregister(&record.agent_id);
            return Err(SendError::AgentDead {
                agent_id: record.agent_id.clone(),
            });
        }
        if !liveness.is_port_open("localhost", record.port, PREFLIGHT_PORT_TIMEOUT) {
            return Err(SendError::Unreachable {
                agent_id: record.agent_id.clone(),
                port: record.port,
            });
        }
        Ok(())
    }

    fn reply_endpoint(&self) -> Option<String> {
        match &self.deps.sender_tasks {
            SenderTasks::Local(_) => self.deps.identity.endpoint.clone(),
            SenderTasks::Remote { endpoint } => Some(endpoint.clone()),
            SenderTasks::None => None,
        }
    }

    async fn create_sender_task(&self, message: &str) -> Result<Option<Task>, SendError> {
        let mut metadata = Map::new();
        metadata.insert(
            "sender_id".to_string(),
            Value::String(self.deps.identity.agent_id.clone()),
        );
        match &self.deps.sender_tasks {
            SenderTasks::Local(store) => {
                let task = store.create(Message::user_text(message), None, metadata);
                Ok(store.update_status(&task.id, TaskState::Working))
            }
            SenderTasks::Remote { endpoint } => self
                .deps
                .client
                .create_sender_task(endpoint, Message::user_text(message), metadata)
                .await
                .map(Some)
                .map_err(|error| SendError::Transport {
                    target: endpoint.clone(),
                    message: error.to_string(),
                }),
            SenderTasks::None => Ok(None),
        }
    }

    async fn wait_for_reply(
        &self,
        sender_task: Option<&Task>,
        receiver_task: &Task,
        destination: &Destination,
    ) -> Option<Task> {
        match (sender_task, &self.deps.sender_tasks) {
            (Some(task), SenderTasks::Local(store)) => {
                store
                    .wait_for_terminal(&task.id, self.wait_timeout, self.poll_interval)
                    .await
            }
            (Some(task), SenderTasks::Remote { endpoint }) => self
                .deps
                .client
                .wait_for_task(endpoint, &task.id, self.wait_timeout, self.poll_interval)
                .await
                .ok(),
            _ => self
                .deps
                .client
                .wait_for_task(
                    destination.endpoint(),
                    &receiver_task.id,
                    self.wait_timeout,
                    self.poll_interval,
                )
                .await
                .ok(),
        }
    }

    fn set_transport(&self, destination: &Destination, active: bool) {
        let registry = &self.deps.registry;
        registry.update_transport(
            &self.deps.identity.agent_id,
            active.then_some(TRANSPORT_OUTBOUND),
        );
        if let Destination::Local(record) = destination {
            registry.update_transport(&record.agent_id, active.then_some(TRANSPORT_INBOUND));
        }
    }
}

fn sent_line(target: &str, external: bool) -> String {
    if external {
        format!("{ANSI_CYAN}→ {target} (external){ANSI_RESET}")
    } else {
        format!("{ANSI_GREEN}→ {target}{ANSI_RESET}")
    }
}

fn response_line(target: &str, text: &str, external: bool) -> String {
    if external {
        format!("{ANSI_CYAN}← {target} (external): {text}{ANSI_RESET}")
    } else {
        format!("{ANSI_GREEN}← {target}: {text}{ANSI_RESET}")
    }
}

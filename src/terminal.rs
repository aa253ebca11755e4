//! The seam to the process driving an agent's terminal.

use std::{
    io::Write,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use anyhow::Result;
use parking_lot::Mutex;

use crate::{
    compliance::{ActionType, ComplianceBlocked, PolicyEngine},
    registry::STATUS_READY,
};

pub const DEFAULT_SUBMIT_SEQ: &str = "\r";

/// Operations a terminal driver exposes to synapse.
pub trait AgentTerminal: Send + Sync {
    /// Type `text`; press `submit_seq` afterwards when given.
    fn write(&self, text: &str, submit_seq: Option<&str>) -> Result<()>;

    fn status(&self) -> String;

    /// Recent terminal output.
    fn get_context(&self) -> String;

    fn interrupt(&self) -> Result<()>;
}

pub type SharedTerminal = Arc<dyn AgentTerminal>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectOutcome {
    Submitted,
    /// Typed but not submitted; waiting for a human to press Enter.
    Prefilled,
}

#[derive(Debug, thiserror::Error)]
pub enum InjectError {
    #[error(transparent)]
    Blocked(#[from] ComplianceBlocked),
    #[error("terminal write failed: {0}")]
    Terminal(String),
}

/// Applies the compliance policy in front of a terminal.
#[derive(Clone)]
pub struct GatedTerminal {
    inner: SharedTerminal,
    policy: PolicyEngine,
    submit_seq: String,
}

impl GatedTerminal {
    pub fn new(inner: SharedTerminal, policy: PolicyEngine) -> Self {
        Self {
            inner,
            policy,
            submit_seq: DEFAULT_SUBMIT_SEQ.to_string(),
        }
    }

    pub fn with_submit_seq(mut self, submit_seq: impl Into<String>) -> Self {
        self.submit_seq = submit_seq.into();
        self
    }

    pub fn policy(&self) -> PolicyEngine {
        self.policy
    }

    pub fn inner(&self) -> &SharedTerminal {
        &self.inner
    }

    pub fn inject(&self, text: &str) -> Result<InjectOutcome, InjectError> {
        self.policy.require(ActionType::InjectInput)?;
        let submit = self.policy.check(ActionType::SubmitInput).is_allowed();
        let submit_seq = submit.then_some(self.submit_seq.as_str());
        self.inner
            .write(text, submit_seq)
            .map_err(|error| InjectError::Terminal(error.to_string()))?;
        if submit {
            Ok(InjectOutcome::Submitted)
        } else {
            tracing::info!(target = "synapse::terminal", mode = %self.policy.mode(), "input prefilled, awaiting confirmation");
            Ok(InjectOutcome::Prefilled)
        }
    }

    pub fn interrupt(&self) -> Result<()> {
        self.inner.interrupt()
    }
}

/// Prints injected input to stdout. Used by headless `serve`.
#[derive(Debug, Default)]
pub struct StdoutTerminal;

impl AgentTerminal for StdoutTerminal {
    fn write(&self, text: &str, submit_seq: Option<&str>) -> Result<()> {
        let mut stdout = std::io::stdout().lock();
        write!(stdout, "{text}")?;
        if submit_seq.is_some() {
            writeln!(stdout)?;
        }
        stdout.flush()?;
        Ok(())
    }

    fn status(&self) -> String {
        STATUS_READY.to_string()
    }

    fn get_context(&self) -> String {
        String::new()
    }

    fn interrupt(&self) -> Result<()> {
        tracing::info!(target = "synapse::terminal", "interrupt requested");
        Ok(())
    }
}

/// In-memory terminal that records every write.
#[derive(Debug)]
pub struct RecordingTerminal {
    writes: Mutex<Vec<(String, Option<String>)>>,
    interrupts: AtomicUsize,
    status: Mutex<String>,
}

impl Default for RecordingTerminal {
    fn default() -> Self {
        Self {
            writes: Mutex::new(Vec::new()),
            interrupts: AtomicUsize::new(0),
            status: Mutex::new(STATUS_READY.to_string()),
        }
    }
}

impl RecordingTerminal {
    pub fn writes(&self) -> Vec<(String, Option<String>)> {
        self.writes.lock().clone()
    }

    pub fn last_text(&self) -> Option<String> {
        self.writes.lock().last().map(|(text, _)| text.clone())
    }

    pub fn interrupts(&self) -> usize {
        self.interrupts.load(Ordering::SeqCst)
    }

    pub fn set_status(&self, status: &str) {
        *self.status.lock() = status.to_string();
    }
}

impl AgentTerminal for RecordingTerminal {
    fn write(&self, text: &str, submit_seq: Option<&str>) -> Result<()> {
        self.writes
            .lock()
            .push((text.to_string(), submit_seq.map(str::to_string)));
        Ok(())
    }

    fn status(&self) -> String {
        self.status.lock().clone()
    }

    fn get_context(&self) -> String {
        self.writes
            .lock()
            .iter()
            .map(|(text, _)| text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn interrupt(&self) -> Result<()> {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compliance::ComplianceMode;

    fn gated(mode: ComplianceMode) -> (Arc<RecordingTerminal>, GatedTerminal) {
        let recorder = Arc::new(RecordingTerminal::default());
        let gate = GatedTerminal::new(recorder.clone(), PolicyEngine::new(mode));
        (recorder, gate)
    }

    #[test]
    fn manual_blocks_with_mode_and_action() {
        let (recorder, gate) = gated(ComplianceMode::Manual);
        match gate.inject("hello") {
            Err(InjectError::Blocked(blocked)) => {
                assert_eq!(blocked.mode, ComplianceMode::Manual);
                assert_eq!(blocked.action, ActionType::InjectInput);
            }
            other => panic!("expected block, got {other:?}"),
        }
        assert!(recorder.writes().is_empty());
    }

    #[test]
    fn prefill_types_without_submitting() {
        let (recorder, gate) = gated(ComplianceMode::Prefill);
        assert_eq!(gate.inject("hello").unwrap(), InjectOutcome::Prefilled);
        assert_eq!(recorder.writes(), vec![("hello".to_string(), None)]);
    }

    #[test]
    fn auto_types_and_submits() {
        let (recorder, gate) = gated(ComplianceMode::Auto);
        let gate = gate.with_submit_seq("\n");
        assert_eq!(gate.inject("hello").unwrap(), InjectOutcome::Submitted);
        assert_eq!(
            recorder.writes(),
            vec![("hello".to_string(), Some("\n".to_string()))]
        );
    }

    #[test]
    fn interrupt_reaches_inner_terminal() {
        let (recorder, gate) = gated(ComplianceMode::Manual);
        gate.interrupt().unwrap();
        assert_eq!(recorder.interrupts(), 1);
        recorder.set_status("PROCESSING");
        assert_eq!(recorder.status(), "PROCESSING");
    }
}

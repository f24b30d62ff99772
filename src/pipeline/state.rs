//! Pipeline lifecycle state and its single owner.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PipelineState {
    Idle,
    Initializing,
    Ready,
    Busy,
    Stopped,
}

impl PipelineState {
    /// Whether `self -> next` is one of the lifecycle's edges.
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Idle, Initializing)
                | (Initializing, Ready)
                | (Initializing, Stopped)
                | (Ready, Busy)
                | (Ready, Stopped)
                | (Busy, Ready)
                | (Busy, Stopped)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == PipelineState::Stopped
    }
}

/// Owner of a pipeline's state. Not `Clone`: exactly one writer per pipeline.
pub struct StateCell {
    tx: watch::Sender<PipelineState>,
    history: Arc<Mutex<Vec<PipelineState>>>,
}

impl StateCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(PipelineState::Idle);
        Self {
            tx,
            history: Arc::new(Mutex::new(vec![PipelineState::Idle])),
        }
    }

    pub fn get(&self) -> PipelineState {
        *self.tx.borrow()
    }

    pub fn transition(&self, next: PipelineState) -> Result<(), PipelineError> {
        let from = self.get();
        if !from.can_transition_to(next) {
            return Err(PipelineError::InvalidTransition { from, to: next });
        }
        debug!("Pipeline state {:?} -> {:?}", from, next);
        if let Ok(mut history) = self.history.lock() {
            history.push(next);
        }
        self.tx.send_replace(next);
        Ok(())
    }

    /// Move to `Stopped` unless already there.
    pub fn stop(&self) -> Result<(), PipelineError> {
        if self.get().is_terminal() {
            return Ok(());
        }
        self.transition(PipelineState::Stopped)
    }

    /// Read-only view for other components.
    pub fn watcher(&self) -> StateWatcher {
        StateWatcher {
            rx: self.tx.subscribe(),
            history: Arc::clone(&self.history),
        }
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only accessor for a pipeline's state.
#[derive(Clone)]
pub struct StateWatcher {
    rx: watch::Receiver<PipelineState>,
    history: Arc<Mutex<Vec<PipelineState>>>,
}

impl StateWatcher {
    pub fn get(&self) -> PipelineState {
        *self.rx.borrow()
    }

    /// Every state the pipeline has been in, in order.
    pub fn history(&self) -> Vec<PipelineState> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }

    /// Wait until the state satisfies `predicate`.
    pub async fn wait_for(&mut self, predicate: impl FnMut(&PipelineState) -> bool) -> PipelineState {
        let seen = match self.rx.wait_for(predicate).await {
            Ok(state) => Some(*state),
            Err(_) => None,
        };
        // The owner is gone; whatever it left behind is final
        seen.unwrap_or_else(|| *self.rx.borrow())
    }
}

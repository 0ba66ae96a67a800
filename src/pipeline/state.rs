//! Pipeline state machine
//!
//! IDLE → LOCATED → EXTRACTED → INVOKED → DONE, with ABORTED reachable from
//! every non-terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    /// Nothing done yet
    Idle,
    /// An uploaded archive was found
    Located,
    /// The archive was extracted into its destination
    Extracted,
    /// The analysis tool ran to completion
    Invoked,
    /// Response composed
    Done,
    /// A stage failed
    Aborted,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Aborted)
    }

    pub fn can_transition_to(&self, target: PipelineState) -> bool {
        match (self, target) {
            (PipelineState::Idle, PipelineState::Located) => true,
            (PipelineState::Located, PipelineState::Extracted) => true,
            (PipelineState::Extracted, PipelineState::Invoked) => true,
            (PipelineState::Invoked, PipelineState::Done) => true,
            (from, PipelineState::Aborted) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Idle => "IDLE",
            PipelineState::Located => "LOCATED",
            PipelineState::Extracted => "EXTRACTED",
            PipelineState::Invoked => "INVOKED",
            PipelineState::Done => "DONE",
            PipelineState::Aborted => "ABORTED",
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition {
        from: PipelineState,
        to: PipelineState,
    },
}

/// One recorded transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub state: PipelineState,
    pub at: DateTime<Utc>,
}

/// Current state plus the history that led to it.
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: PipelineState,
    history: Vec<StateTransition>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: PipelineState::Idle,
            history: vec![StateTransition {
                state: PipelineState::Idle,
                at: Utc::now(),
            }],
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    pub fn into_history(self) -> Vec<StateTransition> {
        self.history
    }

    pub fn transition(&mut self, to: PipelineState) -> Result<(), StateError> {
        if !self.state.can_transition_to(to) {
            return Err(StateError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        self.history.push(StateTransition {
            state: to,
            at: Utc::now(),
        });
        Ok(())
    }

    /// Move to ABORTED unless already terminal
    pub fn abort(&mut self) {
        if !self.state.is_terminal() {
            self.state = PipelineState::Aborted;
            self.history.push(StateTransition {
                state: PipelineState::Aborted,
                at: Utc::now(),
            });
        }
    }
}

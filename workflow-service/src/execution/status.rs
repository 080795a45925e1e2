// Instance status table
// The one mutable structure shared between the coordinator and running instances

use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use std::fmt;
use std::sync::Arc;

/// Lifecycle state of one job instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InstanceState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl InstanceState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstanceState::Succeeded | InstanceState::Failed | InstanceState::Cancelled
        )
    }

    /// Legal moves: Pending -> Running | Cancelled,
    /// Running -> Succeeded | Failed | Cancelled.
    pub fn can_transition_to(&self, next: InstanceState) -> bool {
        use InstanceState::*;
        matches!(
            (self, next),
            (Pending, Running) | (Pending, Cancelled) | (Running, Succeeded | Failed | Cancelled)
        )
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstanceState::Pending => "pending",
            InstanceState::Running => "running",
            InstanceState::Succeeded => "succeeded",
            InstanceState::Failed => "failed",
            InstanceState::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("no instance with id {0}")]
    UnknownInstance(usize),

    #[error("instance {id} cannot move from {from} to {to}")]
    Illegal {
        id: usize,
        from: InstanceState,
        to: InstanceState,
    },
}

/// Per-instance states behind a lock that serialises writers.
#[derive(Debug)]
pub struct StatusTable {
    states: RwLock<Vec<InstanceState>>,
}

impl StatusTable {
    /// A table of `len` instances, all Pending.
    pub fn new(len: usize) -> Self {
        Self {
            states: RwLock::new(vec![InstanceState::Pending; len]),
        }
    }

    pub async fn transition(
        &self,
        id: usize,
        next: InstanceState,
    ) -> Result<InstanceState, TransitionError> {
        let mut states = self.states.write().await;
        let current = states
            .get_mut(id)
            .ok_or(TransitionError::UnknownInstance(id))?;
        if !current.can_transition_to(next) {
            return Err(TransitionError::Illegal {
                id,
                from: *current,
                to: next,
            });
        }
        let previous = *current;
        *current = next;
        Ok(previous)
    }

    pub async fn get(&self, id: usize) -> Option<InstanceState> {
        self.states.read().await.get(id).copied()
    }
}

/// What a running instance needs to report its state and observe cancellation.
#[derive(Debug, Clone)]
pub struct InstanceControl {
    id: usize,
    table: Arc<StatusTable>,
    group: CancellationToken,
}

impl InstanceControl {
    pub fn new(id: usize, table: Arc<StatusTable>, group: CancellationToken) -> Self {
        Self { id, table, group }
    }

    /// A control with its own one-entry table, for running a single instance.
    pub fn detached() -> Self {
        Self::new(0, Arc::new(StatusTable::new(1)), CancellationToken::new())
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.group.is_cancelled()
    }

    /// Cancel every instance sharing this control's group.
    pub fn cancel_group(&self) {
        self.group.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.group
    }

    pub async fn transition(&self, next: InstanceState) -> Result<InstanceState, TransitionError> {
        self.table.transition(self.id, next).await
    }

    pub async fn state(&self) -> Option<InstanceState> {
        self.table.get(self.id).await
    }
}

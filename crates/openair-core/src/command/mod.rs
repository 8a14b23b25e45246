// ── Command serialization ──
//
// Every outbound write for a session goes through one bounded `mpsc`
// queue drained by a single processor task, so at most one command is on
// the wire at a time and commands leave in submission order. Each caller
// gets its own result back over a `oneshot`.

mod debounce;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::model::{EntityKey, EntityKind};

pub use debounce::Debouncer;

const COMMAND_CHANNEL_SIZE: usize = 64;

/// Partial fan update. `None` fields are left as they are.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanUpdate {
    pub on: Option<bool>,
    pub speed: Option<u32>,
}

impl FanUpdate {
    pub fn power(on: bool) -> Self {
        Self {
            on: Some(on),
            speed: None,
        }
    }

    pub fn speed(level: u32) -> Self {
        Self {
            on: None,
            speed: Some(level),
        }
    }
}

/// A write to one entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetFan { key: EntityKey, update: FanUpdate },
    SetSwitch { key: EntityKey, on: bool },
    SetValvePosition { key: EntityKey, position: f32 },
    StopValve { key: EntityKey },
    PressButton { key: EntityKey },
}

impl Command {
    pub fn key(&self) -> EntityKey {
        match self {
            Self::SetFan { key, .. }
            | Self::SetSwitch { key, .. }
            | Self::SetValvePosition { key, .. }
            | Self::StopValve { key }
            | Self::PressButton { key } => *key,
        }
    }

    /// Entity kind the command is addressed to.
    pub fn target_kind(&self) -> EntityKind {
        match self {
            Self::SetFan { .. } => EntityKind::Fan,
            Self::SetSwitch { .. } => EntityKind::Switch,
            Self::SetValvePosition { .. } | Self::StopValve { .. } => EntityKind::Valve,
            Self::PressButton { .. } => EntityKind::Button,
        }
    }
}

pub(crate) struct CommandEnvelope {
    pub command: Command,
    pub response_tx: oneshot::Sender<Result<(), CoreError>>,
}

/// Where serialized commands end up.
#[async_trait]
pub trait CommandTarget: Send + Sync + 'static {
    async fn execute(&self, command: Command) -> Result<(), CoreError>;
}

// ── CommandSerializer ────────────────────────────────────────────────

/// Handle to a session's command queue. Cheap to clone.
#[derive(Clone)]
pub struct CommandSerializer {
    tx: mpsc::Sender<CommandEnvelope>,
}

impl CommandSerializer {
    /// Spawn the processor task. It runs until `cancel` fires or every
    /// handle is dropped; queued commands then fail with `NotConnected`.
    pub fn spawn(target: Arc<dyn CommandTarget>, cancel: CancellationToken) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let handle = tokio::spawn(command_processor_task(target, rx, cancel));
        (Self { tx }, handle)
    }

    /// Enqueue `command` and wait for its own outcome.
    pub async fn submit(&self, command: Command) -> Result<(), CoreError> {
        let (response_tx, rx) = oneshot::channel();
        self.tx
            .send(CommandEnvelope {
                command,
                response_tx,
            })
            .await
            .map_err(|_| CoreError::NotConnected)?;
        rx.await.map_err(|_| CoreError::NotConnected)?
    }
}

async fn command_processor_task(
    target: Arc<dyn CommandTarget>,
    mut rx: mpsc::Receiver<CommandEnvelope>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            envelope = rx.recv() => {
                let Some(envelope) = envelope else { break };
                let key = envelope.command.key();
                let result = tokio::select! {
                    biased;
                    () = cancel.cancelled() => Err(CoreError::NotConnected),
                    r = target.execute(envelope.command) => r,
                };
                if let Err(ref e) = result {
                    warn!(%key, error = %e, "command failed");
                }
                let _ = envelope.response_tx.send(result);
            }
        }
    }
    debug!("command processor exiting");
}

// ── Tests ────────────────────────────────────────────────────────────

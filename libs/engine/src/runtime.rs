//! The serialized engine runtime.
//!
//! All allocation-affecting work funnels through one worker task: local
//! commands, persistence settlements, and inbound synchronization events
//! interleave on a single queue, so every conflict check observes a
//! consistent snapshot. Persistence calls themselves run in spawned tasks
//! bounded by the configured timeout; their results re-enter the loop as
//! settlements, which is the only way phase two of an operation executes.

use std::sync::Arc;

use blockplan_events::{SchedulingContext, SyncEnvelope, SyncEvent};
use blockplan_id::BlockId;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::engine::AllocationEngine;
use crate::error::{EngineError, EngineResult};
use crate::model::{Allocation, AllocationStore, Block, Catalog};
use crate::persistence::{
    persist_with_timeout, PersistenceClient, PersistenceError,
};

/// A local operation submitted through an [`EngineHandle`].
enum Command {
    Receive {
        block_id: BlockId,
        context: SchedulingContext,
        start: DateTime<Utc>,
        reply: oneshot::Sender<EngineResult<Allocation>>,
    },
    Move {
        block_id: BlockId,
        new_start: DateTime<Utc>,
        reply: oneshot::Sender<EngineResult<Allocation>>,
    },
    Remove {
        block_id: BlockId,
        reply: oneshot::Sender<EngineResult<Block>>,
    },
    Clear {
        reply: oneshot::Sender<EngineResult<Vec<Block>>>,
    },
    CatalogSnapshot {
        reply: oneshot::Sender<Vec<Block>>,
    },
    AllocationSnapshot {
        reply: oneshot::Sender<Vec<Allocation>>,
    },
}

/// A persistence result re-entering the serialized loop.
enum Settlement {
    Receive {
        block_id: BlockId,
        result: Result<(), PersistenceError>,
        reply: oneshot::Sender<EngineResult<Allocation>>,
    },
    Move {
        block_id: BlockId,
        result: Result<(), PersistenceError>,
        reply: oneshot::Sender<EngineResult<Allocation>>,
    },
    Remove {
        block_id: BlockId,
        result: Result<(), PersistenceError>,
        reply: oneshot::Sender<EngineResult<Block>>,
    },
    Clear {
        result: Result<(), PersistenceError>,
        reply: oneshot::Sender<EngineResult<Vec<Block>>>,
    },
}

/// Cloneable handle for submitting operations to the engine worker.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Command>,
}

impl EngineHandle {
    /// Places a catalog block onto the grid.
    pub async fn receive(
        &self,
        block_id: BlockId,
        context: SchedulingContext,
        start: DateTime<Utc>,
    ) -> EngineResult<Allocation> {
        let (reply, rx) = oneshot::channel();
        self.submit(
            Command::Receive {
                block_id,
                context,
                start,
                reply,
            },
            rx,
        )
        .await
    }

    /// Moves an allocation to a new start time.
    pub async fn move_block(
        &self,
        block_id: BlockId,
        new_start: DateTime<Utc>,
    ) -> EngineResult<Allocation> {
        let (reply, rx) = oneshot::channel();
        self.submit(
            Command::Move {
                block_id,
                new_start,
                reply,
            },
            rx,
        )
        .await
    }

    /// Removes an allocation, returning its block to the catalog.
    pub async fn remove(&self, block_id: BlockId) -> EngineResult<Block> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Remove { block_id, reply }, rx).await
    }

    /// Clears the whole grid, returning every block to the catalog.
    pub async fn clear_allocations(&self) -> EngineResult<Vec<Block>> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Clear { reply }, rx).await
    }

    /// Current catalog snapshot, sorted by block id.
    pub async fn catalog(&self) -> EngineResult<Vec<Block>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::CatalogSnapshot { reply })
            .await
            .map_err(|_| Self::stopped())?;
        rx.await.map_err(|_| Self::stopped())
    }

    /// Current allocation snapshot, sorted by start then id.
    pub async fn allocations(&self) -> EngineResult<Vec<Allocation>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::AllocationSnapshot { reply })
            .await
            .map_err(|_| Self::stopped())?;
        rx.await.map_err(|_| Self::stopped())
    }

    async fn submit<T>(
        &self,
        command: Command,
        rx: oneshot::Receiver<EngineResult<T>>,
    ) -> EngineResult<T> {
        self.tx.send(command).await.map_err(|_| Self::stopped())?;
        rx.await.map_err(|_| Self::stopped())?
    }

    fn stopped() -> EngineError {
        EngineError::Persistence(PersistenceError::Unavailable(
            "engine worker stopped".to_string(),
        ))
    }
}

/// Spawns the engine worker.
pub struct EngineRuntime;

impl EngineRuntime {
    /// Starts the serialized loop and returns a handle to it.
    ///
    /// `catalog` and `allocations` seed the engine with the initial fetch
    /// from the persistence service. `sync_rx` is the inbound half of the
    /// synchronization channel; every locally committed change is echoed
    /// on `echo_tx` for the adapter to publish.
    pub fn spawn<P: PersistenceClient>(
        config: EngineConfig,
        catalog: Catalog,
        allocations: AllocationStore,
        persistence: Arc<P>,
        sync_rx: mpsc::Receiver<SyncEnvelope>,
        echo_tx: mpsc::UnboundedSender<SyncEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> (EngineHandle, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_buffer);
        let (settle_tx, settle_rx) = mpsc::unbounded_channel();

        let worker = EngineWorker {
            engine: AllocationEngine::with_state(config.slot_unit(), catalog, allocations),
            config,
            persistence,
            cmd_rx,
            settle_tx,
            settle_rx,
            sync_rx,
            echo_tx,
        };
        let join = tokio::spawn(worker.run(shutdown));

        (EngineHandle { tx: cmd_tx }, join)
    }
}

/// The worker that owns the engine and serializes every mutation.
struct EngineWorker<P: PersistenceClient> {
    engine: AllocationEngine,
    config: EngineConfig,
    persistence: Arc<P>,
    cmd_rx: mpsc::Receiver<Command>,
    settle_tx: mpsc::UnboundedSender<Settlement>,
    settle_rx: mpsc::UnboundedReceiver<Settlement>,
    sync_rx: mpsc::Receiver<SyncEnvelope>,
    echo_tx: mpsc::UnboundedSender<SyncEvent>,
}

impl<P: PersistenceClient> EngineWorker<P> {
    /// Runs until shutdown is signaled or every handle is dropped.
    #[instrument(skip(self, shutdown))]
    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            slot_minutes = self.config.slot_minutes,
            "engine worker started"
        );
        let mut sync_open = true;

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        info!("all handles dropped, engine worker stopping");
                        break;
                    }
                },
                Some(settlement) = self.settle_rx.recv() => {
                    self.handle_settlement(settlement);
                }
                event = self.sync_rx.recv(), if sync_open => match event {
                    Some(envelope) => self.handle_sync(envelope),
                    None => {
                        debug!("synchronization channel closed");
                        sync_open = false;
                    }
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("engine worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Receive {
                block_id,
                context,
                start,
                reply,
            } => match self.engine.begin_receive(block_id, context, start) {
                Ok(payload) => {
                    let client = Arc::clone(&self.persistence);
                    let settle_tx = self.settle_tx.clone();
                    let timeout = self.config.persist_timeout;
                    tokio::spawn(async move {
                        let result =
                            persist_with_timeout(client.as_ref(), block_id, &payload, timeout)
                                .await;
                        let _ = settle_tx.send(Settlement::Receive {
                            block_id,
                            result,
                            reply,
                        });
                    });
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Command::Move {
                block_id,
                new_start,
                reply,
            } => match self.engine.begin_move(block_id, new_start) {
                Ok(payload) => {
                    let client = Arc::clone(&self.persistence);
                    let settle_tx = self.settle_tx.clone();
                    let timeout = self.config.persist_timeout;
                    tokio::spawn(async move {
                        let result =
                            persist_with_timeout(client.as_ref(), block_id, &payload, timeout)
                                .await;
                        let _ = settle_tx.send(Settlement::Move {
                            block_id,
                            result,
                            reply,
                        });
                    });
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Command::Remove { block_id, reply } => match self.engine.begin_remove(block_id) {
                Ok(payload) => {
                    let client = Arc::clone(&self.persistence);
                    let settle_tx = self.settle_tx.clone();
                    let timeout = self.config.persist_timeout;
                    tokio::spawn(async move {
                        let result =
                            persist_with_timeout(client.as_ref(), block_id, &payload, timeout)
                                .await;
                        let _ = settle_tx.send(Settlement::Remove {
                            block_id,
                            result,
                            reply,
                        });
                    });
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Command::Clear { reply } => match self.engine.begin_clear() {
                Ok(()) => {
                    let client = Arc::clone(&self.persistence);
                    let settle_tx = self.settle_tx.clone();
                    let timeout = self.config.persist_timeout;
                    tokio::spawn(async move {
                        let result =
                            match tokio::time::timeout(timeout, client.clear_allocations()).await {
                                Ok(result) => result,
                                Err(_) => Err(PersistenceError::Timeout(timeout)),
                            };
                        let _ = settle_tx.send(Settlement::Clear { result, reply });
                    });
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Command::CatalogSnapshot { reply } => {
                let _ = reply.send(self.engine.catalog().snapshot());
            }
            Command::AllocationSnapshot { reply } => {
                let _ = reply.send(self.engine.allocations().snapshot());
            }
        }
    }

    fn handle_settlement(&mut self, settlement: Settlement) {
        match settlement {
            Settlement::Receive {
                block_id,
                result,
                reply,
            } => {
                let outcome = self.engine.complete_receive(block_id, result);
                if let Ok(allocation) = &outcome {
                    self.echo(SyncEvent::BlockAdded(allocation.to_record()));
                }
                let _ = reply.send(outcome);
            }
            Settlement::Move {
                block_id,
                result,
                reply,
            } => {
                let outcome = self.engine.complete_move(block_id, result);
                if let Ok(allocation) = &outcome {
                    self.echo(SyncEvent::BlockUpdated(allocation.to_record()));
                }
                let _ = reply.send(outcome);
            }
            Settlement::Remove {
                block_id,
                result,
                reply,
            } => {
                let outcome = self.engine.complete_remove(block_id, result);
                if let Ok(block) = &outcome {
                    self.echo(SyncEvent::BlockRemoved(block.to_record()));
                }
                let _ = reply.send(outcome);
            }
            Settlement::Clear { result, reply } => {
                let outcome = self.engine.complete_clear(result);
                if let Ok(blocks) = &outcome {
                    for block in blocks {
                        self.echo(SyncEvent::BlockRemoved(block.to_record()));
                    }
                }
                let _ = reply.send(outcome);
            }
        }
    }

    fn handle_sync(&mut self, envelope: SyncEnvelope) {
        debug!(
            event_id = envelope.event_id,
            event_type = envelope.event.event_type(),
            "applying remote event"
        );
        self.engine.reconcile_remote(&envelope.event);
    }

    fn echo(&self, event: SyncEvent) {
        if self.echo_tx.send(event).is_err() {
            warn!("synchronization adapter dropped, echo lost");
        }
    }
}

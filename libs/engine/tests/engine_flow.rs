//! End-to-end flows through the engine runtime.
//!
//! These tests drive the serialized worker the way a UI would: local
//! operations through an [`EngineHandle`], remote changes through the
//! synchronization channel, and a scriptable in-process persistence client
//! standing in for the external service.
//!
//! ## Running
//!
//! ```bash
//! cargo test -p blockplan-engine --test engine_flow
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use blockplan_engine::{
    Allocation, AllocationPayload, AllocationStore, Block, Catalog, ClassType, EngineConfig,
    EngineError, EngineHandle, EngineRuntime, PersistenceClient, PersistenceError,
    SchedulingContext, SyncEnvelope, SyncEvent,
};
use blockplan_events::EventOrigin;
use blockplan_id::{BlockId, GroupId, RequestId, RoomId, TeacherId, UnitId};
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Persistence double: answers from a script (default `Ok`), optionally
/// after a delay, and records every call.
#[derive(Default)]
struct FakePersistence {
    responses: Mutex<VecDeque<Result<(), PersistenceError>>>,
    delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<(BlockId, AllocationPayload)>>,
    clear_calls: AtomicUsize,
}

impl FakePersistence {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn script(&self, response: Result<(), PersistenceError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn last_payload(&self) -> Option<AllocationPayload> {
        self.calls.lock().unwrap().last().map(|(_, p)| p.clone())
    }

    fn next_response(&self) -> Result<(), PersistenceError> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }
}

#[async_trait]
impl PersistenceClient for FakePersistence {
    async fn create_or_update_allocation(
        &self,
        id: BlockId,
        payload: &AllocationPayload,
    ) -> Result<(), PersistenceError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.lock().unwrap().push((id, payload.clone()));
        self.next_response()
    }

    async fn clear_allocations(&self) -> Result<(), PersistenceError> {
        self.clear_calls.fetch_add(1, Ordering::SeqCst);
        self.next_response()
    }
}

struct Harness {
    handle: EngineHandle,
    persistence: Arc<FakePersistence>,
    sync_tx: mpsc::Sender<SyncEnvelope>,
    echo_rx: mpsc::UnboundedReceiver<SyncEvent>,
    shutdown_tx: watch::Sender<bool>,
    worker: JoinHandle<()>,
}

fn start(blocks: Vec<Block>) -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let persistence = FakePersistence::new();
    let (sync_tx, sync_rx) = mpsc::channel(16);
    let (echo_tx, echo_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (handle, worker) = EngineRuntime::spawn(
        EngineConfig::default(),
        Catalog::from_blocks(blocks),
        AllocationStore::new(),
        Arc::clone(&persistence),
        sync_rx,
        echo_tx,
        shutdown_rx,
    );

    Harness {
        handle,
        persistence,
        sync_tx,
        echo_rx,
        shutdown_tx,
        worker,
    }
}

/// Lets the worker loop drain its queues.
async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 27, hour, minute, 0).unwrap()
}

fn block(slot_count: u32) -> Block {
    Block {
        id: BlockId::new(),
        unit: "Programming I".to_string(),
        unit_id: UnitId::new(),
        class_type: ClassType::Lecture,
        teacher: "A. Sousa".to_string(),
        teacher_id: TeacherId::new(),
        room: "Room A".to_string(),
        room_id: RoomId::new(),
        group_id: GroupId::new(),
        slot_count,
        repeat_weeks: None,
        school: "ESTT".to_string(),
        course: "Informatics Engineering".to_string(),
        semester: 1,
    }
}

fn envelope(event: SyncEvent) -> SyncEnvelope {
    SyncEnvelope::new(1, EventOrigin::Remote, RequestId::new(), event)
}

#[tokio::test(start_paused = true)]
async fn receive_commits_and_echoes() {
    let b = block(2);
    let id = b.id;
    let room = SchedulingContext::Room(b.room_id);
    let mut harness = start(vec![b]);

    let allocation = harness.handle.receive(id, room, at(9, 0)).await.unwrap();
    assert_eq!(allocation.start, at(9, 0));
    assert_eq!(allocation.end, at(10, 0));

    // The payload reached persistence with the derived interval.
    assert_eq!(harness.persistence.call_count(), 1);
    let payload = harness.persistence.last_payload().unwrap();
    assert_eq!(payload.start, Some(at(9, 0)));
    assert_eq!(payload.end, Some(at(10, 0)));

    // The commit was echoed for other viewers.
    match harness.echo_rx.try_recv().unwrap() {
        SyncEvent::BlockAdded(record) => assert_eq!(record.block_id, id),
        other => panic!("expected BlockAdded, got {other:?}"),
    }

    let catalog = harness.handle.catalog().await.unwrap();
    assert!(catalog.is_empty());
    let allocations = harness.handle.allocations().await.unwrap();
    assert_eq!(allocations.len(), 1);

    harness.shutdown_tx.send(true).unwrap();
    harness.worker.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn concurrent_receives_for_one_block_yield_one_winner() {
    let b = block(2);
    let id = b.id;
    let room = SchedulingContext::Room(b.room_id);
    let harness = start(vec![b]);

    // Keep the first call in flight long enough for the second to arrive.
    harness.persistence.set_delay(Duration::from_millis(50));

    let first = harness.handle.receive(id, room, at(9, 0));
    let second = harness.handle.receive(id, room, at(11, 0));
    let (first, second) = tokio::join!(first, second);

    let results = [first, second];
    let committed = results.iter().filter(|r| r.is_ok()).count();
    let in_flight = results
        .iter()
        .filter(|r| matches!(r, Err(EngineError::AlreadyInFlight(other)) if *other == id))
        .count();
    assert_eq!(committed, 1);
    assert_eq!(in_flight, 1);

    // Only the winner reached persistence.
    assert_eq!(harness.persistence.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn persistence_rejection_rolls_receive_back() {
    let b = block(2);
    let id = b.id;
    let room = SchedulingContext::Room(b.room_id);
    let mut harness = start(vec![b.clone()]);
    harness
        .persistence
        .script(Err(PersistenceError::Rejected("500".to_string())));

    let err = harness.handle.receive(id, room, at(9, 0)).await.unwrap_err();
    assert!(matches!(err, EngineError::Persistence(_)));
    assert!(err.is_retryable());

    // The block is back in the catalog with the same fields and no echo
    // was emitted.
    let catalog = harness.handle.catalog().await.unwrap();
    assert_eq!(catalog, vec![b]);
    assert!(harness.handle.allocations().await.unwrap().is_empty());
    assert!(harness.echo_rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn persistence_timeout_rolls_receive_back() {
    let b = block(2);
    let id = b.id;
    let room = SchedulingContext::Room(b.room_id);
    let harness = start(vec![b]);

    // Longer than the configured timeout; the paused clock fast-forwards.
    harness.persistence.set_delay(Duration::from_secs(60));

    let err = harness.handle.receive(id, room, at(9, 0)).await.unwrap_err();
    assert_eq!(
        err,
        EngineError::Persistence(PersistenceError::Timeout(
            EngineConfig::default().persist_timeout
        ))
    );
    assert_eq!(harness.handle.catalog().await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn conflicting_receive_is_rejected_without_persistence() {
    let first = block(2);
    let second = block(1);
    let first_id = first.id;
    let second_id = second.id;
    let room = SchedulingContext::Room(first.room_id);
    let harness = start(vec![first, second]);

    harness.handle.receive(first_id, room, at(9, 0)).await.unwrap();
    let err = harness
        .handle
        .receive(second_id, room, at(9, 30))
        .await
        .unwrap_err();
    assert!(err.is_conflict());
    assert!(!err.is_silent());

    // Only the successful receive hit the wire.
    assert_eq!(harness.persistence.call_count(), 1);

    // The exact boundary is free.
    harness
        .handle
        .receive(second_id, room, at(10, 0))
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn move_commits_and_echoes_update() {
    let b = block(2);
    let id = b.id;
    let room = SchedulingContext::Room(b.room_id);
    let mut harness = start(vec![b]);

    harness.handle.receive(id, room, at(9, 0)).await.unwrap();
    let _ = harness.echo_rx.try_recv();

    let moved = harness.handle.move_block(id, at(14, 0)).await.unwrap();
    assert_eq!(moved.start, at(14, 0));
    assert_eq!(moved.end, at(15, 0));

    match harness.echo_rx.try_recv().unwrap() {
        SyncEvent::BlockUpdated(record) => {
            assert_eq!(record.block_id, id);
            assert_eq!(record.start, at(14, 0));
        }
        other => panic!("expected BlockUpdated, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn move_failure_restores_prior_position() {
    let b = block(2);
    let id = b.id;
    let room = SchedulingContext::Room(b.room_id);
    let harness = start(vec![b]);

    harness.handle.receive(id, room, at(9, 0)).await.unwrap();
    harness
        .persistence
        .script(Err(PersistenceError::Unavailable("down".to_string())));

    harness.handle.move_block(id, at(14, 0)).await.unwrap_err();

    let allocations = harness.handle.allocations().await.unwrap();
    assert_eq!(allocations[0].start, at(9, 0));
    assert_eq!(allocations[0].end, at(10, 0));
}

#[tokio::test(start_paused = true)]
async fn remove_round_trip_restores_catalog_membership() {
    let b = block(2);
    let id = b.id;
    let room = SchedulingContext::Room(b.room_id);
    let mut harness = start(vec![b.clone()]);

    harness.handle.receive(id, room, at(9, 0)).await.unwrap();
    let _ = harness.echo_rx.try_recv();

    let returned = harness.handle.remove(id).await.unwrap();
    assert_eq!(returned, b);

    // The removal persisted as an update with a cleared interval.
    let payload = harness.persistence.last_payload().unwrap();
    assert_eq!(payload.start, None);
    assert_eq!(payload.end, None);

    // Other viewers are told the block is unallocated again.
    match harness.echo_rx.try_recv().unwrap() {
        SyncEvent::BlockRemoved(record) => {
            assert_eq!(record.block_id, id);
            assert!(record.is_unallocated());
        }
        other => panic!("expected BlockRemoved, got {other:?}"),
    }

    assert_eq!(harness.handle.catalog().await.unwrap(), vec![b]);
    assert!(harness.handle.allocations().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn remote_events_apply_in_order_and_idempotently() {
    let b = block(2);
    let id = b.id;
    let room = SchedulingContext::Room(b.room_id);
    let mut harness = start(vec![]);

    let allocation = Allocation {
        block: b,
        context: room,
        start: at(9, 0),
        end: at(10, 0),
    };
    let added = SyncEvent::BlockAdded(allocation.to_record());

    harness.sync_tx.send(envelope(added.clone())).await.unwrap();
    // A reconnect replays the same event.
    harness.sync_tx.send(envelope(added)).await.unwrap();
    settle().await;

    let allocations = harness.handle.allocations().await.unwrap();
    assert_eq!(allocations.len(), 1);
    assert_eq!(allocations[0].id(), id);

    // A genuine removal returns the block to the catalog.
    let removal = SyncEvent::BlockRemoved(allocation.block.to_record());
    harness.sync_tx.send(envelope(removal)).await.unwrap();
    settle().await;

    assert!(harness.handle.allocations().await.unwrap().is_empty());
    let catalog = harness.handle.catalog().await.unwrap();
    assert_eq!(catalog.len(), 1);
    assert_eq!(catalog[0].id, id);

    // Remote application never calls persistence and never echoes.
    assert_eq!(harness.persistence.call_count(), 0);
    assert!(harness.echo_rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn remote_relocation_does_not_reenter_catalog() {
    let b = block(2);
    let id = b.id;
    let room = SchedulingContext::Room(b.room_id);
    let harness = start(vec![]);

    let allocation = Allocation {
        block: b,
        context: room,
        start: at(9, 0),
        end: at(10, 0),
    };
    harness
        .sync_tx
        .send(envelope(SyncEvent::BlockAdded(allocation.to_record())))
        .await
        .unwrap();

    // Removed-with-interval means "relocated": the matching update follows.
    let mut relocation = allocation.block.to_record();
    relocation.context = Some(room);
    relocation.start = Some(at(11, 0));
    relocation.end = Some(at(12, 0));
    harness
        .sync_tx
        .send(envelope(SyncEvent::BlockRemoved(relocation)))
        .await
        .unwrap();

    let mut updated = allocation.to_record();
    updated.start = at(11, 0);
    updated.end = at(12, 0);
    harness
        .sync_tx
        .send(envelope(SyncEvent::BlockUpdated(updated)))
        .await
        .unwrap();
    settle().await;

    assert!(harness.handle.catalog().await.unwrap().is_empty());
    let allocations = harness.handle.allocations().await.unwrap();
    assert_eq!(allocations.len(), 1);
    assert_eq!(allocations[0].id(), id);
    assert_eq!(allocations[0].start, at(11, 0));
}

#[tokio::test(start_paused = true)]
async fn clear_returns_every_block_to_the_catalog() {
    let first = block(1);
    let second = block(1);
    let first_id = first.id;
    let second_id = second.id;
    let room = SchedulingContext::Room(first.room_id);
    let other = SchedulingContext::Room(second.room_id);
    let mut harness = start(vec![first, second]);

    harness.handle.receive(first_id, room, at(9, 0)).await.unwrap();
    harness.handle.receive(second_id, other, at(9, 0)).await.unwrap();
    while harness.echo_rx.try_recv().is_ok() {}

    let blocks = harness.handle.clear_allocations().await.unwrap();
    assert_eq!(blocks.len(), 2);
    assert_eq!(harness.persistence.clear_calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.handle.catalog().await.unwrap().len(), 2);
    assert!(harness.handle.allocations().await.unwrap().is_empty());

    // One removal echo per cleared block.
    let mut removed = 0;
    while let Ok(event) = harness.echo_rx.try_recv() {
        assert!(matches!(event, SyncEvent::BlockRemoved(_)));
        removed += 1;
    }
    assert_eq!(removed, 2);
}

#[tokio::test(start_paused = true)]
async fn handle_reports_stopped_worker() {
    let harness = start(vec![]);
    harness.shutdown_tx.send(true).unwrap();
    harness.worker.await.unwrap();

    let err = harness
        .handle
        .receive(BlockId::new(), SchedulingContext::Room(RoomId::new()), at(9, 0))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Persistence(PersistenceError::Unavailable(_))
    ));
}

//! Single-flight pipeline creation
//!
//! Two peers offering at the same moment for a brand-new room must end up on
//! the same pipeline. The first caller to find the room without a pipeline
//! takes the room's creation gate and talks to the relay; everyone arriving
//! while that is in flight queues on the same gate and, once it is theirs,
//! picks up the winner's pipeline instead of creating another.
//!
//! The gate belongs to the room, so creations for different rooms never wait
//! on each other. A winner that is dropped mid-creation releases the gate and
//! the next waiter creates the pipeline itself.

use std::sync::Arc;

use crate::error::{Result, SignalingError};
use crate::relay::{MediaRelay, PipelineHandle};
use crate::room::{Room, RoomStore};
use crate::stats::CoordinatorCounters;

/// Ensures each room has exactly one pipeline
pub struct PipelineProvisioner {
    relay: Arc<dyn MediaRelay>,
    rooms: Arc<RoomStore>,
    counters: Arc<CoordinatorCounters>,
}

impl PipelineProvisioner {
    pub fn new(relay: Arc<dyn MediaRelay>, rooms: Arc<RoomStore>, counters: Arc<CoordinatorCounters>) -> Self {
        Self { relay, rooms, counters }
    }

    /// Return the room's pipeline, creating it if needed
    ///
    /// On creation failure the room is released and removed from the store,
    /// and every waiter gets `PipelineCreationFailed` too.
    pub async fn ensure_pipeline(&self, room: &Arc<Room>) -> Result<PipelineHandle> {
        if let Some(pipeline) = room.pipeline().await {
            return Ok(pipeline);
        }

        let _creating = room.creation_gate().lock().await;

        // Re-check under the gate: a creation may have finished or failed since
        if let Some(pipeline) = room.pipeline().await {
            tracing::debug!(room = %room.id(), "Pipeline created while waiting");
            return Ok(pipeline);
        }
        if room.is_released().await {
            return Err(SignalingError::PipelineCreationFailed(room.id().clone()));
        }

        tracing::info!(room = %room.id(), "Creating pipeline");
        match self.relay.create_pipeline().await {
            Ok(pipeline) => {
                self.counters.pipeline_created();
                self.store_pipeline(room, pipeline).await
            }
            Err(e) => {
                tracing::warn!(room = %room.id(), error = %e, "Pipeline creation failed");
                self.abandon_room(room).await;
                Err(SignalingError::PipelineCreationFailed(room.id().clone()))
            }
        }
    }

    async fn store_pipeline(&self, room: &Arc<Room>, pipeline: PipelineHandle) -> Result<PipelineHandle> {
        let mut state = room.state().lock().await;

        if state.is_released() {
            // Only reachable if the room was torn down underneath us; the new
            // pipeline has no owner and must go straight back.
            drop(state);
            tracing::warn!(room = %room.id(), pipeline = %pipeline, "Room released during pipeline creation");
            if let Err(e) = self.relay.release_pipeline(&pipeline).await {
                tracing::warn!(pipeline = %pipeline, error = %e, "Pipeline release failed");
            }
            self.counters.pipeline_released();
            return Err(SignalingError::PipelineCreationFailed(room.id().clone()));
        }

        state.pipeline = Some(pipeline.clone());
        tracing::info!(room = %room.id(), pipeline = %pipeline, "Pipeline created");
        Ok(pipeline)
    }

    /// Mark a room whose pipeline could not be created as released and drop
    /// it from the store
    async fn abandon_room(&self, room: &Arc<Room>) {
        let mut resources = room.state().lock().await.release();
        resources.abort_forwarders();
        if self.rooms.remove_if_same(room).await {
            self.counters.room_released();
            tracing::info!(room = %room.id(), "Room removed after pipeline failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::relay::memory::{MemoryRelay, RelayOp};

    fn provisioner(relay: &Arc<MemoryRelay>) -> (PipelineProvisioner, Arc<RoomStore>) {
        let rooms = Arc::new(RoomStore::new());
        let provisioner = PipelineProvisioner::new(
            Arc::clone(relay) as Arc<dyn MediaRelay>,
            Arc::clone(&rooms),
            Arc::new(CoordinatorCounters::new()),
        );
        (provisioner, rooms)
    }

    #[tokio::test]
    async fn test_concurrent_ensure_creates_once() {
        let relay = Arc::new(MemoryRelay::new().with_latency(Duration::from_millis(20)));
        let (provisioner, rooms) = provisioner(&relay);
        let provisioner = Arc::new(provisioner);
        let room = rooms.get_or_create(&"r1".into()).await;

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let provisioner = Arc::clone(&provisioner);
            let room = Arc::clone(&room);
            tasks.push(tokio::spawn(async move { provisioner.ensure_pipeline(&room).await }));
        }

        let mut pipelines = Vec::new();
        for task in tasks {
            pipelines.push(task.await.unwrap().unwrap());
        }

        assert!(pipelines.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(relay.calls().await.create_pipeline, 1);
        assert!(room.creation_gate().try_lock().is_ok());
    }

    #[tokio::test]
    async fn test_fast_path_skips_relay() {
        let relay = Arc::new(MemoryRelay::new());
        let (provisioner, rooms) = provisioner(&relay);
        let room = rooms.get_or_create(&"r1".into()).await;

        let first = provisioner.ensure_pipeline(&room).await.unwrap();
        let second = provisioner.ensure_pipeline(&room).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(relay.calls().await.create_pipeline, 1);
    }

    #[tokio::test]
    async fn test_failure_removes_room_and_fails_waiters() {
        let relay = Arc::new(MemoryRelay::new().with_latency(Duration::from_millis(20)));
        relay.fail(RelayOp::CreatePipeline).await;
        let (provisioner, rooms) = provisioner(&relay);
        let provisioner = Arc::new(provisioner);
        let room = rooms.get_or_create(&"r2".into()).await;

        let waiter = {
            let provisioner = Arc::clone(&provisioner);
            let room = Arc::clone(&room);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                provisioner.ensure_pipeline(&room).await
            })
        };

        let result = provisioner.ensure_pipeline(&room).await;
        assert!(matches!(result, Err(SignalingError::PipelineCreationFailed(_))));
        assert!(matches!(
            waiter.await.unwrap(),
            Err(SignalingError::PipelineCreationFailed(_))
        ));

        assert!(rooms.get(&"r2".into()).await.is_none());
        assert!(room.is_released().await);
        assert_eq!(relay.calls().await.create_pipeline, 1);
    }

    #[tokio::test]
    async fn test_dropped_creation_does_not_wedge_room() {
        let relay = Arc::new(MemoryRelay::new().with_latency(Duration::from_millis(50)));
        let (provisioner, rooms) = provisioner(&relay);
        let room = rooms.get_or_create(&"r3".into()).await;

        let abandoned = tokio::time::timeout(Duration::from_millis(10), provisioner.ensure_pipeline(&room)).await;
        assert!(abandoned.is_err());
        assert!(room.pipeline().await.is_none());

        let pipeline = tokio::time::timeout(Duration::from_secs(2), provisioner.ensure_pipeline(&room))
            .await
            .expect("creation stayed blocked after the first caller was dropped")
            .unwrap();

        assert_eq!(room.pipeline().await, Some(pipeline));
        assert_eq!(relay.calls().await.create_pipeline, 1);
        assert_eq!(relay.live_pipelines().await, 1);
    }

    #[tokio::test]
    async fn test_waiter_takes_over_from_aborted_creator() {
        let relay = Arc::new(MemoryRelay::new().with_latency(Duration::from_millis(50)));
        let (provisioner, rooms) = provisioner(&relay);
        let provisioner = Arc::new(provisioner);
        let room = rooms.get_or_create(&"r4".into()).await;

        let spawn_ensure = |delay: u64| {
            let provisioner = Arc::clone(&provisioner);
            let room = Arc::clone(&room);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                provisioner.ensure_pipeline(&room).await
            })
        };

        let creator = spawn_ensure(0);
        let waiter = spawn_ensure(5);

        tokio::time::sleep(Duration::from_millis(15)).await;
        creator.abort();
        assert!(creator.await.unwrap_err().is_cancelled());

        let pipeline = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("waiter never resumed")
            .unwrap()
            .unwrap();

        assert_eq!(room.pipeline().await, Some(pipeline));
        assert_eq!(relay.calls().await.create_pipeline, 1);
    }

    #[tokio::test]
    async fn test_rooms_create_independently() {
        let relay = Arc::new(MemoryRelay::new().with_latency(Duration::from_millis(50)));
        let (provisioner, rooms) = provisioner(&relay);
        let first = rooms.get_or_create(&"a".into()).await;
        let second = rooms.get_or_create(&"b".into()).await;

        // Holding one room's gate must not hold up the other room
        let _held = first.creation_gate().lock().await;
        let pipeline = tokio::time::timeout(Duration::from_secs(1), provisioner.ensure_pipeline(&second))
            .await
            .expect("creation for one room waited on another")
            .unwrap();

        assert_eq!(second.pipeline().await, Some(pipeline));
        assert!(first.pipeline().await.is_none());
    }
}

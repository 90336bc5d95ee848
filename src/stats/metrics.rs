//! Statistics and metrics for the coordinator

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Live counters shared by the coordinator components
#[derive(Debug)]
pub struct CoordinatorCounters {
    started_at: Instant,
    pipelines_created: AtomicU64,
    pipelines_released: AtomicU64,
    endpoints_created: AtomicU64,
    endpoints_released: AtomicU64,
    connected_pairs: AtomicU64,
    rooms_released: AtomicU64,
}

impl CoordinatorCounters {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            pipelines_created: AtomicU64::new(0),
            pipelines_released: AtomicU64::new(0),
            endpoints_created: AtomicU64::new(0),
            endpoints_released: AtomicU64::new(0),
            connected_pairs: AtomicU64::new(0),
            rooms_released: AtomicU64::new(0),
        }
    }

    pub fn pipeline_created(&self) {
        self.pipelines_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pipeline_released(&self) {
        self.pipelines_released.fetch_add(1, Ordering::Relaxed);
    }

    pub fn endpoint_created(&self) {
        self.endpoints_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn endpoint_released(&self) {
        self.endpoints_released.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pair_connected(&self) {
        self.connected_pairs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn room_released(&self) {
        self.rooms_released.fetch_add(1, Ordering::Relaxed);
    }

    /// Fill the counter part of a stats snapshot
    pub fn snapshot(&self) -> CoordinatorStats {
        CoordinatorStats {
            pipelines_created: self.pipelines_created.load(Ordering::Relaxed),
            pipelines_released: self.pipelines_released.load(Ordering::Relaxed),
            endpoints_created: self.endpoints_created.load(Ordering::Relaxed),
            endpoints_released: self.endpoints_released.load(Ordering::Relaxed),
            connected_pairs: self.connected_pairs.load(Ordering::Relaxed),
            rooms_released: self.rooms_released.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
            ..CoordinatorStats::default()
        }
    }
}

impl Default for CoordinatorCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Coordinator-wide statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    /// Current live connections
    pub active_connections: u64,
    /// Total connections ever
    pub total_connections: u64,
    /// Rooms currently in the store
    pub active_rooms: u64,
    /// Pipelines created on the relay
    pub pipelines_created: u64,
    /// Pipelines released on the relay
    pub pipelines_released: u64,
    /// Endpoints created on the relay
    pub endpoints_created: u64,
    /// Endpoints released on the relay
    pub endpoints_released: u64,
    /// Endpoint pairs connected in both directions
    pub connected_pairs: u64,
    /// Rooms torn down
    pub rooms_released: u64,
    /// Uptime
    pub uptime: Duration,
}

impl CoordinatorStats {
    /// Pipelines created and not yet released
    pub fn live_pipelines(&self) -> u64 {
        self.pipelines_created.saturating_sub(self.pipelines_released)
    }

    /// Endpoints created and not yet released
    pub fn live_endpoints(&self) -> u64 {
        self.endpoints_created.saturating_sub(self.endpoints_released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_new() {
        let stats = CoordinatorCounters::new().snapshot();
        assert_eq!(stats.pipelines_created, 0);
        assert_eq!(stats.endpoints_created, 0);
        assert_eq!(stats.connected_pairs, 0);
        assert_eq!(stats.active_rooms, 0);
    }

    #[test]
    fn test_live_counts() {
        let counters = CoordinatorCounters::new();
        counters.pipeline_created();
        counters.endpoint_created();
        counters.endpoint_created();
        counters.endpoint_released();

        let stats = counters.snapshot();
        assert_eq!(stats.live_pipelines(), 1);
        assert_eq!(stats.live_endpoints(), 1);

        counters.pipeline_released();
        assert_eq!(counters.snapshot().live_pipelines(), 0);
    }

    #[test]
    fn test_live_counts_saturate() {
        let stats = CoordinatorStats {
            pipelines_released: 3,
            ..CoordinatorStats::default()
        };
        assert_eq!(stats.live_pipelines(), 0);
    }
}

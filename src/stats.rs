//! Point-in-time counters for monitoring a [`RenderPool`](crate::RenderPool)

use crate::fonts::FontCacheStats;
use crate::results::ResultCacheStats;
use serde::Serialize;

/// Engine process counters reported by [`EngineLifecycle`](crate::EngineLifecycle)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub running: bool,
    /// Increments on every successful launch; 0 before the first one
    pub generation: u64,
    /// Surfaces opened on the current process
    pub requests: u64,
    /// Surfaces of the current process that are still open
    pub active_surfaces: usize,
    pub launches: u64,
    /// Idle-gated retirements
    pub recycles: u64,
    /// Retirements forced by the hard cap
    pub forced_recycles: u64,
}

/// Snapshot returned by [`RenderPool::stats`](crate::RenderPool::stats)
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolStats {
    /// Slots currently held
    pub active: usize,
    /// Jobs waiting for a slot
    pub queued: usize,
    pub max_concurrent: usize,
    pub engine: EngineStats,
    pub fonts: FontCacheStats,
    pub results: Option<ResultCacheStats>,
}

impl PoolStats {
    /// Fraction of capacity in use, 0.0 to 1.0
    pub fn utilization(&self) -> f64 {
        if self.max_concurrent == 0 {
            return 0.0;
        }
        self.active as f64 / self.max_concurrent as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utilization_is_a_fraction_of_capacity() {
        let stats = PoolStats {
            active: 3,
            max_concurrent: 4,
            ..Default::default()
        };
        assert!((stats.utilization() - 0.75).abs() < f64::EPSILON);
        assert_eq!(PoolStats::default().utilization(), 0.0);
    }

    #[test]
    fn serializes_engine_counters() {
        let stats = PoolStats {
            engine: EngineStats {
                running: true,
                generation: 2,
                ..Default::default()
            },
            ..Default::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["engine"]["generation"], 2);
        assert_eq!(json["engine"]["running"], true);
        assert!(json["results"].is_null());
    }
}

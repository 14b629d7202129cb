//! Shared fixtures for the unit tests.

use alloc::sync::Arc;
use alloc::vec::Vec;

use r0rt_hal::sim::{self, SimConfig, SimPlatform};
use r0rt_hal::{CpuId, Platform};

use crate::manager::TimerManager;
use crate::timer::Timer;

/// Simulated host plus a manager on top of it
pub(crate) fn setup(config: SimConfig) -> (Arc<SimPlatform>, TimerManager) {
    let sim = Arc::new(SimPlatform::new(config));
    let platform: Arc<dyn Platform> = sim.clone();
    (sim, TimerManager::new(platform))
}

/// Records every callback invocation as `(cpu, tick)`
#[derive(Debug, Default)]
pub(crate) struct Recorder {
    fires: spin::Mutex<Vec<(CpuId, u64)>>,
}

impl Recorder {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn count(&self) -> usize {
        self.fires.lock().len()
    }

    pub(crate) fn fires(&self) -> Vec<(CpuId, u64)> {
        self.fires.lock().clone()
    }

    /// Ticks observed on `cpu`, in order
    pub(crate) fn ticks_on(&self, cpu: CpuId) -> Vec<u64> {
        self.fires
            .lock()
            .iter()
            .filter(|(c, _)| *c == cpu)
            .map(|(_, t)| *t)
            .collect()
    }

    pub(crate) fn clear(&self) {
        self.fires.lock().clear();
    }
}

/// Callback feeding a [`Recorder`]
pub(crate) fn record(_timer: &Timer<Arc<Recorder>>, rec: &Arc<Recorder>, tick: u64) {
    rec.fires.lock().push((sim::current_cpu(), tick));
}

//! # Simulated Host
//!
//! A deterministic host backend for off-target testing. Time only moves when
//! the test calls [`SimPlatform::advance`]; due native timers then fire one at
//! a time, in expiry order, on the caller's thread with the current CPU set to
//! the CPU the timer is queued on.
//!
//! ```text
//!   test thread                SimPlatform
//!   ───────────                ───────────
//!   advance(10ms) ──────────►  clock += ...
//!                              ├─ earliest due timer ──► handler (cpu = queued cpu)
//!                              ├─ next due timer     ──► handler
//!                              └─ clock = target
//!   set_cpu_offline(1) ─────►  listeners(Offline, 1)
//!                              online -= {1}
//!                              migrate timers 1 → first online
//! ```
//!
//! Cross-calls run inline on the calling thread with the current CPU switched
//! for their duration. Failure injection hooks let tests exercise the
//! rollback paths of their callers.

mod timer;

pub use timer::SimTimer;

use alloc::boxed::Box;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::cell::Cell;
use core::sync::atomic::{AtomicU64, Ordering};

use timer::SimTimerCore;

use crate::clock::{ClockSource, NS_PER_MS, NS_PER_SEC};
use crate::cpu::{CpuId, CpuSet, MAX_CPUS};
use crate::error::{HalError, HalResult};
use crate::mp::{ListenerId, MpEvent, MpListener, MpServices};
use crate::native::{
    Expiry, NativeResolution, NativeTicks, NativeTimer, NativeTimerBackend, NativeTimerHandler,
};
use crate::spinlock::{SpinLock, SpinLockProvider};

/// Upper bound on fires processed by one [`SimPlatform::advance`] call
const MAX_FIRES_PER_ADVANCE: usize = 1_000_000;

// =============================================================================
// Current CPU
// =============================================================================

std::thread_local! {
    static CURRENT_CPU: Cell<CpuId> = const { Cell::new(0) };
}

/// CPU the calling thread is simulated to run on
pub fn current_cpu() -> CpuId {
    CURRENT_CPU.with(Cell::get)
}

/// Run `f` with the calling thread simulated on `cpu`
pub fn with_cpu<R>(cpu: CpuId, f: impl FnOnce() -> R) -> R {
    let _guard = CpuGuard::enter(cpu);
    f()
}

/// Restores the previous simulated CPU on drop
pub(crate) struct CpuGuard {
    previous: CpuId,
}

impl CpuGuard {
    pub(crate) fn enter(cpu: CpuId) -> Self {
        Self {
            previous: CURRENT_CPU.with(|c| c.replace(cpu)),
        }
    }
}

impl Drop for CpuGuard {
    fn drop(&mut self) {
        CURRENT_CPU.with(|c| c.set(self.previous));
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Simulated host configuration
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Number of possible CPUs (ids `0..possible_cpus`)
    pub possible_cpus: u32,
    /// CPUs that start offline
    pub offline: CpuSet,
    /// Native timer facility
    pub resolution: NativeResolution,
    /// Free-running tick counter value at boot
    pub initial_ticks: NativeTicks,
    /// Monotonic clock value at boot
    pub start_ns: u64,
    /// Whether granularity requests are honored
    pub granularity_requests: bool,
}

impl SimConfig {
    /// `possible_cpus` online CPUs with a 1ns high-resolution timer
    pub fn new(possible_cpus: u32) -> Self {
        Self {
            possible_cpus: possible_cpus.clamp(1, MAX_CPUS as u32),
            offline: CpuSet::empty(),
            resolution: NativeResolution::HighRes { resolution_ns: 1 },
            initial_ticks: 0,
            start_ns: NS_PER_SEC,
            granularity_requests: false,
        }
    }

    /// Start with `cpu` offline
    pub fn with_offline(mut self, cpu: CpuId) -> Self {
        self.offline.add(cpu);
        self
    }

    /// Use a tick-based timer facility running at `hz`
    pub fn with_hz(mut self, hz: u32) -> Self {
        self.resolution = NativeResolution::from_hz(hz);
        self
    }

    /// Set the native timer facility
    pub fn with_resolution(mut self, resolution: NativeResolution) -> Self {
        self.resolution = resolution;
        self
    }

    /// Set the boot value of the free-running tick counter
    pub fn with_initial_ticks(mut self, ticks: NativeTicks) -> Self {
        self.initial_ticks = ticks;
        self
    }

    /// Honor granularity requests
    pub fn with_granularity_requests(mut self, enabled: bool) -> Self {
        self.granularity_requests = enabled;
        self
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self::new(4)
    }
}

// =============================================================================
// Simulated Platform
// =============================================================================

#[derive(Debug, Default)]
struct Faults {
    fail_spinlock: bool,
    fail_listener: bool,
    offline_during_broadcast: Option<CpuId>,
    bounce_around_broadcast: Option<CpuId>,
}

/// Simulated host kernel
pub struct SimPlatform {
    config: SimConfig,
    now_ns: AtomicU64,
    online: spin::Mutex<CpuSet>,
    listeners: spin::Mutex<Vec<(ListenerId, Arc<dyn MpListener>)>>,
    next_listener: AtomicU64,
    timers: spin::Mutex<Vec<Weak<SimTimerCore>>>,
    faults: spin::Mutex<Faults>,
    grants: spin::Mutex<Vec<u32>>,
    fired: AtomicU64,
}

impl SimPlatform {
    /// Create a simulated host
    pub fn new(config: SimConfig) -> Self {
        let online: CpuSet = (0..config.possible_cpus)
            .filter(|cpu| !config.offline.contains(*cpu))
            .collect();

        Self {
            now_ns: AtomicU64::new(config.start_ns),
            online: spin::Mutex::new(online),
            listeners: spin::Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            timers: spin::Mutex::new(Vec::new()),
            faults: spin::Mutex::new(Faults::default()),
            grants: spin::Mutex::new(Vec::new()),
            fired: AtomicU64::new(0),
            config,
        }
    }

    /// Configuration this host was built from
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    fn tick_ns(&self) -> u64 {
        match self.config.resolution {
            NativeResolution::Ticks { tick_ns } if tick_ns > 0 => tick_ns as u64,
            _ => NS_PER_MS,
        }
    }

    fn elapsed_ticks(&self, ns: u64) -> u64 {
        ns.saturating_sub(self.config.start_ns) / self.tick_ns()
    }

    fn ticks_at(&self, ns: u64) -> NativeTicks {
        self.config
            .initial_ticks
            .wrapping_add(self.elapsed_ticks(ns) as NativeTicks)
    }

    fn check_cpu(&self, cpu: CpuId) -> HalResult<()> {
        if cpu > self.max_cpu_id() {
            return Err(HalError::CpuNotFound);
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Time
    // -------------------------------------------------------------------------

    /// Move the clock forward by `delta_ns`, firing every timer that comes
    /// due on the way
    ///
    /// Returns the number of handler invocations.
    pub fn advance(&self, delta_ns: u64) -> usize {
        let target = self.now_ns.load(Ordering::Acquire).saturating_add(delta_ns);
        let mut fired = 0;

        for _ in 0..MAX_FIRES_PER_ADVANCE {
            let Some((due, core, seq)) = self.next_due(target) else {
                break;
            };
            self.now_ns.fetch_max(due, Ordering::AcqRel);
            if core.fire(seq) {
                fired += 1;
                self.fired.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.now_ns.fetch_max(target, Ordering::AcqRel);
        fired
    }

    /// Fire every timer that is already due
    pub fn run_due(&self) -> usize {
        self.advance(0)
    }

    fn due_ns(&self, expiry: Expiry, now: u64) -> u64 {
        match expiry {
            Expiry::AtNs(at) => at.max(now),
            Expiry::AtTick(at) => {
                let delta = at.wrapping_sub(self.ticks_at(now)) as i32;
                if delta <= 0 {
                    now
                } else {
                    (self.elapsed_ticks(now) + delta as u64) * self.tick_ns() + self.config.start_ns
                }
            },
        }
    }

    fn next_due(&self, target: u64) -> Option<(u64, Arc<SimTimerCore>, u64)> {
        let now = self.now_ns.load(Ordering::Acquire);
        let mut timers = self.timers.lock();
        timers.retain(|t| t.strong_count() > 0);

        let mut best: Option<(u64, Arc<SimTimerCore>, u64)> = None;
        for core in timers.iter().filter_map(Weak::upgrade) {
            let Some(armed) = core.armed() else {
                continue;
            };
            let due = self.due_ns(armed.expiry, now);
            if due > target {
                continue;
            }
            let better = match &best {
                Some((best_due, _, best_seq)) => (due, armed.seq) < (*best_due, *best_seq),
                None => true,
            };
            if better {
                best = Some((due, core, armed.seq));
            }
        }
        best
    }

    // -------------------------------------------------------------------------
    // Hotplug
    // -------------------------------------------------------------------------

    fn notify(&self, event: MpEvent, cpu: CpuId) {
        let listeners: Vec<_> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener.on_mp_event(event, cpu);
        }
    }

    /// Bring `cpu` online and notify listeners
    pub fn set_cpu_online(&self, cpu: CpuId) -> HalResult<()> {
        self.check_cpu(cpu)?;
        if !self.online.lock().add(cpu) {
            return Ok(());
        }
        log::debug!("sim: cpu {} online", cpu);
        self.notify(MpEvent::Online, cpu);
        Ok(())
    }

    /// Notify listeners, take `cpu` offline and migrate its pending timers
    pub fn set_cpu_offline(&self, cpu: CpuId) -> HalResult<()> {
        self.check_cpu(cpu)?;
        if !self.is_cpu_online(cpu) {
            return Ok(());
        }
        log::debug!("sim: cpu {} offline", cpu);
        self.notify(MpEvent::Offline, cpu);

        let survivor = {
            let mut online = self.online.lock();
            online.remove(cpu);
            online.first()
        };
        if let Some(to) = survivor {
            self.migrate_timers(cpu, to);
        }
        Ok(())
    }

    /// Move every timer queued on `from` to `to`, pinned or not
    ///
    /// Returns the number of migrated timers.
    pub fn migrate_timers(&self, from: CpuId, to: CpuId) -> usize {
        let cores: Vec<_> = self.timers.lock().iter().filter_map(Weak::upgrade).collect();
        cores.iter().filter(|core| core.migrate(from, to)).count()
    }

    // -------------------------------------------------------------------------
    // Failure injection
    // -------------------------------------------------------------------------

    /// Make the next spinlock creation fail with `NoMemory`
    pub fn fail_next_spinlock_create(&self) {
        self.faults.lock().fail_spinlock = true;
    }

    /// Make the next listener registration fail with `NoMemory`
    pub fn fail_next_listener_registration(&self) {
        self.faults.lock().fail_listener = true;
    }

    /// Take `cpu` offline right before the next broadcast dispatches
    pub fn offline_during_next_broadcast(&self, cpu: CpuId) {
        self.faults.lock().offline_during_broadcast = Some(cpu);
    }

    /// Take `cpu` offline before the next broadcast dispatches and bring it
    /// back online once the broadcast completed
    pub fn bounce_around_next_broadcast(&self, cpu: CpuId) {
        self.faults.lock().bounce_around_broadcast = Some(cpu);
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    /// Registered hotplug listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Live native timers that are armed
    pub fn armed_timer_count(&self) -> usize {
        self.timers
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|core| core.armed().is_some())
            .count()
    }

    /// `(cpu, pinned)` of every armed native timer, ordered by CPU
    pub fn armed_timers(&self) -> Vec<(CpuId, bool)> {
        let mut armed: Vec<_> = self
            .timers
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .filter_map(|core| core.armed())
            .map(|armed| (armed.cpu, armed.pinned))
            .collect();
        armed.sort_unstable();
        armed
    }

    /// Live native timers
    pub fn native_timer_count(&self) -> usize {
        self.timers
            .lock()
            .iter()
            .filter(|t| t.strong_count() > 0)
            .count()
    }

    /// Total handler invocations so far
    pub fn fired_count(&self) -> u64 {
        self.fired.load(Ordering::Relaxed)
    }

    /// Outstanding granularity grants
    pub fn granularity_grants(&self) -> usize {
        self.grants.lock().len()
    }
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl core::fmt::Debug for SimPlatform {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SimPlatform")
            .field("now_ns", &self.now_ns.load(Ordering::Relaxed))
            .field("online", &*self.online.lock())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

impl ClockSource for SimPlatform {
    fn now_ns(&self) -> u64 {
        self.now_ns.load(Ordering::Acquire)
    }

    fn system_granularity_ns(&self) -> u32 {
        self.config.resolution.granularity_ns()
    }
}

impl MpServices for SimPlatform {
    fn current_cpu(&self) -> CpuId {
        current_cpu()
    }

    fn max_cpu_id(&self) -> CpuId {
        self.config.possible_cpus - 1
    }

    fn is_cpu_online(&self, cpu: CpuId) -> bool {
        self.online.lock().contains(cpu)
    }

    fn online_set(&self) -> CpuSet {
        *self.online.lock()
    }

    fn run_on_all(&self, work: &(dyn Fn(CpuId) + Sync)) -> HalResult<()> {
        let (offline, bounce) = {
            let mut faults = self.faults.lock();
            (
                faults.offline_during_broadcast.take(),
                faults.bounce_around_broadcast.take(),
            )
        };
        for cpu in offline.into_iter().chain(bounce) {
            self.set_cpu_offline(cpu)?;
        }

        for cpu in self.online_set().iter() {
            with_cpu(cpu, || work(cpu));
        }

        if let Some(cpu) = bounce {
            self.set_cpu_online(cpu)?;
        }
        Ok(())
    }

    fn run_on_cpu(&self, cpu: CpuId, work: &(dyn Fn(CpuId) + Sync)) -> HalResult<()> {
        self.check_cpu(cpu)?;
        if !self.is_cpu_online(cpu) {
            return Err(HalError::CpuOffline);
        }
        with_cpu(cpu, || work(cpu));
        Ok(())
    }

    fn register_listener(&self, listener: Arc<dyn MpListener>) -> HalResult<ListenerId> {
        if core::mem::take(&mut self.faults.lock().fail_listener) {
            return Err(HalError::NoMemory);
        }
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, listener));
        Ok(id)
    }

    fn deregister_listener(&self, id: ListenerId) -> HalResult<()> {
        let mut listeners = self.listeners.lock();
        let pos = listeners
            .iter()
            .position(|(lid, _)| *lid == id)
            .ok_or(HalError::NotRegistered)?;
        listeners.remove(pos);
        Ok(())
    }
}

impl NativeTimerBackend for SimPlatform {
    fn native_resolution(&self) -> NativeResolution {
        self.config.resolution
    }

    fn native_ticks(&self) -> NativeTicks {
        self.ticks_at(self.now_ns())
    }

    fn create_native_timer(&self, handler: Arc<dyn NativeTimerHandler>) -> Box<dyn NativeTimer> {
        let core = Arc::new(SimTimerCore::new(handler));
        self.timers.lock().push(Arc::downgrade(&core));
        Box::new(SimTimer::new(core))
    }

    fn request_granularity(&self, request_ns: u32) -> HalResult<u32> {
        if !self.config.granularity_requests {
            return Err(HalError::NotSupported);
        }
        if request_ns == 0 {
            return Err(HalError::InvalidArgument);
        }
        let granted = request_ns.max(self.config.resolution.granularity_ns());
        self.grants.lock().push(granted);
        Ok(granted)
    }

    fn release_granularity(&self, granted_ns: u32) -> HalResult<()> {
        if !self.config.granularity_requests {
            return Err(HalError::NotSupported);
        }
        let mut grants = self.grants.lock();
        let pos = grants
            .iter()
            .position(|g| *g == granted_ns)
            .ok_or(HalError::WrongOrder)?;
        grants.remove(pos);
        Ok(())
    }
}

impl SpinLockProvider for SimPlatform {
    fn create_spinlock(&self) -> HalResult<SpinLock> {
        if core::mem::take(&mut self.faults.lock().fail_spinlock) {
            return Err(HalError::NoMemory);
        }
        Ok(SpinLock::new())
    }
}

//! Engine process lifecycle: lazy launch, idle-gated recycling, leases.
//!
//! At most one engine process is live at a time. It is replaced once it has
//! served [`RecyclePolicy::after_requests`] surfaces, but only at a moment when
//! none of its surfaces is open, so in-flight jobs always finish on the
//! process they started on. The optional hard cap overrides that guarantee.

use crate::engine::{EngineLauncher, EngineProcess, Surface, SurfaceCloser};
use crate::stats::EngineStats;
use crate::{Error, LaunchConfig, RecyclePolicy, Result};
use log::{debug, info, warn};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Observable lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No process; the next request launches one
    Unstarted,
    Running,
    /// Threshold reached; retires as soon as no surface is open
    Retiring,
}

struct Current {
    process: Arc<dyn EngineProcess>,
    generation: u64,
    requests: u64,
    active: Arc<AtomicUsize>,
}

#[derive(Default)]
struct Counters {
    launches: AtomicU64,
    recycles: AtomicU64,
    forced_recycles: AtomicU64,
}

/// Owns the shared engine process
pub struct EngineLifecycle {
    launcher: Arc<dyn EngineLauncher>,
    launch: LaunchConfig,
    recycle: RecyclePolicy,
    current: Mutex<Option<Current>>,
    next_generation: AtomicU64,
    counters: Counters,
}

impl EngineLifecycle {
    pub fn new(launcher: Arc<dyn EngineLauncher>, launch: LaunchConfig, recycle: RecyclePolicy) -> Self {
        Self {
            launcher,
            launch,
            recycle,
            current: Mutex::new(None),
            next_generation: AtomicU64::new(1),
            counters: Counters::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Current>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the live process, recycling or launching first when needed.
    ///
    /// Blocks while a launch is in progress.
    pub fn get_or_launch(&self) -> Result<Arc<dyn EngineProcess>> {
        let mut current = self.lock();
        self.ensure_process(&mut current)?;
        match current.as_ref() {
            Some(c) => Ok(c.process.clone()),
            None => Err(Error::Launch("engine process unavailable".into())),
        }
    }

    fn ensure_process(&self, current: &mut Option<Current>) -> Result<()> {
        self.recycle_check(current);

        if let Some(c) = current.as_ref() {
            if c.process.is_connected() {
                return Ok(());
            }
            warn!("engine process {} disconnected; relaunching", c.generation);
            retire(current);
        }

        let process = self.launcher.launch(&self.launch).map_err(|e| match e {
            Error::Launch(msg) => Error::Launch(msg),
            other => Error::Launch(other.to_string()),
        })?;
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        self.counters.launches.fetch_add(1, Ordering::Relaxed);
        info!("engine process {} launched", generation);
        *current = Some(Current {
            process,
            generation,
            requests: 0,
            active: Arc::new(AtomicUsize::new(0)),
        });
        Ok(())
    }

    fn recycle_check(&self, current: &mut Option<Current>) {
        let Some(c) = current.as_ref() else { return };
        let active = c.active.load(Ordering::SeqCst);

        if let Some(cap) = self.recycle.hard_cap {
            if c.requests >= cap {
                warn!(
                    "engine process {} hit hard cap of {} requests; retiring with {} surfaces open",
                    c.generation, cap, active
                );
                self.counters.forced_recycles.fetch_add(1, Ordering::Relaxed);
                retire(current);
                return;
            }
        }

        if c.requests >= self.recycle.after_requests {
            if active == 0 {
                info!(
                    "recycling engine process {} after {} requests",
                    c.generation, c.requests
                );
                self.counters.recycles.fetch_add(1, Ordering::Relaxed);
                retire(current);
            } else {
                debug!(
                    "engine process {} due for recycling; {} surfaces still open",
                    c.generation, active
                );
            }
        }
    }

    /// Open an exclusive surface on the live process.
    ///
    /// The request and active-surface counters move in the same critical
    /// section as the recycle decision; the tab itself is opened outside it.
    pub fn open_surface(&self) -> Result<SurfaceLease> {
        let (process, generation, guard) = {
            let mut current = self.lock();
            self.ensure_process(&mut current)?;
            let c = current
                .as_mut()
                .ok_or_else(|| Error::Launch("engine process unavailable".into()))?;
            c.requests += 1;
            (c.process.clone(), c.generation, ActiveGuard::new(c.active.clone()))
        };

        let surface = process.new_surface()?;
        debug!("surface opened on engine process {}", generation);
        let closer = LeaseCloser(Arc::new(LeaseClose {
            closer: surface.closer(),
            guard: Mutex::new(Some(guard)),
            generation,
        }));
        Ok(SurfaceLease {
            surface,
            process,
            generation,
            closer,
        })
    }

    pub fn state(&self) -> EngineState {
        match self.lock().as_ref() {
            None => EngineState::Unstarted,
            Some(c) if c.requests >= self.recycle.after_requests => EngineState::Retiring,
            Some(_) => EngineState::Running,
        }
    }

    pub fn stats(&self) -> EngineStats {
        let current = self.lock();
        let (running, generation, requests, active_surfaces) = match current.as_ref() {
            Some(c) => (true, c.generation, c.requests, c.active.load(Ordering::SeqCst)),
            None => (false, 0, 0, 0),
        };
        EngineStats {
            running,
            generation,
            requests,
            active_surfaces,
            launches: self.counters.launches.load(Ordering::Relaxed),
            recycles: self.counters.recycles.load(Ordering::Relaxed),
            forced_recycles: self.counters.forced_recycles.load(Ordering::Relaxed),
        }
    }

    /// Close the current process. The next request launches a new one.
    pub fn shutdown(&self) -> Result<()> {
        let taken = self.lock().take();
        match taken {
            Some(c) => {
                info!("shutting down engine process {}", c.generation);
                c.process.close()
            }
            None => Ok(()),
        }
    }
}

fn retire(current: &mut Option<Current>) {
    if let Some(c) = current.take() {
        if let Err(e) = c.process.close() {
            warn!("failed to close engine process {}: {}", c.generation, e);
        }
    }
}

struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn new(active: Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self(active)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct LeaseClose {
    closer: Arc<dyn SurfaceCloser>,
    /// Taken by whichever side closes first; held while the close runs
    guard: Mutex<Option<ActiveGuard>>,
    generation: u64,
}

/// Closes a leased surface from outside the thread that uses it.
///
/// The surface is closed at most once across the lease and all its closers.
/// A call that races an in-progress close returns after that close finishes.
#[derive(Clone)]
pub struct LeaseCloser(Arc<LeaseClose>);

impl LeaseCloser {
    /// Close the surface and release its active-surface count. Close failures are logged.
    pub fn close(&self) {
        let mut guard = self.0.guard.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(active) = guard.take() {
            if let Err(e) = self.0.closer.close() {
                warn!("failed to close surface on engine process {}: {}", self.0.generation, e);
            }
            drop(active);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.0
            .guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl fmt::Debug for LeaseCloser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseCloser")
            .field("generation", &self.0.generation)
            .finish()
    }
}

/// Exclusive ownership of one surface.
///
/// Dropping the lease, or calling [`LeaseCloser::close`] on one of its
/// closers, closes the surface and then releases its active-surface count.
pub struct SurfaceLease {
    surface: Box<dyn Surface>,
    process: Arc<dyn EngineProcess>,
    generation: u64,
    closer: LeaseCloser,
}

impl SurfaceLease {
    pub fn surface(&mut self) -> &mut dyn Surface {
        self.surface.as_mut()
    }

    /// Generation of the process the surface belongs to
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn process(&self) -> &Arc<dyn EngineProcess> {
        &self.process
    }

    /// Handle that closes this surface while the lease is in use elsewhere
    pub fn closer(&self) -> LeaseCloser {
        self.closer.clone()
    }
}

impl fmt::Debug for SurfaceLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceLease")
            .field("generation", &self.generation)
            .finish()
    }
}

impl Drop for SurfaceLease {
    fn drop(&mut self) {
        self.closer.close();
    }
}

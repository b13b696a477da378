//! Deterministic in-process engine.
//!
//! Produces small but well-formed PDF documents without a browser, records
//! what each surface was asked to do, and can inject latency or failures at
//! any stage. Used by the test-suite, the benches, and `pagepress --engine mock`.

use super::{EngineLauncher, EngineProcess, Surface, SurfaceCloser};
use crate::hydration::DomOp;
use crate::{Error, LaunchConfig, PdfOptions, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Where an injected failure fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    OpenSurface,
    Load,
    InjectStyle,
    FontsReady,
    Hydrate,
    Print,
    CloseSurface,
}

/// Knobs applied to subsequent launches and surface calls
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    /// Number of upcoming launches that fail
    pub launch_failures: u32,
    pub fail_at: Option<MockFailure>,
    pub load_delay_ms: u64,
    pub print_delay_ms: u64,
}

/// Everything the mock engine was asked to do
#[derive(Debug, Clone, Default)]
pub struct MockJournal {
    pub loaded_html: Vec<String>,
    pub styles: Vec<String>,
    pub dom_ops: Vec<DomOp>,
    pub font_waits: usize,
    pub surfaces_opened: usize,
    pub surfaces_closed: usize,
    pub prints: usize,
}

struct MockShared {
    behavior: Mutex<MockBehavior>,
    journal: Mutex<MockJournal>,
    current: Mutex<Option<Arc<MockProcess>>>,
    launches: AtomicU64,
    closes: AtomicU64,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockShared {
    fn behavior(&self) -> MockBehavior {
        lock(&self.behavior).clone()
    }

    fn fail(&self, at: MockFailure) -> Result<()> {
        if lock(&self.behavior).fail_at == Some(at) {
            return Err(Error::Other(format!("injected {:?} failure", at)));
        }
        Ok(())
    }
}

/// Launcher for [`MockProcess`] engines. Clones share counters and journal.
#[derive(Clone)]
pub struct MockLauncher {
    shared: Arc<MockShared>,
}

impl Default for MockLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLauncher {
    pub fn new() -> Self {
        Self::with_behavior(MockBehavior::default())
    }

    pub fn with_behavior(behavior: MockBehavior) -> Self {
        Self {
            shared: Arc::new(MockShared {
                behavior: Mutex::new(behavior),
                journal: Mutex::new(MockJournal::default()),
                current: Mutex::new(None),
                launches: AtomicU64::new(0),
                closes: AtomicU64::new(0),
            }),
        }
    }

    pub fn set_behavior(&self, behavior: MockBehavior) {
        *lock(&self.shared.behavior) = behavior;
    }

    /// Successful launches so far
    pub fn launch_count(&self) -> u64 {
        self.shared.launches.load(Ordering::SeqCst)
    }

    /// Processes closed so far
    pub fn close_count(&self) -> u64 {
        self.shared.closes.load(Ordering::SeqCst)
    }

    pub fn journal(&self) -> MockJournal {
        lock(&self.shared.journal).clone()
    }

    /// Simulate the current process crashing
    pub fn disconnect_current(&self) {
        if let Some(p) = lock(&self.shared.current).as_ref() {
            p.connected.store(false, Ordering::SeqCst);
        }
    }
}

impl EngineLauncher for MockLauncher {
    fn launch(&self, _config: &LaunchConfig) -> Result<Arc<dyn EngineProcess>> {
        {
            let mut behavior = lock(&self.shared.behavior);
            if behavior.launch_failures > 0 {
                behavior.launch_failures -= 1;
                return Err(Error::Launch("injected launch failure".into()));
            }
        }
        let id = self.shared.launches.fetch_add(1, Ordering::SeqCst) + 1;
        let process = Arc::new(MockProcess {
            id,
            connected: AtomicBool::new(true),
            shared: self.shared.clone(),
        });
        *lock(&self.shared.current) = Some(process.clone());
        Ok(process)
    }
}

/// A fake engine process; `id` counts launches from 1
pub struct MockProcess {
    id: u64,
    connected: AtomicBool,
    shared: Arc<MockShared>,
}

impl MockProcess {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl EngineProcess for MockProcess {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn new_surface(&self) -> Result<Box<dyn Surface>> {
        if !self.is_connected() {
            return Err(Error::Other(format!("mock process {} is closed", self.id)));
        }
        self.shared.fail(MockFailure::OpenSurface)?;
        lock(&self.shared.journal).surfaces_opened += 1;
        Ok(Box::new(MockSurface {
            process_id: self.id,
            shared: self.shared.clone(),
            html: None,
            closed: Arc::new(AtomicBool::new(false)),
        }))
    }

    fn close(&self) -> Result<()> {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.shared.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// A fake tab bound to one [`MockProcess`]
pub struct MockSurface {
    process_id: u64,
    shared: Arc<MockShared>,
    html: Option<String>,
    closed: Arc<AtomicBool>,
}

impl MockSurface {
    /// Sleep like a slow engine call, then fail if the tab was closed meanwhile
    fn stall(&self, delay_ms: u64) -> Result<()> {
        if delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(delay_ms));
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Other(format!("mock surface on process {} is closed", self.process_id)));
        }
        Ok(())
    }
}

struct MockCloser {
    shared: Arc<MockShared>,
    closed: Arc<AtomicBool>,
}

impl SurfaceCloser for MockCloser {
    fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            lock(&self.shared.journal).surfaces_closed += 1;
        }
        self.shared.fail(MockFailure::CloseSurface)
    }
}

impl Surface for MockSurface {
    fn load_html(&mut self, html: &str) -> Result<()> {
        self.stall(self.shared.behavior().load_delay_ms)?;
        self.shared.fail(MockFailure::Load)?;
        self.html = Some(html.to_string());
        lock(&self.shared.journal).loaded_html.push(html.to_string());
        Ok(())
    }

    fn inject_style(&mut self, css: &str) -> Result<()> {
        self.shared.fail(MockFailure::InjectStyle)?;
        lock(&self.shared.journal).styles.push(css.to_string());
        Ok(())
    }

    fn wait_for_fonts(&mut self) -> Result<()> {
        self.shared.fail(MockFailure::FontsReady)?;
        lock(&self.shared.journal).font_waits += 1;
        Ok(())
    }

    fn apply_dom_ops(&mut self, ops: &[DomOp]) -> Result<usize> {
        self.shared.fail(MockFailure::Hydrate)?;
        lock(&self.shared.journal).dom_ops.extend_from_slice(ops);
        Ok(ops.len())
    }

    fn print_pdf(&mut self, options: &PdfOptions) -> Result<Vec<u8>> {
        self.stall(self.shared.behavior().print_delay_ms)?;
        self.shared.fail(MockFailure::Print)?;
        let html = self
            .html
            .as_deref()
            .ok_or_else(|| Error::Other("print called before load".into()))?;
        lock(&self.shared.journal).prints += 1;
        Ok(mock_pdf(self.process_id, html, options))
    }

    fn closer(&self) -> Arc<dyn SurfaceCloser> {
        Arc::new(MockCloser {
            shared: self.shared.clone(),
            closed: self.closed.clone(),
        })
    }
}

/// A minimal single-page PDF naming the process that produced it.
pub fn mock_pdf(process_id: u64, html: &str, options: &PdfOptions) -> Vec<u8> {
    let width_pt = (options.paper_width_in * 72.0).round() as u32;
    let height_pt = (options.paper_height_in * 72.0).round() as u32;
    let mut out = String::from("%PDF-1.4\n");
    out.push_str("1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    out.push_str("2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    out.push_str(&format!(
        "3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 {} {}] >> endobj\n",
        width_pt, height_pt
    ));
    out.push_str(&format!(
        "4 0 obj << /Producer (pagepress mock engine, process {}) /Subject ({} bytes of html) >> endobj\n",
        process_id,
        html.len()
    ));
    out.push_str("trailer << /Root 1 0 R /Info 4 0 R >>\n%%EOF\n");
    out.into_bytes()
}

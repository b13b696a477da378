//! The render pipeline: admission, surface lease, load, fonts, hydration, print.
//!
//! Engine and font I/O is synchronous and runs on tokio's blocking pool. The
//! async side owns the admission permit and the per-job deadline. When the
//! deadline fires it closes the job's surface from outside the worker, then
//! gives the slot back, so an open surface always holds a slot.

use crate::engine::EngineLauncher;
use crate::fonts::{FontCache, FontFetcher, FontInjector, HttpFontFetcher};
use crate::gate::{AdmissionGate, GatePermit};
use crate::hydration::{HydrationRegistry, HydrationRequest, HydrationStrategy};
use crate::lifecycle::{EngineLifecycle, LeaseCloser, SurfaceLease};
use crate::results::ResultCache;
use crate::stats::PoolStats;
use crate::{Error, FontPolicy, OutputMode, PoolConfig, RenderJob, Result, Stage};
use futures::{Stream, StreamExt};
use log::{debug, info, warn};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Sleep};

/// Chunks buffered between a streaming producer and its consumer
const STREAM_BUFFER: usize = 4;

/// Result of [`RenderPool::render`]
pub enum RenderOutput {
    Buffered(Vec<u8>),
    Streamed(PdfStream),
}

impl RenderOutput {
    /// Drain into memory regardless of mode
    pub async fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            RenderOutput::Buffered(bytes) => Ok(bytes),
            RenderOutput::Streamed(stream) => stream.collect_bytes().await,
        }
    }
}

impl fmt::Debug for RenderOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderOutput::Buffered(bytes) => write!(f, "Buffered({} bytes)", bytes.len()),
            RenderOutput::Streamed(_) => f.write_str("Streamed(..)"),
        }
    }
}

/// Outcome of [`RenderPool::pre_warm`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PreWarmReport {
    pub engine_ready: bool,
    pub fonts_warmed: Vec<String>,
    pub fonts_failed: Vec<String>,
}

/// Last stage a job entered and the surface it holds; read when its deadline fires
#[derive(Clone)]
struct Progress(Arc<ProgressInner>);

struct ProgressInner {
    stage: AtomicU8,
    lease: Mutex<LeaseSlot>,
}

#[derive(Default)]
struct LeaseSlot {
    closer: Option<LeaseCloser>,
    abandoned: bool,
}

const STAGES: [Stage; 8] = [
    Stage::Admission,
    Stage::Launch,
    Stage::OpenSurface,
    Stage::Load,
    Stage::Fonts,
    Stage::Hydrate,
    Stage::Print,
    Stage::Stream,
];

impl Progress {
    fn new(stage: Stage) -> Self {
        Self(Arc::new(ProgressInner {
            stage: AtomicU8::new(stage as u8),
            lease: Mutex::new(LeaseSlot::default()),
        }))
    }

    fn set(&self, stage: Stage) {
        self.0.stage.store(stage as u8, Ordering::Release);
    }

    fn get(&self) -> Stage {
        STAGES
            .get(self.0.stage.load(Ordering::Acquire) as usize)
            .copied()
            .unwrap_or(Stage::Admission)
    }

    fn slot(&self) -> MutexGuard<'_, LeaseSlot> {
        self.0.lease.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the job's surface; false once the job has been abandoned
    fn register(&self, lease: &SurfaceLease) -> bool {
        let mut slot = self.slot();
        if slot.abandoned {
            return false;
        }
        slot.closer = Some(lease.closer());
        true
    }

    /// Mark the job abandoned and hand back its surface, if one is open
    fn abandon(&self) -> Option<LeaseCloser> {
        let mut slot = self.slot();
        slot.abandoned = true;
        slot.closer.take()
    }

    /// Abandon the job and close its surface off the async runtime
    fn close_abandoned(&self) -> JoinHandle<()> {
        let closer = self.abandon();
        tokio::task::spawn_blocking(move || {
            if let Some(closer) = closer {
                closer.close();
            }
        })
    }
}

struct PoolInner {
    config: PoolConfig,
    gate: AdmissionGate,
    lifecycle: EngineLifecycle,
    injector: FontInjector,
    hydration: HydrationRegistry,
    results: Option<ResultCache>,
}

/// Builder for [`RenderPool`]
pub struct RenderPoolBuilder {
    config: PoolConfig,
    launcher: Option<Arc<dyn EngineLauncher>>,
    fetcher: Option<Arc<dyn FontFetcher>>,
    hydration: HydrationRegistry,
}

impl Default for RenderPoolBuilder {
    fn default() -> Self {
        Self {
            config: PoolConfig::default(),
            launcher: None,
            fetcher: None,
            hydration: HydrationRegistry::with_builtins(),
        }
    }
}

impl RenderPoolBuilder {
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Engine backend. Defaults to headless Chrome when the `cdp` feature is on.
    pub fn launcher<L: EngineLauncher + 'static>(mut self, launcher: L) -> Self {
        self.launcher = Some(Arc::new(launcher));
        self
    }

    /// Font transport. Defaults to [`HttpFontFetcher`].
    pub fn font_fetcher(mut self, fetcher: Arc<dyn FontFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Register a hydration strategy next to the built-in ones
    pub fn strategy<S: HydrationStrategy + 'static>(mut self, strategy: S) -> Self {
        self.hydration.register(strategy);
        self
    }

    /// Replace the whole strategy set
    pub fn hydration(mut self, registry: HydrationRegistry) -> Self {
        self.hydration = registry;
        self
    }

    pub fn build(self) -> Result<RenderPool> {
        self.config.validate()?;
        let launcher = match self.launcher {
            Some(l) => l,
            None => default_launcher()?,
        };
        let fetcher = self
            .fetcher
            .unwrap_or_else(|| Arc::new(HttpFontFetcher::new(&self.config.fonts)));

        let config = self.config;
        let cache = Arc::new(FontCache::new(fetcher, config.fonts.clone()));
        let inner = PoolInner {
            gate: AdmissionGate::new(
                config.max_concurrent,
                Duration::from_millis(config.queue_timeout_ms),
            ),
            lifecycle: EngineLifecycle::new(launcher, config.launch.clone(), config.recycle),
            injector: FontInjector::new(cache),
            hydration: self.hydration,
            results: config.result_cache.map(ResultCache::new),
            config,
        };
        debug!(
            "render pool ready: {} slots, strategies {:?}",
            inner.config.max_concurrent,
            inner.hydration.names()
        );
        Ok(RenderPool {
            inner: Arc::new(inner),
        })
    }
}

#[cfg(feature = "cdp")]
fn default_launcher() -> Result<Arc<dyn EngineLauncher>> {
    Ok(Arc::new(crate::engine::cdp::ChromeLauncher::new()))
}

#[cfg(not(feature = "cdp"))]
fn default_launcher() -> Result<Arc<dyn EngineLauncher>> {
    Err(Error::Config(
        "no engine launcher configured; enable the `cdp` feature or supply one".into(),
    ))
}

/// Shared, concurrency-bounded HTML-to-PDF renderer.
///
/// Cloning is cheap; clones share the gate, the engine process and the caches.
#[derive(Clone)]
pub struct RenderPool {
    inner: Arc<PoolInner>,
}

impl RenderPool {
    pub fn builder() -> RenderPoolBuilder {
        RenderPoolBuilder::default()
    }

    /// Render a job in the mode it asks for
    pub async fn render(&self, job: RenderJob) -> Result<RenderOutput> {
        match job.output {
            OutputMode::Buffered => self.render_buffered(job).await.map(RenderOutput::Buffered),
            OutputMode::Streamed => self.render_streamed(job).await.map(RenderOutput::Streamed),
        }
    }

    /// Render into memory
    pub async fn render_pdf(
        &self,
        html: impl Into<String>,
        hydration: Option<HydrationRequest>,
        font_family: Option<&str>,
    ) -> Result<Vec<u8>> {
        self.render_buffered(job_from(html, hydration, font_family)).await
    }

    /// Render as a chunk stream. The slot stays held until the stream ends or is dropped.
    pub async fn render_stream(
        &self,
        html: impl Into<String>,
        hydration: Option<HydrationRequest>,
        font_family: Option<&str>,
    ) -> Result<PdfStream> {
        self.render_streamed(job_from(html, hydration, font_family)).await
    }

    async fn render_buffered(&self, job: RenderJob) -> Result<Vec<u8>> {
        let inner = &self.inner;
        let cache_key = inner
            .results
            .as_ref()
            .map(|_| ResultCache::key_for(&job, &inner.config.pdf));
        if let (Some(cache), Some(key)) = (&inner.results, &cache_key) {
            if let Some(hit) = cache.get(key) {
                return Ok(hit.as_ref().clone());
            }
        }

        let permit = inner.gate.acquire().await?;
        let started = Instant::now();
        let progress = Progress::new(Stage::OpenSurface);

        let worker = {
            let inner = inner.clone();
            let progress = progress.clone();
            tokio::task::spawn_blocking(move || inner.render_blocking(&job, &progress))
        };
        let outcome = tokio::time::timeout(inner.job_timeout(), worker).await;
        let active = inner.gate.active_count();

        let pdf = match outcome {
            Ok(Ok(result)) => result?,
            Ok(Err(join)) => {
                return Err(Error::Render {
                    stage: progress.get(),
                    reason: format!("render task failed: {}", join),
                    active,
                })
            }
            Err(_) => {
                warn!(
                    "render timed out during {} after {}ms",
                    progress.get(),
                    inner.config.job_timeout_ms
                );
                inner.close_overrun(&progress).await;
                drop(permit);
                return Err(inner.timeout_error(&progress, active));
            }
        };
        drop(permit);

        debug!("rendered {} bytes in {:?}", pdf.len(), started.elapsed());
        if let (Some(cache), Some(key)) = (&inner.results, cache_key) {
            cache.insert(key, pdf.clone());
        }
        Ok(pdf)
    }

    async fn render_streamed(&self, job: RenderJob) -> Result<PdfStream> {
        let inner = &self.inner;
        let permit = inner.gate.acquire().await?;
        let deadline = Instant::now() + inner.job_timeout();
        let progress = Progress::new(Stage::OpenSurface);
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let (ready_tx, ready_rx) = oneshot::channel();

        {
            let inner = inner.clone();
            let progress = progress.clone();
            tokio::task::spawn_blocking(move || inner.produce_stream(&job, &progress, ready_tx, tx));
        }

        match tokio::time::timeout_at(deadline, ready_rx).await {
            Ok(Ok(Ok(()))) => Ok(PdfStream {
                rx,
                permit: Some(permit),
                deadline: Box::pin(tokio::time::sleep_until(deadline)),
                progress,
                pool: inner.clone(),
                closing: None,
                done: false,
            }),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(Error::Render {
                stage: progress.get(),
                reason: "render task ended before the document was ready".into(),
                active: inner.gate.active_count(),
            }),
            Err(_) => {
                let active = inner.gate.active_count();
                inner.close_overrun(&progress).await;
                drop(permit);
                Err(inner.timeout_error(&progress, active))
            }
        }
    }

    /// Launch the engine and fetch every face of `families` ahead of traffic.
    ///
    /// Failures are logged and reported, never returned.
    pub async fn pre_warm(&self, families: &[String]) -> PreWarmReport {
        let inner = self.inner.clone();
        let families = families.to_vec();
        match tokio::task::spawn_blocking(move || inner.pre_warm_blocking(&families)).await {
            Ok(report) => report,
            Err(e) => {
                warn!("pre-warm task failed: {}", e);
                PreWarmReport::default()
            }
        }
    }

    /// [`pre_warm`](Self::pre_warm) with the configured default families
    pub async fn pre_warm_defaults(&self) -> PreWarmReport {
        let families = self.inner.config.fonts.prewarm_families.clone();
        self.pre_warm(&families).await
    }

    pub fn stats(&self) -> PoolStats {
        let inner = &self.inner;
        PoolStats {
            active: inner.gate.active_count(),
            queued: inner.gate.queued(),
            max_concurrent: inner.gate.max_concurrent(),
            engine: inner.lifecycle.stats(),
            fonts: inner.injector.cache().stats(),
            results: inner.results.as_ref().map(ResultCache::stats),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Shared font cache, e.g. to seed bundled fonts
    pub fn font_cache(&self) -> &Arc<FontCache> {
        self.inner.injector.cache()
    }

    pub fn strategies(&self) -> Vec<String> {
        self.inner.hydration.names()
    }

    /// Close the engine process. A later render launches a new one.
    pub async fn shutdown(&self) -> Result<()> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || inner.lifecycle.shutdown())
            .await
            .map_err(|e| Error::Other(format!("shutdown task failed: {}", e)))?
    }
}

fn job_from(html: impl Into<String>, hydration: Option<HydrationRequest>, font_family: Option<&str>) -> RenderJob {
    RenderJob {
        html: html.into(),
        hydration,
        font_family: font_family.map(str::to_string),
        ..Default::default()
    }
}

impl PoolInner {
    fn job_timeout(&self) -> Duration {
        Duration::from_millis(self.config.job_timeout_ms)
    }

    fn timeout_error(&self, progress: &Progress, active: usize) -> Error {
        Error::Timeout {
            stage: progress.get(),
            timeout_ms: self.config.job_timeout_ms,
            active,
        }
    }

    /// Close an overrunning job's surface before its slot is given back
    async fn close_overrun(&self, progress: &Progress) {
        if let Err(e) = progress.close_abandoned().await {
            warn!("closing abandoned surface failed: {}", e);
        }
    }

    fn staged(&self, stage: Stage) -> impl Fn(Error) -> Error + '_ {
        move |e| e.in_stage(stage, self.gate.active_count())
    }

    /// Open a surface and bring the document to print-ready state
    fn prepare(&self, job: &RenderJob, progress: &Progress) -> Result<SurfaceLease> {
        progress.set(Stage::OpenSurface);
        let mut lease = self
            .lifecycle
            .open_surface()
            .map_err(self.staged(Stage::OpenSurface))?;
        if !progress.register(&lease) {
            return Err(Error::Other("job abandoned before its surface opened".into()));
        }

        progress.set(Stage::Load);
        lease
            .surface()
            .load_html(&job.html)
            .map_err(self.staged(Stage::Load))?;

        if let Some(family) = job.font_family.as_deref().map(str::trim).filter(|f| !f.is_empty()) {
            progress.set(Stage::Fonts);
            self.embed_fonts(&mut lease, family, job.require_fonts)?;
        }

        if let Some(request) = &job.hydration {
            progress.set(Stage::Hydrate);
            if let Some(ops) = self.hydration.plan(request).map_err(self.staged(Stage::Hydrate))? {
                let applied = lease
                    .surface()
                    .apply_dom_ops(&ops)
                    .map_err(self.staged(Stage::Hydrate))?;
                debug!(
                    "hydration '{}' applied {}/{} ops",
                    request.strategy,
                    applied,
                    ops.len()
                );
            }
        }
        Ok(lease)
    }

    fn embed_fonts(&self, lease: &mut SurfaceLease, family: &str, require: Option<bool>) -> Result<()> {
        let required = require.unwrap_or(self.config.fonts.policy == FontPolicy::Required);
        let style = match self.injector.build_style(family) {
            Ok(style) => style,
            Err(e) if !required => {
                warn!("rendering without font '{}': {}", family, e);
                return Ok(());
            }
            Err(e) => return Err(e.in_stage(Stage::Fonts, self.gate.active_count())),
        };
        self.injector
            .apply(lease.surface(), &style)
            .map_err(self.staged(Stage::Fonts))
    }

    fn render_blocking(&self, job: &RenderJob, progress: &Progress) -> Result<Vec<u8>> {
        let mut lease = self.prepare(job, progress)?;
        progress.set(Stage::Print);
        lease
            .surface()
            .print_pdf(&self.config.pdf)
            .map_err(self.staged(Stage::Print))
    }

    fn produce_stream(
        &self,
        job: &RenderJob,
        progress: &Progress,
        ready: oneshot::Sender<Result<()>>,
        tx: mpsc::Sender<Result<Vec<u8>>>,
    ) {
        let mut lease = match self.prepare(job, progress) {
            Ok(lease) => lease,
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };
        if ready.send(Ok(())).is_err() {
            // Caller timed out or went away before the document was ready.
            return;
        }

        progress.set(Stage::Print);
        let mut sent = 0usize;
        let result = lease.surface().print_pdf_chunks(
            &self.config.pdf,
            self.config.stream_chunk_size,
            &mut |chunk: Vec<u8>| {
                progress.set(Stage::Stream);
                sent += chunk.len();
                tx.blocking_send(Ok(chunk)).is_ok()
            },
        );
        if let Err(e) = result {
            let stage = progress.get();
            let _ = tx.blocking_send(Err(e.in_stage(stage, self.gate.active_count())));
        }
        debug!("stream producer finished after {} bytes", sent);
    }

    fn pre_warm_blocking(&self, families: &[String]) -> PreWarmReport {
        let mut report = PreWarmReport::default();
        match self.lifecycle.get_or_launch() {
            Ok(_) => report.engine_ready = true,
            Err(e) => warn!("pre-warm: engine launch failed: {}", e),
        }
        for family in families {
            match self.injector.warm(family) {
                Ok(faces) => {
                    debug!("pre-warm: cached {} faces of '{}'", faces, family);
                    report.fonts_warmed.push(family.clone());
                }
                Err(e) => {
                    warn!("pre-warm: font '{}' failed: {}", family, e);
                    report.fonts_failed.push(family.clone());
                }
            }
        }
        info!(
            "pre-warm finished: engine {}, {} fonts cached, {} failed",
            if report.engine_ready { "ready" } else { "unavailable" },
            report.fonts_warmed.len(),
            report.fonts_failed.len()
        );
        report
    }
}

/// Chunked PDF output.
///
/// Holds the job's admission slot until the last chunk is delivered, an error
/// or the job deadline ends the stream, or the stream is dropped. A deadline
/// closes the surface before the timeout error is yielded.
pub struct PdfStream {
    rx: mpsc::Receiver<Result<Vec<u8>>>,
    permit: Option<GatePermit>,
    deadline: Pin<Box<Sleep>>,
    progress: Progress,
    pool: Arc<PoolInner>,
    closing: Option<JoinHandle<()>>,
    done: bool,
}

impl PdfStream {
    fn finish(&mut self) {
        self.done = true;
        self.rx.close();
        if let Some(permit) = self.permit.take() {
            permit.release();
        }
    }

    /// Read the remaining chunks into one buffer
    pub async fn collect_bytes(mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }
}

impl Stream for PdfStream {
    type Item = Result<Vec<u8>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        if self.closing.is_none() && self.deadline.as_mut().poll(cx).is_ready() {
            self.rx.close();
            self.closing = Some(self.progress.close_abandoned());
        }
        if let Some(closing) = self.closing.as_mut() {
            if let Err(e) = ready!(Pin::new(closing).poll(cx)) {
                warn!("closing abandoned surface failed: {}", e);
            }
            self.closing = None;
            let active = self.pool.gate.active_count();
            let err = self.pool.timeout_error(&self.progress, active);
            self.finish();
            return Poll::Ready(Some(Err(err)));
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(Ok(chunk))) => Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(Some(Err(e))) => {
                self.finish();
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                self.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl fmt::Debug for PdfStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PdfStream")
            .field("holds_slot", &self.permit.is_some())
            .field("done", &self.done)
            .finish()
    }
}

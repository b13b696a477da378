//! Pagepress
//!
//! Concurrency-bounded HTML-to-PDF rendering over a shared headless browser
//! process.
//!
//! A [`RenderPool`] owns one long-lived engine process, hands out one
//! exclusive rendering surface (tab) per job, and bounds how many jobs use
//! surfaces at the same time with a FIFO admission gate. Custom web fonts are
//! fetched once, cached in memory, and inlined as data URIs before printing.
//!
//! # Features
//!
//! - **Admission gate**: hard concurrency limit, FIFO queue, bounded wait
//! - **Process recycling**: the engine is replaced after a configured number of
//!   requests, but only once it is idle
//! - **Font embedding**: two-tier in-memory cache (stylesheets + base64 binaries)
//! - **Structured hydration**: serializable instructions instead of in-page callbacks
//! - **CDP Backend** (feature `cdp`): headless Chrome via the DevTools protocol
//!
//! # Example
//!
//! ```no_run
//! use pagepress::{PoolConfig, RenderPool};
//! use pagepress::engine::mock::MockLauncher;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = RenderPool::builder()
//!     .config(PoolConfig { max_concurrent: 8, ..Default::default() })
//!     .launcher(MockLauncher::new())
//!     .build()?;
//!
//! let pdf = pool.render_pdf("<html><body>Hello</body></html>", None, None).await?;
//! assert!(pdf.starts_with(b"%PDF"));
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod error;
pub use error::{Error, ErrorKind, Result, Stage};

pub mod engine;
pub mod env;
pub mod fonts;
pub mod gate;
pub mod hydration;
pub mod lifecycle;
pub mod pipeline;
pub mod results;
pub mod stats;

pub use engine::{EngineLauncher, EngineProcess, Surface, SurfaceCloser};
pub use gate::{AdmissionGate, GatePermit};
pub use hydration::{DomOp, HydrationRegistry, HydrationRequest, HydrationStrategy};
pub use lifecycle::{EngineLifecycle, EngineState, LeaseCloser, SurfaceLease};
pub use pipeline::{PdfStream, PreWarmReport, RenderOutput, RenderPool, RenderPoolBuilder};
pub use results::{ResultCache, ResultCacheStats};
pub use stats::{EngineStats, PoolStats};

/// Startup flags applied to every engine launch.
///
/// Containers usually lack the privileges Chrome's sandbox needs, and background
/// throttling would stall print jobs in tabs the engine considers hidden.
pub const HARDENED_ARGS: &[&str] = &[
    "--no-sandbox",
    "--disable-setuid-sandbox",
    "--single-process",
    "--no-zygote",
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--disable-background-timer-throttling",
    "--disable-backgrounding-occluded-windows",
    "--disable-renderer-backgrounding",
];

/// Configuration for a [`RenderPool`]
///
/// The defaults are sized for a single API node:
/// - at most 100 jobs hold a surface at once
/// - a queued job waits up to 60s for a slot
/// - a running job gets 120s to produce its PDF
///
/// # Examples
///
/// ```
/// let cfg = pagepress::PoolConfig::default();
/// assert_eq!(cfg.recycle.after_requests, 200);
/// assert!(cfg.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of jobs rendering at the same time
    pub max_concurrent: usize,
    /// How long a job may wait in the admission queue, in milliseconds
    pub queue_timeout_ms: u64,
    /// Deadline for open-surface through PDF output, in milliseconds
    pub job_timeout_ms: u64,
    /// When the engine process gets replaced
    pub recycle: RecyclePolicy,
    /// Engine process launch settings
    pub launch: LaunchConfig,
    /// Page setup for generated PDFs
    pub pdf: PdfOptions,
    /// Web font fetching and embedding
    pub fonts: FontConfig,
    /// Chunk size used by streamed output, in bytes
    pub stream_chunk_size: usize,
    /// Finished-PDF cache; disabled when `None`
    pub result_cache: Option<ResultCacheConfig>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 100,
            queue_timeout_ms: 60_000,
            job_timeout_ms: 120_000,
            recycle: RecyclePolicy::default(),
            launch: LaunchConfig::default(),
            pdf: PdfOptions::default(),
            fonts: FontConfig::default(),
            stream_chunk_size: 64 * 1024,
            result_cache: None,
        }
    }
}

impl PoolConfig {
    /// Reject configurations that would deadlock or spin.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(Error::Config("max_concurrent must be at least 1".into()));
        }
        if self.queue_timeout_ms == 0 {
            return Err(Error::Config("queue_timeout_ms must be positive".into()));
        }
        if self.job_timeout_ms == 0 {
            return Err(Error::Config("job_timeout_ms must be positive".into()));
        }
        if self.recycle.after_requests == 0 {
            return Err(Error::Config("recycle.after_requests must be at least 1".into()));
        }
        if let Some(cap) = self.recycle.hard_cap {
            if cap < self.recycle.after_requests {
                return Err(Error::Config(format!(
                    "recycle.hard_cap ({}) is below recycle.after_requests ({})",
                    cap, self.recycle.after_requests
                )));
            }
        }
        if self.stream_chunk_size == 0 {
            return Err(Error::Config("stream_chunk_size must be positive".into()));
        }
        if !self.fonts.stylesheet_url_template.contains("{family}") {
            return Err(Error::Config(
                "fonts.stylesheet_url_template must contain a {family} placeholder".into(),
            ));
        }
        if let Some(rc) = &self.result_cache {
            if rc.max_entries == 0 || rc.ttl_secs == 0 {
                return Err(Error::Config("result_cache needs a positive ttl and size".into()));
            }
        }
        Ok(())
    }
}

/// Engine process retirement policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecyclePolicy {
    /// Retire the process once it has served this many requests and is idle
    pub after_requests: u64,
    /// Retire unconditionally at this many requests, failing in-flight jobs.
    /// `None` never forces retirement.
    pub hard_cap: Option<u64>,
}

impl Default for RecyclePolicy {
    fn default() -> Self {
        Self {
            after_requests: 200,
            hard_cap: None,
        }
    }
}

/// Engine process launch settings
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// Explicit browser binary; auto-detected when `None`
    pub chrome_path: Option<PathBuf>,
    /// Command line flags, [`HARDENED_ARGS`] by default
    pub args: Vec<String>,
    /// Window size of new surfaces
    pub viewport: Viewport,
    /// Run without a visible window
    pub headless: bool,
    /// How long the driver tolerates a silent browser connection, in milliseconds
    pub idle_timeout_ms: u64,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            chrome_path: None,
            args: HARDENED_ARGS.iter().map(|a| a.to_string()).collect(),
            viewport: Viewport::default(),
            headless: true,
            idle_timeout_ms: 600_000,
        }
    }
}

/// Viewport dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 800,
        }
    }
}

/// Page margins in millimetres
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Margins {
    pub top_mm: f64,
    pub bottom_mm: f64,
    pub left_mm: f64,
    pub right_mm: f64,
}

/// PDF page setup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdfOptions {
    /// Paper width in inches
    pub paper_width_in: f64,
    /// Paper height in inches
    pub paper_height_in: f64,
    pub landscape: bool,
    pub print_background: bool,
    pub margins: Margins,
}

impl PdfOptions {
    /// A4 portrait, 210 x 297 mm
    pub fn a4() -> Self {
        Self {
            paper_width_in: 210.0 / MM_PER_INCH,
            paper_height_in: 297.0 / MM_PER_INCH,
            landscape: false,
            print_background: true,
            margins: Margins {
                top_mm: 10.0,
                bottom_mm: 10.0,
                left_mm: 5.0,
                right_mm: 5.0,
            },
        }
    }

    /// Margins converted to inches in CSS order (top, right, bottom, left)
    pub fn margins_in(&self) -> (f64, f64, f64, f64) {
        (
            self.margins.top_mm / MM_PER_INCH,
            self.margins.right_mm / MM_PER_INCH,
            self.margins.bottom_mm / MM_PER_INCH,
            self.margins.left_mm / MM_PER_INCH,
        )
    }
}

impl Default for PdfOptions {
    fn default() -> Self {
        Self::a4()
    }
}

pub const MM_PER_INCH: f64 = 25.4;

/// What happens to a job when its custom font cannot be fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontPolicy {
    /// Log and render with the document's own fonts
    BestEffort,
    /// Fail the job with [`Error::FontFetch`]
    Required,
}

/// Web font settings
#[derive(Debug, Clone)]
pub struct FontConfig {
    /// Stylesheet URL with a `{family}` placeholder
    pub stylesheet_url_template: String,
    /// User agent sent to the font host; decides which binary formats are served
    pub user_agent: String,
    /// Per-request fetch timeout in milliseconds
    pub fetch_timeout_ms: u64,
    /// Families loaded by [`RenderPool::pre_warm_defaults`]
    pub prewarm_families: Vec<String>,
    pub policy: FontPolicy,
}

impl Default for FontConfig {
    fn default() -> Self {
        Self {
            stylesheet_url_template:
                "https://fonts.googleapis.com/css2?family={family}:wght@300;400;500;600;700;800&display=swap"
                    .to_string(),
            // Modern UA so the host answers with woff2 sources.
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36".to_string(),
            fetch_timeout_ms: 10_000,
            prewarm_families: ["Inter", "DM Sans", "Roboto", "Open Sans", "Lato"]
                .iter()
                .map(|f| f.to_string())
                .collect(),
            policy: FontPolicy::BestEffort,
        }
    }
}

impl FontConfig {
    /// Stylesheet URL for a family; spaces are form-encoded as `+`.
    ///
    /// ```
    /// let cfg = pagepress::FontConfig::default();
    /// assert!(cfg.stylesheet_url("DM Sans").contains("family=DM+Sans:wght@"));
    /// ```
    pub fn stylesheet_url(&self, family: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(family.trim().as_bytes()).collect();
        self.stylesheet_url_template.replace("{family}", &encoded)
    }
}

/// Finished-PDF cache settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultCacheConfig {
    pub ttl_secs: u64,
    pub max_entries: usize,
}

impl Default for ResultCacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            max_entries: 500,
        }
    }
}

/// How a job hands its PDF back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// The whole document in memory
    #[default]
    Buffered,
    /// A chunked stream the caller consumes at its own pace
    Streamed,
}

/// One unit of rendering work
#[derive(Debug, Clone, Default)]
pub struct RenderJob {
    /// Complete HTML document
    pub html: String,
    /// Structured hydration applied after load
    pub hydration: Option<HydrationRequest>,
    /// Web font family to embed
    pub font_family: Option<String>,
    /// Overrides [`FontConfig::policy`] for this job
    pub require_fonts: Option<bool>,
    pub output: OutputMode,
}

impl RenderJob {
    pub fn new(html: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            ..Default::default()
        }
    }

    pub fn font_family(mut self, family: impl Into<String>) -> Self {
        self.font_family = Some(family.into());
        self
    }

    pub fn hydrate(mut self, request: HydrationRequest) -> Self {
        self.hydration = Some(request);
        self
    }

    pub fn require_fonts(mut self, required: bool) -> Self {
        self.require_fonts = Some(required);
        self
    }

    pub fn streamed(mut self) -> Self {
        self.output = OutputMode::Streamed;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.max_concurrent, 100);
        assert_eq!(config.queue_timeout_ms, 60_000);
        assert_eq!(config.job_timeout_ms, 120_000);
        assert_eq!(config.recycle.hard_cap, None);
        assert!(config.launch.args.iter().any(|a| a == "--no-sandbox"));
        assert!(config.launch.args.iter().any(|a| a == "--single-process"));
    }

    #[test]
    fn test_a4_margins() {
        let pdf = PdfOptions::default();
        assert!((pdf.paper_width_in - 8.2677).abs() < 1e-3);
        assert!((pdf.paper_height_in - 11.6929).abs() < 1e-3);
        let (top, right, bottom, left) = pdf.margins_in();
        assert!((top - 10.0 / 25.4).abs() < 1e-9);
        assert_eq!(top, bottom);
        assert!((left - 5.0 / 25.4).abs() < 1e-9);
        assert_eq!(left, right);
        assert!(pdf.print_background);
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let cfg = PoolConfig {
            max_concurrent: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));

        let cfg = PoolConfig {
            recycle: RecyclePolicy {
                after_requests: 50,
                hard_cap: Some(10),
            },
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_job_builder() {
        let job = RenderJob::new("<p>x</p>").font_family("Inter").streamed();
        assert_eq!(job.font_family.as_deref(), Some("Inter"));
        assert_eq!(job.output, OutputMode::Streamed);
        assert!(job.hydration.is_none());
    }
}

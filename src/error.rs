//! Error types for the rendering pool

use std::fmt;
use thiserror::Error;

/// Result type alias for pool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline stage a failure is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Admission,
    Launch,
    OpenSurface,
    Load,
    Fonts,
    Hydrate,
    Print,
    Stream,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Admission => "admission",
            Stage::Launch => "launch",
            Stage::OpenSurface => "open-surface",
            Stage::Load => "load",
            Stage::Fonts => "fonts",
            Stage::Hydrate => "hydrate",
            Stage::Print => "print",
            Stage::Stream => "stream",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification handed to callers (HTTP handlers map these to statuses)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Overloaded: retry later or reject the request
    Busy,
    /// Permanent failure for this input
    Render,
    /// Custom font could not be fetched; retrying without fonts may succeed
    Font,
    /// Invalid pool configuration
    Config,
}

/// Errors that can occur while rendering
#[derive(Error, Debug)]
pub enum Error {
    /// Admission queue wait exceeded its deadline
    #[error("Server busy: waited {waited_ms}ms for a render slot ({active}/{max_concurrent} active)")]
    Busy {
        active: usize,
        max_concurrent: usize,
        waited_ms: u64,
    },

    /// The engine process failed to start
    #[error("Engine launch failed: {0}")]
    Launch(String),

    /// A font stylesheet or binary could not be fetched
    #[error("Font fetch failed for {url}: {reason}")]
    FontFetch { url: String, reason: String },

    /// A pipeline stage failed
    #[error("Rendering failed during {stage}: {reason} ({active} slots active)")]
    Render {
        stage: Stage,
        reason: String,
        active: usize,
    },

    /// The per-job deadline elapsed
    #[error("Render timed out after {timeout_ms}ms during {stage} ({active} slots active)")]
    Timeout {
        stage: Stage,
        timeout_ms: u64,
        active: usize,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Environment overrides could not be read into the configuration
    #[error("Invalid environment configuration: {0}")]
    Env(#[from] config::ConfigError),

    /// CDP-specific error
    #[cfg(feature = "cdp")]
    #[error("CDP error: {0}")]
    Cdp(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Busy { .. } => ErrorKind::Busy,
            Error::FontFetch { .. } => ErrorKind::Font,
            Error::Config(_) | Error::Env(_) => ErrorKind::Config,
            _ => ErrorKind::Render,
        }
    }

    /// Only admission timeouts are transient; everything else is tied to the input or host.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Busy { .. })
    }

    /// Stage the error is attributed to, when known
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Busy { .. } => Some(Stage::Admission),
            Error::Launch(_) => Some(Stage::Launch),
            Error::FontFetch { .. } => Some(Stage::Fonts),
            Error::Render { stage, .. } | Error::Timeout { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Attribute a backend error to a pipeline stage.
    ///
    /// Errors that already carry their own classification (busy, launch, font,
    /// staged render/timeout) pass through unchanged.
    pub(crate) fn in_stage(self, stage: Stage, active: usize) -> Error {
        match self {
            e @ (Error::Busy { .. }
            | Error::Launch(_)
            | Error::FontFetch { .. }
            | Error::Render { .. }
            | Error::Timeout { .. }
            | Error::Config(_)
            | Error::Env(_)) => e,
            other => Error::Render {
                stage,
                reason: other.to_string(),
                active,
            },
        }
    }
}

#[cfg(feature = "cdp")]
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Cdp(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_is_the_only_retryable_kind() {
        let busy = Error::Busy {
            active: 2,
            max_concurrent: 2,
            waited_ms: 60_000,
        };
        assert_eq!(busy.kind(), ErrorKind::Busy);
        assert!(busy.is_retryable());
        assert!(busy.to_string().contains("2/2 active"));

        let font = Error::FontFetch {
            url: "https://fonts.example/inter.woff2".into(),
            reason: "HTTP 404".into(),
        };
        assert_eq!(font.kind(), ErrorKind::Font);
        assert!(!font.is_retryable());
    }

    #[test]
    fn in_stage_wraps_backend_errors_only() {
        let wrapped = Error::Other("tab crashed".into()).in_stage(Stage::Print, 3);
        match wrapped {
            Error::Render { stage, active, ref reason } => {
                assert_eq!(stage, Stage::Print);
                assert_eq!(active, 3);
                assert_eq!(reason, "tab crashed");
            }
            other => panic!("unexpected {:?}", other),
        }

        let launch = Error::Launch("no chrome".into()).in_stage(Stage::OpenSurface, 1);
        assert!(matches!(launch, Error::Launch(_)));
        assert_eq!(launch.stage(), Some(Stage::Launch));
    }
}

//! Web font support: transports, the two-tier cache, and style injection.

pub mod cache;
pub mod fetch;
pub mod inject;

pub use cache::{FontCache, FontCacheStats};
pub use fetch::{FontFetcher, HttpFontFetcher, StaticFontFetcher};
pub use inject::{parse_font_faces, FontFace, FontInjector};

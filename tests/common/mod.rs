#![allow(dead_code)]

use pagepress::engine::mock::{MockBehavior, MockLauncher};
use pagepress::fonts::StaticFontFetcher;
use pagepress::{PoolConfig, RenderPool};
use std::sync::Arc;

pub const HELLO: &str = "<html><body>Hello</body></html>";

pub struct Harness {
    pub pool: RenderPool,
    pub launcher: MockLauncher,
    pub fonts: Arc<StaticFontFetcher>,
}

pub fn harness(config: PoolConfig, behavior: MockBehavior) -> Harness {
    let launcher = MockLauncher::with_behavior(behavior);
    let fonts = Arc::new(StaticFontFetcher::new());
    let pool = RenderPool::builder()
        .config(config)
        .launcher(launcher.clone())
        .font_fetcher(fonts.clone())
        .build()
        .expect("valid pool config");
    Harness {
        pool,
        launcher,
        fonts,
    }
}

pub fn config(max_concurrent: usize) -> PoolConfig {
    PoolConfig {
        max_concurrent,
        ..Default::default()
    }
}

/// Poll until `cond` holds or a second passes
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    cond()
}

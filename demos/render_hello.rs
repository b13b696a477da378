//! Render a small resume through the mock engine with hydration and a bundled font

use pagepress::engine::mock::MockLauncher;
use pagepress::fonts::StaticFontFetcher;
use pagepress::{HydrationRequest, PoolConfig, RenderPool};
use serde_json::json;
use std::sync::Arc;

const TEMPLATE: &str = r#"<html><body><div id="resume-root">
  <h1 id="full-name"></h1><h2 id="job-title"></h2><p id="contact-info"></p>
  <section id="section-summary"><p id="summary-text"></p></section>
  <section id="section-experience">Experience</section>
</div></body></html>"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Pagepress - mock render example\n");

    let config = PoolConfig {
        max_concurrent: 4,
        ..Default::default()
    };
    let launcher = MockLauncher::new();
    let pool = RenderPool::builder()
        .config(config)
        .launcher(launcher.clone())
        .font_fetcher(Arc::new(StaticFontFetcher::new()))
        .build()?;

    // Offline font: seed the cache the way a bundled deployment would.
    pool.font_cache().seed_stylesheet(
        "Inter",
        "@font-face { font-family: 'Inter'; font-weight: 400; src: url(https://fonts.local/inter-400.woff2) format('woff2'); }",
    );
    pool.font_cache().seed_binary("https://fonts.local/inter-400.woff2", b"wOF2 placeholder");

    let hydration = HydrationRequest::new(
        "resume",
        json!({
            "personalInfo": {
                "firstName": "Ada",
                "lastName": "Lovelace",
                "jobTitle": "Analyst",
                "summary": "Wrote the first program.",
                "email": "ada@example.com",
                "phone": "+44 20 0000 0000"
            },
            "order": ["experience", "summary"]
        }),
    );

    let pdf = pool.render_pdf(TEMPLATE, Some(hydration), Some("Inter")).await?;
    println!("PDF: {} bytes, starts with {:?}", pdf.len(), String::from_utf8_lossy(&pdf[..8]));

    let journal = launcher.journal();
    println!("DOM operations applied: {}", journal.dom_ops.len());
    println!("Font styles injected: {}", journal.styles.len());
    println!("\nStats: {}", serde_json::to_string_pretty(&pool.stats())?);

    std::fs::write("hello.pdf", &pdf)?;
    println!("Saved to: hello.pdf");
    Ok(())
}

//! Render through headless Chrome, streaming the PDF to disk

use futures::StreamExt;
use pagepress::engine::cdp::ChromeLauncher;
use pagepress::{PoolConfig, RenderPool};
use std::io::Write;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    println!("Pagepress - CDP render example\n");

    let pool = RenderPool::builder()
        .config(PoolConfig::from_env()?)
        .launcher(ChromeLauncher::new())
        .build()?;

    let report = pool.pre_warm(&["Inter".to_string()]).await;
    println!("Pre-warm: {:?}\n", report);

    let html = r#"<html><body style="font-weight:600">
        <h1>Hello from pagepress</h1><p>Rendered by headless Chrome.</p>
    </body></html>"#;

    let mut stream = pool.render_stream(html, None, Some("Inter")).await?;
    let mut file = std::fs::File::create("cdp_render.pdf")?;
    let mut total = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        total += chunk.len();
        file.write_all(&chunk)?;
    }
    println!("Wrote {} bytes to cdp_render.pdf", total);

    pool.shutdown().await?;
    println!("Done!");
    Ok(())
}

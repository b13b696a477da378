//! `pagepress` operator tool: render a file, warm caches, inspect config.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use pagepress::engine::mock::MockLauncher;
use pagepress::{HydrationRequest, PoolConfig, RenderPool, RenderPoolBuilder};
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "pagepress", version, about = "Render HTML to PDF through a shared headless browser", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Render one HTML file to PDF
    Render {
        /// Input HTML document
        #[arg(long)]
        html: PathBuf,
        /// Output PDF path
        #[arg(short, long)]
        out: PathBuf,
        /// Web font family to embed
        #[arg(long)]
        font: Option<String>,
        /// JSON payload for hydration
        #[arg(long)]
        hydrate: Option<PathBuf>,
        /// Hydration strategy applied to the payload
        #[arg(long, default_value = "resume")]
        strategy: String,
        /// Write the PDF chunk by chunk
        #[arg(long, action = clap::ArgAction::SetTrue)]
        stream: bool,
        #[arg(long, value_enum, default_value_t = EngineKind::default())]
        engine: EngineKind,
    },
    /// Launch the engine and cache font families
    Prewarm {
        /// Families to fetch; defaults to the configured list
        #[arg(long = "font")]
        fonts: Vec<String>,
        #[arg(long, value_enum, default_value_t = EngineKind::default())]
        engine: EngineKind,
    },
    /// Print the configuration resolved from the environment
    Config,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum EngineKind {
    /// In-process engine producing placeholder documents
    Mock,
    /// Headless Chrome (requires the `cdp` feature)
    Chrome,
}

impl Default for EngineKind {
    fn default() -> Self {
        if cfg!(feature = "cdp") {
            EngineKind::Chrome
        } else {
            EngineKind::Mock
        }
    }
}

fn builder(config: PoolConfig, engine: EngineKind) -> anyhow::Result<RenderPoolBuilder> {
    let builder = RenderPool::builder().config(config);
    match engine {
        EngineKind::Mock => Ok(builder.launcher(MockLauncher::new())),
        #[cfg(feature = "cdp")]
        EngineKind::Chrome => Ok(builder.launcher(pagepress::engine::cdp::ChromeLauncher::new())),
        #[cfg(not(feature = "cdp"))]
        EngineKind::Chrome => bail!("this build has no Chrome support; rebuild with --features cdp"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = PoolConfig::from_env().context("reading PAGEPRESS_* environment")?;

    match cli.command {
        Commands::Render {
            html,
            out,
            font,
            hydrate,
            strategy,
            stream,
            engine,
        } => {
            let document = std::fs::read_to_string(&html)
                .with_context(|| format!("reading {}", html.display()))?;
            let hydration = match hydrate {
                Some(path) => {
                    let raw = std::fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    let payload = serde_json::from_str(&raw)
                        .with_context(|| format!("parsing {}", path.display()))?;
                    Some(HydrationRequest::new(strategy, payload))
                }
                None => None,
            };

            let pool = builder(config, engine)?.build()?;
            let mut file = std::fs::File::create(&out)
                .with_context(|| format!("creating {}", out.display()))?;

            let written = if stream {
                let mut pdf = pool.render_stream(document, hydration, font.as_deref()).await?;
                let mut total = 0usize;
                while let Some(chunk) = pdf.next().await {
                    let chunk = chunk?;
                    total += chunk.len();
                    file.write_all(&chunk)?;
                }
                total
            } else {
                let pdf = pool.render_pdf(document, hydration, font.as_deref()).await?;
                file.write_all(&pdf)?;
                pdf.len()
            };
            file.flush()?;
            pool.shutdown().await?;
            println!("wrote {} bytes to {}", written, out.display());
        }
        Commands::Prewarm { fonts, engine } => {
            let pool = builder(config, engine)?.build()?;
            let report = if fonts.is_empty() {
                pool.pre_warm_defaults().await
            } else {
                pool.pre_warm(&fonts).await
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
            pool.shutdown().await?;
            if !report.engine_ready {
                bail!("engine did not start");
            }
        }
        Commands::Config => {
            println!("{:#?}", config);
        }
    }
    Ok(())
}

//! Chrome DevTools Protocol backend (uses the `headless_chrome` crate)

use super::{EngineLauncher, EngineProcess, Surface, SurfaceCloser};
use crate::hydration::{applier_script, DomOp};
use crate::{Error, LaunchConfig, PdfOptions, Result};
use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::types::PrintToPdfOptions;
use headless_chrome::{Browser, LaunchOptions};
use log::debug;
use std::ffi::OsStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Launches headless Chrome with the configured flags
#[derive(Debug, Clone, Default)]
pub struct ChromeLauncher;

impl ChromeLauncher {
    pub fn new() -> Self {
        ChromeLauncher
    }
}

impl EngineLauncher for ChromeLauncher {
    fn launch(&self, config: &LaunchConfig) -> Result<Arc<dyn EngineProcess>> {
        let args: Vec<&OsStr> = config.args.iter().map(OsStr::new).collect();

        let launch_options = LaunchOptions::default_builder()
            .headless(config.headless)
            .sandbox(false)
            .window_size(Some((config.viewport.width, config.viewport.height)))
            .path(config.chrome_path.clone())
            .args(args)
            .idle_browser_timeout(Duration::from_millis(config.idle_timeout_ms))
            .build()
            .map_err(|e| Error::Launch(format!("Failed to build launch options: {}", e)))?;

        let browser = Browser::new(launch_options)
            .map_err(|e| Error::Launch(format!("Failed to launch browser: {}", e)))?;

        debug!("chrome launched with {} flags", config.args.len());
        Ok(Arc::new(ChromeProcess {
            browser: Mutex::new(Some(browser)),
        }))
    }
}

/// A running Chrome instance
pub struct ChromeProcess {
    browser: Mutex<Option<Browser>>,
}

impl ChromeProcess {
    fn browser(&self) -> Option<Browser> {
        self.browser
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EngineProcess for ChromeProcess {
    fn is_connected(&self) -> bool {
        match self.browser() {
            Some(browser) => browser.get_version().is_ok(),
            None => false,
        }
    }

    fn new_surface(&self) -> Result<Box<dyn Surface>> {
        let browser = self
            .browser()
            .ok_or_else(|| Error::Other("browser already closed".into()))?;
        let tab = browser
            .new_tab()
            .map_err(|e| Error::Other(format!("Failed to create tab: {}", e)))?;
        Ok(Box::new(ChromeSurface { tab }))
    }

    fn close(&self) -> Result<()> {
        // Dropping the last Browser handle terminates the child process.
        let browser = self
            .browser
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(browser);
        Ok(())
    }
}

/// One Chrome tab
pub struct ChromeSurface {
    tab: Arc<Tab>,
}

/// Shared handle on a tab; pending calls on the tab fail once it closes
struct TabCloser {
    tab: Arc<Tab>,
}

impl SurfaceCloser for TabCloser {
    fn close(&self) -> Result<()> {
        self.tab
            .close(true)
            .map(|_| ())
            .map_err(|e| Error::Other(format!("Failed to close tab: {}", e)))
    }
}

impl ChromeSurface {
    fn eval(&self, script: &str, await_promise: bool) -> Result<serde_json::Value> {
        let result = self.tab.evaluate(script, await_promise)?;
        Ok(result.value.unwrap_or(serde_json::Value::Null))
    }
}

impl Surface for ChromeSurface {
    fn load_html(&mut self, html: &str) -> Result<()> {
        let tree = self
            .tab
            .call_method(Page::GetFrameTree(None))
            .map_err(|e| Error::Other(format!("Failed to read frame tree: {}", e)))?;

        self.tab
            .call_method(Page::SetDocumentContent {
                frame_id: tree.frame_tree.frame.id,
                html: html.to_string(),
            })
            .map_err(|e| Error::Other(format!("Failed to set document content: {}", e)))?;

        // DOM readiness only; subresources may still be loading.
        self.eval(
            r#"new Promise(function(resolve){
                if (document.readyState !== 'loading') { resolve(document.readyState); return; }
                document.addEventListener('DOMContentLoaded', function(){ resolve(document.readyState); }, { once: true });
            })"#,
            true,
        )?;
        Ok(())
    }

    fn inject_style(&mut self, css: &str) -> Result<()> {
        let css_json = serde_json::to_string(css)
            .map_err(|e| Error::Other(format!("Failed to encode style: {}", e)))?;
        let script = format!(
            r#"(function(css){{
                var style = document.createElement('style');
                style.setAttribute('data-pagepress', 'fonts');
                style.textContent = css;
                (document.head || document.documentElement).appendChild(style);
                return true;
            }})({})"#,
            css_json
        );
        self.eval(&script, false)?;
        Ok(())
    }

    fn wait_for_fonts(&mut self) -> Result<()> {
        let status = self.eval("document.fonts.ready.then(function(){ return document.fonts.status; })", true)?;
        debug!("document fonts status: {}", status);
        Ok(())
    }

    fn apply_dom_ops(&mut self, ops: &[DomOp]) -> Result<usize> {
        if ops.is_empty() {
            return Ok(0);
        }
        let applied = self.eval(&applier_script(ops)?, false)?;
        Ok(applied.as_u64().unwrap_or(0) as usize)
    }

    fn print_pdf(&mut self, options: &PdfOptions) -> Result<Vec<u8>> {
        let (top, right, bottom, left) = options.margins_in();
        let pdf_options = PrintToPdfOptions {
            landscape: Some(options.landscape),
            print_background: Some(options.print_background),
            paper_width: Some(options.paper_width_in),
            paper_height: Some(options.paper_height_in),
            margin_top: Some(top),
            margin_right: Some(right),
            margin_bottom: Some(bottom),
            margin_left: Some(left),
            prefer_css_page_size: Some(false),
            ..Default::default()
        };

        Ok(self.tab.print_to_pdf(Some(pdf_options))?)
    }

    // TODO: switch to Page.printToPDF with transferMode=ReturnAsStream and IO.read
    // so large documents are never held in memory whole.

    fn closer(&self) -> Arc<dyn SurfaceCloser> {
        Arc::new(TabCloser {
            tab: self.tab.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chrome_launch_and_print() {
        // This test requires Chrome to be installed, so we skip it in CI
        if std::env::var("CI").is_ok() {
            return;
        }
        let process = match ChromeLauncher::new().launch(&LaunchConfig::default()) {
            Ok(p) => p,
            Err(e) => {
                eprintln!("Skipping Chrome launch test because Chrome is not available or failed to launch: {}", e);
                return;
            }
        };
        let mut surface = process.new_surface().unwrap();
        surface.load_html("<html><body>Hello</body></html>").unwrap();
        let pdf = surface.print_pdf(&PdfOptions::default()).unwrap();
        assert!(pdf.starts_with(b"%PDF"));
        surface.close().unwrap();
        process.close().unwrap();
        assert!(!process.is_connected());
    }
}

//! Engine backends: the browser process and the surfaces (tabs) it hands out.
//!
//! The traits are synchronous; the pipeline calls them from blocking worker
//! threads so async callers never stall on the browser driver.

use crate::hydration::DomOp;
use crate::{LaunchConfig, PdfOptions, Result};
use std::sync::Arc;

#[cfg(feature = "cdp")]
pub mod cdp;

pub mod mock;

/// Starts engine processes
pub trait EngineLauncher: Send + Sync {
    fn launch(&self, config: &LaunchConfig) -> Result<Arc<dyn EngineProcess>>;
}

/// A running engine process shared by sequential surfaces
pub trait EngineProcess: Send + Sync {
    /// Whether the process still answers protocol calls
    fn is_connected(&self) -> bool;

    /// Open a fresh, isolated surface
    fn new_surface(&self) -> Result<Box<dyn Surface>>;

    /// Terminate the process. Idempotent.
    fn close(&self) -> Result<()>;
}

/// Closes a surface from any thread, including while another thread is
/// blocked inside one of the surface's calls
pub trait SurfaceCloser: Send + Sync {
    fn close(&self) -> Result<()>;
}

/// One exclusive rendering context (a browser tab)
pub trait Surface: Send {
    /// Replace the document and wait until the DOM is parsed
    fn load_html(&mut self, html: &str) -> Result<()>;

    /// Append a `<style>` element to the document head
    fn inject_style(&mut self, css: &str) -> Result<()>;

    /// Block until the document reports every font face loaded
    fn wait_for_fonts(&mut self) -> Result<()>;

    /// Apply hydration operations; returns how many took effect
    fn apply_dom_ops(&mut self, ops: &[DomOp]) -> Result<usize>;

    /// Print the whole document into memory
    fn print_pdf(&mut self, options: &PdfOptions) -> Result<Vec<u8>>;

    /// Print the document as a sequence of chunks.
    ///
    /// `sink` returns `false` when the consumer has gone away, which stops
    /// production early without an error. Backends without a native stream
    /// transfer print into memory and slice.
    fn print_pdf_chunks(
        &mut self,
        options: &PdfOptions,
        chunk_size: usize,
        sink: &mut dyn FnMut(Vec<u8>) -> bool,
    ) -> Result<()> {
        let pdf = self.print_pdf(options)?;
        for chunk in pdf.chunks(chunk_size.max(1)) {
            if !sink(chunk.to_vec()) {
                break;
            }
        }
        Ok(())
    }

    /// Handle that closes this surface. A pending call on the surface
    /// should fail promptly once it fires.
    fn closer(&self) -> Arc<dyn SurfaceCloser>;

    /// Close the surface now
    fn close(&mut self) -> Result<()> {
        self.closer().close()
    }
}

//! High-level printing: whole jobs from PBM images or text.

use std::io::{self, BufRead};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::bitmap::{BitmapStore, Page};
use crate::flow::{DeviceMonitor, FlowController};
use crate::font::Pf2Font;
use crate::model::Model;
use crate::options::PrinterOptions;
use crate::protocol::{DeviceState, RX_CHARACTERISTIC};
use crate::session::PrintSession;
use crate::text::TextCanvas;
use crate::transform::flip_in_place;
use crate::transport::Transport;
use crate::{CatPrinterError, JobStage, Result};

/// Async printer API for printing PBM images and text.
///
/// - `transport`: the link to the device (BLE, in-memory or a dump file)
/// - `model`: resolved once, decides paper width and workarounds
/// - `options`: energy, speed, flips, text layout and pacing
///
/// Failed jobs report the stage they failed in through
/// [`CatPrinterError::Job`]; the printer is ready for the next job afterwards.
pub struct CatPrinter<T> {
    session: PrintSession<T>,
    options: PrinterOptions,
    monitor: Arc<DeviceMonitor>,
    cancel: CancellationToken,
}

impl<T: Transport> CatPrinter<T> {
    /// Connect the transport and start listening for device notifications.
    ///
    /// Options that cannot work with `model` are rejected before the
    /// transport is touched.
    pub async fn connect(mut transport: T, model: Model, options: PrinterOptions) -> Result<Self> {
        options.validate(&model.spec())?;
        transport.connect().await?;
        let monitor = Arc::new(DeviceMonitor::new());
        transport.subscribe(RX_CHARACTERISTIC, monitor.callback()).await?;
        let cancel = CancellationToken::new();
        let flow = FlowController::new(transport, options.pacing)
            .with_monitor(Arc::clone(&monitor))
            .with_cancel_token(cancel.clone());
        let session = PrintSession::new(flow, model)
            .with_dry_run(options.dry_run)
            .with_compression(options.compress);
        tracing::info!(%model, dry_run = options.dry_run, "printer connected");
        Ok(Self {
            session,
            options,
            monitor,
            cancel,
        })
    }

    pub fn model(&self) -> Model {
        self.session.model()
    }

    pub fn options(&self) -> &PrinterOptions {
        &self.options
    }

    pub fn monitor(&self) -> &Arc<DeviceMonitor> {
        &self.monitor
    }

    pub fn session(&self) -> &PrintSession<T> {
        &self.session
    }

    pub fn transport(&self) -> &T {
        self.session.flow().transport()
    }

    /// Token that aborts the running job when cancelled.
    ///
    /// A job started after an abort gets a fresh token, so fetch the handle
    /// again for it.
    pub fn abort_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn paper_width(&self) -> usize {
        self.session.spec().paper_width
    }

    fn arm(&mut self) {
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
            self.session.flow_mut().set_cancel_token(self.cancel.clone());
        }
    }

    fn settle<R>(&mut self, result: Result<R>) -> Result<R> {
        if let Err(err) = &result {
            let dropped = self.session.reset();
            tracing::warn!(error = %err, dropped, "printer command failed");
        }
        result
    }

    /// Print one or more concatenated PBM documents.
    pub async fn print_pbm<R: BufRead>(&mut self, reader: R) -> Result<()> {
        let store = BitmapStore::from_pbm(self.paper_width(), reader, self.options.max_store_size)
            .map_err(|e| e.at(JobStage::Preparing))?;
        self.print_store(&store).await
    }

    /// Print everything held by `store`, oldest line first.
    pub async fn print_store(&mut self, store: &BitmapStore) -> Result<()> {
        self.arm();
        let result = self.run_store(store).await;
        self.settle(result)
    }

    async fn run_store(&mut self, store: &BitmapStore) -> Result<()> {
        let width = self.paper_width();
        if store.width() != width {
            return Err(CatPrinterError::InvalidImageData(format!(
                "unsuitable image width: expected {width}, got {}",
                store.width()
            ))
            .at(JobStage::Preparing));
        }
        let mut raster = Vec::with_capacity(store.len());
        for line in store.lines() {
            raster.extend_from_slice(&line);
        }
        let height = raster.len() / store.line_bytes();
        flip_in_place(&mut raster, width, height, self.options.flip_h, self.options.flip_v);
        tracing::info!(height, pages = store.pages().count(), "printing bitmap");

        self.session
            .prepare(self.options.speed, self.options.image_energy())
            .await
            .map_err(|e| e.at(JobStage::Preparing))?;
        for line in raster.chunks_exact(store.line_bytes()) {
            self.session.draw(line).await.map_err(|e| e.at(JobStage::Streaming))?;
        }
        if let Some(path) = &self.options.dump_path {
            let page = Page {
                width,
                height,
                data: raster,
            };
            write_dump(path, &page).map_err(|e| e.at(JobStage::Streaming))?;
        }
        self.session
            .finish(self.options.extra_feed)
            .await
            .map_err(|e| e.at(JobStage::Finalizing))
    }

    /// Render UTF-8 text from `reader` with `font` and print it line by line.
    ///
    /// Input with NUL bytes or invalid UTF-8 fails with
    /// [`CatPrinterError::InvalidText`].
    pub async fn print_text<R: BufRead>(&mut self, font: Pf2Font, reader: R) -> Result<()> {
        self.arm();
        let result = self.run_text(font, reader).await;
        self.settle(result)
    }

    async fn run_text<R: BufRead>(&mut self, font: Pf2Font, mut reader: R) -> Result<()> {
        let width = self.paper_width();
        let mut canvas = TextCanvas::new(font.scaled(self.options.font_scale), width)
            .map_err(|e| e.at(JobStage::Preparing))?
            .with_wrap(self.options.wrap)
            .with_rtl(self.options.rtl);
        let mut printed = BitmapStore::new(width, self.options.max_store_size);

        self.session
            .prepare(self.options.speed, self.options.text_energy())
            .await
            .map_err(|e| e.at(JobStage::Preparing))?;

        let mut line = String::new();
        loop {
            line.clear();
            let read = reader
                .read_line(&mut line)
                .map_err(|e| text_error(e).at(JobStage::Streaming))?;
            if read == 0 {
                break;
            }
            if line.contains('\0') {
                return Err(CatPrinterError::InvalidText.at(JobStage::Streaming));
            }
            let rows = canvas.puttext(&line).map_err(|e| e.at(JobStage::Streaming))?;
            self.stream_rows(rows, canvas.height(), &mut printed)
                .await
                .map_err(|e| e.at(JobStage::Streaming))?;
        }
        let tail: Vec<Vec<u8>> = canvas.finish().into_iter().collect();
        self.stream_rows(tail, canvas.height(), &mut printed)
            .await
            .map_err(|e| e.at(JobStage::Streaming))?;
        printed.finish_page();
        tracing::info!(height = printed.height(), "printed text");

        if let Some(path) = &self.options.dump_path {
            for page in printed.to_pages(true) {
                write_dump(path, &page).map_err(|e| e.at(JobStage::Streaming))?;
            }
        }
        self.session
            .finish(self.options.extra_feed)
            .await
            .map_err(|e| e.at(JobStage::Finalizing))
    }

    /// Flip a block of text canvases and draw it line by line.
    async fn stream_rows(&mut self, rows: Vec<Vec<u8>>, canvas_height: usize, printed: &mut BitmapStore) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let width = self.paper_width();
        let mut block = rows.concat();
        flip_in_place(&mut block, width, canvas_height * rows.len(), self.options.flip_h, self.options.flip_v);
        for line in block.chunks_exact(width / 8) {
            printed.append(line);
            self.session.draw(line).await?;
        }
        self.session.flush().await
    }

    /// Ask the device for its state and wait for the answer.
    pub async fn status(&mut self, timeout: Duration) -> Result<DeviceState> {
        self.arm();
        let result = self.query_state(timeout).await;
        self.settle(result)
    }

    async fn query_state(&mut self, timeout: Duration) -> Result<DeviceState> {
        let mut reports = self.monitor.subscribe();
        let _ = reports.borrow_and_update();
        self.session.get_device_state().await?;
        self.session.flush().await?;
        match tokio::time::timeout(timeout, reports.changed()).await {
            Ok(Ok(())) => {
                let state = *reports.borrow_and_update();
                state.ok_or_else(|| CatPrinterError::Transport("empty device state report".into()))
            }
            Ok(Err(_)) => Err(CatPrinterError::Transport("device monitor closed".into())),
            Err(_) => Err(CatPrinterError::Transport(format!(
                "no device state within {timeout:?}"
            ))),
        }
    }

    /// Feed paper outside of a job.
    pub async fn feed(&mut self, pixels: u16) -> Result<()> {
        self.arm();
        let result = match self.session.feed(pixels).await {
            Ok(()) => self.session.flush().await,
            Err(err) => Err(err),
        };
        self.settle(result)
    }

    /// Pull paper back outside of a job.
    pub async fn retract(&mut self, pixels: u16) -> Result<()> {
        self.arm();
        let result = match self.session.retract(pixels).await {
            Ok(()) => self.session.flush().await,
            Err(err) => Err(err),
        };
        self.settle(result)
    }

    /// Flush what is left and disconnect, handing the transport back.
    pub async fn disconnect(mut self) -> Result<T> {
        self.session.flush().await?;
        let mut transport = self.session.into_flow().into_inner();
        tracing::info!("disconnecting from printer");
        transport.disconnect().await?;
        Ok(transport)
    }
}

/// Undecodable text is reported as such, other read errors as I/O errors.
fn text_error(err: io::Error) -> CatPrinterError {
    if err.kind() == io::ErrorKind::InvalidData {
        CatPrinterError::InvalidText
    } else {
        err.into()
    }
}

fn write_dump(path: &Path, page: &Page) -> Result<()> {
    std::fs::write(path, page.to_pbm())?;
    tracing::debug!(path = %path.display(), height = page.height, "wrote dump");
    Ok(())
}

//! Session state machine tying selection, preprocessing and recognition
//!
//! The session is the only place state changes. The host feeds it
//! [`HostCommand`]s, the driver asks it for recognition [`Job`]s via
//! [`Session::poll`] and reports their completion back; every observable
//! change is queued as a [`CoreEvent`].

use serde::{Deserialize, Serialize};
use snipocr_imaging::{preprocess, DeviceRect, ImagingError, PixelBuffer, PreprocessConfig};
use snipocr_ocr::{EncodedImage, OcrError, RecognitionOptions, RecognitionResult};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::message::{decode_image, CoreEvent, HostCommand};
use crate::scheduler::{AutoRunScheduler, Clock, Completion, Dispatch, RunNow};
use crate::selection::{Release, SelectionController, Surface};

/// Current phase of the session, with the data valid in that phase
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    Selecting,
    Selected {
        region: DeviceRect,
    },
    Processing {
        region: DeviceRect,
        generation: u64,
    },
    Recognizing {
        region: DeviceRect,
        generation: u64,
    },
    Done {
        region: DeviceRect,
        result: RecognitionResult,
    },
    Error {
        /// Kept when the failure allows retrying on the same region
        region: Option<DeviceRect>,
        message: String,
    },
}

/// Discriminant of [`SessionState`], reported to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateKind {
    Idle,
    Selecting,
    Selected,
    Processing,
    Recognizing,
    Done,
    Error,
}

impl SessionState {
    pub fn kind(&self) -> StateKind {
        match self {
            SessionState::Idle => StateKind::Idle,
            SessionState::Selecting => StateKind::Selecting,
            SessionState::Selected { .. } => StateKind::Selected,
            SessionState::Processing { .. } => StateKind::Processing,
            SessionState::Recognizing { .. } => StateKind::Recognizing,
            SessionState::Done { .. } => StateKind::Done,
            SessionState::Error { .. } => StateKind::Error,
        }
    }

    /// Region the state refers to, if any
    pub fn region(&self) -> Option<DeviceRect> {
        match self {
            SessionState::Selected { region }
            | SessionState::Processing { region, .. }
            | SessionState::Recognizing { region, .. }
            | SessionState::Done { region, .. } => Some(*region),
            SessionState::Error { region, .. } => *region,
            SessionState::Idle | SessionState::Selecting => None,
        }
    }
}

/// One recognition call to perform
#[derive(Debug, Clone)]
pub struct Job {
    pub generation: u64,
    pub image: EncodedImage,
    pub options: RecognitionOptions,
}

/// Session parameters
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub preprocess: PreprocessConfig,
    pub options: RecognitionOptions,
    pub quiet_period: Duration,
}

pub struct Session<C> {
    state: SessionState,
    source: Option<PixelBuffer>,
    selection: SelectionController,
    config: PreprocessConfig,
    options: RecognitionOptions,
    scheduler: AutoRunScheduler<C>,
    ready: Option<Dispatch>,
    /// Set once the host has sized the selection surface itself
    surface_from_host: bool,
    outbox: Vec<CoreEvent>,
}

impl<C: Clock> Session<C> {
    pub fn new(settings: SessionSettings, clock: C) -> Self {
        Self {
            state: SessionState::Idle,
            source: None,
            selection: SelectionController::new(Surface::new(0.0, 0.0, 1.0)),
            config: settings.preprocess,
            options: settings.options,
            scheduler: AutoRunScheduler::new(clock, settings.quiet_period),
            ready: None,
            surface_from_host: false,
            outbox: Vec::new(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    pub fn has_image(&self) -> bool {
        self.source.is_some()
    }

    /// Events produced since the last call
    pub fn take_events(&mut self) -> Vec<CoreEvent> {
        std::mem::take(&mut self.outbox)
    }

    /// When the next scheduled run comes due
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.ready.is_some() {
            return Some(self.scheduler.now());
        }
        self.scheduler.next_deadline()
    }

    /// Nothing scheduled, ready or in flight
    pub fn is_quiescent(&self) -> bool {
        self.ready.is_none() && !self.scheduler.has_pending() && !self.scheduler.is_busy()
    }

    pub fn handle(&mut self, command: HostCommand) {
        debug!("handling {:?}", CommandName(&command));
        match command {
            HostCommand::StartSelection => {
                self.selection.cancel();
                self.invalidate();
                self.transition(SessionState::Selecting);
            }
            HostCommand::LoadImage { image } => match decode_image(&image) {
                Ok(buffer) => self.load(buffer),
                Err(e) => self.fail_imaging(e),
            },
            HostCommand::SetSurface { width, height, dpr } => {
                self.selection.set_surface(Surface::new(width, height, dpr));
                self.surface_from_host = true;
                self.withdraw_region();
            }
            HostCommand::PointerDown { x, y } => {
                if self.selection.pointer_down(x, y) {
                    self.invalidate();
                    self.transition(SessionState::Selecting);
                }
            }
            HostCommand::PointerMove { x, y } => {
                self.selection.pointer_move(x, y);
            }
            HostCommand::PointerUp { x, y } => self.release(x, y),
            HostCommand::Cancel => {
                self.selection.cancel();
                self.invalidate();
                self.transition(SessionState::Idle);
            }
            HostCommand::UpdateConfig { config } => self.update_config(config),
            HostCommand::RunRecognition {
                image,
                threshold,
                scale,
            } => self.run_recognition(image, threshold, scale),
        }
    }

    /// Next recognition call to start, if one is due.
    ///
    /// Preprocessing happens here, synchronously. A failure releases the
    /// in-flight slot and is reported as an event.
    pub fn poll(&mut self) -> Option<Job> {
        let dispatch = self.ready.take().or_else(|| self.scheduler.poll())?;
        let generation = dispatch.generation;

        let Some(region) = self.state.region().filter(|_| self.source.is_some()) else {
            warn!(generation, "dispatched without an image and region");
            self.scheduler.complete(generation);
            return None;
        };

        self.transition(SessionState::Processing { region, generation });
        let processed = match self.source.as_ref() {
            Some(source) => preprocess(source, region, &self.config).and_then(|b| b.encode_png()),
            None => {
                self.scheduler.complete(generation);
                return None;
            }
        };

        match processed {
            Ok(png) => {
                self.transition(SessionState::Recognizing { region, generation });
                Some(Job {
                    generation,
                    image: EncodedImage::png(png),
                    options: self.options.clone(),
                })
            }
            Err(e) => {
                self.scheduler.complete(generation);
                self.fail_imaging(e);
                None
            }
        }
    }

    /// Report the end of a recognition call started by [`Session::poll`]
    pub fn complete(&mut self, generation: u64, result: Result<RecognitionResult, OcrError>) {
        if self.scheduler.complete(generation) == Completion::Stale {
            return;
        }
        let region = self.state.region();

        match (result, region) {
            (Ok(result), Some(region)) => {
                info!(
                    "recognized {} chars at {:.1}% in {}ms",
                    result.text.chars().count(),
                    result.confidence,
                    result.duration_ms
                );
                self.outbox.push(CoreEvent::RecognitionResult(result.clone()));
                self.transition(SessionState::Done { region, result });
            }
            (Ok(_), None) => {
                warn!(generation, "completed without a region, dropped");
            }
            (Err(OcrError::UnsupportedImage(message)), _) => {
                self.selection.cancel();
                self.report_error(None, format!("unsupported image: {}", message));
            }
            (Err(e), region) => {
                self.report_error(region, e.to_string());
            }
        }
    }

    fn load(&mut self, buffer: PixelBuffer) {
        info!("image loaded: {}x{}", buffer.width(), buffer.height());
        self.adopt_surface(&buffer);
        self.source = Some(buffer);
        self.selection.cancel();
        self.invalidate();
        self.transition(SessionState::Idle);
    }

    /// Without a host-provided surface, select directly over the image
    fn adopt_surface(&mut self, buffer: &PixelBuffer) {
        if self.surface_from_host {
            return;
        }
        let dpr = self.selection.surface().dpr;
        let surface = Surface::new(
            buffer.width() as f64 / dpr,
            buffer.height() as f64 / dpr,
            dpr,
        );
        if surface != self.selection.surface() {
            debug!("selection surface follows image: {}x{}", buffer.width(), buffer.height());
            self.selection.set_surface(surface);
        }
    }

    /// Supersede scheduled work; a dispatch not yet handed out is released
    fn invalidate(&mut self) {
        self.scheduler.invalidate();
        if let Some(dispatch) = self.ready.take() {
            debug!(generation = dispatch.generation, "withdrawn before dispatch");
            self.scheduler.complete(dispatch.generation);
        }
    }

    fn release(&mut self, x: f64, y: f64) {
        match self.selection.pointer_up(x, y) {
            Release::Finalized(selection) => {
                self.outbox
                    .push(CoreEvent::selection_done(selection.device, selection.dpr));
                self.transition(SessionState::Selected {
                    region: selection.device,
                });
                if self.source.is_some() {
                    self.scheduler.trigger();
                }
            }
            Release::Degenerate => self.transition(SessionState::Idle),
            Release::Ignored => {}
        }
    }

    fn update_config(&mut self, config: PreprocessConfig) {
        if let Err(e) = config.validate() {
            warn!("rejected configuration: {}", e);
            self.outbox.push(CoreEvent::RecognitionError {
                message: e.to_string(),
            });
            return;
        }
        if config == self.config {
            return;
        }
        self.config = config;
        if self.source.is_some() && self.state.region().is_some() {
            self.scheduler.trigger();
        }
    }

    fn run_recognition(&mut self, image: Option<String>, threshold: Option<u8>, scale: Option<f64>) {
        if self.scheduler.is_busy() {
            debug!("recognition already in flight, run request ignored");
            return;
        }

        if let Some(payload) = image {
            match decode_image(&payload) {
                Ok(buffer) => {
                    self.adopt_surface(&buffer);
                    self.source = Some(buffer);
                }
                Err(e) => {
                    self.fail_imaging(e);
                    return;
                }
            }
        }
        let Some(source) = self.source.as_ref() else {
            self.report_error(None, "no image loaded".to_string());
            return;
        };

        if let Some(t) = threshold {
            self.config = self.config.with_threshold(t);
        }
        if let Some(s) = scale {
            self.config = self.config.with_scale(s);
        }

        let region = match self.state.region() {
            Some(region) => region,
            None => {
                self.selection.cancel();
                DeviceRect::full(source.width(), source.height())
            }
        };
        self.scheduler.invalidate();
        self.transition(SessionState::Selected { region });

        match self.scheduler.run_now() {
            RunNow::Dispatch(dispatch) => self.ready = Some(dispatch),
            RunNow::Busy => {}
        }
    }

    /// Drop the current region and any work derived from it
    fn withdraw_region(&mut self) {
        self.invalidate();
        if self.state.kind() != StateKind::Selecting {
            self.transition(SessionState::Idle);
        }
    }

    fn fail_imaging(&mut self, error: ImagingError) {
        match error {
            ImagingError::UnsupportedImage(_) | ImagingError::EmptyRegion(_) => {
                self.selection.cancel();
                self.report_error(None, error.to_string());
            }
            other => {
                let region = self.state.region();
                self.report_error(region, other.to_string());
            }
        }
    }

    fn report_error(&mut self, region: Option<DeviceRect>, message: String) {
        warn!("recognition failed: {}", message);
        self.outbox.push(CoreEvent::RecognitionError {
            message: message.clone(),
        });
        self.transition(SessionState::Error { region, message });
    }

    fn transition(&mut self, next: SessionState) {
        let changed = self.state.kind() != next.kind();
        self.state = next;
        if changed {
            debug!("session state: {:?}", self.state.kind());
            self.outbox.push(CoreEvent::StateChanged {
                state: self.state.kind(),
            });
        }
    }
}

/// Logs a command without its (possibly large) image payload
struct CommandName<'a>(&'a HostCommand);

impl std::fmt::Debug for CommandName<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            HostCommand::LoadImage { image } => write!(f, "LoadImage({} bytes)", image.len()),
            HostCommand::RunRecognition { image, threshold, scale } => write!(
                f,
                "RunRecognition(image: {}, threshold: {:?}, scale: {:?})",
                image.is_some(),
                threshold,
                scale
            ),
            other => write!(f, "{:?}", other),
        }
    }
}

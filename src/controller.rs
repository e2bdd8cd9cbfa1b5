use chrono::{DateTime, Local};
use log::{debug, error, info, warn};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::capture_surface::{CaptureSurface, SurfaceError, SurfaceEvents};
use crate::codec::{decode_data_uri, ImagePayload};
use crate::devices::Device;
use crate::error::{CaptureError, UploadError};
use crate::upload::Uploader;

/// Where the current capture cycle is. `Done` is not stored: a finished
/// cycle records its outcome and drops straight back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleState {
    Idle,
    Capturing,
    Submitting { since: Instant },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    Live,
    Review,
}

/// Request status as the presentation shell sees it.
#[derive(Debug, PartialEq)]
pub enum RequestState<'a> {
    Idle,
    InFlight,
    Succeeded(&'a Value),
    Failed(&'a CaptureError),
}

#[derive(Debug, Clone)]
pub struct CapturedImage {
    pub data_uri: String,
    pub payload: ImagePayload,
    pub captured_at: DateTime<Local>,
}

#[derive(Debug, Clone)]
pub enum Outcome {
    Succeeded(Value),
    Failed(CaptureError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerResult {
    /// Frame captured and submission running
    Started,
    /// A cycle is already in flight
    Busy,
    /// Surface missing or not streaming yet
    NoCaptureSurface,
    /// Cycle ended before reaching the network
    Failed,
}

/// Everything the shell renders from. Read-only outside the controller.
#[derive(Debug)]
pub struct ControllerState {
    cycle: CycleState,
    image: Option<CapturedImage>,
    view: ViewMode,
    devices: Vec<Device>,
    active_device_id: Option<String>,
    number_of_cameras: usize,
    video_ready: bool,
    torch_enabled: bool,
    surface_error: Option<SurfaceError>,
    last_outcome: Option<Outcome>,
    submissions: u64,
}

impl ControllerState {
    fn new() -> Self {
        Self {
            cycle: CycleState::Idle,
            image: None,
            view: ViewMode::Live,
            devices: Vec::new(),
            active_device_id: None,
            number_of_cameras: 0,
            video_ready: false,
            torch_enabled: false,
            surface_error: None,
            last_outcome: None,
            submissions: 0,
        }
    }

    pub fn loading(&self) -> bool {
        self.cycle != CycleState::Idle
    }

    #[cfg(test)]
    pub fn cycle(&self) -> CycleState {
        self.cycle
    }

    pub fn request_state(&self) -> RequestState<'_> {
        if self.loading() {
            return RequestState::InFlight;
        }
        match &self.last_outcome {
            Some(Outcome::Succeeded(value)) => RequestState::Succeeded(value),
            Some(Outcome::Failed(err)) => RequestState::Failed(err),
            None => RequestState::Idle,
        }
    }

    pub fn image(&self) -> Option<&CapturedImage> {
        self.image.as_ref()
    }

    pub fn view(&self) -> ViewMode {
        self.view
    }

    #[cfg(test)]
    pub fn active_device_id(&self) -> Option<&str> {
        self.active_device_id.as_deref()
    }

    /// Camera count as reported by the capture surface.
    #[cfg(test)]
    pub fn number_of_cameras(&self) -> usize {
        self.number_of_cameras
    }

    pub fn can_switch_device(&self) -> bool {
        self.number_of_cameras > 1
    }

    #[cfg(test)]
    pub fn video_ready(&self) -> bool {
        self.video_ready
    }

    pub fn torch_enabled(&self) -> bool {
        self.torch_enabled
    }

    pub fn surface_error(&self) -> Option<SurfaceError> {
        self.surface_error
    }

    /// Number of submissions handed to the uploader so far
    #[cfg(test)]
    pub fn submissions(&self) -> u64 {
        self.submissions
    }

    /// Ids `switch_device` cycles through. Without a usable listing the
    /// surface's cameras are addressed by index.
    fn switch_targets(&self) -> Vec<String> {
        if self.devices.len() > 1 {
            self.devices.iter().map(|d| d.id.clone()).collect()
        } else {
            (0..self.number_of_cameras).map(|i| i.to_string()).collect()
        }
    }
}

type UploadResult = Result<Value, CaptureError>;

fn upload_task_lost() -> CaptureError {
    UploadError::Request("upload task ended without a result".to_string()).into()
}

/// Owns the capture cycle and routes every state change through named actions.
pub struct CaptureController {
    state: ControllerState,
    uploader: Arc<dyn Uploader>,
    runtime: Handle,
    // Sender lives in the upload task; a task that dies closes the channel
    pending: Option<oneshot::Receiver<UploadResult>>,
}

impl CaptureController {
    pub fn new(uploader: Arc<dyn Uploader>, runtime: Handle) -> Self {
        Self {
            state: ControllerState::new(),
            uploader,
            runtime,
            pending: None,
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    /// Publish the enumerated camera list. An active device that is no
    /// longer listed falls back to the surface default.
    pub fn set_devices(&mut self, devices: Vec<Device>) {
        info!("Controller knows {} camera(s)", devices.len());
        if let Some(active) = self.state.active_device_id.as_deref() {
            if !devices.iter().any(|d| d.id == active) {
                warn!("Active camera {} is no longer listed", active);
                self.state.active_device_id = None;
            }
        }
        self.state.devices = devices;
    }

    /// Capture a frame and submit it. Only one cycle runs at a time, and only
    /// once the surface has reported a live feed.
    pub fn trigger(&mut self, surface: Option<&mut dyn CaptureSurface>) -> TriggerResult {
        if self.state.loading() {
            debug!("Capture ignored: cycle already in flight");
            return TriggerResult::Busy;
        }

        let video_ready = self.state.video_ready;
        let Some(surface) = surface.filter(|s| video_ready && s.is_ready()) else {
            debug!("Capture ignored: {}", CaptureError::NoCaptureSurface);
            return TriggerResult::NoCaptureSurface;
        };

        self.state.cycle = CycleState::Capturing;
        info!("Capture started");

        let captured = surface.take_photo().and_then(|data_uri| {
            let payload = decode_data_uri(&data_uri)?;
            Ok(CapturedImage {
                data_uri,
                payload,
                captured_at: Local::now(),
            })
        });

        let image = match captured {
            Ok(image) => image,
            Err(e) => {
                self.finish(Err(e));
                return TriggerResult::Failed;
            }
        };

        debug!(
            "Captured {} bytes of {} ({} character data URI)",
            image.payload.len(),
            image.payload.mime,
            image.data_uri.len()
        );
        let payload = image.payload.clone();
        self.state.image = Some(image);
        self.state.cycle = CycleState::Submitting {
            since: Instant::now(),
        };
        self.state.submissions += 1;
        info!("Submission #{} started", self.state.submissions);

        let (results_tx, results_rx) = oneshot::channel();
        self.pending = Some(results_rx);

        let uploader = Arc::clone(&self.uploader);
        self.runtime.spawn(async move {
            let result = uploader.upload(payload).await;
            // Receiver is gone only if the controller was dropped
            let _ = results_tx.send(result);
        });

        TriggerResult::Started
    }

    /// Apply a finished submission if one arrived. Call once per frame.
    pub fn poll_completion(&mut self) -> Option<&Outcome> {
        let pending = self.pending.as_mut()?;
        let result = match pending.try_recv() {
            Ok(result) => result,
            Err(oneshot::error::TryRecvError::Empty) => return None,
            Err(oneshot::error::TryRecvError::Closed) => Err(upload_task_lost()),
        };
        self.finish(result);
        self.state.last_outcome.as_ref()
    }

    /// Wait for the in-flight submission, if any, and apply it.
    pub async fn wait_for_completion(&mut self) -> Option<Outcome> {
        let pending = self.pending.take()?;
        let result = pending.await.unwrap_or_else(|_| Err(upload_task_lost()));
        self.finish(result);
        self.state.last_outcome.clone()
    }

    fn finish(&mut self, result: UploadResult) {
        let outcome = match result {
            Ok(value) => {
                if let CycleState::Submitting { since } = self.state.cycle {
                    info!("Recognition succeeded in {:?}: {}", since.elapsed(), value);
                }
                Outcome::Succeeded(value)
            }
            Err(e) => {
                error!("Error uploading photo: {}", e);
                Outcome::Failed(e)
            }
        };

        self.state.last_outcome = Some(outcome);
        self.state.cycle = CycleState::Idle;
        self.pending = None;
    }

    /// Flip between the live feed and the full-screen review of the last capture.
    /// Ignored while a cycle is in flight; with no capture the view stays `Live`.
    pub fn toggle_review(&mut self) -> ViewMode {
        if self.state.loading() {
            return self.state.view;
        }

        self.state.view = match self.state.view {
            ViewMode::Live if self.state.image.is_some() => ViewMode::Review,
            ViewMode::Live => ViewMode::Live,
            ViewMode::Review => ViewMode::Live,
        };
        self.state.view
    }

    /// Move to the next camera and rebind the surface to it.
    pub fn switch_device(&mut self, surface: Option<&mut dyn CaptureSurface>) -> Option<&str> {
        if self.state.loading() || !self.state.can_switch_device() {
            return None;
        }

        let targets = self.state.switch_targets();
        if targets.is_empty() {
            return None;
        }
        let current = self
            .state
            .active_device_id
            .as_deref()
            .and_then(|id| targets.iter().position(|t| t == id))
            .unwrap_or(0);
        let next = targets[(current + 1) % targets.len()].clone();

        self.bind_device(next, surface);
        self.state.active_device_id.as_deref()
    }

    /// Bind to a specific enumerated camera.
    pub fn select_device(&mut self, device_id: &str, surface: Option<&mut dyn CaptureSurface>) -> bool {
        if self.state.loading() {
            return false;
        }
        if !self.state.devices.iter().any(|d| d.id == device_id) {
            warn!("Unknown camera {}", device_id);
            return false;
        }

        self.bind_device(device_id.to_string(), surface);
        true
    }

    fn bind_device(&mut self, device_id: String, surface: Option<&mut dyn CaptureSurface>) {
        info!("Active camera: {}", device_id);
        self.state.active_device_id = Some(device_id);
        self.state.video_ready = false;
        self.state.surface_error = None;

        if let Some(surface) = surface {
            surface.set_device(self.state.active_device_id.clone());
        }
    }

    pub fn toggle_torch(&mut self, surface: Option<&mut dyn CaptureSurface>) -> bool {
        self.state.torch_enabled = !self.state.torch_enabled;
        if let Some(surface) = surface.filter(|s| s.supports_torch()) {
            surface.set_torch(self.state.torch_enabled);
        }
        self.state.torch_enabled
    }
}

impl SurfaceEvents for CaptureController {
    fn on_number_of_cameras(&mut self, count: usize) {
        debug!("Capture surface reports {} camera(s)", count);
        self.state.number_of_cameras = count;
    }

    fn on_video_ready(&mut self) {
        info!("Video feed ready.");
        self.state.video_ready = true;
        self.state.surface_error = None;
    }

    fn on_error(&mut self, error: SurfaceError) {
        if matches!(error, SurfaceError::NoCameraAccessible | SurfaceError::PermissionDenied) {
            self.state.video_ready = false;
        }
        self.state.surface_error = Some(error);
    }
}

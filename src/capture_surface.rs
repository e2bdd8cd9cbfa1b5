use image::RgbImage;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::codec::encode_data_uri;
use crate::config::{CaptureConfig, ErrorMessages};
use crate::devices::parse_camera_list;
use crate::error::CaptureError;

/// How long a started preview may take to write its first frame.
const PREVIEW_STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

static NEXT_PREVIEW_FILE: AtomicUsize = AtomicUsize::new(0);

/// Failure modes a capture surface reports to its operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceError {
    NoCameraAccessible,
    PermissionDenied,
    SwitchCamera,
    FrameEncoding,
}

impl SurfaceError {
    pub fn message<'a>(&self, messages: &'a ErrorMessages) -> &'a str {
        match self {
            SurfaceError::NoCameraAccessible => &messages.no_camera_accessible,
            SurfaceError::PermissionDenied => &messages.permission_denied,
            SurfaceError::SwitchCamera => &messages.switch_camera,
            SurfaceError::FrameEncoding => &messages.frame_encoding,
        }
    }
}

/// Lifecycle notifications a surface delivers to its registered handler.
pub trait SurfaceEvents {
    fn on_number_of_cameras(&mut self, count: usize);
    fn on_video_ready(&mut self);
    fn on_error(&mut self, error: SurfaceError);
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum SurfaceEvent {
    NumberOfCameras(usize),
    VideoReady,
    Error(SurfaceError),
}

/// Live camera stream bound to one device, able to grab a still.
pub trait CaptureSurface {
    /// Grab the current frame as a `data:<mime>;base64,...` still.
    fn take_photo(&mut self) -> Result<String, CaptureError>;

    fn is_ready(&self) -> bool;

    /// Latest live frame, if a new one is due.
    fn preview_frame(&mut self) -> Option<RgbImage>;

    /// Operator-facing text for the current failure, shown as configured.
    fn error_message(&self) -> Option<&str>;

    /// Rebind the stream to another device; `None` picks the default camera.
    fn set_device(&mut self, device_id: Option<String>);

    fn supports_torch(&self) -> bool {
        false
    }

    fn set_torch(&mut self, _enabled: bool) {}

    /// Deliver queued lifecycle events to `handler`.
    fn dispatch_events(&mut self, handler: &mut dyn SurfaceEvents);
}

/// Capture surface driving the Raspberry Pi camera stack through `rpicam-still`.
pub struct RpicamSurface {
    program: String,
    device_id: Option<String>,
    camera_count: usize,
    settings: CaptureConfig,
    messages: ErrorMessages,
    preview_image_path: PathBuf,
    preview_process: Option<Child>,
    preview_started: Option<Instant>,
    last_preview: Option<Instant>,
    ready: bool,
    error: Option<SurfaceError>,
    events: Vec<SurfaceEvent>,
}

impl RpicamSurface {
    pub fn new(device_id: Option<String>, settings: CaptureConfig, messages: ErrorMessages) -> Self {
        Self::with_program("rpicam-still", device_id, settings, messages)
    }

    /// Counts the cameras itself and starts streaming from `device_id`, or
    /// from the camera stack's default when `None`.
    pub fn with_program(
        program: &str,
        device_id: Option<String>,
        settings: CaptureConfig,
        messages: ErrorMessages,
    ) -> Self {
        let camera_count = count_cameras(program);
        let preview_file = format!(
            "snapscan_preview_{}_{}.jpg",
            std::process::id(),
            NEXT_PREVIEW_FILE.fetch_add(1, Ordering::Relaxed)
        );

        let mut surface = RpicamSurface {
            program: program.to_string(),
            device_id,
            camera_count,
            settings,
            messages,
            preview_image_path: std::env::temp_dir().join(preview_file),
            preview_process: None,
            preview_started: None,
            last_preview: None,
            ready: false,
            error: None,
            events: vec![SurfaceEvent::NumberOfCameras(camera_count)],
        };

        surface.start_preview();
        surface
    }

    fn camera_args(&self) -> Vec<String> {
        match &self.device_id {
            Some(id) => vec!["--camera".to_string(), id.clone()],
            None => Vec::new(),
        }
    }

    fn report(&mut self, error: SurfaceError) {
        log::warn!("Capture surface error: {:?}", error);
        self.error = Some(error);
        self.events.push(SurfaceEvent::Error(error));
    }

    fn start_preview(&mut self) {
        self.stop_preview();
        self.ready = false;
        self.last_preview = None;

        // A frame left by the previous stream must not count as this one's
        if self.preview_image_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.preview_image_path) {
                log::warn!("Could not remove stale preview frame: {}", e);
            }
        }

        let preview_path = self.preview_image_path.to_string_lossy().into_owned();
        let mut args = self.camera_args();
        args.extend(
            [
                "-o",
                preview_path.as_str(),
                "--width", "640",
                "--height", "480",
                "--quality", "70",
                "--timeout", "0",     // Run until stopped
                "--timelapse", "100", // Rewrite the preview file every 100ms
                "--nopreview",
            ]
            .iter()
            .map(|s| s.to_string()),
        );

        log::info!("Preview command: {} {}", self.program, args.join(" "));

        match Command::new(&self.program)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => {
                self.preview_process = Some(child);
                self.preview_started = Some(Instant::now());
                self.error = None;
                log::info!("Camera preview started");
            }
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                log::error!("Failed to start camera preview: {}", e);
                self.report(SurfaceError::PermissionDenied);
            }
            Err(e) => {
                log::error!("Failed to start camera preview: {}", e);
                self.report(SurfaceError::NoCameraAccessible);
            }
        }
    }

    fn stop_preview(&mut self) {
        self.preview_started = None;
        if let Some(mut process) = self.preview_process.take() {
            let _ = process.kill();
            let _ = process.wait();
            log::info!("Camera preview stopped");
        }
    }

    /// Until the first frame arrives, watch for a preview that died or never delivers.
    fn check_preview_startup(&mut self) {
        if self.ready {
            return;
        }
        let Some(process) = self.preview_process.as_mut() else {
            return;
        };

        match process.try_wait() {
            Ok(Some(status)) => {
                log::error!("Camera preview exited before its first frame: {}", status);
                self.preview_process = None;
                self.preview_started = None;
                self.report(SurfaceError::NoCameraAccessible);
            }
            Ok(None) => {
                if self.preview_started.is_some_and(|t| t.elapsed() > PREVIEW_STARTUP_TIMEOUT) {
                    log::error!("No preview frame after {:?}", PREVIEW_STARTUP_TIMEOUT);
                    // Report once; a late frame still brings the feed up
                    self.preview_started = None;
                    self.report(SurfaceError::NoCameraAccessible);
                }
            }
            Err(e) => log::warn!("Could not poll camera preview: {}", e),
        }
    }

    fn grab_jpeg(&self) -> Result<Vec<u8>, CaptureError> {
        let width = self.settings.width.to_string();
        let height = self.settings.height.to_string();
        let quality = self.settings.quality.to_string();

        let mut args = self.camera_args();
        args.extend(
            [
                "-o", "-", // JPEG on stdout
                "--encoding", "jpg",
                "--width", width.as_str(),
                "--height", height.as_str(),
                "--quality", quality.as_str(),
                "--immediate",
                "--nopreview",
                "--timeout", "100",
            ]
            .iter()
            .map(|s| s.to_string()),
        );

        log::info!("Capture command: {} {}", self.program, args.join(" "));

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|e| CaptureError::Capture(format!("{} failed to run: {}", self.program, e)))?;

        if !output.status.success() {
            log::warn!("stderr: {}", String::from_utf8_lossy(&output.stderr));
            return Err(CaptureError::Capture(format!(
                "{} exited with {}",
                self.program, output.status
            )));
        }

        Ok(output.stdout)
    }
}

/// Cameras the stack lists; zero when the listing is unavailable.
fn count_cameras(program: &str) -> usize {
    match Command::new(program).arg("--list-cameras").output() {
        Ok(output) => {
            let mut listing = String::from_utf8_lossy(&output.stdout).to_string();
            listing.push_str(&String::from_utf8_lossy(&output.stderr));
            parse_camera_list(&listing).len()
        }
        Err(e) => {
            log::warn!("{} --list-cameras failed: {}", program, e);
            0
        }
    }
}

/// JPEG streams open with the SOI marker.
fn is_jpeg(bytes: &[u8]) -> bool {
    bytes.starts_with(&[0xFF, 0xD8])
}

fn load_preview(path: &Path) -> Option<RgbImage> {
    // The file is rewritten in place; a torn read just skips this frame
    match image::open(path) {
        Ok(img) => Some(img.to_rgb8()),
        Err(e) => {
            log::debug!("Preview frame not readable yet: {}", e);
            None
        }
    }
}

impl CaptureSurface for RpicamSurface {
    fn take_photo(&mut self) -> Result<String, CaptureError> {
        if self.preview_process.is_none() {
            return Err(CaptureError::NoCaptureSurface);
        }

        // The camera is exclusive, so the preview pauses for the grab
        self.stop_preview();
        let grabbed = self.grab_jpeg();
        self.start_preview();

        let bytes = grabbed?;
        if !is_jpeg(&bytes) {
            self.report(SurfaceError::FrameEncoding);
            return Err(CaptureError::Capture(format!(
                "camera returned {} bytes that are not a JPEG",
                bytes.len()
            )));
        }

        log::info!("Photo captured: {} bytes", bytes.len());
        Ok(encode_data_uri("image/jpeg", &bytes))
    }

    fn is_ready(&self) -> bool {
        self.ready && self.preview_process.is_some()
    }

    fn preview_frame(&mut self) -> Option<RgbImage> {
        self.check_preview_startup();
        self.preview_process.as_ref()?;

        let interval = Duration::from_millis(self.settings.preview_interval_ms);
        let now = Instant::now();
        if let Some(last) = self.last_preview {
            if now.duration_since(last) < interval {
                return None;
            }
        }
        self.last_preview = Some(now);

        let frame = load_preview(&self.preview_image_path)?;
        if !self.ready {
            self.ready = true;
            self.preview_started = None;
            self.error = None;
            self.events.push(SurfaceEvent::VideoReady);
        }
        Some(frame)
    }

    fn error_message(&self) -> Option<&str> {
        self.error.map(|e| e.message(&self.messages))
    }

    fn set_device(&mut self, device_id: Option<String>) {
        if device_id == self.device_id {
            return;
        }
        // Moving off a bound camera needs somewhere to go
        if self.device_id.is_some() && self.camera_count < 2 {
            self.report(SurfaceError::SwitchCamera);
            return;
        }

        log::info!("Switching camera to {:?}", device_id);
        self.device_id = device_id;
        self.start_preview();
    }

    fn dispatch_events(&mut self, handler: &mut dyn SurfaceEvents) {
        for event in self.events.drain(..) {
            match event {
                SurfaceEvent::NumberOfCameras(count) => handler.on_number_of_cameras(count),
                SurfaceEvent::VideoReady => handler.on_video_ready(),
                SurfaceEvent::Error(error) => handler.on_error(error),
            }
        }
    }
}

impl Drop for RpicamSurface {
    fn drop(&mut self) {
        self.stop_preview();

        if self.preview_image_path.exists() {
            let _ = std::fs::remove_file(&self.preview_image_path);
        }
        log::info!("Capture surface dropped");
    }
}

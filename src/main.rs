use anyhow::Result;
use eframe::egui;
use log::{info, warn};
use std::sync::Arc;
use tokio::runtime::Handle;

mod capture_surface;
mod codec;
mod config;
mod controller;
mod devices;
mod error;
mod texture;
mod ui;
mod upload;

use crate::capture_surface::{CaptureSurface, RpicamSurface};
use crate::config::Config;
use crate::controller::CaptureController;
use crate::devices::{enumerate_video_devices, RpicamDeviceSource};
use crate::ui::SnapScanApp;
use crate::upload::RecognitionClient;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    info!("📷 Starting SnapScan");

    // Load configuration
    let config = Config::load()?;
    config.validate()?;
    info!(
        "Configuration loaded: {}x{} display, recognition server {}",
        config.display.width, config.display.height, config.server.base_url
    );

    // Cameras are listed once per session
    let devices = enumerate_video_devices(&RpicamDeviceSource::new()).await;

    // The surface counts and opens cameras itself; the listing only names them
    let mut surface: Box<dyn CaptureSurface> = Box::new(RpicamSurface::new(
        None,
        config.capture.clone(),
        config.messages.clone(),
    ));

    let uploader = Arc::new(RecognitionClient::new(&config.server.base_url));
    info!("Submitting captures to {}", uploader.endpoint());
    let mut controller = CaptureController::new(uploader, Handle::current());
    controller.set_devices(devices);

    if let Some(camera) = config.capture.camera.as_deref() {
        if !controller.select_device(camera, Some(surface.as_mut())) {
            warn!("Configured camera {} not found; using the default", camera);
        }
    }

    let size = [config.display.width as f32, config.display.height as f32];
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size(size)
            .with_min_inner_size([320.0, 240.0])
            .with_decorations(!config.display.fullscreen)
            .with_fullscreen(config.display.fullscreen),
        ..Default::default()
    };

    info!("Launching GUI application...");

    eframe::run_native(
        "SnapScan",
        options,
        Box::new(move |cc| {
            setup_touch_style(&cc.egui_ctx);
            Box::new(SnapScanApp::new(controller, Some(surface), config))
        }),
    )
    .map_err(|e| anyhow::anyhow!("Failed to run application: {}", e))?;

    info!("Application shut down gracefully");
    Ok(())
}

fn setup_touch_style(ctx: &egui::Context) {
    let mut style = (*ctx.style()).clone();

    // Larger UI elements for touch interaction
    style.spacing.button_padding = egui::vec2(16.0, 12.0);
    style.spacing.item_spacing = egui::vec2(12.0, 8.0);

    style.text_styles.insert(
        egui::TextStyle::Button,
        egui::FontId::new(18.0, egui::FontFamily::Proportional),
    );
    style.text_styles.insert(
        egui::TextStyle::Body,
        egui::FontId::new(16.0, egui::FontFamily::Proportional),
    );

    style.visuals = egui::Visuals::dark();
    ctx.set_style(style);
}

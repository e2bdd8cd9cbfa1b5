use std::time::{Duration, Instant};
use eframe::egui;

use crate::capture_surface::CaptureSurface;
use crate::config::Config;
use crate::controller::{CaptureController, RequestState, TriggerResult, ViewMode};

// ============================================================================
// CONSTANTS FOR UI STYLING
// ============================================================================
const UI_PADDING: f32 = 20.0;
const CONTROL_STRIP_FRACTION: f32 = 0.2; // Share of the screen used by the control strip
const CONTROL_STRIP_MIN: f32 = 130.0;
const CAPTURE_BUTTON_RADIUS: f32 = 40.0;
const SMALL_BUTTON_RADIUS: f32 = 30.0;
const THUMBNAIL_SIZE: f32 = 120.0;
const BANNER_MAX_CHARS: usize = 160;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub struct ResultBanner {
    pub text: String,
    pub success: bool,
    pub shown_at: Instant,
}

// ============================================================================
// MAIN APP STRUCT
// ============================================================================

pub struct SnapScanApp {
    pub controller: CaptureController,
    pub surface: Option<Box<dyn CaptureSurface>>,
    pub config: Config,

    // Textures
    pub camera_texture: Option<egui::TextureHandle>,
    pub review_texture: Option<egui::TextureHandle>,
    pub review_source: Option<chrono::DateTime<chrono::Local>>,

    pub banner: Option<ResultBanner>,
}

impl SnapScanApp {
    pub fn new(
        controller: CaptureController,
        surface: Option<Box<dyn CaptureSurface>>,
        config: Config,
    ) -> Self {
        Self {
            controller,
            surface,
            config,
            camera_texture: None,
            review_texture: None,
            review_source: None,
            banner: None,
        }
    }
}

/// Borrow the boxed surface for a controller action.
fn surface_mut(surface: &mut Option<Box<dyn CaptureSurface>>) -> Option<&mut dyn CaptureSurface> {
    surface.as_mut().map(|s| s.as_mut() as &mut dyn CaptureSurface)
}

/// Banner for a settled request; the server payload is shown as compact JSON.
pub fn banner_for(request: &RequestState<'_>) -> Option<ResultBanner> {
    let (text, success) = match request {
        RequestState::Succeeded(value) => (format!("✓ {}", value), true),
        RequestState::Failed(err) => (format!("✗ {}", err.summary()), false),
        RequestState::Idle | RequestState::InFlight => return None,
    };

    let text = if text.chars().count() > BANNER_MAX_CHARS {
        let mut short: String = text.chars().take(BANNER_MAX_CHARS).collect();
        short.push('…');
        short
    } else {
        text
    };

    Some(ResultBanner {
        text,
        success,
        shown_at: Instant::now(),
    })
}

// ============================================================================
// MAIN UPDATE LOOP
// ============================================================================

impl eframe::App for SnapScanApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // ESC key to exit (kiosk mode with keyboard attached)
        if ctx.input(|i| i.key_pressed(egui::Key::Escape)) {
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
        }

        if let Some(surface) = self.surface.as_mut() {
            surface.dispatch_events(&mut self.controller);
        }

        if self.controller.poll_completion().is_some() {
            self.banner = banner_for(&self.controller.state().request_state());
        }

        // Busy screen replaces everything while a cycle runs
        if self.controller.state().request_state() == RequestState::InFlight {
            self.render_busy(ctx);
            ctx.request_repaint_after(Duration::from_millis(50));
            return;
        }

        match self.controller.state().view() {
            ViewMode::Review => self.render_review(ctx),
            ViewMode::Live => {
                self.update_camera_preview(ctx);
                self.render_live(ctx);
                ctx.request_repaint_after(Duration::from_millis(self.config.capture.preview_interval_ms));
            }
        }

        self.render_banner(ctx);
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        if !self.controller.state().loading() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        log::info!("Waiting up to {:?} for the submission in flight", SHUTDOWN_GRACE);
        let controller = &mut self.controller;
        let finished = tokio::task::block_in_place(|| {
            runtime.block_on(tokio::time::timeout(SHUTDOWN_GRACE, controller.wait_for_completion()))
        });
        if finished.is_err() {
            log::warn!("Submission still running at shutdown; abandoning it");
        }
    }
}

impl SnapScanApp {
    fn update_camera_preview(&mut self, ctx: &egui::Context) {
        let frame = self.surface.as_mut().and_then(|s| s.preview_frame());
        if let Some(frame) = frame {
            self.update_camera_texture(ctx, &frame);
        }
    }

    fn render_busy(&mut self, ctx: &egui::Context) {
        egui::CentralPanel::default()
            .frame(egui::Frame::none().fill(egui::Color32::BLACK))
            .show(ctx, |ui| {
                ui.centered_and_justified(|ui| {
                    ui.add(egui::Spinner::new().size(64.0).color(egui::Color32::from_rgb(37, 99, 235)));
                });
            });
    }

    fn render_review(&mut self, ctx: &egui::Context) {
        self.refresh_review_texture(ctx);

        let clicked = egui::CentralPanel::default()
            .frame(egui::Frame::none().fill(egui::Color32::BLACK))
            .show(ctx, |ui| {
                let full_rect = ui.max_rect();
                let response = ui.interact(full_rect, ui.id().with("review"), egui::Sense::click());

                match &self.review_texture {
                    Some(texture) => {
                        let display_size = fit_image_in_rect(texture.size_vec2(), full_rect.size());
                        let centered_rect = center_rect_in_rect(display_size, full_rect);
                        ui.painter().image(
                            texture.id(),
                            centered_rect,
                            egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
                            egui::Color32::WHITE,
                        );
                    }
                    None => {
                        ui.painter().text(
                            full_rect.center(),
                            egui::Align2::CENTER_CENTER,
                            "Preview unavailable",
                            egui::FontId::proportional(24.0),
                            egui::Color32::GRAY,
                        );
                    }
                }

                response.clicked()
            })
            .inner;

        if clicked {
            self.controller.toggle_review();
        }
    }

    fn render_live(&mut self, ctx: &egui::Context) {
        let screen_rect = ctx.screen_rect();
        let strip = control_strip_rect(screen_rect);

        egui::CentralPanel::default()
            .frame(egui::Frame::none())
            .show(ctx, |ui| {
                let full_rect = ui.max_rect();
                ui.painter().rect_filled(full_rect, 0.0, egui::Color32::from_rgb(20, 20, 20));

                if let Some(texture) = &self.camera_texture {
                    let display_size = fit_image_in_rect(texture.size_vec2(), full_rect.size());
                    let centered_rect = center_rect_in_rect(display_size, full_rect);
                    ui.painter().image(
                        texture.id(),
                        centered_rect,
                        egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
                        egui::Color32::WHITE,
                    );
                }

                // The surface's own message, shown as configured, while its error stands
                let message = self
                    .controller
                    .state()
                    .surface_error()
                    .and_then(|_| self.surface.as_ref()?.error_message());
                if let Some(message) = message {
                    let message_rect = egui::Rect::from_min_max(
                        full_rect.min + egui::vec2(UI_PADDING, UI_PADDING),
                        egui::pos2(strip.min.x - UI_PADDING, full_rect.max.y - UI_PADDING),
                    );
                    ui.allocate_ui_at_rect(message_rect, |ui| {
                        ui.centered_and_justified(|ui| {
                            ui.label(
                                egui::RichText::new(message)
                                    .color(egui::Color32::WHITE)
                                    .size(20.0),
                            );
                        });
                    });
                }
            });

        self.render_controls(ctx, strip);
    }

    // ============================================================================
    // CONTROL OVERLAY
    // ============================================================================
    fn render_controls(&mut self, ctx: &egui::Context, strip: egui::Rect) {
        egui::Area::new("control_strip")
            .fixed_pos(strip.min)
            .order(egui::Order::Middle)
            .interactable(false)
            .show(ctx, |ui| {
                ui.painter().rect_filled(strip, 0.0, egui::Color32::from_black_alpha(204));
            });

        let vertical = strip.height() > strip.width();
        let center = strip.center();
        let step = CAPTURE_BUTTON_RADIUS * 2.0 + UI_PADDING * 2.0;
        let offset = if vertical { egui::vec2(0.0, step) } else { egui::vec2(step, 0.0) };

        // Capture button stays present even with no camera; the controller ignores it then
        let capture_clicked = egui::Area::new("capture_btn")
            .fixed_pos(center - egui::vec2(CAPTURE_BUTTON_RADIUS, CAPTURE_BUTTON_RADIUS))
            .order(egui::Order::Foreground)
            .show(ctx, |ui| {
                circular_button(ui, CAPTURE_BUTTON_RADIUS, "Scan", egui::Color32::from_rgba_unmultiplied(70, 70, 80, 180), true)
            })
            .inner;

        if capture_clicked {
            match self.controller.trigger(surface_mut(&mut self.surface)) {
                TriggerResult::Started => log::debug!("Capture cycle started"),
                TriggerResult::Failed => {
                    self.banner = banner_for(&self.controller.state().request_state());
                }
                TriggerResult::Busy | TriggerResult::NoCaptureSurface => {}
            }
        }

        let can_switch = self.controller.state().can_switch_device();
        let switch_clicked = egui::Area::new("switch_btn")
            .fixed_pos(center - offset - egui::vec2(SMALL_BUTTON_RADIUS, SMALL_BUTTON_RADIUS))
            .order(egui::Order::Foreground)
            .show(ctx, |ui| {
                circular_button(ui, SMALL_BUTTON_RADIUS, "Switch", egui::Color32::from_rgba_unmultiplied(70, 70, 80, 180), can_switch)
            })
            .inner;

        if switch_clicked {
            self.controller.switch_device(surface_mut(&mut self.surface));
            self.camera_texture = None;
        }

        let torch_supported = self.surface.as_ref().is_some_and(|s| s.supports_torch());
        if torch_supported {
            let fill = if self.controller.state().torch_enabled() {
                egui::Color32::from_rgb(150, 130, 40)
            } else {
                egui::Color32::from_rgba_unmultiplied(70, 70, 80, 180)
            };
            let torch_clicked = egui::Area::new("torch_btn")
                .fixed_pos(center + offset - egui::vec2(SMALL_BUTTON_RADIUS, SMALL_BUTTON_RADIUS))
                .order(egui::Order::Foreground)
                .show(ctx, |ui| circular_button(ui, SMALL_BUTTON_RADIUS, "Torch", fill, true))
                .inner;

            if torch_clicked {
                self.controller.toggle_torch(surface_mut(&mut self.surface));
            }
        }

        self.render_thumbnail(ctx, center - offset * 2.0);
    }

    fn render_thumbnail(&mut self, ctx: &egui::Context, center: egui::Pos2) {
        if self.controller.state().image().is_none() {
            return;
        }
        self.refresh_review_texture(ctx);

        let Some(texture) = self.review_texture.clone() else {
            return;
        };

        let clicked = egui::Area::new("thumbnail")
            .fixed_pos(center - egui::vec2(THUMBNAIL_SIZE, THUMBNAIL_SIZE) / 2.0)
            .order(egui::Order::Foreground)
            .show(ctx, |ui| {
                let (rect, response) = ui.allocate_exact_size(
                    egui::vec2(THUMBNAIL_SIZE, THUMBNAIL_SIZE),
                    egui::Sense::click(),
                );
                let display_size = fit_image_in_rect(texture.size_vec2(), rect.size());
                ui.painter().image(
                    texture.id(),
                    center_rect_in_rect(display_size, rect),
                    egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
                    egui::Color32::WHITE,
                );
                if response.hovered() {
                    ui.ctx().set_cursor_icon(egui::CursorIcon::PointingHand);
                }
                response.clicked()
            })
            .inner;

        if clicked {
            self.controller.toggle_review();
        }
    }

    fn render_banner(&mut self, ctx: &egui::Context) {
        let timeout = Duration::from_secs(self.config.ui.result_banner_secs);
        if self.banner.as_ref().is_some_and(|b| b.shown_at.elapsed() > timeout) {
            self.banner = None;
        }

        if let Some(ref banner) = self.banner {
            egui::Area::new("result_banner")
                .anchor(egui::Align2::CENTER_TOP, egui::vec2(0.0, UI_PADDING * 3.0))
                .order(egui::Order::Tooltip)
                .show(ctx, |ui| {
                    egui::Frame::none()
                        .fill(if banner.success {
                            egui::Color32::from_rgb(40, 120, 40)
                        } else {
                            egui::Color32::from_rgb(180, 40, 40)
                        })
                        .rounding(8.0)
                        .inner_margin(egui::Margin::symmetric(20.0, 15.0))
                        .show(ui, |ui| {
                            ui.label(
                                egui::RichText::new(&banner.text)
                                    .color(egui::Color32::WHITE)
                                    .size(20.0),
                            );
                        });
                });
            ctx.request_repaint_after(Duration::from_millis(250));
        }
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Circular touch button; a disabled button is not drawn and never reports a click.
fn circular_button(ui: &mut egui::Ui, radius: f32, text: &str, base_fill: egui::Color32, enabled: bool) -> bool {
    let size = egui::vec2(radius * 2.0, radius * 2.0);
    let sense = if enabled { egui::Sense::click() } else { egui::Sense::hover() };
    let (rect, response) = ui.allocate_exact_size(size, sense);

    if !enabled || !ui.is_rect_visible(rect) {
        return false;
    }

    let painter = ui.painter();
    let center = rect.center();

    let (fill_color, stroke_color) = if response.is_pointer_button_down_on() {
        let r = base_fill.r().saturating_sub(30);
        let g = base_fill.g().saturating_sub(30);
        let b = base_fill.b().saturating_sub(30);
        (egui::Color32::from_rgb(r, g, b), egui::Color32::from_rgb(120, 120, 130))
    } else if response.hovered() {
        let r = base_fill.r().saturating_add(20);
        let g = base_fill.g().saturating_add(20);
        let b = base_fill.b().saturating_add(20);
        (egui::Color32::from_rgb(r, g, b), egui::Color32::from_rgb(150, 150, 160))
    } else {
        (base_fill, egui::Color32::from_rgb(100, 100, 110))
    };

    painter.circle(center, radius, fill_color, egui::Stroke::new(4.0, stroke_color));

    let font_id = egui::FontId::proportional(radius / 2.5);
    let galley = painter.layout_no_wrap(text.to_string(), font_id, egui::Color32::WHITE);
    painter.galley(center - galley.size() / 2.0, galley);

    if response.hovered() {
        ui.ctx().set_cursor_icon(egui::CursorIcon::PointingHand);
    }

    response.clicked()
}

/// Right-hand strip on landscape screens, bottom strip on portrait ones.
fn control_strip_rect(screen: egui::Rect) -> egui::Rect {
    if screen.width() > screen.height() {
        let width = (screen.width() * CONTROL_STRIP_FRACTION).max(CONTROL_STRIP_MIN);
        egui::Rect::from_min_max(egui::pos2(screen.max.x - width, screen.min.y), screen.max)
    } else {
        let height = (screen.height() * CONTROL_STRIP_FRACTION).max(CONTROL_STRIP_MIN);
        egui::Rect::from_min_max(egui::pos2(screen.min.x, screen.max.y - height), screen.max)
    }
}

fn fit_image_in_rect(image_size: egui::Vec2, container_size: egui::Vec2) -> egui::Vec2 {
    let scale = (container_size.x / image_size.x).min(container_size.y / image_size.y);
    image_size * scale
}

fn center_rect_in_rect(content_size: egui::Vec2, container: egui::Rect) -> egui::Rect {
    let offset = (container.size() - content_size) * 0.5;
    egui::Rect::from_min_size(container.min + offset, content_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CaptureError, UploadError};
    use serde_json::json;

    #[test]
    fn test_banner_for_success_shows_payload() {
        let value = json!({"label": "cat"});
        let banner = banner_for(&RequestState::Succeeded(&value)).unwrap();
        assert!(banner.success);
        assert_eq!(banner.text, r#"✓ {"label":"cat"}"#);
    }

    #[test]
    fn test_banner_for_failure_hides_diagnostics() {
        let err = CaptureError::Transport(UploadError::Request(
            "dns error: http://internal-host".to_string(),
        ));
        let banner = banner_for(&RequestState::Failed(&err)).unwrap();
        assert!(!banner.success);
        assert_eq!(banner.text, "✗ Error uploading photo");
    }

    #[test]
    fn test_no_banner_until_settled() {
        assert!(banner_for(&RequestState::Idle).is_none());
        assert!(banner_for(&RequestState::InFlight).is_none());
    }

    #[test]
    fn test_banner_truncates_long_payload() {
        let value = json!({ "text": "x".repeat(500) });
        let banner = banner_for(&RequestState::Succeeded(&value)).unwrap();
        assert_eq!(banner.text.chars().count(), BANNER_MAX_CHARS + 1);
        assert!(banner.text.ends_with('…'));
    }

    #[test]
    fn test_control_strip_follows_orientation() {
        let landscape = control_strip_rect(egui::Rect::from_min_size(egui::Pos2::ZERO, egui::vec2(1000.0, 500.0)));
        assert_eq!(landscape.width(), 200.0);
        assert_eq!(landscape.max.x, 1000.0);

        let portrait = control_strip_rect(egui::Rect::from_min_size(egui::Pos2::ZERO, egui::vec2(400.0, 800.0)));
        assert_eq!(portrait.height(), 160.0);
        assert_eq!(portrait.max.y, 800.0);
    }

    #[test]
    fn test_fit_image_keeps_aspect() {
        let fitted = fit_image_in_rect(egui::vec2(640.0, 480.0), egui::vec2(800.0, 800.0));
        assert_eq!(fitted, egui::vec2(800.0, 600.0));
        let rect = center_rect_in_rect(fitted, egui::Rect::from_min_size(egui::Pos2::ZERO, egui::vec2(800.0, 800.0)));
        assert_eq!(rect.min, egui::pos2(0.0, 100.0));
    }
}

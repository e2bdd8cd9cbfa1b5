use egui::{Context, TextureOptions};
use image::RgbImage;
use crate::SnapScanApp;

fn color_image(image: &RgbImage) -> egui::ColorImage {
    let size = [image.width() as usize, image.height() as usize];
    let pixels = image.as_flat_samples();
    egui::ColorImage::from_rgb(size, pixels.as_slice())
}

impl SnapScanApp {
    pub fn update_camera_texture(&mut self, ctx: &Context, image: &RgbImage) {
        // Skip empty frames so the view doesn't flash
        if image.width() == 0 || image.height() == 0 {
            return;
        }

        let size = [image.width() as usize, image.height() as usize];
        let frame = color_image(image);

        // Reuse the texture while the stream keeps its resolution
        if let Some(texture) = self.camera_texture.as_mut().filter(|t| t.size() == size) {
            texture.set(frame, TextureOptions::LINEAR);
            return;
        }
        self.camera_texture = Some(ctx.load_texture("camera_preview", frame, TextureOptions::LINEAR));
    }

    /// Decode the last capture into the review texture, once per capture.
    pub fn refresh_review_texture(&mut self, ctx: &Context) {
        let Some(captured) = self.controller.state().image() else {
            return;
        };
        if self.review_source == Some(captured.captured_at) {
            return;
        }

        let captured_at = captured.captured_at;
        let decoded = image::load_from_memory(&captured.payload.bytes);
        self.review_source = Some(captured_at);

        match decoded {
            Ok(img) => {
                let frame = color_image(&img.to_rgb8());
                if let Some(texture) = self.review_texture.as_mut() {
                    texture.set(frame, TextureOptions::LINEAR);
                } else {
                    self.review_texture = Some(ctx.load_texture("captured_image", frame, TextureOptions::LINEAR));
                }
            }
            Err(e) => {
                log::warn!("Captured image could not be decoded for review: {}", e);
                self.review_texture = None;
            }
        }
    }
}

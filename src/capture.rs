//! Screen capture.
//!
//! The pipeline only depends on the [`ScreenCapture`] trait. [`DisplayCapture`]
//! implements it for the main display on macOS.

use crate::types::{CaptureError, RasterImage};
use std::time::Instant;
use tracing::{debug, trace};

pub type DisplayId = u32;

/// Produces one raster per call
#[async_trait::async_trait]
pub trait ScreenCapture: Send + Sync {
    async fn capture_once(&self) -> Result<RasterImage, CaptureError>;
}

#[cfg(target_os = "macos")]
mod macos {
    use super::*;
    use core_graphics::display::{CGDisplayBounds, CGMainDisplayID};
    use core_graphics::geometry::{CGPoint, CGRect, CGSize};
    use core_graphics::image::CGImage;
    use core_graphics::window::{kCGWindowImageBestResolution, CGWindowListCreateImage};
    use foreign_types_shared::ForeignType;

    pub fn main_display() -> Option<DisplayId> {
        let id = unsafe { CGMainDisplayID() };
        let bounds = unsafe { CGDisplayBounds(id) };
        (bounds.size.width > 0.0 && bounds.size.height > 0.0).then_some(id)
    }

    pub fn capture_display(display_id: DisplayId) -> Result<RasterImage, CaptureError> {
        let bounds = unsafe { CGDisplayBounds(display_id) };

        let rect = CGRect::new(
            &CGPoint::new(bounds.origin.x, bounds.origin.y),
            &CGSize::new(bounds.size.width, bounds.size.height),
        );

        // Window ID 0 with no list options composites the whole display
        let cg_image: CGImage = unsafe {
            let image_ref = CGWindowListCreateImage(rect, 0, 0, kCGWindowImageBestResolution);
            if image_ref.is_null() {
                return Err(CaptureError::Failed(format!(
                    "display {} returned no image (is screen recording permitted?)",
                    display_id
                )));
            }
            CGImage::from_ptr(image_ref)
        };

        to_rgb(&cg_image)
    }

    /// CGImage pixels are BGRA on macOS
    fn to_rgb(cg_image: &CGImage) -> Result<RasterImage, CaptureError> {
        let width = cg_image.width();
        let height = cg_image.height();
        let bytes_per_row = cg_image.bytes_per_row();
        let bytes_per_pixel = cg_image.bits_per_pixel() / 8;

        let data = cg_image.data();
        let bytes = data.bytes();
        if bytes.is_empty() || bytes_per_pixel < 3 || width == 0 || height == 0 {
            return Err(CaptureError::Failed("captured image has no pixel data".to_string()));
        }
        if bytes.len() < (height - 1) * bytes_per_row + width * bytes_per_pixel {
            return Err(CaptureError::Failed("pixel buffer shorter than image".to_string()));
        }

        let mut rgb = Vec::with_capacity(width * height * 3);
        for y in 0..height {
            let row = &bytes[y * bytes_per_row..];
            for x in 0..width {
                let px = &row[x * bytes_per_pixel..x * bytes_per_pixel + 3];
                rgb.extend_from_slice(&[px[2], px[1], px[0]]);
            }
        }

        RasterImage::from_raw(width as u32, height as u32, rgb)
            .ok_or_else(|| CaptureError::Failed("pixel buffer size mismatch".to_string()))
    }
}

#[cfg(not(target_os = "macos"))]
mod macos {
    use super::*;

    pub fn main_display() -> Option<DisplayId> {
        None
    }

    pub fn capture_display(_display_id: DisplayId) -> Result<RasterImage, CaptureError> {
        Err(CaptureError::Unavailable(
            "display capture is only supported on macOS".to_string(),
        ))
    }
}

/// Captures a whole display
pub struct DisplayCapture {
    display_id: DisplayId,
}

impl DisplayCapture {
    /// Capture the main display.
    ///
    /// Performs one test capture so that a missing display or missing
    /// permission is reported at startup rather than on every tick.
    pub fn main_display() -> Result<Self, CaptureError> {
        let display_id = macos::main_display()
            .ok_or_else(|| CaptureError::Unavailable("no main display found".to_string()))?;

        let probe = macos::capture_display(display_id)
            .map_err(|e| CaptureError::Unavailable(e.to_string()))?;
        debug!(
            "Display {} available ({}x{})",
            display_id,
            probe.width(),
            probe.height()
        );

        Ok(Self { display_id })
    }

    pub fn display_id(&self) -> DisplayId {
        self.display_id
    }
}

#[async_trait::async_trait]
impl ScreenCapture for DisplayCapture {
    async fn capture_once(&self) -> Result<RasterImage, CaptureError> {
        let display_id = self.display_id;
        trace!("Capturing display {}", display_id);

        let start = Instant::now();
        let result = tokio::task::spawn_blocking(move || macos::capture_display(display_id))
            .await
            .map_err(|e| CaptureError::Failed(format!("capture task failed: {}", e)))?;

        if let Ok(image) = &result {
            debug!(
                "Display {} captured {}x{} in {:?}",
                display_id,
                image.width(),
                image.height(),
                start.elapsed()
            );
        }
        result
    }
}

use ab_glyph::{FontArc, PxScale};
use image::{imageops::FilterType, DynamicImage, ImageFormat, Rgb, Rgba, RgbaImage};
use imageproc::{
    drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
    rect::Rect,
};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::{
    config::RenderConfig,
    detection::DetectionResult,
    labels::LabelTable,
    tensor::Size,
};

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Failed to read font {path:?}: {source}")]
    FontRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid font file {0:?}")]
    InvalidFont(PathBuf),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

/// 2D drawing surface the detections are painted on.
pub trait Canvas {
    fn size(&self) -> Size;
    fn stroke_rect(&mut self, x: f32, y: f32, width: f32, height: f32, color: Rgb<u8>);
    fn fill_text(&mut self, text: &str, x: f32, y: f32, color: Rgb<u8>);
}

/// Draws one rectangle and one label per detection and returns how many
/// detections were drawn.
///
/// Boxes live in `tensor_size` coordinates and are scaled onto the canvas;
/// when both sizes agree they are drawn verbatim.
pub fn render<C: Canvas>(
    detections: &DetectionResult,
    canvas: &mut C,
    tensor_size: Size,
    labels: &LabelTable,
) -> usize {
    let canvas_size = canvas.size();
    let sx = canvas_size.width as f32 / tensor_size.width.max(1) as f32;
    let sy = canvas_size.height as f32 / tensor_size.height.max(1) as f32;

    let mut drawn = 0;
    for detection in detections {
        let bbox = detection.bbox.scaled(sx, sy);
        let color = labels.color(detection.class_id);
        canvas.stroke_rect(bbox.x, bbox.y, bbox.width, bbox.height, color);
        canvas.fill_text(&detection.label, bbox.x, bbox.y, color);
        drawn += 1;
    }

    tracing::debug!(
        "Rendered {} detections onto {} canvas (scale {:.3}x{:.3})",
        drawn,
        canvas_size,
        sx,
        sy
    );
    drawn
}

/// Raster canvas: the displayed photo plus an optional transparent overlay
/// layer receiving the same strokes.
pub struct ImageCanvas {
    image: RgbaImage,
    overlay: Option<RgbaImage>,
    font: FontArc,
    font_scale: PxScale,
    line_width: u32,
}

impl ImageCanvas {
    pub fn new(
        background: DynamicImage,
        font: FontArc,
        font_size: f32,
        line_width: u32,
        with_overlay: bool,
    ) -> Self {
        let image = background.to_rgba8();
        let overlay = with_overlay.then(|| RgbaImage::new(image.width(), image.height()));
        Self {
            image,
            overlay,
            font,
            font_scale: PxScale::from(font_size),
            line_width: line_width.max(1),
        }
    }

    /// Displays the asset at `render.display` size (native size when unset).
    ///
    /// A missing or undecodable asset yields a blank canvas so the pipeline
    /// itself reports the fetch or decode failure.
    pub fn from_config(
        asset: Option<&[u8]>,
        render_config: &RenderConfig,
    ) -> Result<Self, RenderError> {
        let background = display_background(asset, render_config.display);
        let font = load_font(&render_config.font_path)?;

        Ok(Self::new(
            background,
            font,
            render_config.font_size,
            render_config.line_width,
            render_config.overlay_path.is_some(),
        ))
    }

    /// Writes the annotated photo and, if present, the overlay layer.
    pub fn save(&self, output_path: &Path, overlay_path: Option<&Path>) -> Result<(), RenderError> {
        let format = ImageFormat::from_path(output_path)?;
        if format == ImageFormat::Jpeg {
            DynamicImage::ImageRgba8(self.image.clone())
                .to_rgb8()
                .save_with_format(output_path, format)?;
        } else {
            self.image.save_with_format(output_path, format)?;
        }
        tracing::info!("Annotated image written to {:?}", output_path);

        if let (Some(overlay), Some(path)) = (&self.overlay, overlay_path) {
            overlay.save_with_format(path, ImageFormat::Png)?;
            tracing::info!("Overlay layer written to {:?}", path);
        }
        Ok(())
    }

    fn layers(&mut self) -> impl Iterator<Item = &mut RgbaImage> {
        std::iter::once(&mut self.image).chain(self.overlay.as_mut())
    }
}

impl Canvas for ImageCanvas {
    fn size(&self) -> Size {
        Size::new(self.image.width(), self.image.height())
    }

    fn stroke_rect(&mut self, x: f32, y: f32, width: f32, height: f32, color: Rgb<u8>) {
        let color = Rgba([color[0], color[1], color[2], 255]);
        let x = x.round() as i32;
        let y = y.round() as i32;
        let width = width.round().max(1.0) as u32;
        let height = height.round().max(1.0) as u32;
        let line_width = self.line_width;

        for layer in self.layers() {
            for inset in 0..line_width {
                let inner_width = width.saturating_sub(2 * inset);
                let inner_height = height.saturating_sub(2 * inset);
                if inner_width == 0 || inner_height == 0 {
                    break;
                }
                let rect = Rect::at(x + inset as i32, y + inset as i32)
                    .of_size(inner_width, inner_height);
                draw_hollow_rect_mut(layer, rect, color);
            }
        }
    }

    fn fill_text(&mut self, text: &str, x: f32, y: f32, color: Rgb<u8>) {
        let (text_width, text_height) = text_size(self.font_scale, &self.font, text);
        let x = x.round() as i32;
        let y = (y.round() as i32 - text_height as i32 - 4).max(0);
        let color = Rgba([color[0], color[1], color[2], 255]);
        let background = Rgba([0, 0, 0, 180]);
        let font = self.font.clone();
        let scale = self.font_scale;

        for layer in self.layers() {
            draw_filled_rect_mut(
                layer,
                Rect::at(x, y).of_size(text_width.max(1) + 4, text_height.max(1) + 4),
                background,
            );
            draw_text_mut(layer, color, x + 2, y + 2, scale, &font, text);
        }
    }
}

fn display_background(asset: Option<&[u8]>, display: Option<Size>) -> DynamicImage {
    let decoded = asset.and_then(|bytes| match image::load_from_memory(bytes) {
        Ok(img) => Some(img),
        Err(e) => {
            tracing::warn!("Asset not decodable ({}), drawing on a blank canvas", e);
            None
        }
    });

    match (decoded, display) {
        (Some(img), Some(display)) => {
            img.resize_exact(display.width, display.height, FilterType::Triangle)
        }
        (Some(img), None) => img,
        (None, display) => {
            let display = display.unwrap_or(Size::new(300, 300));
            DynamicImage::new_rgb8(display.width, display.height)
        }
    }
}

pub fn load_font(path: &Path) -> Result<FontArc, RenderError> {
    let data = std::fs::read(path).map_err(|source| RenderError::FontRead {
        path: path.to_path_buf(),
        source,
    })?;
    FontArc::try_from_vec(data).map_err(|_| RenderError::InvalidFont(path.to_path_buf()))
}

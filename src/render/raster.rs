use ab_glyph::{point, Font, FontVec, GlyphId, PxScale, ScaleFont};
use image::{imageops::FilterType, Rgba, RgbaImage};
use qrcode::{Color, EcLevel, QrCode};

use crate::error::ExportError;

use super::{
    assets::ImageSet,
    fonts::Fonts,
    layout::{CardLayout, Element, Fit, Rect, TextAlign},
};

const QR_DARK: [u8; 4] = [0, 0, 0, 255];

/// QR modules of `payload` at the highest error correction level, row-major,
/// `true` for dark.
pub fn qr_modules(payload: &str) -> Result<(usize, Vec<bool>), ExportError> {
    let code = QrCode::with_error_correction_level(payload.as_bytes(), EcLevel::H)
        .map_err(|e| ExportError::Qr(e.to_string()))?;
    let width = code.width();
    let modules = code
        .to_colors()
        .into_iter()
        .map(|c| c == Color::Dark)
        .collect();
    Ok((width, modules))
}

/// Pixel rectangle on the canvas, in device pixels
#[derive(Debug, Clone, Copy)]
struct PxRect {
    x: f32,
    y: f32,
    w: f32,
    h: f32,
}

struct Canvas {
    image: RgbaImage,
    scale: f32,
}

fn blend(dst: &mut Rgba<u8>, src: [u8; 4], coverage: f32) {
    let sa = src[3] as f32 / 255.0 * coverage.clamp(0.0, 1.0);
    if sa <= 0.0 {
        return;
    }
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    for i in 0..3 {
        let c = (src[i] as f32 * sa + dst[i] as f32 * da * (1.0 - sa)) / out_a;
        dst[i] = c.round().clamp(0.0, 255.0) as u8;
    }
    dst[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
}

impl Canvas {
    fn new(width: f32, height: f32, scale: f32) -> Self {
        let w = (width * scale).round().max(1.0) as u32;
        let h = (height * scale).round().max(1.0) as u32;
        Self {
            // Transparent background
            image: RgbaImage::new(w, h),
            scale,
        }
    }

    fn to_px(&self, rect: &Rect) -> PxRect {
        PxRect {
            x: rect.x * self.scale,
            y: rect.y * self.scale,
            w: rect.width * self.scale,
            h: rect.height * self.scale,
        }
    }

    fn put(&mut self, x: i64, y: i64, color: [u8; 4], coverage: f32) {
        if x < 0 || y < 0 || x >= self.image.width() as i64 || y >= self.image.height() as i64 {
            return;
        }
        blend(self.image.get_pixel_mut(x as u32, y as u32), color, coverage);
    }

    fn fill_px(&mut self, r: PxRect, color: [u8; 4]) {
        let x0 = r.x.round() as i64;
        let y0 = r.y.round() as i64;
        let x1 = (r.x + r.w).round() as i64;
        let y1 = (r.y + r.h).round() as i64;
        for y in y0.max(0)..y1.min(self.image.height() as i64) {
            for x in x0.max(0)..x1.min(self.image.width() as i64) {
                self.put(x, y, color, 1.0);
            }
        }
    }

    fn fill(&mut self, rect: &Rect, color: [u8; 4]) {
        let r = self.to_px(rect);
        self.fill_px(r, color);
    }

    fn border(&mut self, rect: &Rect, color: [u8; 4], width: f32) {
        let r = self.to_px(rect);
        let t = (width * self.scale).max(1.0);
        self.fill_px(PxRect { h: t, ..r }, color);
        self.fill_px(PxRect { y: r.y + r.h - t, h: t, ..r }, color);
        self.fill_px(PxRect { w: t, ..r }, color);
        self.fill_px(PxRect { x: r.x + r.w - t, w: t, ..r }, color);
    }

    fn image(&mut self, rect: &Rect, source: &RgbaImage, fit: Fit, opacity: f32) {
        let target = self.to_px(rect);
        let (iw, ih) = (source.width() as f32, source.height() as f32);
        if iw == 0.0 || ih == 0.0 || target.w <= 0.0 || target.h <= 0.0 {
            return;
        }

        let (dw, dh) = match fit {
            Fit::Stretch => (target.w, target.h),
            Fit::Cover => {
                let s = (target.w / iw).max(target.h / ih);
                (iw * s, ih * s)
            }
            Fit::Contain => {
                let s = (target.w / iw).min(target.h / ih);
                (iw * s, ih * s)
            }
        };
        let resized = image::imageops::resize(
            source,
            dw.round().max(1.0) as u32,
            dh.round().max(1.0) as u32,
            FilterType::Triangle,
        );

        let ox = (target.x + (target.w - dw) / 2.0).round() as i64;
        let oy = (target.y + (target.h - dh) / 2.0).round() as i64;
        let clip_x = (target.x.round() as i64, (target.x + target.w).round() as i64);
        let clip_y = (target.y.round() as i64, (target.y + target.h).round() as i64);

        for (px, py, pixel) in resized.enumerate_pixels() {
            let x = ox + px as i64;
            let y = oy + py as i64;
            if x < clip_x.0 || x >= clip_x.1 || y < clip_y.0 || y >= clip_y.1 {
                continue;
            }
            self.put(x, y, pixel.0, opacity);
        }
    }

    fn qr(&mut self, rect: &Rect, payload: &str) -> Result<(), ExportError> {
        let (width, modules) = qr_modules(payload)?;
        let r = self.to_px(rect);
        let module = r.w.min(r.h) / width as f32;

        for (i, dark) in modules.iter().enumerate() {
            if !dark {
                continue;
            }
            let (mx, my) = ((i % width) as f32, (i / width) as f32);
            let x0 = (r.x + mx * module).round();
            let y0 = (r.y + my * module).round();
            let x1 = (r.x + (mx + 1.0) * module).round();
            let y1 = (r.y + (my + 1.0) * module).round();
            self.fill_px(
                PxRect {
                    x: x0,
                    y: y0,
                    w: x1 - x0,
                    h: y1 - y0,
                },
                QR_DARK,
            );
        }
        Ok(())
    }

    fn text(
        &mut self,
        rect: &Rect,
        text: &str,
        size: f32,
        font: &FontVec,
        color: [u8; 4],
        align: TextAlign,
    ) {
        let r = self.to_px(rect);
        let px_scale = PxScale::from(size * self.scale);
        let scaled = font.as_scaled(px_scale);
        let line_height = scaled.height() * 1.15;

        for (i, line) in wrap(text, r.w, font, px_scale).iter().enumerate() {
            let line_width = measure(line, font, px_scale);
            let mut x = match align {
                TextAlign::Left => r.x,
                TextAlign::Center => r.x + (r.w - line_width) / 2.0,
            };
            let baseline = r.y + scaled.ascent() + i as f32 * line_height;

            let mut previous: Option<GlyphId> = None;
            for c in line.chars() {
                let id = scaled.glyph_id(c);
                if let Some(prev) = previous {
                    x += scaled.kern(prev, id);
                }
                let glyph = id.with_scale_and_position(px_scale, point(x, baseline));
                x += scaled.h_advance(id);
                previous = Some(id);

                if let Some(outlined) = font.outline_glyph(glyph) {
                    let bounds = outlined.px_bounds();
                    outlined.draw(|gx, gy, coverage| {
                        self.put(
                            bounds.min.x as i64 + gx as i64,
                            bounds.min.y as i64 + gy as i64,
                            color,
                            coverage,
                        );
                    });
                }
            }
        }
    }
}

fn measure(text: &str, font: &FontVec, px_scale: PxScale) -> f32 {
    let scaled = font.as_scaled(px_scale);
    let mut width = 0.0;
    let mut previous: Option<GlyphId> = None;
    for c in text.chars() {
        let id = scaled.glyph_id(c);
        if let Some(prev) = previous {
            width += scaled.kern(prev, id);
        }
        width += scaled.h_advance(id);
        previous = Some(id);
    }
    width
}

/// Greedy word wrap; a single word wider than `max_width` gets its own line.
fn wrap(text: &str, max_width: f32, font: &FontVec, px_scale: PxScale) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let candidate = if current.is_empty() {
            word.to_owned()
        } else {
            format!("{} {}", current, word)
        };

        if !current.is_empty() && measure(&candidate, font, px_scale) > max_width {
            lines.push(std::mem::replace(&mut current, word.to_owned()));
        } else {
            current = candidate;
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Paints `layout` onto a transparent bitmap of `width`×`height` CSS pixels
/// at `scale` device pixels per CSS pixel.
///
/// Images missing from `images` and text without a usable font are skipped.
pub fn rasterize(
    layout: &CardLayout,
    width: f32,
    height: f32,
    scale: u32,
    fonts: &Fonts,
    images: &ImageSet,
) -> Result<RgbaImage, ExportError> {
    let mut canvas = Canvas::new(width, height, scale.max(1) as f32);

    for element in &layout.elements {
        match element {
            Element::Fill { rect, color } => canvas.fill(rect, *color),
            Element::Border { rect, color, width } => canvas.border(rect, *color, *width),
            Element::Image {
                rect,
                source,
                fit,
                opacity,
            } => {
                if let Some(image) = images.get(source) {
                    canvas.image(rect, image, *fit, *opacity);
                }
            }
            Element::Qr { rect, payload } => canvas.qr(rect, payload)?,
            Element::Text {
                rect,
                text,
                size,
                style,
                color,
                align,
            } => match fonts.get(*style) {
                Some(font) => canvas.text(rect, text, *size, font, *color, *align),
                None => log::debug!("No font for {:?}, skipping text", style),
            },
        }
    }

    Ok(canvas.image)
}

use kurbo::{Affine, Point, Rect};

use crate::{
    composite::{PremulRgba8, over},
    core::Rgba8Premul,
    error::{TeatroError, TeatroResult},
};

/// The canvas the runtime renders into: premultiplied RGBA8, row-major,
/// tightly packed.
#[derive(Clone, Debug)]
pub struct FrameRgba {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl FrameRgba {
    pub fn new(width: u32, height: u32) -> TeatroResult<Self> {
        let len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(4))
            .ok_or_else(|| TeatroError::validation("frame buffer size overflow"))?;
        Ok(Self {
            width,
            height,
            data: vec![0; len],
        })
    }

    pub fn pixel(&self, x: u32, y: u32) -> PremulRgba8 {
        let i = ((y as usize) * (self.width as usize) + (x as usize)) * 4;
        [
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ]
    }

    fn blend(&mut self, x: u32, y: u32, src: PremulRgba8, opacity: f32) {
        let i = ((y as usize) * (self.width as usize) + (x as usize)) * 4;
        let dst = [
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ];
        let out = over(dst, src, opacity);
        self.data[i..i + 4].copy_from_slice(&out);
    }
}

/// Borrowed view of a decoded sprite: premultiplied RGBA8 pixels.
#[derive(Clone, Copy, Debug)]
pub struct ImageRef<'a> {
    pub width: u32,
    pub height: u32,
    pub data: &'a [u8],
}

impl<'a> ImageRef<'a> {
    pub fn sample(&self, x: i64, y: i64) -> Option<PremulRgba8> {
        if x < 0 || y < 0 || x >= i64::from(self.width) || y >= i64::from(self.height) {
            return None;
        }
        let i = ((y as usize) * (self.width as usize) + (x as usize)) * 4;
        Some([
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ])
    }
}

/// Immediate-mode painter over a frame, with a current world-to-device
/// transform in the style of a 2D canvas context.
pub struct Painter<'a> {
    frame: &'a mut FrameRgba,
    transform: Affine,
}

impl<'a> Painter<'a> {
    pub fn new(frame: &'a mut FrameRgba) -> Self {
        Self {
            frame,
            transform: Affine::IDENTITY,
        }
    }

    pub fn set_transform(&mut self, transform: Affine) {
        self.transform = transform;
    }

    pub fn transform(&self) -> Affine {
        self.transform
    }

    pub fn clear(&mut self, color: Rgba8Premul) {
        for px in self.frame.data.chunks_exact_mut(4) {
            px.copy_from_slice(&color.as_array());
        }
    }

    /// Draw `image` with `place` mapping image-pixel coordinates to world
    /// coordinates, composed with the current transform. Inverse-mapped
    /// nearest-neighbor sampling.
    pub fn draw_image(&mut self, image: ImageRef<'_>, place: Affine, opacity: f32) {
        let w = f64::from(image.width);
        let h = f64::from(image.height);
        self.raster(place, Rect::new(0.0, 0.0, w, h), opacity, |x, y| {
            image.sample(x.floor() as i64, y.floor() as i64)
        });
    }

    /// Draw a sub-rectangle of `image` (used for tile-border cropping).
    pub fn draw_image_cropped(
        &mut self,
        image: ImageRef<'_>,
        crop: Rect,
        place: Affine,
        opacity: f32,
    ) {
        self.raster(place, Rect::new(0.0, 0.0, crop.width(), crop.height()), opacity, |x, y| {
            image.sample((crop.x0 + x).floor() as i64, (crop.y0 + y).floor() as i64)
        });
    }

    /// Fill a local-space rectangle placed into world space by `place`.
    pub fn fill_rect(&mut self, place: Affine, rect: Rect, color: Rgba8Premul, opacity: f32) {
        let src = color.as_array();
        self.raster(place, rect, opacity, |_, _| Some(src));
    }

    /// Stroke the outline of a local-space rectangle, `thickness` in local
    /// units.
    pub fn stroke_rect(
        &mut self,
        place: Affine,
        rect: Rect,
        thickness: f64,
        color: Rgba8Premul,
        opacity: f32,
    ) {
        let t = thickness.max(0.5);
        let edges = [
            Rect::new(rect.x0 - t, rect.y0 - t, rect.x1 + t, rect.y0),
            Rect::new(rect.x0 - t, rect.y1, rect.x1 + t, rect.y1 + t),
            Rect::new(rect.x0 - t, rect.y0, rect.x0, rect.y1),
            Rect::new(rect.x1, rect.y0, rect.x1 + t, rect.y1),
        ];
        for edge in edges {
            self.fill_rect(place, edge, color, opacity);
        }
    }

    fn raster(
        &mut self,
        place: Affine,
        local: Rect,
        opacity: f32,
        sample: impl Fn(f64, f64) -> Option<PremulRgba8>,
    ) {
        if opacity <= 0.0 || local.width() <= 0.0 || local.height() <= 0.0 {
            return;
        }
        let full = self.transform * place;
        let det = full.determinant();
        if !det.is_finite() || det.abs() < 1e-12 {
            return;
        }
        let inv = full.inverse();

        // Device bounding box of the mapped corners.
        let corners = [
            full * Point::new(local.x0, local.y0),
            full * Point::new(local.x1, local.y0),
            full * Point::new(local.x0, local.y1),
            full * Point::new(local.x1, local.y1),
        ];
        let min_x = corners.iter().map(|p| p.x).fold(f64::INFINITY, f64::min);
        let max_x = corners
            .iter()
            .map(|p| p.x)
            .fold(f64::NEG_INFINITY, f64::max);
        let min_y = corners.iter().map(|p| p.y).fold(f64::INFINITY, f64::min);
        let max_y = corners
            .iter()
            .map(|p| p.y)
            .fold(f64::NEG_INFINITY, f64::max);

        let x0 = min_x.floor().max(0.0) as u32;
        let y0 = min_y.floor().max(0.0) as u32;
        let x1 = (max_x.ceil().min(self.frame.width as f64) as u32).min(self.frame.width);
        let y1 = (max_y.ceil().min(self.frame.height as f64) as u32).min(self.frame.height);

        for dy in y0..y1 {
            for dx in x0..x1 {
                let p = inv * Point::new(f64::from(dx) + 0.5, f64::from(dy) + 0.5);
                if p.x < local.x0 || p.x >= local.x1 || p.y < local.y0 || p.y >= local.y1 {
                    continue;
                }
                if let Some(src) = sample(p.x - local.x0, p.y - local.y0) {
                    self.frame.blend(dx, dy, src, opacity);
                }
            }
        }
    }
}

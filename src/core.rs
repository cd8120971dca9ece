use crate::error::{TeatroError, TeatroResult};

pub use kurbo::{Affine, Point, Rect, Vec2};

/// Horizontal scroll reference speed, in world pixels per second of scene
/// time. Parallax layers multiply this by their `scroll_speed`.
pub const SCROLL_PX_PER_SEC: f64 = 180.0;

/// Output canvas dimensions in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

impl ScreenSize {
    pub fn new(width: u32, height: u32) -> TeatroResult<Self> {
        if width == 0 || height == 0 {
            return Err(TeatroError::validation("screen width/height must be > 0"));
        }
        Ok(Self { width, height })
    }

    pub fn width_f(self) -> f64 {
        f64::from(self.width)
    }

    pub fn height_f(self) -> f64 {
        f64::from(self.height)
    }
}

/// Premultiplied RGBA8 (r,g,b already multiplied by a).
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Rgba8Premul {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba8Premul {
    pub fn transparent() -> Self {
        Self {
            r: 0,
            g: 0,
            b: 0,
            a: 0,
        }
    }

    pub fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub fn as_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

/// One animatable coordinate of a layer's per-frame transform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Coordinate {
    X,
    Y,
    Scale,
    Rotation,
    Opacity,
}

impl Coordinate {
    fn bit(self) -> u8 {
        match self {
            Self::X => 1 << 0,
            Self::Y => 1 << 1,
            Self::Scale => 1 << 2,
            Self::Rotation => 1 << 3,
            Self::Opacity => 1 << 4,
        }
    }
}

/// Per-frame transform accumulator a layer's behaviors fold into.
///
/// Coordinates start at identity (x=0, y=0, scale=1, rotation=0, opacity=1)
/// and track which of them any behavior has written, so assign-or-combine
/// behaviors (pulse) can tell first writers from later ones.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LayerTransform {
    pub x: f64,
    pub y: f64,
    pub scale: f64,
    pub rotation_deg: f64,
    pub opacity: f64,
    written: u8,
}

impl Default for LayerTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl LayerTransform {
    pub fn identity() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            scale: 1.0,
            rotation_deg: 0.0,
            opacity: 1.0,
            written: 0,
        }
    }

    pub fn get(&self, coord: Coordinate) -> f64 {
        match coord {
            Coordinate::X => self.x,
            Coordinate::Y => self.y,
            Coordinate::Scale => self.scale,
            Coordinate::Rotation => self.rotation_deg,
            Coordinate::Opacity => self.opacity,
        }
    }

    pub fn written(&self, coord: Coordinate) -> bool {
        self.written & coord.bit() != 0
    }

    /// Additive delta, the default composition rule.
    pub fn add(&mut self, coord: Coordinate, delta: f64) {
        let slot = self.slot(coord);
        *slot += delta;
        self.written |= coord.bit();
    }

    /// Absolute write, discarding earlier contributions to the coordinate.
    pub fn assign(&mut self, coord: Coordinate, value: f64) {
        let slot = self.slot(coord);
        *slot = value;
        self.written |= coord.bit();
    }

    /// Pulse composition: assign when the coordinate is untouched, otherwise
    /// multiply for scale/opacity and add for x/y/rotation.
    pub fn pulse(&mut self, coord: Coordinate, value: f64) {
        if !self.written(coord) {
            self.assign(coord, value);
            return;
        }
        match coord {
            Coordinate::Scale | Coordinate::Opacity => {
                let slot = self.slot(coord);
                *slot *= value;
            }
            Coordinate::X | Coordinate::Y | Coordinate::Rotation => {
                let slot = self.slot(coord);
                *slot += value;
            }
        }
        self.written |= coord.bit();
    }

    fn slot(&mut self, coord: Coordinate) -> &mut f64 {
        match coord {
            Coordinate::X => &mut self.x,
            Coordinate::Y => &mut self.y,
            Coordinate::Scale => &mut self.scale,
            Coordinate::Rotation => &mut self.rotation_deg,
            Coordinate::Opacity => &mut self.opacity,
        }
    }
}

use kurbo::{Affine, Point};

use crate::{
    core::ScreenSize,
    error::{TeatroError, TeatroResult},
};

pub const ZOOM_MIN: f64 = 0.05;
pub const ZOOM_MAX: f64 = 20.0;

#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize)]
pub struct CameraState {
    pub zoom: f64,
    pub pan_x: f64,
    pub pan_y: f64,
}

/// Single source of truth for the editor camera. Zoom is always finite and
/// inside `[ZOOM_MIN, ZOOM_MAX]`; pan is always finite. Invalid input is
/// rejected and the prior value retained.
pub struct CameraController {
    state: CameraState,
    listeners: Vec<Box<dyn FnMut(CameraState)>>,
}

impl std::fmt::Debug for CameraController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraController")
            .field("state", &self.state)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl Default for CameraController {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraController {
    pub fn new() -> Self {
        Self {
            state: CameraState {
                zoom: 1.0,
                pan_x: 0.0,
                pan_y: 0.0,
            },
            listeners: Vec::new(),
        }
    }

    pub fn state(&self) -> CameraState {
        self.state
    }

    pub fn zoom(&self) -> f64 {
        self.state.zoom
    }

    pub fn pan(&self) -> (f64, f64) {
        (self.state.pan_x, self.state.pan_y)
    }

    pub fn subscribe(&mut self, listener: impl FnMut(CameraState) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// World-to-screen transform: translate to screen center, scale, then
    /// translate back with pan.
    pub fn world_to_screen(&self, screen: ScreenSize) -> Affine {
        let cx = screen.width_f() / 2.0;
        let cy = screen.height_f() / 2.0;
        Affine::translate((cx, cy))
            * Affine::scale(self.state.zoom)
            * Affine::translate((-cx + self.state.pan_x, -cy + self.state.pan_y))
    }

    pub fn screen_to_world(&self, screen: ScreenSize, p: Point) -> Point {
        self.world_to_screen(screen).inverse() * p
    }

    /// Set zoom, optionally keeping the world point under `anchor` (screen
    /// coordinates) fixed across the zoom change so wheel zoom does not
    /// drift the scene.
    pub fn set_zoom(
        &mut self,
        zoom: f64,
        anchor: Option<Point>,
        screen: Option<ScreenSize>,
    ) -> TeatroResult<()> {
        if !zoom.is_finite() || zoom <= 0.0 {
            tracing::warn!(zoom, "rejected non-finite or non-positive zoom");
            return Err(TeatroError::camera("zoom must be finite and > 0"));
        }
        let new_zoom = zoom.clamp(ZOOM_MIN, ZOOM_MAX);

        if let (Some(anchor), Some(screen)) = (anchor, screen) {
            // World point under the anchor at the old zoom...
            let world = self.screen_to_world(screen, anchor);
            // ...stays under the anchor at the new zoom.
            let cx = screen.width_f() / 2.0;
            let cy = screen.height_f() / 2.0;
            self.state.pan_x = (anchor.x - cx) / new_zoom + cx - world.x;
            self.state.pan_y = (anchor.y - cy) / new_zoom + cy - world.y;
        }

        self.state.zoom = new_zoom;
        self.notify();
        Ok(())
    }

    pub fn set_pan(&mut self, x: f64, y: f64) -> TeatroResult<()> {
        if !x.is_finite() || !y.is_finite() {
            tracing::warn!(x, y, "rejected non-finite pan");
            return Err(TeatroError::camera("pan must be finite"));
        }
        self.state.pan_x = x;
        self.state.pan_y = y;
        self.notify();
        Ok(())
    }

    /// Relative pan in screen pixels, scaled into world units by the
    /// current zoom. Non-finite deltas are silently ignored.
    pub fn pan_by(&mut self, dx: f64, dy: f64) {
        if !dx.is_finite() || !dy.is_finite() {
            return;
        }
        self.state.pan_x += dx / self.state.zoom;
        self.state.pan_y += dy / self.state.zoom;
        self.notify();
    }

    pub fn reset(&mut self) {
        self.state = CameraState {
            zoom: 1.0,
            pan_x: 0.0,
            pan_y: 0.0,
        };
        self.notify();
    }

    fn notify(&mut self) {
        let state = self.state;
        for l in &mut self.listeners {
            l(state);
        }
    }
}

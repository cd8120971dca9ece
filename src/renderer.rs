use kurbo::{Affine, Point, Rect};

use crate::{
    camera::CameraController,
    core::{Rgba8Premul, ScreenSize},
    layer::Layer,
    raster::{FrameRgba, Painter},
};

/// Minimum interval between telemetry emissions (≤ 20 Hz).
pub const TELEMETRY_INTERVAL_MS: f64 = 50.0;

/// Live per-layer snapshot for editor overlays.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct LayerTelemetry {
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub tilt_deg: f64,
    pub scale: f64,
    pub speed_px_s: f64,
    pub z_depth: i32,
    pub visible: bool,
}

/// Debug-overlay snapshot for the host's panels.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize)]
pub struct DebugStats {
    pub fps: f64,
    pub zoom: f64,
    pub pan_x: f64,
    pub pan_y: f64,
    pub mouse_world_x: f64,
    pub mouse_world_y: f64,
    pub scroll: f64,
    pub time: f64,
}

#[derive(Debug, Default)]
pub struct RenderOutput {
    /// Present only when the telemetry throttle window elapsed.
    pub telemetry: Option<Vec<LayerTelemetry>>,
    pub debug: Option<DebugStats>,
    /// The selected layer's bounds are overlapped by a visible higher-z
    /// layer; the hidden marker was drawn.
    pub selected_occluded: bool,
}

/// Per-frame inputs to the renderer.
#[derive(Clone, Copy, Debug)]
pub struct RenderParams<'a> {
    pub screen: ScreenSize,
    pub scroll: f64,
    pub elapsed: f64,
    pub dt: f64,
    pub selected: Option<&'a str>,
    /// Solo diagnostic mode: all other layers freeze at t=0.
    pub solo: Option<&'a str>,
    pub mouse_world: Option<Point>,
    /// Monotonic host timestamp, for throttling.
    pub now_ms: f64,
}

/// Executes the frame pipeline: clear, backgrounds, camera transform,
/// z-ordered layers with the selection on top, overlays, telemetry.
pub struct SceneRenderer {
    pub debug_enabled: bool,
    pub background: Rgba8Premul,
    last_telemetry_ms: Option<f64>,
}

impl Default for SceneRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneRenderer {
    pub fn new() -> Self {
        Self {
            debug_enabled: false,
            background: Rgba8Premul::opaque(16, 16, 24),
            last_telemetry_ms: None,
        }
    }

    /// Render one frame. `layers` must already be sorted in draw order
    /// (z ascending, stable by authoring order).
    pub fn render(
        &mut self,
        frame: &mut FrameRgba,
        layers: &mut [Layer],
        camera: &CameraController,
        p: RenderParams<'_>,
    ) -> RenderOutput {
        self.prepare_layers(layers, p);
        self.resolve_reactions(layers, p);

        let mut painter = Painter::new(frame);
        painter.clear(self.background);

        // Backgrounds fill the screen outside the camera transform.
        painter.set_transform(Affine::IDENTITY);
        for layer in layers.iter().filter(|l| l.visible && l.is_background()) {
            layer.draw(&mut painter, p.screen, p.scroll, false);
        }

        painter.set_transform(camera.world_to_screen(p.screen));
        for layer in layers.iter().filter(|l| l.visible && !l.is_background()) {
            if p.selected == Some(layer.name()) {
                continue;
            }
            layer.draw(&mut painter, p.screen, p.scroll, false);
        }

        // Selection draws last so it always sits on top while editing.
        let mut selected_occluded = false;
        if let Some(sel) = p.selected
            && let Some(layer) = layers.iter().find(|l| l.name() == sel)
            && layer.visible
            && !layer.is_background()
        {
            layer.draw(&mut painter, p.screen, p.scroll, true);
            selected_occluded = occluded_by_higher_layer(layers, layer);
            if selected_occluded
                && let Some(placement) = layer.placement()
            {
                draw_hidden_marker(&mut painter, placement.rect());
            }
        }

        let debug = if self.debug_enabled {
            let stats = self.debug_stats(camera, p);
            draw_debug_overlay(&mut painter, p);
            Some(stats)
        } else {
            None
        };

        let telemetry = self.maybe_emit_telemetry(layers, p.now_ms);

        RenderOutput {
            telemetry,
            debug,
            selected_occluded,
        }
    }

    /// Phase 1: compute every layer's placement. The selected layer is
    /// prepared with `dt = 0` so editing is frozen; in solo mode every
    /// non-solo layer is frozen at t=0 with the scroll suspended.
    fn prepare_layers(&self, layers: &mut [Layer], p: RenderParams<'_>) {
        for layer in layers.iter_mut() {
            let is_solo_other = p.solo.is_some() && p.solo != Some(layer.name());
            let (elapsed, dt, scroll) = if is_solo_other {
                (0.0, 0.0, 0.0)
            } else if p.selected == Some(layer.name()) {
                (p.elapsed, 0.0, p.scroll)
            } else {
                (p.elapsed, p.dt, p.scroll)
            };
            layer.prepare(p.screen, scroll, elapsed, dt);
        }
    }

    /// Phase 2: resolve pivot-on-crest reactions through the name→index
    /// map so the layer graph stays a tree. Samples are taken before any
    /// reactor is mutated.
    fn resolve_reactions(&self, layers: &mut [Layer], p: RenderParams<'_>) {
        let mut pending = Vec::new();
        for (i, layer) in layers.iter().enumerate() {
            let Some(reaction) = &layer.config().environmental_reaction else {
                continue;
            };
            if reaction.target_sprite_name == layer.name() {
                continue;
            }
            let Some(target) = layers
                .iter()
                .find(|l| l.name() == reaction.target_sprite_name)
            else {
                // Unresolved target: reactor proceeds without reaction.
                continue;
            };
            let Some(placement) = layer.placement() else {
                continue;
            };
            let x = placement.center().x;
            let d = 2.0;
            pending.push((
                i,
                target.y_at_x(x - d, p.elapsed),
                target.y_at_x(x, p.elapsed),
                target.y_at_x(x + d, p.elapsed),
            ));
        }
        for (i, yl, yc, yr) in pending {
            layers[i].apply_reaction(yl, yc, yr, p.scroll);
        }
    }

    fn debug_stats(&self, camera: &CameraController, p: RenderParams<'_>) -> DebugStats {
        let (pan_x, pan_y) = camera.pan();
        let mouse = p.mouse_world.unwrap_or(Point::ZERO);
        DebugStats {
            fps: if p.dt > 0.0 { 1.0 / p.dt } else { 0.0 },
            zoom: camera.zoom(),
            pan_x,
            pan_y,
            mouse_world_x: mouse.x,
            mouse_world_y: mouse.y,
            scroll: p.scroll,
            time: p.elapsed,
        }
    }

    fn maybe_emit_telemetry(
        &mut self,
        layers: &[Layer],
        now_ms: f64,
    ) -> Option<Vec<LayerTelemetry>> {
        if let Some(last) = self.last_telemetry_ms
            && now_ms - last < TELEMETRY_INTERVAL_MS
        {
            return None;
        }
        self.last_telemetry_ms = Some(now_ms);

        Some(
            layers
                .iter()
                .map(|l| {
                    let placement = l.placement().unwrap_or_default();
                    LayerTelemetry {
                        name: l.name().to_string(),
                        x: placement.x,
                        y: placement.y,
                        tilt_deg: l.tilt_deg(),
                        scale: placement.scale,
                        speed_px_s: l.speed_px_s(),
                        z_depth: l.z_depth(),
                        visible: l.visible && l.has_image(),
                    }
                })
                .collect(),
        )
    }

    /// Forget the throttle state so the next frame emits immediately
    /// (used after seeks so panels refresh without waiting).
    pub fn reset_throttle(&mut self) {
        self.last_telemetry_ms = None;
    }
}

/// Does any visible higher-z layer overlap the selected layer's AABB?
fn occluded_by_higher_layer(layers: &[Layer], selected: &Layer) -> bool {
    let Some(sel_rect) = selected.placement().map(|p| p.rect()) else {
        return false;
    };
    layers
        .iter()
        .filter(|l| {
            l.visible
                && !l.is_background()
                && l.name() != selected.name()
                && l.z_depth() > selected.z_depth()
        })
        .filter_map(|l| l.placement().map(|p| p.rect()))
        .any(|r| {
            r.x0 < sel_rect.x1 && r.x1 > sel_rect.x0 && r.y0 < sel_rect.y1 && r.y1 > sel_rect.y0
        })
}

/// Small striped warning box above the selection frame, standing in for
/// the "HIDDEN" badge.
fn draw_hidden_marker(painter: &mut Painter<'_>, sel: Rect) {
    let w = 46.0;
    let h = 12.0;
    let x = sel.x0 + (sel.width() - w) / 2.0;
    let y = sel.y0 - h - 8.0;
    painter.fill_rect(
        Affine::IDENTITY,
        Rect::new(x, y, x + w, y + h),
        Rgba8Premul::opaque(32, 32, 32),
        0.9,
    );
    let stripe = Rgba8Premul::opaque(255, 200, 40);
    let mut sx = x + 2.0;
    while sx + 4.0 < x + w {
        painter.fill_rect(
            Affine::IDENTITY,
            Rect::new(sx, y + 2.0, sx + 4.0, y + h - 2.0),
            stripe,
            1.0,
        );
        sx += 8.0;
    }
}

/// Crosshair at the mouse's world position; the numeric stats go out
/// through [`DebugStats`] for the host to present.
fn draw_debug_overlay(painter: &mut Painter<'_>, p: RenderParams<'_>) {
    let Some(mouse) = p.mouse_world else { return };
    let c = Rgba8Premul::opaque(0, 255, 128);
    painter.fill_rect(
        Affine::IDENTITY,
        Rect::new(mouse.x - 6.0, mouse.y - 0.5, mouse.x + 6.0, mouse.y + 0.5),
        c,
        1.0,
    );
    painter.fill_rect(
        Affine::IDENTITY,
        Rect::new(mouse.x - 0.5, mouse.y - 6.0, mouse.x + 0.5, mouse.y + 6.0),
        c,
        1.0,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assets::PreparedImage, model::LayerConfig};
    use std::sync::Arc;

    fn image(w: u32, h: u32, px: [u8; 4]) -> Arc<PreparedImage> {
        let mut data = Vec::new();
        for _ in 0..w * h {
            data.extend_from_slice(&px);
        }
        Arc::new(PreparedImage {
            width: w,
            height: h,
            rgba8_premul: Arc::new(data),
        })
    }

    fn screen() -> ScreenSize {
        ScreenSize::new(640, 360).unwrap()
    }

    fn params(now_ms: f64) -> RenderParams<'static> {
        RenderParams {
            screen: screen(),
            scroll: 0.0,
            elapsed: 0.0,
            dt: 1.0 / 60.0,
            selected: None,
            solo: None,
            mouse_world: None,
            now_ms,
        }
    }

    #[test]
    fn telemetry_is_throttled_to_20hz() {
        let mut r = SceneRenderer::new();
        let mut frame = FrameRgba::new(640, 360).unwrap();
        let cam = CameraController::new();
        let mut layers = vec![Layer::new(
            LayerConfig::new("boat"),
            Some(image(8, 8, [255, 0, 0, 255])),
            0,
        )];

        let out = r.render(&mut frame, &mut layers, &cam, params(0.0));
        assert!(out.telemetry.is_some());
        let out = r.render(&mut frame, &mut layers, &cam, params(20.0));
        assert!(out.telemetry.is_none());
        let out = r.render(&mut frame, &mut layers, &cam, params(60.0));
        assert!(out.telemetry.is_some());
    }

    #[test]
    fn occlusion_flag_follows_overlap_and_visibility() {
        let mut r = SceneRenderer::new();
        let mut frame = FrameRgba::new(640, 360).unwrap();
        let cam = CameraController::new();

        let mut low = LayerConfig::new("low");
        low.z_depth = 1;
        let mut high = LayerConfig::new("high");
        high.z_depth = 5;

        let mut layers = vec![
            Layer::new(low, Some(image(64, 64, [255, 0, 0, 255])), 0),
            Layer::new(high, Some(image(64, 64, [0, 255, 0, 255])), 1),
        ];

        let mut p = params(0.0);
        p.selected = Some("low");
        let out = r.render(&mut frame, &mut layers, &cam, p);
        assert!(out.selected_occluded);

        layers[1].visible = false;
        let out = r.render(&mut frame, &mut layers, &cam, p);
        assert!(!out.selected_occluded);
    }

    #[test]
    fn solo_mode_freezes_other_layers() {
        let mut r = SceneRenderer::new();
        let mut frame = FrameRgba::new(640, 360).unwrap();
        let cam = CameraController::new();

        let mut moving = LayerConfig::new("mover");
        moving.scroll_speed = 1.0;
        let solo = LayerConfig::new("solo");
        let mut layers = vec![
            Layer::new(moving, Some(image(8, 8, [255, 0, 0, 255])), 0),
            Layer::new(solo, Some(image(8, 8, [0, 255, 0, 255])), 1),
        ];

        let mut p = params(0.0);
        p.scroll = 500.0;
        p.elapsed = 3.0;
        p.solo = Some("solo");
        r.render(&mut frame, &mut layers, &cam, p);

        // The non-solo layer saw scroll 0, so it sits at its origin.
        assert_eq!(layers[0].placement().unwrap().x, 0.0);
    }

    #[test]
    fn debug_stats_appear_only_when_enabled() {
        let mut r = SceneRenderer::new();
        let mut frame = FrameRgba::new(640, 360).unwrap();
        let cam = CameraController::new();
        let mut layers = Vec::new();

        let out = r.render(&mut frame, &mut layers, &cam, params(0.0));
        assert!(out.debug.is_none());

        r.debug_enabled = true;
        let mut p = params(100.0);
        p.mouse_world = Some(Point::new(10.0, 20.0));
        let out = r.render(&mut frame, &mut layers, &cam, p);
        let dbg = out.debug.unwrap();
        assert_eq!(dbg.mouse_world_x, 10.0);
        assert!((dbg.fps - 60.0).abs() < 0.5);
    }
}

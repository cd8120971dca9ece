use std::sync::Arc;

use kurbo::{Affine, Point, Rect};

use crate::{
    assets::PreparedImage,
    behavior::{BehaviorSet, FrameCtx},
    core::{Coordinate, LayerTransform, Rgba8Premul, SCROLL_PX_PER_SEC, ScreenSize},
    model::{Behavior, LayerConfig, VerticalAnchor},
    raster::Painter,
};

/// Side length of the square corner scale handles, world pixels.
pub const HANDLE_SIZE: f64 = 14.0;
/// Distance of the rotate handle above the selection frame's top edge.
pub const ROTATE_HANDLE_OFFSET: f64 = 26.0;
/// Alpha above which a sprite pixel counts as hit-testable.
const HIT_ALPHA_THRESHOLD: u8 = 10;
/// Per-frame smoothing factor for reaction-driven vertical movement.
const REACTION_SMOOTHING: f64 = 0.1;
/// Scroll distance over which a reaction ramps up to full strength.
const REACTION_RAMP_SCROLL: f64 = 300.0;
/// Horizontal sampling half-distance for the crest slope.
const REACTION_SLOPE_DELTA: f64 = 2.0;

/// Interactive handle on the selection frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Handle {
    /// Corner scale handle; 0..4 clockwise from top-left.
    Scale(u8),
    Rotate,
}

/// Where and how the layer would draw this frame, in world coordinates
/// (before the camera transform).
#[derive(Clone, Copy, Debug, Default)]
pub struct Placement {
    /// Top-left of the (unrotated) draw rectangle.
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub rotation_deg: f64,
    pub opacity: f64,
    /// Effective scale, base times behavior contribution.
    pub scale: f64,
    pub base_x: f64,
    pub base_y: f64,
}

impl Placement {
    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.x + self.width, self.y + self.height)
    }
}

/// A single drawable element of the scene: sprite image, base placement,
/// compiled behaviors, and the mutable per-frame state they produce.
pub struct Layer {
    config: LayerConfig,
    image: Option<Arc<PreparedImage>>,
    behaviors: BehaviorSet,
    /// Position in the authoring order; tie-breaker for the z sort.
    pub authoring_index: usize,
    pub visible: bool,

    /// Rotation and position edits made through the interaction layer.
    base_rotation_deg: f64,

    placement: Option<Placement>,
    current_tilt_deg: f64,
    /// Smoothed reaction-driven vertical offset.
    reaction_y: f64,
    last_pos: Option<(f64, f64)>,
    speed_px_s: f64,
}

impl std::fmt::Debug for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layer")
            .field("sprite_name", &self.config.sprite_name)
            .field("z_depth", &self.config.z_depth)
            .field("visible", &self.visible)
            .finish()
    }
}

impl Layer {
    /// Build a layer from its config and (optionally) its decoded image.
    /// Background/Sound behaviors are folded into the config here; legacy
    /// scalar fields become prepended behaviors.
    pub fn new(
        mut config: LayerConfig,
        image: Option<Arc<PreparedImage>>,
        authoring_index: usize,
    ) -> Self {
        let effective = config.effective_behaviors();
        for b in &effective {
            if let Behavior::Background { scroll_speed } = b {
                config.is_background = true;
                config.scroll_speed = *scroll_speed;
            }
        }
        let behaviors = BehaviorSet::compile(&effective);

        Self {
            config,
            image,
            behaviors,
            authoring_index,
            visible: true,
            base_rotation_deg: 0.0,
            placement: None,
            current_tilt_deg: 0.0,
            reaction_y: 0.0,
            last_pos: None,
            speed_px_s: 0.0,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.sprite_name
    }

    pub fn config(&self) -> &LayerConfig {
        &self.config
    }

    pub fn z_depth(&self) -> i32 {
        self.config.z_depth
    }

    pub fn is_background(&self) -> bool {
        self.config.is_background
    }

    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }

    pub fn image(&self) -> Option<&Arc<PreparedImage>> {
        self.image.as_ref()
    }

    pub fn take_image(&mut self) -> Option<Arc<PreparedImage>> {
        self.image.take()
    }

    pub fn placement(&self) -> Option<Placement> {
        self.placement
    }

    pub fn tilt_deg(&self) -> f64 {
        self.current_tilt_deg
    }

    pub fn speed_px_s(&self) -> f64 {
        self.speed_px_s
    }

    /// Replace the config while keeping the cached image and interaction
    /// state; behaviors are recompiled. Used by scene reconciliation.
    pub fn update_config(&mut self, config: LayerConfig) {
        let mut config = config;
        let effective = config.effective_behaviors();
        for b in &effective {
            if let Behavior::Background { scroll_speed } = b {
                config.is_background = true;
                config.scroll_speed = *scroll_speed;
            }
        }
        self.behaviors = BehaviorSet::compile(&effective);
        self.config = config;
    }

    /// Base draw size: the image scaled to `height_scale`/`target_height`
    /// and the base scale multiplier.
    fn base_size(&self, screen: ScreenSize) -> (f64, f64) {
        let Some(img) = &self.image else {
            return (0.0, 0.0);
        };
        let iw = f64::from(img.width);
        let ih = f64::from(img.height);
        let fit = if let Some(hs) = self.config.height_scale {
            screen.height_f() * hs / ih
        } else if let Some(th) = self.config.target_height {
            th / ih
        } else {
            1.0
        };
        let f = fit * self.config.scale;
        (iw * f, ih * f)
    }

    /// Compute this frame's placement by folding the behavior runtimes
    /// into a transform accumulator. `dt = 0` freezes stateful behaviors,
    /// which is how the selected layer is held still while editing.
    pub fn prepare(&mut self, screen: ScreenSize, scroll: f64, elapsed: f64, dt: f64) {
        if self.image.is_none() {
            self.placement = None;
            return;
        }
        let (base_w, base_h) = self.base_size(screen);

        let loc = self.behaviors.location.sample(elapsed);

        let mut acc = LayerTransform::identity();
        let ctx = FrameCtx {
            dt,
            elapsed,
            screen_w: screen.width_f(),
            screen_h: screen.height_f(),
            base_scale: self.config.scale,
        };
        self.behaviors.apply(ctx, &mut acc);

        // Anchor-derived base y; LOCATION overrides it absolutely.
        let vp = loc.vertical_percent.or(self.config.vertical_percent);
        let mut base_y = match vp {
            Some(vp) => {
                let y = vp * screen.height_f();
                match self.config.vertical_anchor {
                    VerticalAnchor::Top => y,
                    VerticalAnchor::Center => y - base_h / 2.0,
                    VerticalAnchor::Bottom => y - base_h,
                }
            }
            None => 0.0,
        };
        if let Some(y) = loc.y {
            base_y = y;
        }
        base_y += self.config.y_offset;
        let base_x = loc.x.unwrap_or(0.0);

        let width = base_w * acc.scale.max(0.0);
        let height = base_h * acc.scale.max(0.0);

        let x = self.config.scroll_speed * scroll + self.config.x_offset + acc.x + base_x;
        let y = base_y + acc.y;

        let placement = Placement {
            x,
            y,
            width,
            height,
            rotation_deg: self.base_rotation_deg + acc.rotation_deg,
            opacity: acc.opacity.clamp(0.0, 1.0),
            scale: self.config.scale * acc.scale,
            base_x,
            base_y,
        };

        if dt > 0.0
            && let Some((px, py)) = self.last_pos
        {
            let d = ((placement.x - px).powi(2) + (placement.y - py).powi(2)).sqrt();
            self.speed_px_s = d / dt;
        }
        if dt > 0.0 {
            self.last_pos = Some((placement.x, placement.y));
        }

        self.placement = Some(placement);
    }

    /// The layer's surface height at world `x`, used as the reaction
    /// sampling curve. The surface phase at `x` is the phase the layer had
    /// when the scroll reference passed `x`, so the curve is reproducible
    /// after a seek.
    pub fn y_at_x(&self, x: f64, elapsed: f64) -> f64 {
        let base = self.placement.map(|p| p.base_y).unwrap_or(0.0);
        base + self
            .behaviors
            .sample_stateless(Coordinate::Y, elapsed - x / SCROLL_PX_PER_SEC)
    }

    /// Apply a pivot-on-crest reaction against a pre-sampled target curve.
    /// `y_left`/`y_right` are the target's y at `x ∓ Δ`, `y_center` at `x`.
    pub fn apply_reaction(&mut self, y_left: f64, y_center: f64, y_right: f64, scroll: f64) {
        let Some(reaction) = self.config.environmental_reaction.clone() else {
            return;
        };
        let Some(mut placement) = self.placement else {
            return;
        };

        let slope = (y_left - y_right) / (2.0 * REACTION_SLOPE_DELTA);
        let ramp = (scroll / REACTION_RAMP_SCROLL).clamp(0.0, 1.0);
        let tilt = (slope.atan().to_degrees() * 50.0 * ramp)
            .clamp(-reaction.max_tilt_angle, reaction.max_tilt_angle);
        self.current_tilt_deg = tilt;

        let mut target_y = placement.y;
        target_y += (y_center - placement.y) * reaction.vertical_follow_factor;
        target_y -= reaction.tilt_lift_factor * tilt.abs();

        self.reaction_y += (target_y - placement.y - self.reaction_y) * REACTION_SMOOTHING;
        placement.y += self.reaction_y;
        placement.rotation_deg += tilt;
        self.placement = Some(placement);
    }

    /// Move runtime accumulators to scene time `elapsed` and clear the
    /// smoothing state; called on seek.
    pub fn reset_state(&mut self, elapsed: f64) {
        self.behaviors.reset_to(elapsed);
        self.current_tilt_deg = 0.0;
        self.reaction_y = 0.0;
        self.last_pos = None;
        self.speed_px_s = 0.0;
    }

    // ---- mutation through the interaction layer ----

    pub fn set_position(&mut self, x: f64, y: f64) {
        self.config.x_offset = x;
        self.config.y_offset = y;
    }

    pub fn set_rotation(&mut self, deg: f64) {
        self.base_rotation_deg = deg;
    }

    pub fn base_rotation(&self) -> f64 {
        self.base_rotation_deg
    }

    pub fn set_scale(&mut self, scale: f64) {
        self.config.scale = scale.max(0.01);
    }

    // ---- drawing ----

    /// Draw the layer. Backgrounds aspect-fill the screen and ignore the
    /// placement machinery; everything else draws its prepared placement,
    /// tiled when configured.
    pub fn draw(&self, painter: &mut Painter<'_>, screen: ScreenSize, scroll: f64, selected: bool) {
        let Some(img) = &self.image else {
            return;
        };

        if self.config.is_background {
            self.draw_background(painter, screen, scroll);
            return;
        }
        let Some(placement) = self.placement else {
            return;
        };
        if placement.opacity <= 0.0 || placement.width <= 0.0 || placement.height <= 0.0 {
            return;
        }

        // Selected fill-down layers are mostly see-through so the scene
        // underneath stays visible while editing.
        let body_opacity = if selected && self.config.fill_down {
            0.2
        } else {
            placement.opacity
        };

        let rotate = Affine::translate(placement.center().to_vec2())
            * Affine::rotate(placement.rotation_deg.to_radians())
            * Affine::translate(-placement.center().to_vec2());

        let image = img.as_image_ref();
        let iw = f64::from(img.width);
        let ih = f64::from(img.height);

        if self.config.tile_horizontal {
            let border = self.config.tile_border.clamp(0.0, iw / 2.0 - 0.5);
            let crop = Rect::new(border, 0.0, iw - border, ih);
            let sx = placement.width / iw;
            let sy = placement.height / ih;
            let tile_w = crop.width() * sx;
            if tile_w > 0.5 {
                // The whole strip wraps with period screen + image width.
                let wrap = screen.width_f() + placement.width;
                let mut start = placement.x % wrap;
                if start > 0.0 {
                    start -= wrap;
                }
                let mut tx = start;
                while tx < screen.width_f() {
                    let place = rotate
                        * Affine::translate((tx, placement.y))
                        * Affine::scale_non_uniform(sx, sy);
                    painter.draw_image_cropped(image, crop, place, body_opacity as f32);
                    tx += tile_w;
                }
            }
        } else {
            let place = rotate
                * Affine::translate((placement.x, placement.y))
                * Affine::scale_non_uniform(placement.width / iw, placement.height / ih);
            painter.draw_image(image, place, body_opacity as f32);
        }

        if self.config.fill_down {
            let color = self.bottom_edge_color();
            let top = placement.y + placement.height - 0.5;
            if top < screen.height_f() {
                // The strip spans the whole screen width regardless of the
                // sprite's footprint (sea below a narrow wave crest).
                let fill = Rect::new(0.0, top, screen.width_f(), screen.height_f());
                painter.fill_rect(Affine::IDENTITY, fill, color, placement.opacity as f32);
            }
        }

        if selected {
            self.draw_selection_frame(painter, placement);
        }
    }

    fn draw_background(&self, painter: &mut Painter<'_>, screen: ScreenSize, scroll: f64) {
        let Some(img) = &self.image else { return };
        let iw = f64::from(img.width);
        let ih = f64::from(img.height);
        if iw <= 0.0 || ih <= 0.0 {
            return;
        }
        // Aspect-fill cover, then wrap horizontally with the parallax
        // scroll so seams never show.
        let cover = (screen.width_f() / iw).max(screen.height_f() / ih);
        let w = iw * cover;
        let offset = (self.config.scroll_speed * scroll) % w;
        let y = (screen.height_f() - ih * cover) / 2.0;
        let image = img.as_image_ref();
        let mut x = offset;
        if x > 0.0 {
            x -= w;
        }
        while x < screen.width_f() {
            let place = Affine::translate((x, y)) * Affine::scale(cover);
            painter.draw_image(image, place, 1.0);
            x += w;
        }
    }

    fn draw_selection_frame(&self, painter: &mut Painter<'_>, placement: Placement) {
        let rotate = Affine::translate(placement.center().to_vec2())
            * Affine::rotate(placement.rotation_deg.to_radians())
            * Affine::translate(-placement.center().to_vec2());
        let frame = placement.rect();
        let accent = Rgba8Premul::opaque(64, 156, 255);

        painter.stroke_rect(rotate, frame, 1.5, accent, 1.0);

        for corner in self.handle_corners(placement) {
            let r = HANDLE_SIZE / 2.0;
            painter.fill_rect(
                rotate,
                Rect::new(corner.x - r, corner.y - r, corner.x + r, corner.y + r),
                Rgba8Premul::opaque(255, 255, 255),
                1.0,
            );
        }

        let rot = self.rotate_handle_pos(placement);
        let r = HANDLE_SIZE / 2.0;
        painter.fill_rect(
            rotate,
            Rect::new(rot.x - r, rot.y - r, rot.x + r, rot.y + r),
            accent,
            1.0,
        );
    }

    fn bottom_edge_color(&self) -> Rgba8Premul {
        let Some(img) = &self.image else {
            return Rgba8Premul::transparent();
        };
        let x = img.width / 2;
        let y = img.height.saturating_sub(1);
        match img.as_image_ref().sample(i64::from(x), i64::from(y)) {
            Some([r, g, b, a]) => Rgba8Premul { r, g, b, a },
            None => Rgba8Premul::transparent(),
        }
    }

    fn handle_corners(&self, p: Placement) -> [Point; 4] {
        [
            Point::new(p.x, p.y),
            Point::new(p.x + p.width, p.y),
            Point::new(p.x + p.width, p.y + p.height),
            Point::new(p.x, p.y + p.height),
        ]
    }

    fn rotate_handle_pos(&self, p: Placement) -> Point {
        Point::new(p.x + p.width / 2.0, p.y - ROTATE_HANDLE_OFFSET)
    }

    // ---- hit testing ----

    /// Map a world point into unrotated local draw space.
    fn to_local(&self, p: Placement, world_x: f64, world_y: f64) -> Point {
        let c = p.center();
        let rot = Affine::translate(c.to_vec2())
            * Affine::rotate(p.rotation_deg.to_radians())
            * Affine::translate(-c.to_vec2());
        rot.inverse() * Point::new(world_x, world_y)
    }

    /// Hit-test against the current draw rectangle, honoring tiling, then
    /// against the sprite's alpha so clicks pass through transparent
    /// regions.
    pub fn contains_point(&self, world_x: f64, world_y: f64, screen: ScreenSize) -> bool {
        let (Some(placement), Some(img)) = (self.placement, &self.image) else {
            return false;
        };
        if placement.width <= 0.0 || placement.height <= 0.0 {
            return false;
        }
        let local = self.to_local(placement, world_x, world_y);

        if local.y < placement.y || local.y >= placement.y + placement.height {
            return false;
        }
        let mut dx = local.x - placement.x;
        if self.config.tile_horizontal {
            let wrap = screen.width_f() + placement.width;
            dx = dx.rem_euclid(wrap);
            if dx >= placement.width {
                return false;
            }
        } else if dx < 0.0 || dx >= placement.width {
            return false;
        }

        let px = (dx / placement.width * f64::from(img.width)).floor() as i64;
        let py = ((local.y - placement.y) / placement.height * f64::from(img.height)).floor()
            as i64;
        match img.as_image_ref().sample(px, py) {
            Some([_, _, _, a]) => a > HIT_ALPHA_THRESHOLD,
            None => false,
        }
    }

    /// Which selection-frame handle (if any) sits under the world point.
    /// Only meaningful while the layer is selected.
    pub fn handle_at_point(&self, world_x: f64, world_y: f64) -> Option<Handle> {
        let placement = self.placement?;
        let local = self.to_local(placement, world_x, world_y);
        let r = HANDLE_SIZE / 2.0 + 2.0;

        let rot = self.rotate_handle_pos(placement);
        if (local.x - rot.x).abs() <= r && (local.y - rot.y).abs() <= r {
            return Some(Handle::Rotate);
        }

        for (i, corner) in self.handle_corners(placement).iter().enumerate() {
            if (local.x - corner.x).abs() <= r && (local.y - corner.y).abs() <= r {
                return Some(Handle::Scale(i as u8));
            }
        }
        None
    }
}

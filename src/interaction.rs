use kurbo::Point;

use crate::layer::{Handle, Layer};

/// Edit emitted when a drag gesture commits.
#[derive(Clone, Debug, PartialEq)]
pub enum EditEvent {
    PositionChanged {
        sprite_name: String,
        x_offset: f64,
        y_offset: f64,
        /// Scene time at commit, so the host can key the edit.
        time: f64,
    },
    ScaleChanged {
        sprite_name: String,
        scale: f64,
    },
    RotationChanged {
        sprite_name: String,
        rotation_deg: f64,
    },
}

#[derive(Clone, Copy, Debug)]
enum DragState {
    Idle,
    Body {
        origin_offset: (f64, f64),
        grab: Point,
    },
    ScaleHandle {
        start_scale: f64,
        center: Point,
        start_dist: f64,
    },
    RotateHandle {
        start_rotation: f64,
        center: Point,
        start_angle: f64,
    },
}

/// Drag/scale/rotate state machine over the primary selection. One gesture
/// runs Idle → dragging → Idle and emits at most one edit event on commit;
/// cancellation (lost pointer capture) emits nothing.
pub struct InteractionManager {
    state: DragState,
}

impl Default for InteractionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl InteractionManager {
    pub fn new() -> Self {
        Self {
            state: DragState::Idle,
        }
    }

    pub fn is_dragging(&self) -> bool {
        !matches!(self.state, DragState::Idle)
    }

    /// Begin a gesture at a world point over the selected layer. Resolves
    /// a handle first, then the body. Returns whether a gesture started.
    pub fn drag_start_on(
        &mut self,
        layer: &Layer,
        world_x: f64,
        world_y: f64,
        screen: crate::core::ScreenSize,
    ) -> bool {
        if self.drag_start_handle(layer, world_x, world_y) {
            return true;
        }
        if layer.contains_point(world_x, world_y, screen) {
            let cfg = layer.config();
            self.state = DragState::Body {
                origin_offset: (cfg.x_offset, cfg.y_offset),
                grab: Point::new(world_x, world_y),
            };
            return true;
        }
        false
    }

    fn drag_start_handle(&mut self, layer: &Layer, world_x: f64, world_y: f64) -> bool {
        let Some(placement) = layer.placement() else {
            return false;
        };
        let center = placement.center();
        match layer.handle_at_point(world_x, world_y) {
            Some(Handle::Scale(_)) => {
                let d = center.distance(Point::new(world_x, world_y));
                self.state = DragState::ScaleHandle {
                    start_scale: layer.config().scale,
                    center,
                    start_dist: d.max(1.0),
                };
                true
            }
            Some(Handle::Rotate) => {
                self.state = DragState::RotateHandle {
                    start_rotation: layer.base_rotation(),
                    center,
                    start_angle: (world_y - center.y).atan2(world_x - center.x),
                };
                true
            }
            None => false,
        }
    }

    /// Update the layer in place as the pointer moves.
    pub fn drag_move(&mut self, layer: &mut Layer, world_x: f64, world_y: f64) {
        match self.state {
            DragState::Idle => {}
            DragState::Body {
                origin_offset,
                grab,
            } => {
                layer.set_position(
                    origin_offset.0 + world_x - grab.x,
                    origin_offset.1 + world_y - grab.y,
                );
            }
            DragState::ScaleHandle {
                start_scale,
                center,
                start_dist,
            } => {
                let d = center.distance(Point::new(world_x, world_y));
                layer.set_scale(start_scale * (d / start_dist));
            }
            DragState::RotateHandle {
                start_rotation,
                center,
                start_angle,
            } => {
                let angle = (world_y - center.y).atan2(world_x - center.x);
                layer.set_rotation(start_rotation + (angle - start_angle).to_degrees());
            }
        }
    }

    /// Commit the gesture, emitting the matching edit event.
    pub fn drag_end(&mut self, layer: &Layer, elapsed: f64) -> Option<EditEvent> {
        let event = match self.state {
            DragState::Idle => None,
            DragState::Body { .. } => Some(EditEvent::PositionChanged {
                sprite_name: layer.name().to_string(),
                x_offset: layer.config().x_offset,
                y_offset: layer.config().y_offset,
                time: elapsed,
            }),
            DragState::ScaleHandle { .. } => Some(EditEvent::ScaleChanged {
                sprite_name: layer.name().to_string(),
                scale: layer.config().scale,
            }),
            DragState::RotateHandle { .. } => Some(EditEvent::RotationChanged {
                sprite_name: layer.name().to_string(),
                rotation_deg: layer.base_rotation(),
            }),
        };
        self.state = DragState::Idle;
        event
    }

    /// Lost pointer capture: back to Idle without emitting.
    pub fn cancel(&mut self) {
        self.state = DragState::Idle;
    }
}

#![forbid(unsafe_code)]

pub mod assets;
pub mod audio;
pub mod behavior;
pub mod camera;
pub mod composite;
pub mod core;
pub mod error;
pub mod interaction;
pub mod layer;
pub mod model;
pub mod raster;
pub mod renderer;
pub mod selection;
pub mod theatre;

pub use assets::{FsSpriteProvider, PreparedImage, SpriteLoader, SpriteProvider};
pub use audio::{AudioManager, AudioSink, NullSink};
pub use camera::{CameraController, CameraState};
pub use core::{Coordinate, LayerTransform, Rgba8Premul, SCROLL_PX_PER_SEC, ScreenSize};
pub use error::{TeatroError, TeatroResult};
pub use interaction::{EditEvent, InteractionManager};
pub use layer::{Handle, Layer, Placement};
pub use model::{Behavior, LayerConfig, Scene, SceneOrigin, SoundCue};
pub use raster::FrameRgba;
pub use renderer::{DebugStats, LayerTelemetry, SceneRenderer};
pub use selection::SelectionManager;
pub use theatre::{Theatre, TheatreEvents};

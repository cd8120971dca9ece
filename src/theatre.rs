use kurbo::Point;

use crate::{
    assets::{SpriteLoader, SpriteProvider, sound_path},
    audio::{AudioManager, AudioSink},
    camera::CameraController,
    core::{SCROLL_PX_PER_SEC, ScreenSize},
    error::TeatroResult,
    interaction::{EditEvent, InteractionManager},
    layer::Layer,
    model::{Scene, SoundCue},
    raster::FrameRgba,
    renderer::{LayerTelemetry, RenderParams, SceneRenderer},
    selection::SelectionManager,
};

/// Minimum interval between time updates to the host (≈ 30 Hz).
const TIME_UPDATE_INTERVAL_MS: f64 = 33.0;

/// Host callbacks. All are optional; the runtime never blocks on them.
#[derive(Default)]
pub struct TheatreEvents {
    pub on_telemetry: Option<Box<dyn FnMut(&[LayerTelemetry])>>,
    pub on_time_update: Option<Box<dyn FnMut(f64)>>,
    pub on_sprite_selected: Option<Box<dyn FnMut(Option<&str>)>>,
    /// Position/scale/rotation edits committed by drag gestures.
    pub on_edit: Option<Box<dyn FnMut(&EditEvent)>>,
}

/// The orchestrator: owns the loop, the time base, the scroll reference,
/// and all runtime components, and exposes the public contract the
/// embedding editor drives.
pub struct Theatre<P: SpriteProvider, S: AudioSink> {
    scene: Scene,
    screen: ScreenSize,
    frame: FrameRgba,

    loader: SpriteLoader<P>,
    audio: AudioManager<S>,
    pub camera: CameraController,
    pub selection: SelectionManager,
    interaction: InteractionManager,
    renderer: SceneRenderer,

    layers: Vec<Layer>,
    elapsed: f64,
    scroll: f64,
    running: bool,
    paused: bool,
    initialized: bool,
    initializing: bool,
    /// Scene replacement requested while an initialize was in flight.
    pending_scene: Option<Scene>,
    solo: Option<String>,
    mouse_world: Option<Point>,
    last_tick_ms: Option<f64>,
    last_time_update_ms: Option<f64>,
    last_occluded: bool,

    pub events: TheatreEvents,
}

impl<P: SpriteProvider, S: AudioSink> Theatre<P, S> {
    pub fn new(
        scene: Scene,
        screen: ScreenSize,
        provider: P,
        sink: S,
    ) -> TeatroResult<Self> {
        scene.validate()?;
        let frame = FrameRgba::new(screen.width, screen.height)?;
        let loader = SpriteLoader::new(provider, scene.origin);
        Ok(Self {
            scene,
            screen,
            frame,
            loader,
            audio: AudioManager::new(sink),
            camera: CameraController::new(),
            selection: SelectionManager::new(),
            interaction: InteractionManager::new(),
            renderer: SceneRenderer::new(),
            layers: Vec::new(),
            elapsed: 0.0,
            scroll: 0.0,
            running: false,
            paused: false,
            initialized: false,
            initializing: false,
            pending_scene: None,
            solo: None,
            mouse_world: None,
            last_tick_ms: None,
            last_time_update_ms: None,
            last_occluded: false,
            events: TheatreEvents::default(),
        })
    }

    // ---- lifecycle ----

    /// Hydrate layers from the scene description: resolve images, merge
    /// sidecar metadata, build z-sorted layers, schedule sounds, render
    /// the initial frame. Asset failures degrade, they never abort.
    #[tracing::instrument(skip(self), fields(scene = %self.scene.name))]
    pub fn initialize(&mut self) -> TeatroResult<()> {
        self.initializing = true;
        self.loader.set_origin(self.scene.origin);
        // Re-initializing must not stack a second copy of every cue.
        self.audio.clear_schedule();

        let configs: Vec<_> = self.scene.layers.clone();
        let mut layers = Vec::with_capacity(configs.len());
        for (idx, config) in configs.into_iter().enumerate() {
            let image = match self.loader.load_sprite(&config.sprite_name) {
                Ok(img) => img,
                Err(e) => {
                    tracing::warn!(sprite = %config.sprite_name, error = %e, "sprite load failed");
                    None
                }
            };
            let merged = self.loader.fetch_and_merge_metadata(&config);
            layers.push(Layer::new(merged, image, idx));
        }
        sort_draw_order(&mut layers);
        self.layers = layers;

        self.schedule_all_sounds();

        self.initializing = false;
        self.initialized = true;

        if let Some(scene) = self.pending_scene.take() {
            self.update_scene(scene)?;
        }

        let now = self.last_tick_ms.unwrap_or(0.0);
        self.render_frame(now);
        tracing::debug!(layers = self.layers.len(), "theatre initialized");
        Ok(())
    }

    pub fn start(&mut self) {
        self.running = true;
        self.paused = false;
        self.last_tick_ms = None;
        tracing::debug!("playback started");
    }

    /// Halt the loop and all audio. Images stay cached.
    pub fn stop(&mut self) {
        self.running = false;
        self.last_tick_ms = None;
        self.audio.stop_all();
        tracing::debug!("playback stopped");
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
        self.last_tick_ms = None;
    }

    pub fn toggle_pause(&mut self) {
        if self.paused {
            self.resume();
        } else {
            self.pause();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// The host's frame callback. `now_ms` is a monotonic timestamp; dt is
    /// derived from the previous call.
    pub fn tick(&mut self, now_ms: f64) {
        if !self.running || !self.initialized {
            return;
        }
        // dt is exactly the timestamp delta; a long gap between ticks
        // advances the scene by that whole gap.
        let dt = match self.last_tick_ms {
            Some(last) => ((now_ms - last) / 1000.0).max(0.0),
            None => 0.0,
        };
        self.last_tick_ms = Some(now_ms);

        let dt = if self.paused { 0.0 } else { dt };
        self.elapsed += dt;
        if self.solo.is_none() {
            self.scroll += SCROLL_PX_PER_SEC * dt;
        }

        if !self.paused {
            self.audio.update(self.elapsed);
        }
        self.render_frame_with_dt(now_ms, dt);

        if self
            .last_time_update_ms
            .is_none_or(|last| now_ms - last >= TIME_UPDATE_INTERVAL_MS)
        {
            self.last_time_update_ms = Some(now_ms);
            let t = self.elapsed;
            if let Some(cb) = &mut self.events.on_time_update {
                cb(t);
            }
        }
    }

    /// Seek. Scroll is derived from time so scroll-dependent reactions are
    /// reproducible; drift accumulators fast-forward to their value at
    /// `t`, smoothing clears, audio stops and re-arms cues at or after
    /// `t`. The resulting frame is indistinguishable from having played
    /// up to `t`.
    pub fn set_time(&mut self, t: f64) {
        let max = self.scene.duration_sec.unwrap_or(f64::INFINITY);
        let t = t.clamp(0.0, max);

        self.elapsed = t;
        self.scroll = SCROLL_PX_PER_SEC * t;
        self.audio.seek(t);
        for layer in &mut self.layers {
            layer.reset_state(t);
        }
        self.renderer.reset_throttle();
        let now = self.last_tick_ms.unwrap_or(0.0);
        self.render_frame(now);
    }

    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    pub fn scroll(&self) -> f64 {
        self.scroll
    }

    pub fn frame(&self) -> &FrameRgba {
        &self.frame
    }

    /// Whether the last rendered frame flagged the selection as hidden
    /// behind a visible higher layer.
    pub fn selected_occluded(&self) -> bool {
        self.last_occluded
    }

    pub fn audio(&self) -> &AudioManager<S> {
        &self.audio
    }

    pub fn set_debug(&mut self, enabled: bool) {
        self.renderer.debug_enabled = enabled;
    }

    // ---- scene maintenance ----

    /// Replace the scene, reconciling layers by `sprite_name`: surviving
    /// layers keep their cached image and selection, the incoming config
    /// is authoritative; removed names drop; new names load. Deferred
    /// while an initialize is in flight.
    #[tracing::instrument(skip(self, scene), fields(scene = %scene.name))]
    pub fn update_scene(&mut self, scene: Scene) -> TeatroResult<()> {
        scene.validate()?;
        if self.initializing {
            self.pending_scene = Some(scene);
            return Ok(());
        }
        if !self.initialized {
            self.scene = scene;
            return Ok(());
        }

        self.loader.set_origin(scene.origin);
        let mut old: std::collections::HashMap<String, Layer> = self
            .layers
            .drain(..)
            .map(|l| (l.name().to_string(), l))
            .collect();

        let mut layers = Vec::with_capacity(scene.layers.len());
        for (idx, config) in scene.layers.iter().cloned().enumerate() {
            let merged = {
                // Image first so metadata resolves from the right scope.
                let image = match self.loader.load_sprite(&config.sprite_name) {
                    Ok(img) => img,
                    Err(e) => {
                        tracing::warn!(sprite = %config.sprite_name, error = %e, "sprite load failed");
                        None
                    }
                };
                (image, self.loader.fetch_and_merge_metadata(&config))
            };
            let (image, merged_config) = merged;

            match old.remove(&config.sprite_name) {
                Some(mut layer) => {
                    layer.update_config(merged_config);
                    layer.authoring_index = idx;
                    layers.push(layer);
                }
                None => layers.push(Layer::new(merged_config, image, idx)),
            }
        }
        sort_draw_order(&mut layers);
        self.layers = layers;
        self.scene = scene;

        let known: std::collections::HashSet<String> =
            self.layers.iter().map(|l| l.name().to_string()).collect();
        self.selection.retain_known(|n| known.contains(n));

        self.audio.clear_schedule();
        self.schedule_all_sounds();
        self.audio.seek(self.elapsed);

        let now = self.last_tick_ms.unwrap_or(0.0);
        self.render_frame(now);
        Ok(())
    }

    pub fn set_layer_visibility(&mut self, name: &str, visible: bool) {
        if let Some(layer) = self.layers.iter_mut().find(|l| l.name() == name) {
            layer.visible = visible;
        }
    }

    /// Solo diagnostics: every other layer freezes at t=0 and the global
    /// scroll stops advancing. `None` clears.
    pub fn set_solo_mode(&mut self, name: Option<&str>) {
        self.solo = name.map(str::to_string);
    }

    pub fn layer_names(&self) -> impl Iterator<Item = &str> {
        self.layers.iter().map(|l| l.name())
    }

    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.layers.iter().find(|l| l.name() == name)
    }

    // ---- input ----

    /// Click in screen coordinates; resolves the topmost visible
    /// non-background layer under the cursor.
    pub fn handle_canvas_click(&mut self, screen_x: f64, screen_y: f64, multi: bool) {
        let w = self
            .camera
            .screen_to_world(self.screen, Point::new(screen_x, screen_y));
        let hit = self
            .selection
            .resolve_click(w.x, w.y, &self.layers, self.screen)
            .map(str::to_string);

        match hit {
            Some(name) => self.selection.select(&name, multi, false),
            None => self.selection.deselect_all(false),
        }
        let primary = self.selection.primary().map(str::to_string);
        if let Some(cb) = &mut self.events.on_sprite_selected {
            cb(primary.as_deref());
        }
    }

    pub fn handle_drag_start(&mut self, screen_x: f64, screen_y: f64) -> bool {
        let w = self
            .camera
            .screen_to_world(self.screen, Point::new(screen_x, screen_y));
        let Some(name) = self.selection.primary().map(str::to_string) else {
            return false;
        };
        let Some(layer) = self.layers.iter().find(|l| l.name() == name) else {
            return false;
        };
        self.interaction.drag_start_on(layer, w.x, w.y, self.screen)
    }

    pub fn handle_drag_move(&mut self, screen_x: f64, screen_y: f64) {
        if !self.interaction.is_dragging() {
            return;
        }
        let w = self
            .camera
            .screen_to_world(self.screen, Point::new(screen_x, screen_y));
        let Some(name) = self.selection.primary().map(str::to_string) else {
            return;
        };
        if let Some(layer) = self.layers.iter_mut().find(|l| l.name() == name) {
            self.interaction.drag_move(layer, w.x, w.y);
        }
    }

    pub fn handle_drag_end(&mut self) -> Option<EditEvent> {
        let name = self.selection.primary()?.to_string();
        let layer = self.layers.iter().find(|l| l.name() == name)?;
        let event = self.interaction.drag_end(layer, self.elapsed)?;
        if let Some(cb) = &mut self.events.on_edit {
            cb(&event);
        }
        Some(event)
    }

    /// Pointer-capture loss: abandon the gesture without emitting.
    pub fn cancel_drag(&mut self) {
        self.interaction.cancel();
    }

    pub fn set_mouse_position(&mut self, screen_x: f64, screen_y: f64) {
        self.mouse_world = Some(
            self.camera
                .screen_to_world(self.screen, Point::new(screen_x, screen_y)),
        );
    }

    // ---- internals ----

    fn schedule_all_sounds(&mut self) {
        let mut cues: Vec<SoundCue> = self.scene.sounds.clone();
        for layer in &self.scene.layers {
            cues.extend(layer.sound_cues());
        }
        for cue in cues {
            let loaded = self
                .loader
                .provider()
                .fetch(&sound_path(&cue.sound_file))
                .is_ok();
            if !loaded {
                tracing::warn!(sound = %cue.sound_file, "sound asset missing; cue will be silent");
            }
            self.audio.register(cue.sound_file.clone(), loaded);
            self.audio.schedule(cue);
        }
    }

    fn render_frame(&mut self, now_ms: f64) {
        self.render_frame_with_dt(now_ms, 0.0);
    }

    fn render_frame_with_dt(&mut self, now_ms: f64, dt: f64) {
        let selected = self.selection.primary().map(str::to_string);
        let solo = self.solo.clone();
        let params = RenderParams {
            screen: self.screen,
            scroll: self.scroll,
            elapsed: self.elapsed,
            dt,
            selected: selected.as_deref(),
            solo: solo.as_deref(),
            mouse_world: self.mouse_world,
            now_ms,
        };
        let out = self
            .renderer
            .render(&mut self.frame, &mut self.layers, &self.camera, params);
        self.last_occluded = out.selected_occluded;

        if let (Some(t), Some(cb)) = (out.telemetry, &mut self.events.on_telemetry) {
            cb(&t);
        }
    }
}

/// Stable draw order: z ascending, authoring order breaking ties.
fn sort_draw_order(layers: &mut [Layer]) {
    layers.sort_by_key(|l| (l.z_depth(), l.authoring_index));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{audio::NullSink, error::TeatroError, model::LayerConfig};
    use std::collections::HashMap;

    /// In-memory provider for unit tests.
    struct MemProvider {
        files: HashMap<String, Vec<u8>>,
    }

    impl MemProvider {
        fn new() -> Self {
            Self {
                files: HashMap::new(),
            }
        }

        fn with_sprite(mut self, scope: &str, name: &str) -> Self {
            let img = image::RgbaImage::from_pixel(8, 8, image::Rgba([255, 0, 0, 255]));
            let mut buf = Vec::new();
            image::DynamicImage::ImageRgba8(img)
                .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
                .unwrap();
            self.files.insert(crate::assets::sprite_path(scope, name), buf);
            self
        }
    }

    impl SpriteProvider for MemProvider {
        fn fetch(&self, path: &str) -> crate::error::TeatroResult<Vec<u8>> {
            self.files
                .get(path.split('?').next().unwrap_or(path))
                .cloned()
                .ok_or_else(|| TeatroError::asset(format!("not found: {path}")))
        }
    }

    fn scene(layers: Vec<LayerConfig>) -> Scene {
        Scene {
            name: "t".to_string(),
            duration_sec: Some(10.0),
            layers,
            sounds: vec![],
            origin: crate::model::SceneOrigin::Default,
        }
    }

    fn theatre(layers: Vec<LayerConfig>, provider: MemProvider) -> Theatre<MemProvider, NullSink> {
        let mut t = Theatre::new(
            scene(layers),
            ScreenSize::new(640, 360).unwrap(),
            provider,
            NullSink,
        )
        .unwrap();
        t.initialize().unwrap();
        t
    }

    #[test]
    fn layers_sort_by_z_then_authoring_order() {
        let mut a = LayerConfig::new("a");
        a.z_depth = 5;
        let mut b = LayerConfig::new("b");
        b.z_depth = 1;
        let mut c = LayerConfig::new("c");
        c.z_depth = 5;

        let provider = MemProvider::new()
            .with_sprite("default", "a")
            .with_sprite("default", "b")
            .with_sprite("default", "c");
        let t = theatre(vec![a, b, c], provider);
        let names: Vec<_> = t.layer_names().collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn missing_sprite_is_nonfatal() {
        let provider = MemProvider::new().with_sprite("default", "ok");
        let t = theatre(
            vec![LayerConfig::new("ok"), LayerConfig::new("gone")],
            provider,
        );
        assert!(t.layer("ok").unwrap().has_image());
        assert!(!t.layer("gone").unwrap().has_image());
    }

    #[test]
    fn tick_advances_time_and_scroll() {
        let provider = MemProvider::new().with_sprite("default", "a");
        let mut t = theatre(vec![LayerConfig::new("a")], provider);
        t.start();
        t.tick(0.0);
        t.tick(1000.0);
        assert!((t.elapsed() - 1.0).abs() < 1e-9);
        assert!((t.scroll() - SCROLL_PX_PER_SEC).abs() < 1e-9);
    }

    #[test]
    fn long_tick_gaps_advance_by_the_whole_gap() {
        let provider = MemProvider::new().with_sprite("default", "a");
        let mut t = theatre(vec![LayerConfig::new("a")], provider);
        t.start();
        t.tick(0.0);
        t.tick(5000.0);
        assert!((t.elapsed() - 5.0).abs() < 1e-9);
        assert!((t.scroll() - 5.0 * SCROLL_PX_PER_SEC).abs() < 1e-9);
    }

    #[test]
    fn reinitialize_does_not_duplicate_sound_cues() {
        let provider = MemProvider::new().with_sprite("default", "a");
        let mut t = Theatre::new(
            scene(vec![LayerConfig::new("a")]),
            ScreenSize::new(640, 360).unwrap(),
            provider,
            NullSink,
        )
        .unwrap();
        t.initialize().unwrap();
        t.initialize().unwrap();
        // Observable end to end in the audio integration suite; here we
        // only assert the double hydration itself stays consistent.
        assert_eq!(t.layer_names().count(), 1);
    }

    #[test]
    fn pause_freezes_time() {
        let provider = MemProvider::new().with_sprite("default", "a");
        let mut t = theatre(vec![LayerConfig::new("a")], provider);
        t.start();
        t.tick(0.0);
        t.tick(500.0);
        t.pause();
        t.tick(600.0);
        t.tick(2000.0);
        assert!((t.elapsed() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn solo_suspends_scroll() {
        let provider = MemProvider::new().with_sprite("default", "a");
        let mut t = theatre(vec![LayerConfig::new("a")], provider);
        t.set_solo_mode(Some("a"));
        t.start();
        t.tick(0.0);
        t.tick(1000.0);
        assert_eq!(t.scroll(), 0.0);
        assert!((t.elapsed() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn set_time_clamps_to_duration() {
        let provider = MemProvider::new().with_sprite("default", "a");
        let mut t = theatre(vec![LayerConfig::new("a")], provider);
        t.set_time(99.0);
        assert_eq!(t.elapsed(), 10.0);
        t.set_time(-5.0);
        assert_eq!(t.elapsed(), 0.0);
    }

    #[test]
    fn update_scene_preserves_selection_iff_name_survives() {
        let provider = MemProvider::new()
            .with_sprite("default", "keep")
            .with_sprite("default", "drop");
        let mut t = theatre(
            vec![LayerConfig::new("keep"), LayerConfig::new("drop")],
            provider,
        );

        t.selection.select("keep", false, false);
        t.update_scene(scene(vec![LayerConfig::new("keep")])).unwrap();
        assert_eq!(t.selection.primary(), Some("keep"));

        t.selection.select("keep", false, false);
        t.update_scene(scene(vec![LayerConfig::new("other")])).unwrap();
        assert_eq!(t.selection.primary(), None);
    }

    #[test]
    fn update_scene_keeps_cached_images() {
        let provider = MemProvider::new().with_sprite("default", "a");
        let mut t = theatre(vec![LayerConfig::new("a")], provider);
        assert!(t.layer("a").unwrap().has_image());

        let mut cfg = LayerConfig::new("a");
        cfg.z_depth = 9;
        t.update_scene(scene(vec![cfg])).unwrap();
        assert!(t.layer("a").unwrap().has_image());
        assert_eq!(t.layer("a").unwrap().z_depth(), 9);
    }

    #[test]
    fn update_scene_before_initialize_replaces_the_description() {
        let provider = MemProvider::new().with_sprite("default", "a");
        let mut t = Theatre::new(
            scene(vec![LayerConfig::new("a")]),
            ScreenSize::new(640, 360).unwrap(),
            provider,
            NullSink,
        )
        .unwrap();

        // Not yet initialized: the new description simply replaces the
        // stored one and hydration happens in initialize.
        t.update_scene(scene(vec![LayerConfig::new("a"), LayerConfig::new("b")]))
            .unwrap();
        t.initialize().unwrap();
        let names: Vec<_> = t.layer_names().collect();
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn click_selects_topmost_hit_and_empty_space_clears() {
        let mut cfg = LayerConfig::new("a");
        cfg.x_offset = 100.0;
        cfg.y_offset = 100.0;
        let provider = MemProvider::new().with_sprite("default", "a");
        let mut t = theatre(vec![cfg], provider);
        t.tick(0.0);

        t.handle_canvas_click(104.0, 104.0, false);
        assert_eq!(t.selection.primary(), Some("a"));

        t.handle_canvas_click(500.0, 40.0, false);
        assert_eq!(t.selection.primary(), None);
    }
}

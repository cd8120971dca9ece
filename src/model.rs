use crate::{
    core::Coordinate,
    error::{TeatroError, TeatroResult},
};

/// Declarative scene description handed to the runtime by the host.
///
/// Unknown JSON fields are tolerated so older runtimes can open newer
/// scenes.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Scene {
    pub name: String,
    #[serde(default)]
    pub duration_sec: Option<f64>,
    #[serde(default)]
    pub layers: Vec<LayerConfig>,
    #[serde(default)]
    pub sounds: Vec<SoundCue>,
    #[serde(default)]
    pub origin: SceneOrigin,
}

/// Which user scope authored the scene; drives sprite lookup order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SceneOrigin {
    #[default]
    Default,
    Community,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct LayerConfig {
    /// Unique within the scene.
    pub sprite_name: String,

    /// Rendering order key, ascending. Ties keep authoring order.
    #[serde(default = "default_z_depth")]
    pub z_depth: i32,
    #[serde(default)]
    pub vertical_percent: Option<f64>,
    #[serde(default)]
    pub vertical_anchor: VerticalAnchor,
    #[serde(default)]
    pub x_offset: f64,
    #[serde(default)]
    pub y_offset: f64,
    /// Desired height as a fraction of screen height.
    #[serde(default)]
    pub height_scale: Option<f64>,
    /// Desired height in pixels; `height_scale` wins when both are set.
    #[serde(default)]
    pub target_height: Option<f64>,
    #[serde(default = "default_scale")]
    pub scale: f64,

    /// Parallax factor applied to the global scroll reference.
    #[serde(default)]
    pub scroll_speed: f64,
    #[serde(default)]
    pub tile_horizontal: bool,
    /// Pixels cropped from each side of the image before tiling.
    #[serde(default)]
    pub tile_border: f64,
    /// Extend the image's bottom-edge color down to the screen bottom.
    #[serde(default)]
    pub fill_down: bool,
    /// Aspect-fill cover layer drawn outside the camera transform.
    #[serde(default)]
    pub is_background: bool,

    #[serde(default)]
    pub behaviors: Vec<Behavior>,
    #[serde(default)]
    pub environmental_reaction: Option<EnvironmentalReaction>,

    // Legacy scalar animation fields, kept for old scene documents. They
    // are synthesized into behaviors prepended to `behaviors` at layer
    // construction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bob_frequency: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bob_amplitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertical_drift: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub twinkle_frequency: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub twinkle_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub twinkle_max: Option<f64>,
}

fn default_z_depth() -> i32 {
    1
}

fn default_scale() -> f64 {
    1.0
}

fn default_volume() -> f64 {
    1.0
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerticalAnchor {
    #[default]
    Top,
    Center,
    Bottom,
}

/// A declarative animation contributor; each variant writes into one
/// coordinate of a layer's per-frame transform.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Behavior {
    Oscillate {
        frequency: f64,
        amplitude: f64,
        #[serde(default = "default_osc_coordinate")]
        coordinate: Coordinate,
        #[serde(default)]
        phase_offset: f64,
    },
    Drift {
        velocity: f64,
        #[serde(default = "default_osc_coordinate")]
        coordinate: Coordinate,
        #[serde(default)]
        drift_cap: Option<f64>,
    },
    Pulse {
        frequency: f64,
        min_value: f64,
        max_value: f64,
        #[serde(default)]
        waveform: Waveform,
        #[serde(default = "default_pulse_coordinate")]
        coordinate: Coordinate,
        #[serde(default)]
        activation_threshold_scale: Option<f64>,
    },
    /// Configuration-time marker: aspect-fill background with a parallax
    /// speed. No per-frame work.
    Background {
        #[serde(default)]
        scroll_speed: f64,
    },
    /// Keyframe. Without a `time_offset` it acts as a static override.
    Location {
        #[serde(default)]
        x: Option<f64>,
        #[serde(default)]
        y: Option<f64>,
        #[serde(default)]
        vertical_percent: Option<f64>,
        #[serde(default)]
        time_offset: Option<f64>,
        #[serde(default)]
        interpolate: bool,
    },
    /// Scheduled playback, registered with the audio manager at scene
    /// load. No per-frame work.
    Sound {
        sound_file: String,
        #[serde(default)]
        time_offset: f64,
        #[serde(default = "default_volume")]
        volume: f64,
        #[serde(default, rename = "loop")]
        looped: bool,
        #[serde(default)]
        fade_in: f64,
        #[serde(default)]
        fade_out: f64,
        #[serde(default)]
        duration: Option<f64>,
    },
    /// Forward-compatibility catch-all; skipped with a warning at layer
    /// construction.
    #[serde(other)]
    Unknown,
}

fn default_osc_coordinate() -> Coordinate {
    Coordinate::Y
}

fn default_pulse_coordinate() -> Coordinate {
    Coordinate::Opacity
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    #[default]
    Sine,
    Spike,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct EnvironmentalReaction {
    pub target_sprite_name: String,
    #[serde(default)]
    pub reaction_type: ReactionType,
    #[serde(default)]
    pub vertical_follow_factor: f64,
    #[serde(default)]
    pub tilt_lift_factor: f64,
    #[serde(default = "default_max_tilt")]
    pub max_tilt_angle: f64,
}

fn default_max_tilt() -> f64 {
    30.0
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionType {
    #[default]
    PivotOnCrest,
}

/// Scene-level scheduled sound, the standalone form of `Behavior::Sound`.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct SoundCue {
    pub sound_file: String,
    #[serde(default)]
    pub time_offset: f64,
    #[serde(default = "default_volume")]
    pub volume: f64,
    #[serde(default, rename = "loop")]
    pub looped: bool,
    #[serde(default)]
    pub fade_in: f64,
    #[serde(default)]
    pub fade_out: f64,
    #[serde(default)]
    pub duration: Option<f64>,
}

impl Scene {
    pub fn validate(&self) -> TeatroResult<()> {
        if let Some(d) = self.duration_sec
            && !(d.is_finite() && d > 0.0)
        {
            return Err(TeatroError::validation(
                "duration_sec must be finite and > 0",
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for layer in &self.layers {
            if layer.sprite_name.trim().is_empty() {
                return Err(TeatroError::validation("sprite_name must be non-empty"));
            }
            if !seen.insert(layer.sprite_name.as_str()) {
                return Err(TeatroError::validation(format!(
                    "duplicate sprite_name '{}'",
                    layer.sprite_name
                )));
            }
        }

        // An unresolved reaction target leaves the reaction inert rather
        // than failing the scene.
        for layer in &self.layers {
            if let Some(reaction) = &layer.environmental_reaction
                && !self
                    .layers
                    .iter()
                    .any(|l| l.sprite_name == reaction.target_sprite_name)
            {
                tracing::warn!(
                    layer = %layer.sprite_name,
                    target = %reaction.target_sprite_name,
                    "environmental reaction target not in scene; reaction is inert"
                );
            }
        }

        Ok(())
    }

    pub fn layer(&self, sprite_name: &str) -> Option<&LayerConfig> {
        self.layers.iter().find(|l| l.sprite_name == sprite_name)
    }
}

impl LayerConfig {
    pub fn new(sprite_name: impl Into<String>) -> Self {
        Self {
            sprite_name: sprite_name.into(),
            z_depth: default_z_depth(),
            vertical_percent: None,
            vertical_anchor: VerticalAnchor::default(),
            x_offset: 0.0,
            y_offset: 0.0,
            height_scale: None,
            target_height: None,
            scale: default_scale(),
            scroll_speed: 0.0,
            tile_horizontal: false,
            tile_border: 0.0,
            fill_down: false,
            is_background: false,
            behaviors: Vec::new(),
            environmental_reaction: None,
            bob_frequency: None,
            bob_amplitude: None,
            vertical_drift: None,
            twinkle_frequency: None,
            twinkle_min: None,
            twinkle_max: None,
        }
    }

    /// Behaviors synthesized from the legacy scalar fields, in a stable
    /// order. They are prepended to `behaviors` so explicitly configured
    /// behaviors observe (and can override) their contribution.
    pub fn synthesized_legacy_behaviors(&self) -> Vec<Behavior> {
        let mut out = Vec::new();
        if let (Some(freq), Some(amp)) = (self.bob_frequency, self.bob_amplitude) {
            out.push(Behavior::Oscillate {
                frequency: freq,
                amplitude: amp,
                coordinate: Coordinate::Y,
                phase_offset: 0.0,
            });
        }
        if let Some(v) = self.vertical_drift
            && v != 0.0
        {
            out.push(Behavior::Drift {
                velocity: v,
                coordinate: Coordinate::Y,
                drift_cap: None,
            });
        }
        if let Some(freq) = self.twinkle_frequency {
            out.push(Behavior::Pulse {
                frequency: freq,
                min_value: self.twinkle_min.unwrap_or(0.0),
                max_value: self.twinkle_max.unwrap_or(1.0),
                waveform: Waveform::Sine,
                coordinate: Coordinate::Opacity,
                activation_threshold_scale: None,
            });
        }
        out
    }

    /// Effective behavior list: synthesized legacy behaviors first, then
    /// the configured ones.
    pub fn effective_behaviors(&self) -> Vec<Behavior> {
        let mut out = self.synthesized_legacy_behaviors();
        out.extend(self.behaviors.iter().cloned());
        out
    }

    /// Sound cues contributed by this layer's behaviors.
    pub fn sound_cues(&self) -> Vec<SoundCue> {
        self.behaviors
            .iter()
            .filter_map(|b| match b {
                Behavior::Sound {
                    sound_file,
                    time_offset,
                    volume,
                    looped,
                    fade_in,
                    fade_out,
                    duration,
                } => Some(SoundCue {
                    sound_file: sound_file.clone(),
                    time_offset: *time_offset,
                    volume: *volume,
                    looped: *looped,
                    fade_in: *fade_in,
                    fade_out: *fade_out,
                    duration: *duration,
                }),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene_with(layers: Vec<LayerConfig>) -> Scene {
        Scene {
            name: "test".to_string(),
            duration_sec: None,
            layers,
            sounds: vec![],
            origin: SceneOrigin::Default,
        }
    }

    #[test]
    fn json_roundtrip_keeps_behaviors() {
        let mut cfg = LayerConfig::new("boat");
        cfg.behaviors = vec![
            Behavior::Oscillate {
                frequency: 1.0,
                amplitude: 10.0,
                coordinate: Coordinate::Y,
                phase_offset: 0.0,
            },
            Behavior::Location {
                x: Some(5.0),
                y: None,
                vertical_percent: None,
                time_offset: Some(2.0),
                interpolate: true,
            },
        ];
        let scene = scene_with(vec![cfg]);
        let s = serde_json::to_string(&scene).unwrap();
        let de: Scene = serde_json::from_str(&s).unwrap();
        assert_eq!(de.layers[0].behaviors.len(), 2);
    }

    #[test]
    fn unknown_fields_and_behavior_kinds_are_tolerated() {
        let json = r#"{
            "name": "fwd",
            "future_field": 42,
            "layers": [{
                "sprite_name": "boat",
                "shiny": true,
                "behaviors": [{"type": "wormhole", "strength": 9}]
            }]
        }"#;
        let de: Scene = serde_json::from_str(json).unwrap();
        assert!(matches!(de.layers[0].behaviors[0], Behavior::Unknown));
    }

    #[test]
    fn validate_rejects_duplicate_sprite_names() {
        let scene = scene_with(vec![LayerConfig::new("boat"), LayerConfig::new("boat")]);
        assert!(scene.validate().is_err());
    }

    #[test]
    fn validate_accepts_inert_reaction_target() {
        let mut cfg = LayerConfig::new("boat");
        cfg.environmental_reaction = Some(EnvironmentalReaction {
            target_sprite_name: "missing".to_string(),
            reaction_type: ReactionType::PivotOnCrest,
            vertical_follow_factor: 0.5,
            tilt_lift_factor: 0.1,
            max_tilt_angle: 30.0,
        });
        assert!(scene_with(vec![cfg]).validate().is_ok());
    }

    #[test]
    fn legacy_fields_synthesize_prepended_behaviors() {
        let mut cfg = LayerConfig::new("star");
        cfg.bob_frequency = Some(0.5);
        cfg.bob_amplitude = Some(4.0);
        cfg.twinkle_frequency = Some(2.0);
        cfg.behaviors = vec![Behavior::Background { scroll_speed: 0.1 }];

        let all = cfg.effective_behaviors();
        assert_eq!(all.len(), 3);
        assert!(matches!(all[0], Behavior::Oscillate { .. }));
        assert!(matches!(all[1], Behavior::Pulse { .. }));
        assert!(matches!(all[2], Behavior::Background { .. }));
    }

    #[test]
    fn sound_loop_field_uses_json_name() {
        let json = r#"{"type": "sound", "sound_file": "waves.mp3", "loop": true}"#;
        let b: Behavior = serde_json::from_str(json).unwrap();
        match b {
            Behavior::Sound { looped, volume, .. } => {
                assert!(looped);
                assert_eq!(volume, 1.0);
            }
            other => panic!("unexpected behavior {other:?}"),
        }
    }
}

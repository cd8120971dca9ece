use crate::{
    core::{Coordinate, LayerTransform},
    model::{Behavior, Waveform},
};

/// Per-frame evaluation context handed to every behavior runtime.
#[derive(Clone, Copy, Debug)]
pub struct FrameCtx {
    /// Seconds since the previous frame; zero while frozen.
    pub dt: f64,
    /// Scene time in seconds.
    pub elapsed: f64,
    pub screen_w: f64,
    pub screen_h: f64,
    /// The layer's base scale, used by activation thresholds.
    pub base_scale: f64,
}

/// A behavior's parameters plus whatever mutable state it needs across
/// frames. Parameters come from the scene model and never change; state is
/// cleared by [`BehaviorSet::reset`] so a seek leaves no residue.
#[derive(Clone, Debug)]
pub enum BehaviorRuntime {
    Oscillate {
        frequency: f64,
        amplitude: f64,
        coordinate: Coordinate,
        phase_offset: f64,
    },
    Drift {
        velocity: f64,
        coordinate: Coordinate,
        cap: Option<f64>,
        accum: f64,
    },
    Pulse {
        frequency: f64,
        min_value: f64,
        max_value: f64,
        waveform: Waveform,
        coordinate: Coordinate,
        activation_threshold_scale: Option<f64>,
    },
}

impl BehaviorRuntime {
    pub fn apply(&mut self, ctx: FrameCtx, acc: &mut LayerTransform) {
        match self {
            Self::Oscillate {
                frequency,
                amplitude,
                coordinate,
                phase_offset,
            } => {
                let v = *amplitude
                    * (std::f64::consts::TAU * *frequency * ctx.elapsed + *phase_offset).sin();
                acc.add(*coordinate, v);
            }
            Self::Drift {
                velocity,
                coordinate,
                cap,
                accum,
            } => {
                *accum += *velocity * ctx.dt;
                if let Some(cap) = cap {
                    if *cap >= 0.0 && *accum > *cap {
                        *accum = *cap;
                    }
                    if *cap < 0.0 && *accum < *cap {
                        *accum = *cap;
                    }
                }
                acc.add(*coordinate, *accum);
            }
            Self::Pulse {
                frequency,
                min_value,
                max_value,
                waveform,
                coordinate,
                activation_threshold_scale,
            } => {
                if let Some(threshold) = activation_threshold_scale
                    && ctx.base_scale > *threshold
                {
                    return;
                }
                let raw = ((std::f64::consts::TAU * *frequency * ctx.elapsed).sin() + 1.0) / 2.0;
                let shaped = match waveform {
                    Waveform::Sine => raw,
                    Waveform::Spike => raw.powi(10),
                };
                let v = *min_value + (*max_value - *min_value) * shaped;
                acc.pulse(*coordinate, v);
            }
        }
    }

    /// Rewind or fast-forward mutable state to scene time `elapsed`. Drift
    /// takes its closed-form value (constant velocity integrated from 0,
    /// clamped to the cap), so a seek lands exactly where playback would.
    pub fn reset_to(&mut self, elapsed: f64) {
        if let Self::Drift {
            velocity,
            cap,
            accum,
            ..
        } = self
        {
            let mut v = *velocity * elapsed;
            if let Some(cap) = cap {
                if *cap >= 0.0 && v > *cap {
                    v = *cap;
                }
                if *cap < 0.0 && v < *cap {
                    v = *cap;
                }
            }
            *accum = v;
        }
    }
}

/// One location keyframe; channels left `None` are not keyed here.
#[derive(Clone, Copy, Debug)]
pub struct LocationKey {
    pub time: f64,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub vertical_percent: Option<f64>,
    pub interpolate: bool,
}

/// Effective location at a point in scene time.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LocationSample {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub vertical_percent: Option<f64>,
}

/// All location keyframes of a layer, sorted ascending by time.
///
/// Each channel is sampled independently over the keys that define it: the
/// bracketing pair is lerped when the destination key asks to interpolate,
/// otherwise the most recent key holds; before the first key, the first
/// key's value applies.
#[derive(Clone, Debug, Default)]
pub struct LocationTrack {
    keys: Vec<LocationKey>,
}

impl LocationTrack {
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn sample(&self, t: f64) -> LocationSample {
        LocationSample {
            x: self.sample_channel(t, |k| k.x),
            y: self.sample_channel(t, |k| k.y),
            vertical_percent: self.sample_channel(t, |k| k.vertical_percent),
        }
    }

    fn sample_channel(&self, t: f64, channel: impl Fn(&LocationKey) -> Option<f64>) -> Option<f64> {
        let keyed: Vec<(f64, f64, bool)> = self
            .keys
            .iter()
            .filter_map(|k| channel(k).map(|v| (k.time, v, k.interpolate)))
            .collect();
        if keyed.is_empty() {
            return None;
        }

        let idx = keyed.partition_point(|&(kt, _, _)| kt <= t);
        if idx == 0 {
            return Some(keyed[0].1);
        }
        if idx >= keyed.len() {
            return Some(keyed[keyed.len() - 1].1);
        }

        let (t0, v0, _) = keyed[idx - 1];
        let (t1, v1, interpolate) = keyed[idx];
        if !interpolate || t1 <= t0 {
            return Some(v0);
        }
        let f = ((t - t0) / (t1 - t0)).clamp(0.0, 1.0);
        Some(v0 + (v1 - v0) * f)
    }
}

/// A layer's compiled behaviors: the keyframe track that drives the base
/// position plus the delta runtimes folded into the transform accumulator.
#[derive(Clone, Debug, Default)]
pub struct BehaviorSet {
    pub location: LocationTrack,
    pub runtimes: Vec<BehaviorRuntime>,
}

impl BehaviorSet {
    /// Compile the model behaviors. Background and Sound are
    /// configuration-time and contribute nothing here; unknown kinds are
    /// skipped with a warning.
    pub fn compile(behaviors: &[Behavior]) -> Self {
        let mut location = Vec::new();
        let mut runtimes = Vec::new();

        for behavior in behaviors {
            match behavior {
                Behavior::Oscillate {
                    frequency,
                    amplitude,
                    coordinate,
                    phase_offset,
                } => runtimes.push(BehaviorRuntime::Oscillate {
                    frequency: *frequency,
                    amplitude: *amplitude,
                    coordinate: *coordinate,
                    phase_offset: *phase_offset,
                }),
                Behavior::Drift {
                    velocity,
                    coordinate,
                    drift_cap,
                } => runtimes.push(BehaviorRuntime::Drift {
                    velocity: *velocity,
                    coordinate: *coordinate,
                    cap: *drift_cap,
                    accum: 0.0,
                }),
                Behavior::Pulse {
                    frequency,
                    min_value,
                    max_value,
                    waveform,
                    coordinate,
                    activation_threshold_scale,
                } => runtimes.push(BehaviorRuntime::Pulse {
                    frequency: *frequency,
                    min_value: *min_value,
                    max_value: *max_value,
                    waveform: *waveform,
                    coordinate: *coordinate,
                    activation_threshold_scale: *activation_threshold_scale,
                }),
                Behavior::Location {
                    x,
                    y,
                    vertical_percent,
                    time_offset,
                    interpolate,
                } => location.push(LocationKey {
                    time: time_offset.unwrap_or(0.0),
                    x: *x,
                    y: *y,
                    vertical_percent: *vertical_percent,
                    interpolate: *interpolate,
                }),
                Behavior::Background { .. } | Behavior::Sound { .. } => {}
                Behavior::Unknown => {
                    tracing::warn!("unknown behavior kind skipped");
                }
            }
        }

        location.sort_by(|a, b| a.time.total_cmp(&b.time));
        Self {
            location: LocationTrack { keys: location },
            runtimes,
        }
    }

    /// Fold every runtime into the accumulator, in configuration order.
    pub fn apply(&mut self, ctx: FrameCtx, acc: &mut LayerTransform) {
        for rt in &mut self.runtimes {
            rt.apply(ctx, acc);
        }
    }

    /// Move all mutable runtime state (drift accumulators) to scene time
    /// `elapsed`. Seek calls this so playback up to `t` and a direct seek
    /// to `t` are indistinguishable.
    pub fn reset_to(&mut self, elapsed: f64) {
        for rt in &mut self.runtimes {
            rt.reset_to(elapsed);
        }
    }

    /// Sum of the stateless (oscillate) contributions to one coordinate at
    /// an arbitrary time, without touching any runtime state. Used to
    /// sample a layer's surface curve at shifted phases.
    pub fn sample_stateless(&self, coordinate: Coordinate, elapsed: f64) -> f64 {
        let mut total = 0.0;
        for rt in &self.runtimes {
            if let BehaviorRuntime::Oscillate {
                frequency,
                amplitude,
                coordinate: c,
                phase_offset,
            } = rt
                && *c == coordinate
            {
                total += *amplitude
                    * (std::f64::consts::TAU * *frequency * elapsed + *phase_offset).sin();
            }
        }
        total
    }
}

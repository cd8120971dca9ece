use std::collections::HashMap;

use crate::model::SoundCue;

/// How long after its scheduled time a one-shot cue may still start.
/// Looping cues are exempt so ambience survives a frame hitch.
pub const START_WINDOW_SEC: f64 = 0.2;

/// The playback device seam. The host supplies an implementation bound to
/// its audio output; the runtime only tells it what to do and when.
pub trait AudioSink {
    /// Begin playback. Returns `false` when the sound is unavailable;
    /// the manager degrades silently.
    fn play(&mut self, name: &str, volume: f64, looped: bool) -> bool;
    fn stop(&mut self, name: &str);
    fn stop_all(&mut self);
    fn set_volume(&mut self, name: &str, volume: f64);
}

/// Sink that plays nothing; used when the host has no audio output.
#[derive(Default)]
pub struct NullSink;

impl AudioSink for NullSink {
    fn play(&mut self, _name: &str, _volume: f64, _looped: bool) -> bool {
        false
    }
    fn stop(&mut self, _name: &str) {}
    fn stop_all(&mut self) {}
    fn set_volume(&mut self, _name: &str, _volume: f64) {}
}

#[derive(Clone, Debug)]
struct Scheduled {
    cue: SoundCue,
    played: bool,
    /// Scene time the sink actually started this cue, while playing.
    started_at: Option<f64>,
}

/// Schedules sound cues against scene time and drives volumes and fades
/// through an [`AudioSink`].
pub struct AudioManager<S: AudioSink> {
    sink: S,
    /// `sound_file -> loaded`. Unloaded sounds are a no-op on play.
    registry: HashMap<String, bool>,
    scheduled: Vec<Scheduled>,
}

impl<S: AudioSink> AudioManager<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            registry: HashMap::new(),
            scheduled: Vec::new(),
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Record whether a sound's asset loaded. Missing registration counts
    /// as not loaded.
    pub fn register(&mut self, sound_file: impl Into<String>, loaded: bool) {
        self.registry.insert(sound_file.into(), loaded);
    }

    /// Append a cue and keep the schedule sorted by time.
    pub fn schedule(&mut self, cue: SoundCue) {
        self.scheduled.push(Scheduled {
            cue,
            played: false,
            started_at: None,
        });
        self.scheduled
            .sort_by(|a, b| a.cue.time_offset.total_cmp(&b.cue.time_offset));
    }

    pub fn clear_schedule(&mut self) {
        self.sink.stop_all();
        self.scheduled.clear();
    }

    /// Advance to scene time `t`: start due cues, drive fades, stop
    /// finished ones. Seek-back (a `t` before a cue) re-arms it.
    pub fn update(&mut self, t: f64) {
        for sc in &mut self.scheduled {
            let at = sc.cue.time_offset;

            if t < at {
                sc.played = false;
                if sc.started_at.is_some() {
                    self.sink.stop(&sc.cue.sound_file);
                    sc.started_at = None;
                }
                continue;
            }

            if !sc.played {
                sc.played = true;
                let within_window = t - at < START_WINDOW_SEC;
                if within_window || sc.cue.looped {
                    let loaded = self
                        .registry
                        .get(&sc.cue.sound_file)
                        .copied()
                        .unwrap_or(false);
                    if loaded {
                        let initial = if sc.cue.fade_in > 0.0 {
                            0.0
                        } else {
                            sc.cue.volume
                        };
                        if self.sink.play(&sc.cue.sound_file, initial, sc.cue.looped) {
                            sc.started_at = Some(at);
                        }
                    } else {
                        tracing::warn!(sound = %sc.cue.sound_file, "sound not loaded; cue skipped");
                    }
                }
            }

            if let Some(start) = sc.started_at {
                if let Some(d) = sc.cue.duration
                    && t >= start + d
                {
                    self.sink.stop(&sc.cue.sound_file);
                    sc.started_at = None;
                    continue;
                }
                let v = sc.cue.volume * fade_factor(&sc.cue, start, t);
                self.sink.set_volume(&sc.cue.sound_file, v);
            }
        }
    }

    /// Halt everything and clear per-cue playback state. Played flags are
    /// reset so a later `update` schedules from scratch.
    pub fn stop_all(&mut self) {
        self.sink.stop_all();
        for sc in &mut self.scheduled {
            sc.played = false;
            sc.started_at = None;
        }
    }

    /// Seek: stop playback, then mark one-shots strictly before `t` as
    /// already played so only cues at or after `t` fire again. Looping
    /// cues always re-arm; ambience resumes wherever the scene lands.
    pub fn seek(&mut self, t: f64) {
        self.stop_all();
        for sc in &mut self.scheduled {
            sc.played = !sc.cue.looped && sc.cue.time_offset < t;
        }
    }
}

/// Combined fade-in/fade-out factor in `[0, 1]` for a cue that started at
/// `start`, evaluated at scene time `t`. Fade-out needs a known duration.
fn fade_factor(cue: &SoundCue, start: f64, t: f64) -> f64 {
    let mut f = 1.0;
    if cue.fade_in > 0.0 {
        f *= ((t - start) / cue.fade_in).clamp(0.0, 1.0);
    }
    if cue.fade_out > 0.0
        && let Some(d) = cue.duration
    {
        f *= ((start + d - t) / cue.fade_out).clamp(0.0, 1.0);
    }
    f
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        pub events: Vec<String>,
        pub volumes: HashMap<String, f64>,
    }

    impl AudioSink for RecordingSink {
        fn play(&mut self, name: &str, volume: f64, looped: bool) -> bool {
            self.events.push(format!("play {name} v={volume} loop={looped}"));
            self.volumes.insert(name.to_string(), volume);
            true
        }
        fn stop(&mut self, name: &str) {
            self.events.push(format!("stop {name}"));
        }
        fn stop_all(&mut self) {
            self.events.push("stop_all".to_string());
        }
        fn set_volume(&mut self, name: &str, volume: f64) {
            self.volumes.insert(name.to_string(), volume);
        }
    }

    fn cue(file: &str, at: f64) -> SoundCue {
        SoundCue {
            sound_file: file.to_string(),
            time_offset: at,
            volume: 1.0,
            looped: false,
            fade_in: 0.0,
            fade_out: 0.0,
            duration: None,
        }
    }

    fn manager_with(cues: Vec<SoundCue>) -> AudioManager<RecordingSink> {
        let mut m = AudioManager::new(RecordingSink::default());
        for c in &cues {
            m.register(c.sound_file.clone(), true);
        }
        for c in cues {
            m.schedule(c);
        }
        m
    }

    fn play_events(m: &AudioManager<RecordingSink>) -> Vec<&String> {
        m.sink()
            .events
            .iter()
            .filter(|e| e.starts_with("play"))
            .collect()
    }

    #[test]
    fn cues_fire_once_in_order() {
        let mut m = manager_with(vec![cue("b.mp3", 1.0), cue("a.mp3", 0.5)]);
        for i in 0..=12 {
            m.update(i as f64 * 0.1);
        }
        let plays = play_events(&m);
        assert_eq!(plays.len(), 2);
        assert!(plays[0].contains("a.mp3"));
        assert!(plays[1].contains("b.mp3"));
    }

    #[test]
    fn one_shot_outside_start_window_is_skipped() {
        let mut m = manager_with(vec![cue("late.mp3", 0.5)]);
        m.update(2.0);
        assert!(play_events(&m).is_empty());
    }

    #[test]
    fn looping_cue_starts_even_when_late() {
        let mut c = cue("amb.mp3", 0.5);
        c.looped = true;
        let mut m = manager_with(vec![c]);
        m.update(5.0);
        assert_eq!(play_events(&m).len(), 1);
    }

    #[test]
    fn seek_rearms_only_later_cues() {
        let mut m = manager_with(vec![cue("a.mp3", 0.5), cue("b.mp3", 1.0)]);
        m.update(0.55);
        assert_eq!(play_events(&m).len(), 1);

        m.seek(0.8);
        m.update(0.9);
        m.update(1.05);
        let plays = play_events(&m);
        assert_eq!(plays.len(), 2);
        assert!(plays[1].contains("b.mp3"));
    }

    #[test]
    fn seek_past_a_loop_still_restarts_it() {
        let mut c = cue("amb.mp3", 0.5);
        c.looped = true;
        let mut m = manager_with(vec![c]);
        m.update(0.55);
        assert_eq!(play_events(&m).len(), 1);

        m.seek(4.0);
        m.update(4.1);
        assert_eq!(play_events(&m).len(), 2);
    }

    #[test]
    fn unloaded_sound_is_a_noop() {
        let mut m = AudioManager::new(RecordingSink::default());
        m.schedule(cue("ghost.mp3", 0.0));
        m.update(0.05);
        assert!(play_events(&m).is_empty());
    }

    #[test]
    fn fade_in_ramps_linearly() {
        let mut c = cue("fade.mp3", 0.0);
        c.fade_in = 2.0;
        let mut m = manager_with(vec![c]);

        m.update(0.05);
        assert_eq!(m.sink().volumes["fade.mp3"], 0.025);
        m.update(1.0);
        assert_eq!(m.sink().volumes["fade.mp3"], 0.5);
        m.update(3.0);
        assert_eq!(m.sink().volumes["fade.mp3"], 1.0);
    }

    #[test]
    fn fade_out_needs_duration_and_stops_at_end() {
        let mut c = cue("out.mp3", 0.0);
        c.duration = Some(2.0);
        c.fade_out = 1.0;
        let mut m = manager_with(vec![c]);

        m.update(0.1);
        m.update(1.5);
        assert_eq!(m.sink().volumes["out.mp3"], 0.5);
        m.update(2.1);
        assert!(m.sink().events.iter().any(|e| e == "stop out.mp3"));
    }
}

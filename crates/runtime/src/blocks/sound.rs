//! Sound blocks
//!
//! The runtime tracks volume and sound identity; actual playback
//! belongs to the audio collaborator. The default engine is silent and
//! reports zero duration, which makes `play until done` complete
//! immediately — headless runs never block on audio.

use crate::scheduler::Runtime;
use sb3_core::TargetId;

/// Audio collaborator. `play` returns the sound's duration in seconds
/// (0 for unknown sounds or silent engines); the runtime uses it as
/// the `play until done` deadline.
pub trait AudioEngine {
    fn play(&mut self, target: &str, sound: &str) -> f64;
    fn stop_all(&mut self);
}

/// Engine that plays nothing.
#[derive(Debug, Default)]
pub struct NullAudio;

impl AudioEngine for NullAudio {
    fn play(&mut self, _target: &str, _sound: &str) -> f64 {
        0.0
    }

    fn stop_all(&mut self) {}
}

/// Resolve a sound input to a name: a number picks by 1-based index,
/// anything else matches by name.
pub fn resolve_sound(rt: &Runtime, target: TargetId, value: &str) -> Option<String> {
    let t = rt.project.target(target);
    if t.sounds.iter().any(|s| s.name == value) {
        return Some(value.to_string());
    }
    let n = value.parse::<f64>().ok()?;
    if n < 1.0 {
        return None;
    }
    t.sounds.get(n as usize - 1).map(|s| s.name.clone())
}

/// Start a sound, returning its duration in seconds.
pub fn play(rt: &mut Runtime, target: TargetId, value: &str) -> f64 {
    let Some(name) = resolve_sound(rt, target, value) else {
        return 0.0;
    };
    let target_name = rt.project.target(target).name.clone();
    rt.audio.play(&target_name, &name)
}

pub fn stop_all(rt: &mut Runtime) {
    rt.audio.stop_all();
}

pub fn change_volume(rt: &mut Runtime, target: TargetId, delta: f64) {
    let t = rt.project.target_mut(target);
    t.volume = (t.volume + delta).clamp(0.0, 100.0);
}

pub fn set_volume(rt: &mut Runtime, target: TargetId, volume: f64) {
    rt.project.target_mut(target).volume = volume.clamp(0.0, 100.0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::test_support::runtime_with_sprite;
    use sb3_core::Sound;

    #[test]
    fn test_volume_clamped() {
        let (mut rt, sprite) = runtime_with_sprite();
        set_volume(&mut rt, sprite, 150.0);
        assert_eq!(rt.project.target(sprite).volume, 100.0);
        change_volume(&mut rt, sprite, -250.0);
        assert_eq!(rt.project.target(sprite).volume, 0.0);
    }

    #[test]
    fn test_resolve_sound_by_name_and_index() {
        let (mut rt, sprite) = runtime_with_sprite();
        rt.project.target_mut(sprite).sounds.push(Sound {
            name: "meow".into(),
            asset_id: String::new(),
            data_format: "wav".into(),
        });
        assert_eq!(resolve_sound(&rt, sprite, "meow").as_deref(), Some("meow"));
        assert_eq!(resolve_sound(&rt, sprite, "1").as_deref(), Some("meow"));
        assert_eq!(resolve_sound(&rt, sprite, "2"), None);
        assert_eq!(resolve_sound(&rt, sprite, "purr"), None);
    }
}

use std::{cell::RefCell, rc::Rc};

use serde::Serialize;

/// Outcome of a fire-and-forget play request. `duration_secs` drives the
/// "play until done" wait; a mixer that cannot report duration returns 0
/// and the block degrades to a plain play.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayResult {
    pub handle: i32,
    pub duration_secs: f32,
}

/// Seam to the external audio collaborator. The engine only ever issues
/// play/stop requests; mixing, decoding, and device state live elsewhere.
pub trait AudioMixer {
    /// `volume` is 0..1, `pitch_semitones` e.g. +12 for one octave up.
    fn play_sound(&self, file_path: &str, volume: f32, pitch_semitones: f32) -> PlayResult;
    fn stop_all(&self);
}

/// Mixer for hosts without audio. Reports no duration, so "until done"
/// waits complete immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAudio;

impl AudioMixer for NullAudio {
    fn play_sound(&self, _file_path: &str, _volume: f32, _pitch_semitones: f32) -> PlayResult {
        PlayResult {
            handle: -1,
            duration_secs: 0.0,
        }
    }

    fn stop_all(&self) {}
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AudioEvent {
    Play {
        file_path: String,
        volume: f32,
        pitch_semitones: f32,
    },
    StopAll,
}

/// Records every request it receives; used by tests and the headless
/// harness to show what the audio collaborator would have been asked.
#[derive(Clone, Default)]
pub struct RecordingAudio {
    events: Rc<RefCell<Vec<AudioEvent>>>,
    next_handle: Rc<RefCell<i32>>,
    duration_secs: f32,
}

impl RecordingAudio {
    pub fn new() -> Self {
        Self::default()
    }

    /// A recorder that reports `duration_secs` for every play, so
    /// "until done" paths can be exercised.
    pub fn with_duration(duration_secs: f32) -> Self {
        RecordingAudio {
            duration_secs,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<AudioEvent> {
        self.events.borrow().clone()
    }
}

impl AudioMixer for RecordingAudio {
    fn play_sound(&self, file_path: &str, volume: f32, pitch_semitones: f32) -> PlayResult {
        self.events.borrow_mut().push(AudioEvent::Play {
            file_path: file_path.to_string(),
            volume,
            pitch_semitones,
        });
        let mut next = self.next_handle.borrow_mut();
        *next += 1;
        PlayResult {
            handle: *next,
            duration_secs: self.duration_secs,
        }
    }

    fn stop_all(&self) {
        self.events.borrow_mut().push(AudioEvent::StopAll);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_mixer_tracks_requests_in_order() {
        let mixer = RecordingAudio::with_duration(1.5);
        let first = mixer.play_sound("pop.wav", 0.8, 0.0);
        let second = mixer.play_sound("meow.wav", 1.0, 12.0);
        mixer.stop_all();

        assert_eq!(first.duration_secs, 1.5);
        assert_ne!(first.handle, second.handle);
        assert_eq!(
            mixer.events(),
            vec![
                AudioEvent::Play {
                    file_path: "pop.wav".to_string(),
                    volume: 0.8,
                    pitch_semitones: 0.0,
                },
                AudioEvent::Play {
                    file_path: "meow.wav".to_string(),
                    volume: 1.0,
                    pitch_semitones: 12.0,
                },
                AudioEvent::StopAll,
            ]
        );
    }
}

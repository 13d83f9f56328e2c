pub mod audio;
pub mod condition;
pub mod runner;
pub mod runtime;

pub use audio::{AudioEvent, AudioMixer, NullAudio, PlayResult, RecordingAudio};
pub use runner::{ControlMode, Frame, RunnerError, RunnerProgress, ScriptRunner, StepOutcome};
pub use runtime::{Runtime, SafetyConfig};

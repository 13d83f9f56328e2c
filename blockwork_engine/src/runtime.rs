use std::time::Instant;

use blockwork_model::{BlockKind, Project};
use serde::{Deserialize, Serialize};

use crate::audio::AudioMixer;
use crate::runner::ScriptRunner;

/// Per-tick runaway guards. Budgets are denominated in interpreter steps,
/// not blocks, so polling waits count against them too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyConfig {
    pub max_steps_per_runner_per_tick: u32,
    pub max_total_steps_per_tick: u32,
    pub max_tick_millis: u64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        SafetyConfig {
            max_steps_per_runner_per_tick: 200,
            max_total_steps_per_tick: 5_000,
            max_tick_millis: 8,
        }
    }
}

impl SafetyConfig {
    /// Forces every knob into its sane range; zero budgets would wedge the
    /// scheduler forever.
    pub fn clamped(self) -> SafetyConfig {
        SafetyConfig {
            max_steps_per_runner_per_tick: self.max_steps_per_runner_per_tick.clamp(1, 200_000),
            max_total_steps_per_tick: self.max_total_steps_per_tick.clamp(1, 500_000),
            max_tick_millis: self.max_tick_millis.clamp(1, 1_000),
        }
    }
}

/// Cooperative scheduler over one runner per started script. Runners are
/// serviced in spawn order each tick; none ever blocks the host thread, and
/// any runner fault pauses the whole scheduler with a readable message
/// instead of tearing the host down.
#[derive(Default)]
pub struct Runtime {
    runners: Vec<ScriptRunner>,
    running: bool,
    paused: bool,
    safety: SafetyConfig,
    last_error: Option<String>,
}

impl Runtime {
    pub fn new() -> Self {
        Runtime::default()
    }

    pub fn with_safety(safety: SafetyConfig) -> Self {
        Runtime {
            safety: safety.clamped(),
            ..Runtime::default()
        }
    }

    pub fn safety(&self) -> SafetyConfig {
        self.safety
    }

    pub fn set_safety(&mut self, safety: SafetyConfig) {
        self.safety = safety.clamped();
    }

    pub fn is_running(&self) -> bool {
        self.running && !self.runners.is_empty()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn runner_count(&self) -> usize {
        self.runners.len()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// Restarts execution: drops every live runner, silences
    /// the mixer, and spawns one runner per green-flag script.
    pub fn start_green_flag(&mut self, project: &Project, audio: &dyn AudioMixer) {
        self.runners.clear();
        self.paused = false;
        self.last_error = None;
        audio.stop_all();

        for actor in &project.actors {
            for script in &actor.scripts {
                let hat = script
                    .head_block
                    .and_then(|head| actor.block(head))
                    .map(|block| block.kind);
                if hat == Some(BlockKind::WhenGreenFlag) {
                    self.runners
                        .push(ScriptRunner::start(project, actor.id, script.id));
                }
            }
        }

        self.running = !self.runners.is_empty();
        log::info!("green flag: {} script(s) started", self.runners.len());
    }

    /// Spawns runners for `when key pressed` scripts matching `key`. A hat
    /// with no key argument matches any key. Scripts already running are
    /// left alone rather than restarted.
    pub fn start_key_pressed(&mut self, project: &Project, key: &str) {
        let key = key.trim().to_lowercase();
        for actor in &project.actors {
            for script in &actor.scripts {
                let Some(head) = script.head_block else {
                    continue;
                };
                let Some(block) = actor.block(head) else {
                    continue;
                };
                if block.kind != BlockKind::WhenKeyPressed {
                    continue;
                }
                let wanted = block.arg(0).unwrap_or("").trim().to_lowercase();
                if !wanted.is_empty() && wanted != key {
                    continue;
                }
                let already_live = self.runners.iter().any(|runner| {
                    runner.actor_id() == actor.id
                        && runner.script_id() == script.id
                        && !runner.is_finished()
                });
                if !already_live {
                    self.runners
                        .push(ScriptRunner::start(project, actor.id, script.id));
                }
            }
        }
        if !self.runners.is_empty() {
            self.running = true;
        }
    }

    /// Halts everything immediately and silences the mixer.
    pub fn stop_all(&mut self, audio: &dyn AudioMixer) {
        self.runners.clear();
        self.running = false;
        audio.stop_all();
    }

    /// Advances every live runner by up to one tick's budget. `dt` is the
    /// wall time covered by this tick, fed to wait timers and say bubbles.
    pub fn tick(&mut self, project: &mut Project, audio: &dyn AudioMixer, dt: f32) {
        if self.paused || !self.running {
            return;
        }
        let started = Instant::now();
        decay_say_bubbles(project, dt);

        let mut total: u32 = 0;
        for index in 0..self.runners.len() {
            if started.elapsed().as_millis() as u64 >= self.safety.max_tick_millis {
                self.pause_with_error(format!(
                    "tick exceeded {} ms wall clock; pausing scripts",
                    self.safety.max_tick_millis
                ));
                break;
            }

            let budget = self
                .safety
                .max_steps_per_runner_per_tick
                .min(self.safety.max_total_steps_per_tick - total);
            let progress = self.runners[index].run(project, audio, dt, budget);
            total += progress.steps;

            if let Some(error) = progress.error {
                let actor_id = self.runners[index].actor_id();
                self.pause_with_error(format!("script on actor {actor_id} faulted: {error}"));
                break;
            }
            if project.consume_stop_all_request() {
                self.stop_all(audio);
                return;
            }
            if total >= self.safety.max_total_steps_per_tick {
                self.pause_with_error(format!(
                    "step budget exhausted ({total} steps in one tick); pausing scripts"
                ));
                break;
            }
        }

        self.retire_finished();
    }

    /// Runs exactly one interpreter step of the first live runner, with no
    /// elapsed time. Works while paused, which is the point of a debugger
    /// step.
    pub fn step(&mut self, project: &mut Project, audio: &dyn AudioMixer) {
        let Some(index) = self
            .runners
            .iter()
            .position(|runner| !runner.is_finished())
        else {
            return;
        };
        if let Err(error) = self.runners[index].step_once(project, audio, 0.0) {
            let actor_id = self.runners[index].actor_id();
            self.runners[index].stop();
            self.pause_with_error(format!("script on actor {actor_id} faulted: {error}"));
        }
        if project.consume_stop_all_request() {
            self.stop_all(audio);
            return;
        }
        self.retire_finished();
    }

    fn retire_finished(&mut self) {
        self.runners.retain(|runner| !runner.is_finished());
        if self.runners.is_empty() {
            self.running = false;
        }
    }

    fn pause_with_error(&mut self, message: String) {
        log::error!("{message}");
        self.paused = true;
        self.last_error = Some(message);
    }
}

/// Say/think bubbles age once per scheduler tick, regardless of how many of
/// the actor's scripts ran.
fn decay_say_bubbles(project: &mut Project, dt: f32) {
    for actor in &mut project.actors {
        if actor.say_remaining > 0.0 {
            actor.say_remaining -= dt;
            if actor.say_remaining <= 0.0 {
                actor.clear_say();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioEvent, NullAudio, RecordingAudio};
    use blockwork_model::BlockId;

    fn set_args(project: &mut Project, actor_id: u32, block_id: BlockId, args: &[&str]) {
        let actor = project.actor_mut(actor_id).unwrap();
        let block = actor.blocks.get_mut(&block_id).unwrap();
        block.args = args.iter().map(|arg| arg.to_string()).collect();
    }

    fn chain(project: &mut Project, actor_id: u32, kinds: &[BlockKind]) -> u32 {
        let script_id = project
            .create_script(actor_id, BlockKind::WhenGreenFlag, 0.0, 0.0)
            .unwrap();
        for kind in kinds {
            project
                .append_to_script(actor_id, script_id, *kind)
                .unwrap();
        }
        script_id
    }

    fn forever_script(project: &mut Project, actor_id: u32) -> u32 {
        let script_id = chain(project, actor_id, &[BlockKind::Forever]);
        let forever = *project
            .actor(actor_id)
            .unwrap()
            .blocks
            .keys()
            .max()
            .unwrap();
        let body = project
            .append_to_child_chain(actor_id, forever, BlockKind::ChangeXBy)
            .unwrap();
        set_args(project, actor_id, body, &["1"]);
        script_id
    }

    #[test]
    fn green_flag_spawns_one_runner_per_matching_script() {
        let mut project = Project::new();
        let first = project.add_actor("Blip");
        let second = project.add_actor("Bloop");
        chain(&mut project, first, &[BlockKind::MoveSteps]);
        chain(&mut project, first, &[BlockKind::TurnLeft]);
        chain(&mut project, second, &[BlockKind::Say]);
        project
            .create_script(second, BlockKind::WhenKeyPressed, 0.0, 0.0)
            .unwrap();

        let mut runtime = Runtime::new();
        runtime.start_green_flag(&project, &NullAudio);

        assert_eq!(runtime.runner_count(), 3, "key-pressed hats are not started");
        assert!(runtime.is_running());
    }

    #[test]
    fn green_flag_restart_silences_audio_and_resets_state() {
        let mut project = Project::new();
        let actor_id = project.add_actor("Blip");
        chain(&mut project, actor_id, &[BlockKind::MoveSteps]);

        let mixer = RecordingAudio::new();
        let mut runtime = Runtime::new();
        runtime.start_green_flag(&project, &mixer);
        runtime.start_green_flag(&project, &mixer);

        assert_eq!(runtime.runner_count(), 1);
        assert_eq!(
            mixer.events(),
            vec![AudioEvent::StopAll, AudioEvent::StopAll]
        );
    }

    #[test]
    fn tick_runs_scripts_to_completion_and_goes_idle() {
        let mut project = Project::new();
        let actor_id = project.add_actor("Blip");
        chain(
            &mut project,
            actor_id,
            &[BlockKind::MoveSteps, BlockKind::TurnRight],
        );

        let mut runtime = Runtime::new();
        runtime.start_green_flag(&project, &NullAudio);
        runtime.tick(&mut project, &NullAudio, 0.016);

        assert!(!runtime.is_running());
        assert_eq!(runtime.runner_count(), 0);
        let actor = project.actor(actor_id).unwrap();
        assert!((actor.x - 10.0).abs() < 1e-4);
        assert!((actor.heading_deg - 105.0).abs() < 1e-4);
    }

    #[test]
    fn stop_all_block_halts_every_runner_mid_tick() {
        let mut project = Project::new();
        let stopper = project.add_actor("Stopper");
        let looper = project.add_actor("Looper");
        chain(&mut project, stopper, &[BlockKind::StopAll]);
        forever_script(&mut project, looper);

        let mixer = RecordingAudio::new();
        let mut runtime = Runtime::new();
        runtime.start_green_flag(&project, &mixer);
        runtime.tick(&mut project, &mixer, 0.016);

        assert!(!runtime.is_running());
        assert_eq!(runtime.runner_count(), 0);
        assert!(mixer.events().contains(&AudioEvent::StopAll));
    }

    #[test]
    fn exhausted_step_budget_pauses_with_a_readable_error() {
        let mut project = Project::new();
        let actor_id = project.add_actor("Blip");
        forever_script(&mut project, actor_id);

        let mut runtime = Runtime::with_safety(SafetyConfig {
            max_steps_per_runner_per_tick: 200,
            max_total_steps_per_tick: 50,
            max_tick_millis: 1_000,
        });
        runtime.start_green_flag(&project, &NullAudio);
        runtime.tick(&mut project, &NullAudio, 0.016);

        assert!(runtime.is_paused());
        assert!(runtime.last_error().is_some());

        // A paused runtime stands still until resumed.
        let frozen = project.actor(actor_id).unwrap().x;
        runtime.tick(&mut project, &NullAudio, 0.016);
        assert_eq!(project.actor(actor_id).unwrap().x, frozen);

        runtime.clear_error();
        runtime.set_paused(false);
        runtime.tick(&mut project, &NullAudio, 0.016);
        assert!(project.actor(actor_id).unwrap().x > frozen);
    }

    #[test]
    fn per_runner_budget_is_shared_fairly() {
        let mut project = Project::new();
        let first = project.add_actor("Blip");
        let second = project.add_actor("Bloop");
        forever_script(&mut project, first);
        forever_script(&mut project, second);

        let mut runtime = Runtime::with_safety(SafetyConfig {
            max_steps_per_runner_per_tick: 10,
            max_total_steps_per_tick: 1_000,
            max_tick_millis: 1_000,
        });
        runtime.start_green_flag(&project, &NullAudio);
        runtime.tick(&mut project, &NullAudio, 0.016);

        let a = project.actor(first).unwrap().x;
        let b = project.actor(second).unwrap().x;
        assert!(a > 0.0, "first runner made progress");
        assert_eq!(a, b, "both runners got the same budget");
        assert!(runtime.is_running());
        assert!(!runtime.is_paused());
    }

    #[test]
    fn runner_fault_pauses_the_scheduler() {
        let mut project = Project::new();
        let actor_id = project.add_actor("Blip");
        let script_id = project
            .create_script(actor_id, BlockKind::WhenGreenFlag, 0.0, 0.0)
            .unwrap();
        let forever = project
            .append_to_script(actor_id, script_id, BlockKind::Forever)
            .unwrap();
        project
            .actor_mut(actor_id)
            .unwrap()
            .blocks
            .get_mut(&forever)
            .unwrap()
            .child_head = Some(forever);

        let mut runtime = Runtime::with_safety(SafetyConfig {
            max_steps_per_runner_per_tick: 10_000,
            max_total_steps_per_tick: 100_000,
            max_tick_millis: 1_000,
        });
        runtime.start_green_flag(&project, &NullAudio);
        runtime.tick(&mut project, &NullAudio, 0.016);

        assert!(runtime.is_paused());
        let message = runtime.last_error().unwrap();
        assert!(message.contains("faulted"), "got: {message}");
    }

    #[test]
    fn step_advances_one_block_at_a_time() {
        let mut project = Project::new();
        let actor_id = project.add_actor("Blip");
        let script_id = chain(&mut project, actor_id, &[BlockKind::ChangeXBy]);
        let after = project
            .append_to_script(actor_id, script_id, BlockKind::ChangeYBy)
            .unwrap();
        set_args(&mut project, actor_id, after, &["5"]);

        let mut runtime = Runtime::new();
        runtime.start_green_flag(&project, &NullAudio);

        runtime.step(&mut project, &NullAudio); // hat
        assert_eq!(project.actor(actor_id).unwrap().x, 0.0);
        runtime.step(&mut project, &NullAudio);
        assert_eq!(project.actor(actor_id).unwrap().x, 10.0);
        assert_eq!(project.actor(actor_id).unwrap().y, 0.0);
        runtime.step(&mut project, &NullAudio);
        assert_eq!(project.actor(actor_id).unwrap().y, 5.0);
    }

    #[test]
    fn say_bubbles_decay_once_per_tick() {
        let mut project = Project::new();
        let actor_id = project.add_actor("Blip");
        chain(&mut project, actor_id, &[BlockKind::Say]);
        forever_script(&mut project, actor_id);

        let mut runtime = Runtime::new();
        runtime.start_green_flag(&project, &NullAudio);
        runtime.tick(&mut project, &NullAudio, 0.016);
        assert_eq!(project.actor(actor_id).unwrap().say_text, "Hello!");

        runtime.tick(&mut project, &NullAudio, 0.5);
        let remaining = project.actor(actor_id).unwrap().say_remaining;
        assert!((remaining - 1.5).abs() < 1e-4, "got {remaining}");

        runtime.tick(&mut project, &NullAudio, 5.0);
        assert!(project.actor(actor_id).unwrap().say_text.is_empty());
    }

    #[test]
    fn key_pressed_hats_start_on_a_matching_key_only() {
        let mut project = Project::new();
        let actor_id = project.add_actor("Blip");
        let script_id = project
            .create_script(actor_id, BlockKind::WhenKeyPressed, 0.0, 0.0)
            .unwrap();
        let head = project
            .actor(actor_id)
            .unwrap()
            .script(script_id)
            .unwrap()
            .head_block
            .unwrap();
        set_args(&mut project, actor_id, head, &["space"]);
        project
            .append_to_script(actor_id, script_id, BlockKind::ChangeXBy)
            .unwrap();

        let mut runtime = Runtime::new();
        runtime.start_key_pressed(&project, "a");
        assert_eq!(runtime.runner_count(), 0);

        runtime.start_key_pressed(&project, " SPACE ");
        assert_eq!(runtime.runner_count(), 1);
        // Pressing again while live does not stack a second runner.
        runtime.start_key_pressed(&project, "space");
        assert_eq!(runtime.runner_count(), 1);
        assert!(runtime.is_running());
    }

    #[test]
    fn safety_config_clamps_every_knob() {
        let clamped = SafetyConfig {
            max_steps_per_runner_per_tick: 0,
            max_total_steps_per_tick: 9_999_999,
            max_tick_millis: 0,
        }
        .clamped();
        assert_eq!(clamped.max_steps_per_runner_per_tick, 1);
        assert_eq!(clamped.max_total_steps_per_tick, 500_000);
        assert_eq!(clamped.max_tick_millis, 1);

        let runtime = Runtime::with_safety(SafetyConfig {
            max_steps_per_runner_per_tick: 0,
            max_total_steps_per_tick: 0,
            max_tick_millis: 2_000,
        });
        assert_eq!(runtime.safety().max_steps_per_runner_per_tick, 1);
        assert_eq!(runtime.safety().max_total_steps_per_tick, 1);
        assert_eq!(runtime.safety().max_tick_millis, 1_000);
    }
}

use blockwork_model::{Block, BlockId, BlockKind, Project};
use rand::Rng;
use thiserror::Error;

use crate::audio::AudioMixer;
use crate::condition;

/// Hard cap on control-frame nesting. A well-formed script never gets close;
/// only a self-referential block graph can grow the stack without bound.
const MAX_FRAME_DEPTH: usize = 256;

/// Cap on loop-exit passes within a single step, same rationale.
const UNWIND_ITERATION_LIMIT: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RunnerError {
    #[error("control nesting exceeded {0} frames (self-referential loop?)")]
    FrameDepthExceeded(usize),
    #[error("loop unwind did not settle within {0} passes")]
    UnwindRunaway(usize),
}

/// Why a pushed frame exists, which decides what happens when its chain
/// runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    /// A plain body (if-then) or the root chain; exiting resumes the owner's
    /// successor.
    None,
    /// Counted loop; re-enters the body while `repeat_remaining` > 0.
    Repeat,
    /// Unconditional loop; always re-enters.
    Forever,
    /// Re-evaluates the owner's condition on each exit.
    RepeatUntil,
}

/// One level of the interpreter's explicit call stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// First block of this frame's chain, kept for loop re-entry.
    pub head: BlockId,
    /// Next block to execute; None means the chain has run out.
    pub current: Option<BlockId>,
    /// The control block that pushed this frame, 0 for the root chain.
    pub owner: BlockId,
    pub mode: ControlMode,
    /// Iterations left for [`ControlMode::Repeat`]; -1 elsewhere by
    /// convention.
    pub repeat_remaining: i32,
}

impl Frame {
    fn root(head: BlockId) -> Self {
        Frame {
            head,
            current: Some(head),
            owner: 0,
            mode: ControlMode::None,
            repeat_remaining: -1,
        }
    }

    fn control(owner: BlockId, head: BlockId, mode: ControlMode, repeat_remaining: i32) -> Self {
        Frame {
            head,
            current: Some(head),
            owner,
            mode,
            repeat_remaining,
        }
    }
}

/// What one interpreter step did, from the scheduler's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// A block executed (or a frame was retired); keep going.
    Continue,
    /// Blocked on a wait timer or a pending answer; give up the rest of this
    /// tick's budget.
    Yield,
    /// The script is finished.
    Done,
}

/// Summary of one budgeted burst of steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunnerProgress {
    pub steps: u32,
    pub error: Option<RunnerError>,
}

/// Interprets one script chain for one actor. Runners hold no references
/// into the project; every step re-resolves the actor and block by id, so
/// concurrent edits degrade gracefully instead of dangling.
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    actor_id: u32,
    script_id: u32,
    stack: Vec<Frame>,
    wait_remaining: f32,
    waiting_ask: bool,
    finished: bool,
}

impl ScriptRunner {
    /// Prepares a runner positioned at the script's head block. A script
    /// that cannot be resolved starts out already finished.
    pub fn start(project: &Project, actor_id: u32, script_id: u32) -> ScriptRunner {
        let head = project
            .actor(actor_id)
            .and_then(|actor| actor.script(script_id))
            .and_then(|script| script.head_block);
        let (stack, finished) = match head {
            Some(head) => (vec![Frame::root(head)], false),
            None => (Vec::new(), true),
        };
        ScriptRunner {
            actor_id,
            script_id,
            stack,
            wait_remaining: 0.0,
            waiting_ask: false,
            finished,
        }
    }

    pub fn actor_id(&self) -> u32 {
        self.actor_id
    }

    pub fn script_id(&self) -> u32 {
        self.script_id
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn wait_remaining(&self) -> f32 {
        self.wait_remaining
    }

    pub fn stop(&mut self) {
        self.finished = true;
        self.stack.clear();
        self.wait_remaining = 0.0;
        self.waiting_ask = false;
    }

    /// Runs up to `budget` steps, stopping early when the script finishes,
    /// yields, or faults. A fault stops the runner and is reported in the
    /// returned progress.
    pub fn run(
        &mut self,
        project: &mut Project,
        audio: &dyn AudioMixer,
        dt: f32,
        budget: u32,
    ) -> RunnerProgress {
        let mut steps = 0;
        while !self.finished && steps < budget {
            match self.step_once(project, audio, dt) {
                Ok(StepOutcome::Continue) => steps += 1,
                Ok(StepOutcome::Yield) => {
                    steps += 1;
                    break;
                }
                Ok(StepOutcome::Done) => break,
                Err(error) => {
                    self.stop();
                    return RunnerProgress {
                        steps,
                        error: Some(error),
                    };
                }
            }
        }
        RunnerProgress { steps, error: None }
    }

    /// Executes at most one block. Order matters: the wait timer and the
    /// pending-answer gate are serviced before any block runs, so a blocked
    /// script consumes one step and yields instead of draining its budget.
    pub fn step_once(
        &mut self,
        project: &mut Project,
        audio: &dyn AudioMixer,
        dt: f32,
    ) -> Result<StepOutcome, RunnerError> {
        if self.finished {
            return Ok(StepOutcome::Done);
        }
        let Some(actor_index) = project.actor_index(self.actor_id) else {
            // Actor deleted out from under us.
            self.stop();
            return Ok(StepOutcome::Done);
        };
        if self.stack.is_empty() {
            self.finished = true;
            return Ok(StepOutcome::Done);
        }

        if self.wait_remaining > 0.0 {
            self.wait_remaining -= dt;
            if self.wait_remaining > 0.0 {
                return Ok(StepOutcome::Yield);
            }
            self.wait_remaining = 0.0;
        }

        if self.waiting_ask {
            if project.consume_answered() {
                self.waiting_ask = false;
            } else {
                return Ok(StepOutcome::Yield);
            }
        }

        let current = self.stack.last().and_then(|frame| frame.current);
        let Some(current_id) = current else {
            self.stack.pop();
            if self.stack.is_empty() {
                self.finished = true;
                return Ok(StepOutcome::Done);
            }
            return Ok(StepOutcome::Continue);
        };

        let Some(block) = project.actors[actor_index].block(current_id).cloned() else {
            // Block deleted mid-run: retire the frame and carry on.
            self.stack.pop();
            if self.stack.is_empty() {
                self.finished = true;
                return Ok(StepOutcome::Done);
            }
            return Ok(StepOutcome::Continue);
        };

        if block.kind.is_hat() {
            self.set_current(block.next);
            self.unwind(project, actor_index)?;
            return Ok(StepOutcome::Continue);
        }

        if self.dispatch(project, actor_index, audio, &block)? {
            return Ok(StepOutcome::Done);
        }
        self.unwind(project, actor_index)?;
        Ok(StepOutcome::Continue)
    }

    /// Executes `block`'s effect. Returns true when the runner stopped
    /// itself (stop blocks).
    fn dispatch(
        &mut self,
        project: &mut Project,
        actor_index: usize,
        audio: &dyn AudioMixer,
        block: &Block,
    ) -> Result<bool, RunnerError> {
        enum Action {
            Advance,
            Stay,
            Pushed,
            Stopped,
        }

        let action = match block.kind {
            BlockKind::WhenGreenFlag | BlockKind::WhenKeyPressed => Action::Advance,

            BlockKind::MoveSteps => {
                let actor = &mut project.actors[actor_index];
                let steps = block.number_arg(0, 10.0);
                // Heading 90 is along +x; heading 0 points toward -y
                // (screen-space up).
                let heading = (actor.heading_deg - 90.0).to_radians();
                actor.x += heading.cos() * steps;
                actor.y += heading.sin() * steps;
                Action::Advance
            }
            BlockKind::TurnRight => {
                project.actors[actor_index].heading_deg += block.number_arg(0, 15.0);
                Action::Advance
            }
            BlockKind::TurnLeft => {
                project.actors[actor_index].heading_deg -= block.number_arg(0, 15.0);
                Action::Advance
            }
            BlockKind::GoToXy => {
                let actor = &mut project.actors[actor_index];
                actor.x = block.number_arg(0, 0.0);
                actor.y = block.number_arg(1, 0.0);
                Action::Advance
            }
            BlockKind::SetX => {
                project.actors[actor_index].x = block.number_arg(0, 0.0);
                Action::Advance
            }
            BlockKind::SetY => {
                project.actors[actor_index].y = block.number_arg(0, 0.0);
                Action::Advance
            }
            BlockKind::ChangeXBy => {
                project.actors[actor_index].x += block.number_arg(0, 10.0);
                Action::Advance
            }
            BlockKind::ChangeYBy => {
                project.actors[actor_index].y += block.number_arg(0, 10.0);
                Action::Advance
            }
            BlockKind::GoToMousePointer => {
                if let Some((mx, my)) = project.mouse_world() {
                    let actor = &mut project.actors[actor_index];
                    actor.x = mx;
                    actor.y = my;
                }
                Action::Advance
            }
            BlockKind::GoToRandomPosition => {
                let mut rng = rand::thread_rng();
                let actor = &mut project.actors[actor_index];
                actor.x =
                    rng.gen_range(-condition::STAGE_HALF_WIDTH..=condition::STAGE_HALF_WIDTH);
                actor.y =
                    rng.gen_range(-condition::STAGE_HALF_HEIGHT..=condition::STAGE_HALF_HEIGHT);
                Action::Advance
            }

            BlockKind::Say | BlockKind::Think => {
                let fallback = if block.kind == BlockKind::Say {
                    "Hello!"
                } else {
                    "Hmm..."
                };
                let message = block
                    .arg(0)
                    .unwrap_or(fallback)
                    .replace("{answer}", project.answer());
                project.actors[actor_index].set_say(message);
                Action::Advance
            }
            BlockKind::SwitchCostumeTo => {
                let actor = &mut project.actors[actor_index];
                if !actor.costumes.is_empty() {
                    let count = actor.costumes.len() as i64;
                    let index = (block.number_arg(0, 1.0).round() as i64).clamp(1, count);
                    actor.current_costume = (index - 1) as usize;
                }
                Action::Advance
            }
            BlockKind::NextCostume => {
                let actor = &mut project.actors[actor_index];
                if !actor.costumes.is_empty() {
                    actor.current_costume = (actor.current_costume + 1) % actor.costumes.len();
                }
                Action::Advance
            }
            BlockKind::SwitchBackdropTo => {
                let stage = &mut project.stage;
                if !stage.backdrops.is_empty() {
                    let count = stage.backdrops.len() as i64;
                    let index = (block.number_arg(0, 1.0).round() as i64).clamp(1, count);
                    stage.current_backdrop = (index - 1) as usize;
                }
                Action::Advance
            }
            BlockKind::NextBackdrop => {
                let stage = &mut project.stage;
                if !stage.backdrops.is_empty() {
                    stage.current_backdrop =
                        (stage.current_backdrop + 1) % stage.backdrops.len();
                }
                Action::Advance
            }
            BlockKind::SetSizeTo => {
                project.actors[actor_index].size_percent = block.number_arg(0, 100.0).max(0.0);
                Action::Advance
            }
            BlockKind::ChangeSizeBy => {
                let actor = &mut project.actors[actor_index];
                actor.size_percent = (actor.size_percent + block.number_arg(0, 10.0)).max(0.0);
                Action::Advance
            }
            BlockKind::Show => {
                project.actors[actor_index].visible = true;
                Action::Advance
            }
            BlockKind::Hide => {
                project.actors[actor_index].visible = false;
                Action::Advance
            }

            BlockKind::WaitSeconds => {
                self.wait_remaining = block.number_arg(0, 1.0).max(0.0);
                Action::Advance
            }
            BlockKind::WaitUntil => {
                let ready = condition::eval(
                    project,
                    &project.actors[actor_index],
                    block.arg(0).unwrap_or(""),
                );
                if ready {
                    Action::Advance
                } else {
                    Action::Stay
                }
            }
            BlockKind::Repeat => {
                let count = (block.number_arg(0, 10.0) as i32).max(0);
                match block.child_head {
                    Some(child) if count > 0 => {
                        self.push_frame(Frame::control(
                            block.id,
                            child,
                            ControlMode::Repeat,
                            count,
                        ))?;
                        Action::Pushed
                    }
                    _ => Action::Advance,
                }
            }
            BlockKind::RepeatUntil => match block.child_head {
                Some(child) => {
                    let done = condition::eval(
                        project,
                        &project.actors[actor_index],
                        block.arg(0).unwrap_or(""),
                    );
                    if done {
                        Action::Advance
                    } else {
                        self.push_frame(Frame::control(
                            block.id,
                            child,
                            ControlMode::RepeatUntil,
                            -1,
                        ))?;
                        Action::Pushed
                    }
                }
                None => Action::Advance,
            },
            BlockKind::Forever => match block.child_head {
                Some(child) => {
                    self.push_frame(Frame::control(block.id, child, ControlMode::Forever, -1))?;
                    Action::Pushed
                }
                None => Action::Advance,
            },
            BlockKind::IfThen => match block.child_head {
                Some(child) => {
                    let taken = condition::eval(
                        project,
                        &project.actors[actor_index],
                        block.arg(0).unwrap_or(""),
                    );
                    if taken {
                        self.push_frame(Frame::control(block.id, child, ControlMode::None, -1))?;
                        Action::Pushed
                    } else {
                        Action::Advance
                    }
                }
                None => Action::Advance,
            },
            BlockKind::StopThisScript => {
                self.stop();
                Action::Stopped
            }
            BlockKind::StopAll => {
                project.request_stop_all();
                self.stop();
                Action::Stopped
            }

            BlockKind::AskAndWait => {
                let prompt = block.arg(0).unwrap_or("?").to_string();
                project.begin_ask(prompt);
                self.waiting_ask = true;
                Action::Advance
            }

            BlockKind::PlaySound | BlockKind::PlaySoundUntilDone => {
                self.play_sound(project, actor_index, audio, block);
                Action::Advance
            }
            BlockKind::StopAllSounds => {
                audio.stop_all();
                Action::Advance
            }
            BlockKind::SetVolumeTo => {
                project.actors[actor_index].volume =
                    block.number_arg(0, 100.0).clamp(0.0, 100.0);
                Action::Advance
            }
            BlockKind::ChangeVolumeBy => {
                let actor = &mut project.actors[actor_index];
                actor.volume = (actor.volume + block.number_arg(0, 10.0)).clamp(0.0, 100.0);
                Action::Advance
            }
            BlockKind::SetPitchTo => {
                project.actors[actor_index].pitch_semitones =
                    block.number_arg(0, 0.0).clamp(-24.0, 24.0);
                Action::Advance
            }
            BlockKind::ChangePitchBy => {
                let actor = &mut project.actors[actor_index];
                actor.pitch_semitones =
                    (actor.pitch_semitones + block.number_arg(0, 1.0)).clamp(-24.0, 24.0);
                Action::Advance
            }
        };

        match action {
            Action::Advance => self.set_current(block.next),
            Action::Stay | Action::Pushed => {}
            Action::Stopped => return Ok(true),
        }
        Ok(false)
    }

    fn play_sound(
        &mut self,
        project: &Project,
        actor_index: usize,
        audio: &dyn AudioMixer,
        block: &Block,
    ) {
        let actor = &project.actors[actor_index];
        let arg = block.arg(0).unwrap_or("");
        let Some(sound) = actor.find_sound(arg) else {
            log::warn!("actor {:?} has no sound matching {arg:?}", actor.name);
            return;
        };
        if sound.muted || sound.volume <= 0.0 {
            return;
        }
        let volume = ((actor.volume / 100.0) * sound.volume).clamp(0.0, 1.0);
        let result = audio.play_sound(&sound.file_path, volume, actor.pitch_semitones);
        if block.kind == BlockKind::PlaySoundUntilDone && result.duration_secs > 0.0 {
            self.wait_remaining = result.duration_secs;
        }
    }

    /// Retires frames whose chain has run out, re-entering loops where their
    /// mode says so and resuming the owner's successor otherwise.
    fn unwind(&mut self, project: &Project, actor_index: usize) -> Result<(), RunnerError> {
        let mut passes = 0;
        loop {
            match self.stack.last() {
                Some(frame) if frame.current.is_none() => {}
                _ => return Ok(()),
            }
            passes += 1;
            if passes > UNWIND_ITERATION_LIMIT {
                return Err(RunnerError::UnwindRunaway(UNWIND_ITERATION_LIMIT));
            }
            let Some(frame) = self.stack.pop() else {
                return Ok(());
            };
            if frame.owner == 0 {
                // Root chain ended; the now-empty stack finishes the runner
                // on its next step.
                continue;
            }
            match frame.mode {
                ControlMode::Forever => {
                    self.push_frame(Frame::control(
                        frame.owner,
                        frame.head,
                        ControlMode::Forever,
                        -1,
                    ))?;
                    return Ok(());
                }
                ControlMode::RepeatUntil => {
                    let Some(owner) = project.actors[actor_index].block(frame.owner) else {
                        continue;
                    };
                    let done = condition::eval(
                        project,
                        &project.actors[actor_index],
                        owner.arg(0).unwrap_or(""),
                    );
                    if done {
                        let next = owner.next;
                        self.advance_owner(frame.owner, next);
                    } else {
                        self.push_frame(Frame::control(
                            frame.owner,
                            frame.head,
                            ControlMode::RepeatUntil,
                            -1,
                        ))?;
                        return Ok(());
                    }
                }
                ControlMode::Repeat => {
                    let remaining = frame.repeat_remaining - 1;
                    if remaining > 0 {
                        self.push_frame(Frame::control(
                            frame.owner,
                            frame.head,
                            ControlMode::Repeat,
                            remaining,
                        ))?;
                        return Ok(());
                    }
                    let next = project.actors[actor_index]
                        .block(frame.owner)
                        .and_then(|owner| owner.next);
                    self.advance_owner(frame.owner, next);
                }
                ControlMode::None => {
                    let next = project.actors[actor_index]
                        .block(frame.owner)
                        .and_then(|owner| owner.next);
                    self.advance_owner(frame.owner, next);
                }
            }
        }
    }

    /// Moves the frame sitting on `owner` past it. Scans top-down because
    /// the owning frame is always the nearest one whose cursor is the owner.
    fn advance_owner(&mut self, owner: BlockId, next: Option<BlockId>) {
        for frame in self.stack.iter_mut().rev() {
            if frame.current == Some(owner) {
                frame.current = next;
                return;
            }
        }
    }

    fn set_current(&mut self, id: Option<BlockId>) {
        if let Some(frame) = self.stack.last_mut() {
            frame.current = id;
        }
    }

    fn push_frame(&mut self, frame: Frame) -> Result<(), RunnerError> {
        if self.stack.len() >= MAX_FRAME_DEPTH {
            return Err(RunnerError::FrameDepthExceeded(MAX_FRAME_DEPTH));
        }
        self.stack.push(frame);
        Ok(())
    }
}

use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use blockwork_engine::{AudioEvent, RecordingAudio, Runtime, SafetyConfig};
use blockwork_model::{BlockKind, Project, Sound};
use clap::Parser;
use serde::Serialize;

/// Headless harness: runs a project's scripts under the cooperative
/// scheduler and reports where everything ended up.
#[derive(Parser, Debug)]
#[command(
    about = "Run block scripts headlessly and report the resulting state",
    version
)]
struct Args {
    /// Path to a project JSON file (omit to run the built-in demo project)
    #[arg(long)]
    project: Option<PathBuf>,

    /// Number of scheduler ticks to simulate
    #[arg(long, default_value_t = 120)]
    frames: u32,

    /// Simulated seconds per tick
    #[arg(long, default_value_t = 1.0 / 60.0)]
    dt: f32,

    /// Per-runner step budget per tick
    #[arg(long, default_value_t = 200)]
    max_steps_per_runner: u32,

    /// Global step budget per tick
    #[arg(long, default_value_t = 5000)]
    max_total_steps: u32,

    /// Wall-clock budget per tick in milliseconds
    #[arg(long, default_value_t = 8)]
    max_tick_millis: u64,

    /// Canned answer fed to any ask prompt the scripts raise
    #[arg(long)]
    answer: Option<String>,

    /// Single-step block by block instead of free-running ticks
    #[arg(long)]
    step: bool,

    /// Path to write the final run state as JSON
    #[arg(long)]
    state_json: Option<PathBuf>,
}

#[derive(Serialize)]
struct RunReport<'a> {
    frames_run: u32,
    running: bool,
    paused: bool,
    last_error: Option<&'a str>,
    audio_events: &'a [AudioEvent],
    project: &'a Project,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut project = match args.project.as_ref() {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("reading project file {}", path.display()))?;
            Project::from_json(&json)
                .with_context(|| format!("parsing project file {}", path.display()))?
        }
        None => demo_project(),
    };

    let mut runtime = Runtime::with_safety(SafetyConfig {
        max_steps_per_runner_per_tick: args.max_steps_per_runner,
        max_total_steps_per_tick: args.max_total_steps,
        max_tick_millis: args.max_tick_millis,
    });
    let mixer = RecordingAudio::new();

    runtime.start_green_flag(&project, &mixer);
    println!(
        "Green flag: {} script(s) across {} actor(s)",
        runtime.runner_count(),
        project.actors.len()
    );

    let mut frames_run = 0;
    for _ in 0..args.frames {
        if !runtime.is_running() {
            break;
        }
        if project.ask_active() {
            match args.answer.as_ref() {
                Some(answer) => {
                    println!("Ask: {:?} -> answering {answer:?}", project.ask_prompt());
                    project.submit_answer(answer.clone());
                }
                None => {
                    println!(
                        "Ask: {:?} has no --answer to feed; stopping here",
                        project.ask_prompt()
                    );
                    break;
                }
            }
        }
        if args.step {
            runtime.step(&mut project, &mixer);
        } else {
            runtime.tick(&mut project, &mixer, args.dt);
        }
        frames_run += 1;
        if runtime.is_paused() {
            break;
        }
    }

    println!(
        "\nAfter {frames_run} {}:",
        if args.step { "steps" } else { "ticks" }
    );
    for actor in &project.actors {
        let bubble = if actor.say_text.is_empty() {
            String::new()
        } else {
            format!(" says {:?}", actor.say_text)
        };
        println!(
            "  {:<10} x={:>8.2} y={:>8.2} heading={:>6.1} size={:>5.1}% {}{}",
            actor.name,
            actor.x,
            actor.y,
            actor.heading_deg,
            actor.size_percent,
            if actor.visible { "shown" } else { "hidden" },
            bubble
        );
    }

    let events = mixer.events();
    println!(
        "Audio: {} event(s) | scheduler: {}{}",
        events.len(),
        if runtime.is_running() {
            "still running"
        } else {
            "idle"
        },
        if runtime.is_paused() { " (paused)" } else { "" }
    );
    if let Some(error) = runtime.last_error() {
        println!("!! {error}");
    }

    if let Some(path) = args.state_json.as_ref() {
        let report = RunReport {
            frames_run,
            running: runtime.is_running(),
            paused: runtime.is_paused(),
            last_error: runtime.last_error(),
            audio_events: &events,
            project: &project,
        };
        let json =
            serde_json::to_string_pretty(&report).context("serializing run report to JSON")?;
        fs::write(path, json)
            .with_context(|| format!("writing run report to {}", path.display()))?;
        println!("Saved run report to {}", path.display());
    }

    Ok(())
}

/// Small built-in project so the harness does something useful with no
/// arguments: one actor walks and loops, the other waits on a condition.
fn demo_project() -> Project {
    let mut project = Project::new();

    let scout = project.add_actor("Scout");
    if let Some(actor) = project.actor_mut(scout) {
        actor.sounds.push(Sound::new("blip", "blip.wav"));
    }
    if let Some(script) = project.create_script(scout, BlockKind::WhenGreenFlag, 0.0, 0.0) {
        let _ = project.append_to_script(scout, script, BlockKind::Say);
        let _ = project.append_to_script(scout, script, BlockKind::PlaySound);
        if let Some(repeat) = project.append_to_script(scout, script, BlockKind::Repeat) {
            set_args(&mut project, scout, repeat, &["6"]);
            if let Some(body) = project.append_to_child_chain(scout, repeat, BlockKind::MoveSteps)
            {
                set_args(&mut project, scout, body, &["20"]);
            }
            let _ = project.append_to_child_chain(scout, repeat, BlockKind::TurnRight);
        }
        let _ = project.append_to_script(scout, script, BlockKind::WaitSeconds);
        let _ = project.append_to_script(scout, script, BlockKind::Hide);
    }

    let echo = project.add_actor("Echo");
    if let Some(script) = project.create_script(echo, BlockKind::WhenGreenFlag, 0.0, 0.0) {
        if let Some(until) = project.append_to_script(echo, script, BlockKind::RepeatUntil) {
            if let Some(body) = project.append_to_child_chain(echo, until, BlockKind::ChangeXBy) {
                set_args(&mut project, echo, body, &["30"]);
            }
        }
        if let Some(say) = project.append_to_script(echo, script, BlockKind::Say) {
            set_args(&mut project, echo, say, &["Made it to the edge!"]);
        }
    }

    project
}

fn set_args(project: &mut Project, actor_id: u32, block_id: u32, args: &[&str]) {
    if let Some(actor) = project.actor_mut(actor_id) {
        if let Some(block) = actor.blocks.get_mut(&block_id) {
            block.args = args.iter().map(|arg| arg.to_string()).collect();
        }
    }
}

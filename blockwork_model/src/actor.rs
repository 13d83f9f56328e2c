use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::block::{Block, BlockId};

/// How long a say/think bubble stays on the actor.
pub const SAY_SECONDS: f32 = 2.0;

/// A named entry point into one chain of blocks. Scripts own no nodes; the
/// actor's arena does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    pub id: u32,
    pub head_block: Option<BlockId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Costume {
    pub name: String,
    #[serde(default)]
    pub file_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sound {
    pub name: String,
    pub file_path: String,
    /// Per-sound gain, 0..1.
    pub volume: f32,
    #[serde(default)]
    pub muted: bool,
}

impl Sound {
    pub fn new(name: impl Into<String>, file_path: impl Into<String>) -> Self {
        Sound {
            name: name.into(),
            file_path: file_path.into(),
            volume: 1.0,
            muted: false,
        }
    }
}

/// Backdrops live on the stage; otherwise it carries no script state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stage {
    pub current_backdrop: usize,
    pub backdrops: Vec<Costume>,
}

/// One scriptable actor: transform and looks state mutated by block
/// effects, plus the block arena and the script entry points into it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub id: u32,
    pub name: String,

    pub x: f32,
    pub y: f32,
    pub heading_deg: f32,
    pub size_percent: f32,
    pub visible: bool,

    pub current_costume: usize,
    pub costumes: Vec<Costume>,

    pub sounds: Vec<Sound>,
    /// Actor-level gain, 0..100.
    pub volume: f32,
    /// Rough pitch shift in semitones, clamped to +-24.
    pub pitch_semitones: f32,

    pub scripts: Vec<Script>,
    pub blocks: BTreeMap<BlockId, Block>,

    #[serde(skip)]
    pub say_text: String,
    #[serde(skip)]
    pub say_remaining: f32,
}

impl Actor {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Actor {
            id,
            name: name.into(),
            x: 0.0,
            y: 0.0,
            heading_deg: 90.0,
            size_percent: 100.0,
            visible: true,
            current_costume: 0,
            costumes: Vec::new(),
            sounds: Vec::new(),
            volume: 100.0,
            pitch_semitones: 0.0,
            scripts: Vec::new(),
            blocks: BTreeMap::new(),
            say_text: String::new(),
            say_remaining: 0.0,
        }
    }

    pub fn script(&self, script_id: u32) -> Option<&Script> {
        self.scripts.iter().find(|script| script.id == script_id)
    }

    pub fn script_mut(&mut self, script_id: u32) -> Option<&mut Script> {
        self.scripts
            .iter_mut()
            .find(|script| script.id == script_id)
    }

    pub fn block(&self, block_id: BlockId) -> Option<&Block> {
        self.blocks.get(&block_id)
    }

    /// Resolves a sound argument: empty picks the first sound, a numeric
    /// argument is a 1-based index, anything else matches by exact name.
    pub fn find_sound(&self, arg: &str) -> Option<&Sound> {
        if self.sounds.is_empty() {
            return None;
        }
        let arg = arg.trim();
        if arg.is_empty() {
            return self.sounds.first();
        }
        if let Ok(index) = arg.parse::<usize>() {
            return index.checked_sub(1).and_then(|i| self.sounds.get(i));
        }
        self.sounds.iter().find(|sound| sound.name == arg)
    }

    pub fn set_say(&mut self, text: impl Into<String>) {
        self.say_text = text.into();
        self.say_remaining = SAY_SECONDS;
    }

    pub fn clear_say(&mut self) {
        self.say_text.clear();
        self.say_remaining = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor_with_sounds() -> Actor {
        let mut actor = Actor::new(1, "Blip");
        actor.sounds.push(Sound::new("pop", "pop.wav"));
        actor.sounds.push(Sound::new("meow", "meow.wav"));
        actor
    }

    #[test]
    fn find_sound_resolves_index_name_and_default() {
        let actor = actor_with_sounds();
        assert_eq!(actor.find_sound("").map(|s| s.name.as_str()), Some("pop"));
        assert_eq!(actor.find_sound("2").map(|s| s.name.as_str()), Some("meow"));
        assert_eq!(
            actor.find_sound("meow").map(|s| s.name.as_str()),
            Some("meow")
        );
        assert!(actor.find_sound("0").is_none());
        assert!(actor.find_sound("3").is_none());
        assert!(actor.find_sound("woof").is_none());
    }

    #[test]
    fn say_arms_the_bubble_countdown() {
        let mut actor = Actor::new(1, "Blip");
        actor.set_say("Hello!");
        assert_eq!(actor.say_text, "Hello!");
        assert_eq!(actor.say_remaining, SAY_SECONDS);
        actor.clear_say();
        assert!(actor.say_text.is_empty());
    }
}

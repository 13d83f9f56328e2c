use std::collections::BTreeSet;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::actor::{Actor, Script, Stage};
use crate::block::{Block, BlockId, BlockKind};

/// Cap on tail walks when appending to a chain. A well-formed chain is a
/// simple list; hitting the cap means the graph has a cycle, and the append
/// is refused rather than looping.
pub const CHAIN_WALK_LIMIT: usize = 2_000;

/// Cap on recursive chain deletion, for the same reason.
pub const DELETE_WALK_LIMIT: usize = 5_000;

/// Monotonic id source. Ids start at 1 so 0 can mean "root" in runner
/// frames and loaded projects can never collide with fresh allocations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IdGen {
    next: u32,
}

impl Default for IdGen {
    fn default() -> Self {
        IdGen { next: 1 }
    }
}

impl IdGen {
    pub fn next_id(&mut self) -> u32 {
        let id = self.next;
        self.next += 1;
        id
    }

    /// Guarantees future ids are strictly greater than `max_seen`.
    pub fn ensure_above(&mut self, max_seen: u32) {
        if self.next <= max_seen {
            self.next = max_seen + 1;
        }
    }
}

/// Live input snapshot fed by the host each frame. Never serialized.
#[derive(Debug, Clone, Default)]
struct InputState {
    keys_down: BTreeSet<String>,
    mouse_down: bool,
    mouse_x: f32,
    mouse_y: f32,
    mouse_valid: bool,
}

/// Ask/answer handshake between a blocked runner and the external prompt
/// surface. Never serialized.
#[derive(Debug, Clone, Default)]
struct AskState {
    active: bool,
    answered: bool,
    prompt: String,
    answer: String,
}

/// The full scriptable document: stage, actors, and their block arenas,
/// plus the transient runtime context shared with the interpreter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Project {
    pub stage: Stage,
    pub actors: Vec<Actor>,

    #[serde(skip)]
    actor_ids: IdGen,
    #[serde(skip)]
    script_ids: IdGen,
    #[serde(skip)]
    block_ids: IdGen,

    #[serde(skip)]
    dirty: bool,
    #[serde(skip)]
    input: InputState,
    #[serde(skip)]
    ask: AskState,
    #[serde(skip)]
    stop_all_requested: bool,
}

enum Predecessor {
    Chain(BlockId),
    ChildOf(BlockId),
}

impl Project {
    pub fn new() -> Self {
        Project::default()
    }

    // --- actors -------------------------------------------------------

    pub fn add_actor(&mut self, name: impl Into<String>) -> u32 {
        let id = self.actor_ids.next_id();
        self.actors.push(Actor::new(id, name));
        self.mark_dirty();
        id
    }

    pub fn actor(&self, actor_id: u32) -> Option<&Actor> {
        self.actors.iter().find(|actor| actor.id == actor_id)
    }

    pub fn actor_mut(&mut self, actor_id: u32) -> Option<&mut Actor> {
        self.actors.iter_mut().find(|actor| actor.id == actor_id)
    }

    pub fn actor_index(&self, actor_id: u32) -> Option<usize> {
        self.actors.iter().position(|actor| actor.id == actor_id)
    }

    // --- dirty tracking (consumed by the external persistence layer) ---

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    // --- script / chain operations -------------------------------------

    /// Allocates a head block of `kind` plus a script entry pointing at it.
    /// Returns the new script id, or None when the actor is missing.
    pub fn create_script(&mut self, actor_id: u32, kind: BlockKind, x: f32, y: f32) -> Option<u32> {
        self.actor_index(actor_id)?;
        let script_id = self.script_ids.next_id();
        let block_id = self.block_ids.next_id();

        let actor = self.actor_mut(actor_id)?;
        let mut head = Block::new(block_id, kind);
        head.x = x;
        head.y = y;
        actor.blocks.insert(block_id, head);
        actor.scripts.push(Script {
            id: script_id,
            head_block: Some(block_id),
        });

        self.mark_dirty();
        log::info!("created script id={script_id} head={block_id} on actor {actor_id}");
        Some(script_id)
    }

    /// Appends a default-initialized block of `kind` at the tail of the
    /// script's chain. Returns the new block id.
    pub fn append_to_script(
        &mut self,
        actor_id: u32,
        script_id: u32,
        kind: BlockKind,
    ) -> Option<BlockId> {
        let head = self.actor(actor_id)?.script(script_id)?.head_block?;
        self.append_to_chain(actor_id, head, kind)
    }

    /// Appends to a control block's nested body, creating the body when the
    /// control block has none yet.
    pub fn append_to_child_chain(
        &mut self,
        actor_id: u32,
        control_id: BlockId,
        kind: BlockKind,
    ) -> Option<BlockId> {
        let control = self.actor(actor_id)?.block(control_id)?;
        if !control.kind.is_control() {
            return None;
        }
        match control.child_head {
            Some(head) => self.append_to_chain(actor_id, head, kind),
            None => {
                let block_id = self.block_ids.next_id();
                let actor = self.actor_mut(actor_id)?;
                actor.blocks.insert(block_id, Block::new(block_id, kind));
                if let Some(control) = actor.blocks.get_mut(&control_id) {
                    control.child_head = Some(block_id);
                }
                self.mark_dirty();
                Some(block_id)
            }
        }
    }

    /// Walks from `head` to the chain tail under [`CHAIN_WALK_LIMIT`] and
    /// links a new block there. Refused (None) when the walk cap trips,
    /// which only happens on a cyclic graph.
    pub fn append_to_chain(
        &mut self,
        actor_id: u32,
        head: BlockId,
        kind: BlockKind,
    ) -> Option<BlockId> {
        let tail = {
            let actor = self.actor(actor_id)?;
            let mut current = head;
            let mut tail = None;
            for _ in 0..CHAIN_WALK_LIMIT {
                match actor.block(current) {
                    Some(block) => match block.next {
                        Some(next) => current = next,
                        None => {
                            tail = Some(current);
                            break;
                        }
                    },
                    None => return None,
                }
            }
            match tail {
                Some(tail) => tail,
                None => {
                    log::warn!(
                        "append refused: chain from block {head} on actor {actor_id} \
                         did not terminate within {CHAIN_WALK_LIMIT} links"
                    );
                    return None;
                }
            }
        };

        let block_id = self.block_ids.next_id();
        let actor = self.actor_mut(actor_id)?;
        let (x, y) = actor
            .block(tail)
            .map(|block| (block.x, block.y + 60.0))
            .unwrap_or_default();
        let mut block = Block::new(block_id, kind);
        block.x = x;
        block.y = y;
        actor.blocks.insert(block_id, block);
        if let Some(tail_block) = actor.blocks.get_mut(&tail) {
            tail_block.next = Some(block_id);
        }
        self.mark_dirty();
        Some(block_id)
    }

    /// Deletes one block and only its own nested body, keeping the rest of
    /// the chain intact: a script head promotes its successor, a mid-chain
    /// node relinks predecessor to successor, a child head promotes within
    /// its owning control block, and a detached node just disappears.
    pub fn delete_block(&mut self, actor_id: u32, block_id: BlockId) -> bool {
        let Some(actor) = self.actor_mut(actor_id) else {
            return false;
        };
        let Some(block) = actor.blocks.get(&block_id) else {
            return false;
        };
        let next = block.next;
        let child = block.child_head;

        let heads_script = actor
            .scripts
            .iter()
            .position(|script| script.head_block == Some(block_id));

        if let Some(index) = heads_script {
            actor.scripts[index].head_block = next;
        } else {
            match find_predecessor(actor, block_id) {
                Some(Predecessor::Chain(prev)) => {
                    if let Some(prev_block) = actor.blocks.get_mut(&prev) {
                        prev_block.next = next;
                    }
                }
                Some(Predecessor::ChildOf(owner)) => {
                    if let Some(owner_block) = actor.blocks.get_mut(&owner) {
                        owner_block.child_head = next;
                    }
                }
                None => {}
            }
        }

        delete_chain(actor, child);
        actor.blocks.remove(&block_id);
        self.mark_dirty();
        true
    }

    /// Deletes a script entry and its entire chain, nested bodies included.
    pub fn delete_script(&mut self, actor_id: u32, script_id: u32) -> bool {
        let Some(actor) = self.actor_mut(actor_id) else {
            return false;
        };
        let Some(index) = actor.scripts.iter().position(|script| script.id == script_id) else {
            return false;
        };
        let head = actor.scripts[index].head_block;
        delete_chain(actor, head);
        actor.scripts.remove(index);
        self.mark_dirty();
        log::info!("deleted script id={script_id} on actor {actor_id}");
        true
    }

    // --- input snapshot -------------------------------------------------

    pub fn set_key_down(&mut self, key: &str, down: bool) {
        let key = key.trim().to_lowercase();
        if down {
            self.input.keys_down.insert(key);
        } else {
            self.input.keys_down.remove(&key);
        }
    }

    pub fn key_down(&self, key: &str) -> bool {
        self.input.keys_down.contains(&key.trim().to_lowercase())
    }

    pub fn set_mouse_button_down(&mut self, down: bool) {
        self.input.mouse_down = down;
    }

    pub fn mouse_down(&self) -> bool {
        self.input.mouse_down
    }

    pub fn set_mouse_world(&mut self, x: f32, y: f32, valid: bool) {
        self.input.mouse_x = x;
        self.input.mouse_y = y;
        self.input.mouse_valid = valid;
    }

    pub fn mouse_world(&self) -> Option<(f32, f32)> {
        self.input
            .mouse_valid
            .then_some((self.input.mouse_x, self.input.mouse_y))
    }

    // --- ask/answer channel ----------------------------------------------

    /// Arms a pending prompt and clears any stale answer-ready flag.
    pub fn begin_ask(&mut self, prompt: impl Into<String>) {
        self.ask.prompt = prompt.into();
        self.ask.active = true;
        self.ask.answered = false;
    }

    pub fn ask_active(&self) -> bool {
        self.ask.active
    }

    pub fn ask_prompt(&self) -> &str {
        &self.ask.prompt
    }

    /// The external layer's half of the handshake: supplies the answer and
    /// raises the answer-ready flag.
    pub fn submit_answer(&mut self, answer: impl Into<String>) {
        self.ask.answer = answer.into();
        self.ask.active = false;
        self.ask.answered = true;
    }

    /// Atomically reads and clears the answer-ready flag.
    pub fn consume_answered(&mut self) -> bool {
        std::mem::take(&mut self.ask.answered)
    }

    pub fn answer(&self) -> &str {
        &self.ask.answer
    }

    // --- shared stop-all request ----------------------------------------

    pub fn request_stop_all(&mut self) {
        self.stop_all_requested = true;
    }

    pub fn consume_stop_all_request(&mut self) -> bool {
        std::mem::take(&mut self.stop_all_requested)
    }

    // --- persistence boundary --------------------------------------------

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("serializing project to JSON")
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let mut project: Project =
            serde_json::from_str(json).context("parsing project JSON")?;
        project.reseed_id_generators();
        Ok(project)
    }

    /// Rebuilds the id generators strictly above every id present, so ids
    /// stay unique across save/load regardless of what the file claimed.
    pub fn reseed_id_generators(&mut self) {
        let mut max_actor = 0;
        let mut max_script = 0;
        let mut max_block = 0;
        for actor in &self.actors {
            max_actor = max_actor.max(actor.id);
            for script in &actor.scripts {
                max_script = max_script.max(script.id);
            }
            for id in actor.blocks.keys() {
                max_block = max_block.max(*id);
            }
        }
        self.actor_ids.ensure_above(max_actor);
        self.script_ids.ensure_above(max_script);
        self.block_ids.ensure_above(max_block);
    }
}

fn find_predecessor(actor: &Actor, target: BlockId) -> Option<Predecessor> {
    for block in actor.blocks.values() {
        if block.next == Some(target) {
            return Some(Predecessor::Chain(block.id));
        }
        if block.child_head == Some(target) {
            return Some(Predecessor::ChildOf(block.id));
        }
    }
    None
}

/// Removes a chain and every nested body under it, bounded by
/// [`DELETE_WALK_LIMIT`] per chain so a cyclic graph cannot hang deletion.
fn delete_chain(actor: &mut Actor, head: Option<BlockId>) {
    let mut current = head;
    let mut walked = 0;
    while let Some(id) = current {
        if walked >= DELETE_WALK_LIMIT {
            log::warn!("chain delete stopped at {DELETE_WALK_LIMIT} nodes (cyclic graph?)");
            return;
        }
        walked += 1;
        let Some(block) = actor.blocks.get(&id) else {
            return;
        };
        let next = block.next;
        let child = block.child_head;
        if child.is_some() {
            delete_chain(actor, child);
        }
        actor.blocks.remove(&id);
        current = next;
    }
}

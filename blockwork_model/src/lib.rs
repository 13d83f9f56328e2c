pub mod actor;
pub mod block;
pub mod project;

pub use actor::{Actor, Costume, Script, Sound, Stage, SAY_SECONDS};
pub use block::{Block, BlockId, BlockKind};
pub use project::{IdGen, Project, CHAIN_WALK_LIMIT, DELETE_WALK_LIMIT};

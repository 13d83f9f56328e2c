use serde::{Deserialize, Serialize};

/// Arena key for blocks. Ids are unique per actor and strictly positive;
/// "no block" is `Option::None`, never a magic id.
pub type BlockId = u32;

/// Closed set of block kinds the interpreter understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockKind {
    // Events (hats)
    WhenGreenFlag,
    WhenKeyPressed,

    // Motion
    MoveSteps,
    TurnRight,
    TurnLeft,
    GoToXy,
    SetX,
    SetY,
    ChangeXBy,
    ChangeYBy,
    GoToMousePointer,
    GoToRandomPosition,

    // Looks
    Say,
    Think,
    SwitchCostumeTo,
    NextCostume,
    SwitchBackdropTo,
    NextBackdrop,
    SetSizeTo,
    ChangeSizeBy,
    Show,
    Hide,

    // Control
    WaitSeconds,
    WaitUntil,
    Repeat,
    RepeatUntil,
    Forever,
    IfThen,
    StopThisScript,
    StopAll,

    // Sensing
    AskAndWait,

    // Sound
    PlaySound,
    PlaySoundUntilDone,
    StopAllSounds,
    SetVolumeTo,
    ChangeVolumeBy,
    SetPitchTo,
    ChangePitchBy,
}

impl BlockKind {
    /// Hat kinds start a runnable chain and have no effect of their own.
    pub fn is_hat(self) -> bool {
        matches!(self, BlockKind::WhenGreenFlag | BlockKind::WhenKeyPressed)
    }

    /// Control kinds that may own a nested body chain.
    pub fn is_control(self) -> bool {
        matches!(
            self,
            BlockKind::Repeat | BlockKind::RepeatUntil | BlockKind::Forever | BlockKind::IfThen
        )
    }

    /// Default arguments assigned when a block of this kind is appended to a
    /// chain. The count and meaning of entries is fixed per kind.
    pub fn default_args(self) -> Vec<String> {
        let args: &[&str] = match self {
            BlockKind::MoveSteps => &["10"],
            BlockKind::TurnRight | BlockKind::TurnLeft => &["15"],
            BlockKind::GoToXy => &["0", "0"],
            BlockKind::SetX | BlockKind::SetY => &["0"],
            BlockKind::ChangeXBy | BlockKind::ChangeYBy => &["10"],
            BlockKind::Say => &["Hello!"],
            BlockKind::Think => &["Hmm..."],
            BlockKind::SwitchCostumeTo | BlockKind::SwitchBackdropTo => &["1"],
            BlockKind::SetSizeTo => &["100"],
            BlockKind::ChangeSizeBy => &["10"],
            BlockKind::WaitSeconds => &["1"],
            BlockKind::WaitUntil
            | BlockKind::RepeatUntil
            | BlockKind::IfThen => &["touching edge"],
            BlockKind::Repeat => &["10"],
            BlockKind::AskAndWait => &["What's your name?"],
            BlockKind::PlaySound | BlockKind::PlaySoundUntilDone => &["1"],
            BlockKind::SetVolumeTo => &["100"],
            BlockKind::ChangeVolumeBy => &["10"],
            BlockKind::SetPitchTo => &["0"],
            BlockKind::ChangePitchBy => &["1"],
            _ => &[],
        };
        args.iter().map(|arg| arg.to_string()).collect()
    }

    pub fn label(self) -> &'static str {
        match self {
            BlockKind::WhenGreenFlag => "when green flag clicked",
            BlockKind::WhenKeyPressed => "when key pressed",
            BlockKind::MoveSteps => "move steps",
            BlockKind::TurnRight => "turn right",
            BlockKind::TurnLeft => "turn left",
            BlockKind::GoToXy => "go to x y",
            BlockKind::SetX => "set x",
            BlockKind::SetY => "set y",
            BlockKind::ChangeXBy => "change x by",
            BlockKind::ChangeYBy => "change y by",
            BlockKind::GoToMousePointer => "go to mouse pointer",
            BlockKind::GoToRandomPosition => "go to random position",
            BlockKind::Say => "say",
            BlockKind::Think => "think",
            BlockKind::SwitchCostumeTo => "switch costume to",
            BlockKind::NextCostume => "next costume",
            BlockKind::SwitchBackdropTo => "switch backdrop to",
            BlockKind::NextBackdrop => "next backdrop",
            BlockKind::SetSizeTo => "set size to",
            BlockKind::ChangeSizeBy => "change size by",
            BlockKind::Show => "show",
            BlockKind::Hide => "hide",
            BlockKind::WaitSeconds => "wait seconds",
            BlockKind::WaitUntil => "wait until",
            BlockKind::Repeat => "repeat",
            BlockKind::RepeatUntil => "repeat until",
            BlockKind::Forever => "forever",
            BlockKind::IfThen => "if then",
            BlockKind::StopThisScript => "stop this script",
            BlockKind::StopAll => "stop all",
            BlockKind::AskAndWait => "ask and wait",
            BlockKind::PlaySound => "play sound",
            BlockKind::PlaySoundUntilDone => "play sound until done",
            BlockKind::StopAllSounds => "stop all sounds",
            BlockKind::SetVolumeTo => "set volume to",
            BlockKind::ChangeVolumeBy => "change volume by",
            BlockKind::SetPitchTo => "set pitch to",
            BlockKind::ChangePitchBy => "change pitch by",
        }
    }
}

/// One node in an actor's block arena. Blocks link forward through `next`
/// and, for control kinds, down into a nested body through `child_head`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub kind: BlockKind,
    /// Arguments kept as editable text; numeric consumers parse with a
    /// per-kind default and never fault on bad input.
    #[serde(default)]
    pub args: Vec<String>,
    pub next: Option<BlockId>,
    pub child_head: Option<BlockId>,
    /// Workspace position, owned by the editing layer but preserved here so
    /// persistence round-trips it.
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
}

impl Block {
    pub fn new(id: BlockId, kind: BlockKind) -> Self {
        Block {
            id,
            kind,
            args: kind.default_args(),
            next: None,
            child_head: None,
            x: 0.0,
            y: 0.0,
        }
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// Parses argument `index` as a number, falling back to `default` when
    /// the argument is missing or unparseable.
    pub fn number_arg(&self, index: usize, default: f32) -> f32 {
        self.arg(index)
            .and_then(|raw| raw.trim().parse::<f32>().ok())
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hat_and_control_classification() {
        assert!(BlockKind::WhenGreenFlag.is_hat());
        assert!(BlockKind::WhenKeyPressed.is_hat());
        assert!(!BlockKind::MoveSteps.is_hat());

        assert!(BlockKind::Repeat.is_control());
        assert!(BlockKind::Forever.is_control());
        assert!(BlockKind::IfThen.is_control());
        assert!(!BlockKind::WaitSeconds.is_control());
        assert!(!BlockKind::Say.is_control());
    }

    #[test]
    fn default_args_follow_the_per_kind_table() {
        assert_eq!(BlockKind::MoveSteps.default_args(), vec!["10"]);
        assert_eq!(BlockKind::TurnRight.default_args(), vec!["15"]);
        assert_eq!(BlockKind::Say.default_args(), vec!["Hello!"]);
        assert_eq!(BlockKind::GoToXy.default_args(), vec!["0", "0"]);
        assert_eq!(BlockKind::RepeatUntil.default_args(), vec!["touching edge"]);
        assert!(BlockKind::Forever.default_args().is_empty());
    }

    #[test]
    fn number_arg_parses_with_safe_default() {
        let mut block = Block::new(7, BlockKind::MoveSteps);
        assert_eq!(block.number_arg(0, 10.0), 10.0);

        block.args = vec![" -2.5 ".to_string()];
        assert_eq!(block.number_arg(0, 10.0), -2.5);

        block.args = vec!["not a number".to_string()];
        assert_eq!(block.number_arg(0, 10.0), 10.0);

        assert_eq!(block.number_arg(3, 1.0), 1.0);
    }
}

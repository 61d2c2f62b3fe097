//! Audio playback: player backends and the single-slot coordinator

pub mod coordinator;
pub mod player;

pub use coordinator::{
    PlaybackCoordinator, PlaybackHandle, PlaybackOutcome, SlotState, POLL_INTERVAL,
    TERMINATION_GRACE,
};
pub use player::{
    detect_player, fit_format, ChildProcess, CommandPlayer, NoPlayer, Player, PlayerProcess,
    PowerShellPlayer,
};

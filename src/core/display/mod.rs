// Display module - Console rendering and terminal mode tracking
pub mod charset;
pub mod render;

pub use charset::HighCharTable;
pub use render::{Display, LineState, ModeSwitch, TerminalMode, SHELL_MARKER};

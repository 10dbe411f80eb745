// Relay module - Event loop, command menu and shell bridge
pub mod bridge;
pub mod command;
pub mod event_loop;

pub use bridge::WATERMARK;
pub use command::{MenuCommand, MENU_TIMEOUT};
pub use event_loop::{encode_outbound, Relay};

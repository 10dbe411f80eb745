// Core module - Byte handling, telnet, rendering and the relay loop
pub mod display;
pub mod keymap;
pub mod queue;
pub mod relay;
pub mod telnet;

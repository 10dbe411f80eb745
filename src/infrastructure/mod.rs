// Infrastructure module - Devices, sockets, console and process adapters
pub mod config;
pub mod connection;
pub mod console;
pub mod logging;
pub mod nonblocking;
pub mod process;
pub mod tee;

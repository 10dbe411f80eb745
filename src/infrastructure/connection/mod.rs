// Connection module - Target parsing, opening and retry policy
pub mod link;
pub mod manager;
pub mod serial;
pub mod target;
pub mod tcp;

pub use link::{Link, LinkKind};
pub use manager::{ConnectionManager, Connector, SystemConnector};
pub use target::TargetSpec;

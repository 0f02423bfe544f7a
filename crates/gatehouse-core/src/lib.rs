pub mod context;
pub mod error;
pub mod event_bus;
pub mod permissions;

pub use context::*;
pub use error::*;
pub use event_bus::*;
pub use permissions::*;

pub mod commands;
pub mod diagnostics;
pub mod network;
pub mod snapshot;

pub use commands::*;
pub use diagnostics::*;
pub use network::*;
pub use snapshot::*;

//! Interactive session management module
//!
//! Drives the market view engine from terminal input and prints its updates.

pub mod command_router;
pub mod demo;
pub mod session_manager;

pub use command_router::{CommandRouter, InteractiveCommand};
pub use demo::run_demo;
pub use session_manager::{SessionManager, SessionState, SessionStats};

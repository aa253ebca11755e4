//! Coordination core for terminal AI agents: a file-backed agent registry,
//! SQLite file locks with a modification log, compliance-gated input, and
//! `@agent` routing over A2A.

pub mod a2a;
pub mod a2a_client;
pub mod compliance;
pub mod config;
pub mod events;
pub mod external;
pub mod file_history;
pub mod file_safety;
mod helpers;
pub mod input_router;
pub mod long_message;
pub mod process;
pub mod registry;
pub mod reply_target;
pub mod routing;
pub mod server;
pub mod task_store;
pub mod terminal;

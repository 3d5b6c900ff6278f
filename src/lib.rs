//! Receiving-only SMTP stub.
//!
//! Terminates SMTP connections, tracks the envelope of each session and
//! hands the final [`SessionState`] to a caller-supplied consumer once the
//! client says `QUIT`. Nothing is relayed, queued or delivered.

pub mod config;
pub mod smtp;

pub use config::Config;
pub use smtp::server::Server;
pub use smtp::state::SessionState;
pub use smtp::state_machine::{State, StateMachine};

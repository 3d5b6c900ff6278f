pub mod channel;
pub mod command;
pub mod server;
pub mod state;
pub mod state_machine;

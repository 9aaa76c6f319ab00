mod controller;
mod state;

pub use controller::{SessionCommand, SessionController};
pub use state::{SessionSnapshot, SessionState, Transcript};

pub mod client;
pub mod state;

pub use client::AtemClient;
pub use state::AtemState;

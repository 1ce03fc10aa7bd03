pub mod client;
pub mod state;

pub use client::VmixClient;
pub use state::VmixState;

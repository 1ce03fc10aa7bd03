pub mod client;
pub mod state;

pub use client::ObsClient;
pub use state::ObsState;

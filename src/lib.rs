pub mod abi;         // Contract descriptor loading
pub mod config;
pub mod contracts;
pub mod display;
pub mod error;
pub mod events;
pub mod monitoring;  // Prometheus metrics for render cycles
pub mod provider;    // Ledger trait and ethers-backed implementation
pub mod sale;
pub mod scan;        // Recent call scan over a block range
pub mod session;
pub mod utils;

pub use config::DashboardConfig;
pub use error::SessionError;
pub use session::{RenderOutcome, SessionController, SessionState};

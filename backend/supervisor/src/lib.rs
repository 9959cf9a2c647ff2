pub mod timeout_kill;
pub mod tunnel;
pub mod url_scrape;

pub use timeout_kill::terminate_gracefully;
pub use tunnel::{TunnelConfig, TunnelSnapshot, TunnelStatus, TunnelSupervisor};
pub use url_scrape::extract_public_url;

//! Shared HTTP client construction for caption providers.

mod user_agent;

pub use user_agent::{resolve_user_agent, USER_AGENT};

use std::time::Duration;

use reqwest::Client;

/// Build a client with an explicit per-request timeout.
pub fn build_client(timeout: Duration, user_agent_config: Option<&str>) -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(resolve_user_agent(user_agent_config))
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .gzip(true)
        .brotli(true)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_client() {
        assert!(build_client(Duration::from_secs(5), None).is_ok());
        assert!(build_client(Duration::from_secs(5), Some("impersonate")).is_ok());
    }
}

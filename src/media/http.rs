use anyhow::{Context, Result};
use std::{collections::HashMap, net::SocketAddr, time::Duration};
use tracing::debug;

/// Builds the outbound HTTP client shared by the HTTP-speaking adapters.
///
/// `dns_overrides` pins hostnames to fixed addresses on this client only;
/// the process resolver is left alone.
pub fn build_client(
    timeout: Duration,
    dns_overrides: &HashMap<String, Vec<SocketAddr>>,
) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout);

    for (host, addrs) in dns_overrides {
        debug!("Pinning {} to {:?}", host, addrs);
        builder = builder.resolve_to_addrs(host, addrs);
    }

    builder.build().context("Failed to create HTTP client")
}

/// Rotating pick from the configured user agents.
pub fn pick_user_agent(user_agents: &[String], counter: usize) -> Option<&str> {
    if user_agents.is_empty() {
        return None;
    }
    Some(user_agents[counter % user_agents.len()].as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_client_with_overrides() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "api.cobalt.tools".to_string(),
            vec!["1.1.1.1:443".parse().unwrap()],
        );
        assert!(build_client(Duration::from_secs(5), &overrides).is_ok());
    }

    #[test]
    fn test_pick_user_agent_rotates() {
        let agents = vec!["a".to_string(), "b".to_string()];
        assert_eq!(pick_user_agent(&agents, 0), Some("a"));
        assert_eq!(pick_user_agent(&agents, 1), Some("b"));
        assert_eq!(pick_user_agent(&agents, 2), Some("a"));
        assert_eq!(pick_user_agent(&[], 3), None);
    }
}

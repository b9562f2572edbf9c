use std::time::Duration;

use anyhow::{Context, Result};

/// Opt-in switch for platform proxy discovery. Off by default because some
/// desktop proxy lookups fail or hang at client construction.
pub const SYSTEM_PROXY_ENV: &str = "COOCOOCO_ENABLE_SYSTEM_PROXY";

pub fn build_http_client(timeout: Option<Duration>) -> Result<reqwest::Client> {
    if system_proxy_enabled() {
        match std::panic::catch_unwind(|| attempt_build(timeout, false)) {
            Ok(Ok(client)) => return Ok(client),
            Ok(Err(error)) => tracing::warn!(
                "HTTP client with system proxy failed ({}); retrying with no_proxy",
                error
            ),
            Err(_) => tracing::warn!(
                "HTTP client proxy discovery panicked; retrying with no_proxy"
            ),
        }
    }

    match std::panic::catch_unwind(|| attempt_build(timeout, true)) {
        Ok(result) => result.context("Failed to initialize HTTP client"),
        Err(_) => anyhow::bail!("HTTP client initialization panicked"),
    }
}

fn system_proxy_enabled() -> bool {
    std::env::var(SYSTEM_PROXY_ENV)
        .map(|value| parse_flag(&value))
        .unwrap_or(false)
}

fn parse_flag(value: &str) -> bool {
    let value = value.trim();
    value == "1" || value.eq_ignore_ascii_case("true")
}

fn attempt_build(
    timeout: Option<Duration>,
    no_proxy: bool,
) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    if no_proxy {
        builder = builder.no_proxy();
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_flag_accepts_one_and_true() {
        assert!(parse_flag("1"));
        assert!(parse_flag(" TRUE "));
        assert!(!parse_flag("yes"));
        assert!(!parse_flag(""));
    }

    #[test]
    fn builds_without_proxy_by_default() {
        assert!(build_http_client(Some(Duration::from_secs(1))).is_ok());
    }
}

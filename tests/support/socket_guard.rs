//! Skips wiremock-backed tests on hosts that cannot bind localhost.

use std::net::TcpListener;

use wiremock::MockServer;

/// Set to `1`, `true`, or `yes` to turn skips into failures.
pub const REQUIRE_SOCKET_TESTS_ENV: &str = "GHTOKEN_REQUIRE_SOCKET_TESTS";

fn skips_forbidden() -> bool {
    std::env::var(REQUIRE_SOCKET_TESTS_ENV)
        .is_ok_and(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

/// Starts the mock server the fake site is mounted on.
pub async fn start_mock_server_or_skip() -> Option<MockServer> {
    if TcpListener::bind("127.0.0.1:0").is_ok() {
        return Some(MockServer::start().await);
    }
    assert!(
        !skips_forbidden(),
        "cannot bind a localhost socket and {REQUIRE_SOCKET_TESTS_ENV} forbids skipping"
    );
    eprintln!("cannot bind a localhost socket, skipping wiremock test");
    None
}

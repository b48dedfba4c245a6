//! Helpers shared by unit tests.

use std::net::TcpListener;

use wiremock::MockServer;

/// Starts a wiremock server, or `None` when localhost cannot be bound.
///
/// Panics instead of skipping when `GHTOKEN_REQUIRE_SOCKET_TESTS` is set.
pub async fn mock_server_or_skip() -> Option<MockServer> {
    if TcpListener::bind("127.0.0.1:0").is_err() {
        let required = std::env::var("GHTOKEN_REQUIRE_SOCKET_TESTS")
            .is_ok_and(|value| matches!(value.as_str(), "1" | "true" | "yes"));
        assert!(!required, "localhost socket unavailable for wiremock test");
        eprintln!("localhost socket unavailable; skipping wiremock test");
        return None;
    }
    Some(MockServer::start().await)
}

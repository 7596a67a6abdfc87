// ABOUTME: Liveness bookkeeping for websocket peers
// ABOUTME: Pong deadlines for the server, reconnect backoff math for clients

use std::time::{Duration, Instant};

use crate::cli::config::WebSocketConfig;

/// A peer is presumed dead when no pong arrived within the grace
/// window after the last ping round.
pub fn pong_expired(last_pong: Instant, config: &WebSocketConfig) -> bool {
    let grace = Duration::from_millis(config.ping_interval + config.pong_timeout);
    last_pong.elapsed() > grace
}

/// Delay before reconnect attempt `attempt` (1-based), or `None` once
/// the attempt budget is spent. Doubles per attempt, capped at 60s.
///
/// Published for clients; the server never reconnects.
pub fn reconnect_delay(attempt: u32, config: &WebSocketConfig) -> Option<Duration> {
    if attempt == 0 || attempt > config.max_reconnect_attempts {
        return None;
    }
    let base = config.reconnect_delay_base;
    let factor = 2u64.saturating_pow(attempt - 1);
    Some(Duration::from_millis(
        base.saturating_mul(factor).min(60_000),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> WebSocketConfig {
        WebSocketConfig {
            ping_interval: 30_000,
            pong_timeout: 10_000,
            max_reconnect_attempts: 5,
            reconnect_delay_base: 3_000,
        }
    }

    #[test]
    fn test_backoff_doubles_and_stops_at_budget() {
        let config = config();
        assert_eq!(
            reconnect_delay(1, &config),
            Some(Duration::from_millis(3_000))
        );
        assert_eq!(
            reconnect_delay(2, &config),
            Some(Duration::from_millis(6_000))
        );
        assert_eq!(
            reconnect_delay(3, &config),
            Some(Duration::from_millis(12_000))
        );
        assert_eq!(
            reconnect_delay(5, &config),
            Some(Duration::from_millis(48_000))
        );
        assert_eq!(reconnect_delay(6, &config), None);
        assert_eq!(reconnect_delay(0, &config), None);
    }

    #[test]
    fn test_backoff_is_capped() {
        let mut config = config();
        config.max_reconnect_attempts = 20;
        assert_eq!(
            reconnect_delay(12, &config),
            Some(Duration::from_millis(60_000))
        );
    }

    #[test]
    fn test_fresh_pong_is_alive() {
        assert!(!pong_expired(Instant::now(), &config()));
    }

    #[test]
    fn test_old_pong_expires() {
        let mut config = config();
        config.ping_interval = 0;
        config.pong_timeout = 0;
        let past = Instant::now() - Duration::from_millis(50);
        assert!(pong_expired(past, &config));
    }
}

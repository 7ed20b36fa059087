//! Time utilities for the match loop

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Fixed tick interval shared by server and client (~30 ticks per second)
pub const TICK_DURATION_MS: u64 = 33;
pub const TICK_DURATION: Duration = Duration::from_millis(TICK_DURATION_MS);

/// Physics timestep for one tick (in seconds)
pub fn tick_delta() -> f32 {
    TICK_DURATION_MS as f32 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_delta_matches_tick_duration() {
        assert_eq!(TICK_DURATION.as_secs_f32(), tick_delta());
    }

    #[test]
    fn uptime_is_zero_before_init_or_small_after() {
        init_server_time();
        assert!(uptime_secs() < 5);
    }
}

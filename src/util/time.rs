//! Time utilities for game simulation

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

/// Tick rate configuration
pub const SIMULATION_TPS: u32 = 240;
pub const TICK_DURATION: Duration = Duration::from_micros(1_000_000 / SIMULATION_TPS as u64);

/// Number of tick duration samples collected before the mean is reported
pub const TICK_SAMPLE_SIZE: usize = 200;

/// Calculate delta time for physics (in seconds)
pub fn tick_delta() -> f32 {
    1.0 / SIMULATION_TPS as f32
}

/// Delay before the next tick, measured against the cost of the tick that
/// just ran. Overruns reschedule immediately rather than queueing.
pub fn next_tick_delay(elapsed: Duration) -> Duration {
    TICK_DURATION.saturating_sub(elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_tick_delay_compensates_for_tick_cost() {
        let fast = next_tick_delay(Duration::from_micros(1_000));
        assert_eq!(fast, TICK_DURATION - Duration::from_micros(1_000));
    }

    #[test]
    fn next_tick_delay_never_goes_negative() {
        assert_eq!(next_tick_delay(Duration::from_millis(50)), Duration::ZERO);
    }
}

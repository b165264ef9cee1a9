//! `/health` endpoint body.

use serde::Serialize;
use std::time::Instant;

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while serving, `"shutting_down"` once shutdown began.
    pub status: String,
    pub uptime_secs: u64,
    /// Open streaming sessions.
    pub sessions: usize,
    /// Deferred calls waiting for the next host tick, when the server was
    /// given the host queue's stats.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_queue_depth: Option<usize>,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    sessions: usize,
    host_queue_depth: Option<usize>,
    shutting_down: bool,
) -> HealthResponse {
    HealthResponse {
        status: if shutting_down { "shutting_down" } else { "ok" }.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        sessions,
        host_queue_depth,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_ok() {
        let resp = health_check(Instant::now(), 0, None, false);
        assert_eq!(resp.status, "ok");
        assert!(resp.uptime_secs < 2);
    }

    #[test]
    fn status_reports_shutdown() {
        let resp = health_check(Instant::now(), 0, None, true);
        assert_eq!(resp.status, "shutting_down");
    }

    #[test]
    fn uptime_increases() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        let resp = health_check(start, 0, None, false);
        assert!(resp.uptime_secs >= 59);
    }

    #[test]
    fn serialization() {
        let resp = health_check(Instant::now(), 2, Some(5), false);
        let parsed = serde_json::to_value(&resp).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["sessions"], 2);
        assert_eq!(parsed["host_queue_depth"], 5);
        assert!(parsed["uptime_secs"].is_number());

        let parsed = serde_json::to_value(health_check(Instant::now(), 0, None, false)).unwrap();
        assert!(parsed.get("host_queue_depth").is_none());
    }
}

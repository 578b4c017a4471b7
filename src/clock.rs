//! Wall-clock access. Core operations take `now` (unix seconds) explicitly;
//! only the HTTP handlers, the sweeper and the CLI read the clock.

pub fn now_secs() -> i64 { chrono::Utc::now().timestamp() }

pub fn now_millis() -> i64 { chrono::Utc::now().timestamp_millis() }

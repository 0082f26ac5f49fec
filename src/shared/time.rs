//! Usage: Unix-seconds clock helpers and trace-id generation.

use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) fn now_unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Start of the next UTC clock hour after `now_unix`.
pub(crate) fn next_utc_hour(now_unix: i64) -> i64 {
    (now_unix.div_euclid(3600) + 1) * 3600
}

pub(crate) fn new_trace_id() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 8] = rng.gen();
    let mut out = String::with_capacity(20);
    out.push_str("rly-");
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

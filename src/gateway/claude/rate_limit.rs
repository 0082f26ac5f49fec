//! Usage: Rate-limit reset header parsing and account reset bookkeeping.

use crate::services::accounts::AccountEntry;
use crate::shared::time::next_utc_hour;
use axum::http::HeaderMap;

pub(crate) const UNIFIED_RESET_HEADER: &str = "anthropic-ratelimit-unified-reset";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResetHeader {
    Absent,
    Unparseable,
    At(i64),
}

pub(crate) fn parse_reset_header(headers: &HeaderMap) -> ResetHeader {
    let Some(value) = headers.get(UNIFIED_RESET_HEADER) else {
        return ResetHeader::Absent;
    };
    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .map_or(ResetHeader::Unparseable, ResetHeader::At)
}

/// Reset time to attach to a 429: the header value when parseable, otherwise
/// the start of the next UTC clock hour measured from send time.
pub(crate) fn rate_limited_resets_at(headers: &HeaderMap, sent_at_unix: i64) -> i64 {
    match parse_reset_header(headers) {
        ResetHeader::At(at) => at,
        ResetHeader::Absent | ResetHeader::Unparseable => next_utc_hour(sent_at_unix),
    }
}

/// Success-path bookkeeping: a parseable header updates the account's reset
/// timestamp, an unparseable one clears it to unknown, an absent one leaves
/// it untouched.
pub(crate) fn apply_reset_to_account(headers: &HeaderMap, account: &AccountEntry) {
    match parse_reset_header(headers) {
        ResetHeader::At(at) => account.set_resets_at(Some(at)),
        ResetHeader::Unparseable => {
            tracing::error!(
                account = %account.organization_id(),
                "invalid {} header value from upstream; clearing account reset time",
                UNIFIED_RESET_HEADER
            );
            account.set_resets_at(None);
        }
        ResetHeader::Absent => {}
    }
}

//! Usage: Account selection with conversation affinity.
//!
//! Affinity first: if the cache remembers which account served this
//! conversation prefix, reuse it so the upstream prompt cache stays warm.
//! Only when that account is gone or unavailable does the pool allocate a
//! fresh one.

use crate::gateway::errors::RelayError;
use crate::models::claude::MessagesRequest;
use crate::services::accounts::{AccountLease, AccountPool};
use crate::services::affinity::{AffinityCache, Checkpoint};
use crate::shared::security::mask_token;

#[derive(Debug)]
pub(crate) struct SelectedAccount {
    pub(crate) lease: AccountLease,
    pub(crate) checkpoints: Vec<Checkpoint>,
}

pub(crate) fn select_account(
    pool: &AccountPool,
    affinity: &dyn AffinityCache,
    request: &MessagesRequest,
    required_tier: Option<&str>,
    now_unix: i64,
    trace_id: &str,
) -> Result<SelectedAccount, RelayError> {
    let lookup = affinity.lookup(&request.model, &request.messages, request.system.as_ref());

    let mut lease = None;
    if let Some(cached_id) = lookup.account_id.as_deref() {
        lease = pool.get_by_id(cached_id, now_unix);
        match &lease {
            Some(lease) => tracing::info!(
                trace_id = %trace_id,
                account = %mask_token(lease.organization_id()),
                "using cached account for conversation affinity"
            ),
            None => tracing::debug!(
                trace_id = %trace_id,
                "cached account unavailable; allocating from pool"
            ),
        }
    }

    let lease = match lease {
        Some(lease) => lease,
        None => pool
            .acquire(required_tier, now_unix)
            .ok_or(RelayError::NoAccountsAvailable)?,
    };

    Ok(SelectedAccount {
        lease,
        checkpoints: lookup.checkpoints,
    })
}

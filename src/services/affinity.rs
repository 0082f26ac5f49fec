//! Usage: Conversation-affinity cache (prefix fingerprints -> serving account).
//!
//! Routing a follow-up turn back to the account that served the earlier turns
//! keeps the upstream provider's prompt cache warm, since that cache is keyed
//! by exact prefix match per account. The trait keeps the fingerprinting
//! strategy swappable; the in-memory implementation fingerprints message
//! prefixes with SHA-256 and binds them to an account with a TTL.

use crate::models::claude::{InputMessage, MessageContent, SystemPrompt};
use crate::shared::mutex_ext::MutexExt;
use crate::shared::time::now_unix_seconds;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;

pub const DEFAULT_AFFINITY_TTL_SECS: i64 = 3600;
const MAX_BINDINGS: usize = 5000;

/// Opaque descriptor of a conversation prefix worth remembering.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Checkpoint(String);

impl Checkpoint {
    fn new(digest: String) -> Self {
        Self(digest)
    }
}

#[derive(Debug, Default)]
pub struct AffinityLookup {
    /// Account that served the deepest known prefix of this conversation.
    pub account_id: Option<String>,
    /// Descriptors to record once the request succeeds.
    pub checkpoints: Vec<Checkpoint>,
}

#[derive(Debug, thiserror::Error)]
#[error("affinity store error: {0}")]
pub struct AffinityStoreError(pub String);

pub trait AffinityCache: Send + Sync {
    fn lookup(
        &self,
        model: &str,
        messages: &[InputMessage],
        system: Option<&SystemPrompt>,
    ) -> AffinityLookup;

    /// Best-effort write-back; callers are expected to log and continue on
    /// failure rather than fail the request that already succeeded.
    fn record(
        &self,
        checkpoints: &[Checkpoint],
        organization_id: &str,
    ) -> Result<(), AffinityStoreError>;
}

#[derive(Debug, Clone)]
struct Binding {
    account_id: String,
    expires_at: i64,
}

/// In-memory prefix-fingerprint cache.
pub struct PrefixAffinityCache {
    ttl_secs: i64,
    bindings: Mutex<HashMap<String, Binding>>,
}

impl PrefixAffinityCache {
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            ttl_secs: ttl_secs.max(1),
            bindings: Mutex::new(HashMap::new()),
        }
    }

    fn digest_message(hasher: &mut Sha256, message: &InputMessage) {
        hasher.update(match message.role {
            crate::models::claude::Role::User => b"u:" as &[u8],
            crate::models::claude::Role::Assistant => b"a:",
        });
        match &message.content {
            MessageContent::Text(text) => hasher.update(text.as_bytes()),
            MessageContent::Blocks(blocks) => {
                // Structural identity is enough here; the serialized form is
                // stable for identical block lists.
                if let Ok(encoded) = serde_json::to_vec(blocks) {
                    hasher.update(&encoded);
                }
            }
        }
        hasher.update([0u8]);
    }

    fn fingerprint_prefix(
        model: &str,
        system: Option<&SystemPrompt>,
        messages: &[InputMessage],
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update([0u8]);
        match system {
            Some(SystemPrompt::Text(text)) => hasher.update(text.as_bytes()),
            Some(SystemPrompt::Blocks(blocks)) => {
                for block in blocks {
                    hasher.update(block.text.as_bytes());
                    hasher.update([0u8]);
                }
            }
            None => {}
        }
        hasher.update([0u8]);
        for message in messages {
            Self::digest_message(&mut hasher, message);
        }
        let digest = hasher.finalize();
        let mut out = String::with_capacity(64);
        for byte in digest {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }

    /// Prefix lengths that can match a previously recorded conversation
    /// state: the full list, and every prefix that ends right before an
    /// assistant turn (the state a prior request ended at).
    fn candidate_prefix_lens(messages: &[InputMessage]) -> Vec<usize> {
        let mut lens = vec![messages.len()];
        for (idx, message) in messages.iter().enumerate().rev() {
            if matches!(message.role, crate::models::claude::Role::Assistant) && idx > 0 {
                lens.push(idx);
            }
        }
        lens.dedup();
        lens
    }

    fn evict_expired_and_cap(bindings: &mut HashMap<String, Binding>, now_unix: i64) {
        bindings.retain(|_, b| b.expires_at > now_unix);
        while bindings.len() >= MAX_BINDINGS {
            let Some(oldest) = bindings
                .iter()
                .min_by_key(|(_, b)| b.expires_at)
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            bindings.remove(&oldest);
        }
    }
}

impl Default for PrefixAffinityCache {
    fn default() -> Self {
        Self::new(DEFAULT_AFFINITY_TTL_SECS)
    }
}

impl AffinityCache for PrefixAffinityCache {
    fn lookup(
        &self,
        model: &str,
        messages: &[InputMessage],
        system: Option<&SystemPrompt>,
    ) -> AffinityLookup {
        if messages.is_empty() {
            return AffinityLookup::default();
        }

        let now_unix = now_unix_seconds();
        let guard = self.bindings.lock_or_recover();

        let mut account_id = None;
        for len in Self::candidate_prefix_lens(messages) {
            let digest = Self::fingerprint_prefix(model, system, &messages[..len]);
            if let Some(binding) = guard.get(&digest) {
                if binding.expires_at > now_unix {
                    account_id = Some(binding.account_id.clone());
                    break;
                }
            }
        }

        let checkpoints = vec![Checkpoint::new(Self::fingerprint_prefix(
            model, system, messages,
        ))];

        AffinityLookup {
            account_id,
            checkpoints,
        }
    }

    fn record(
        &self,
        checkpoints: &[Checkpoint],
        organization_id: &str,
    ) -> Result<(), AffinityStoreError> {
        if checkpoints.is_empty() {
            return Ok(());
        }
        let now_unix = now_unix_seconds();
        let mut guard = self.bindings.lock_or_recover();
        Self::evict_expired_and_cap(&mut guard, now_unix);
        for checkpoint in checkpoints {
            guard.insert(
                checkpoint.0.clone(),
                Binding {
                    account_id: organization_id.to_string(),
                    expires_at: now_unix + self.ttl_secs,
                },
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::claude::InputMessage;

    #[test]
    fn lookup_on_empty_cache_yields_fresh_checkpoint_only() {
        let cache = PrefixAffinityCache::default();
        let messages = vec![InputMessage::user("hello")];
        let lookup = cache.lookup("claude-opus-4-20250514", &messages, None);
        assert!(lookup.account_id.is_none());
        assert_eq!(lookup.checkpoints.len(), 1);
    }

    #[test]
    fn followup_turn_finds_the_recorded_prefix() {
        let cache = PrefixAffinityCache::default();
        let first_turn = vec![InputMessage::user("hello")];

        let lookup = cache.lookup("m", &first_turn, None);
        cache.record(&lookup.checkpoints, "acct-1").unwrap();

        let followup = vec![
            InputMessage::user("hello"),
            InputMessage::assistant("hi there"),
            InputMessage::user("and now?"),
        ];
        let lookup = cache.lookup("m", &followup, None);
        assert_eq!(lookup.account_id.as_deref(), Some("acct-1"));
    }

    #[test]
    fn different_model_or_system_breaks_affinity() {
        let cache = PrefixAffinityCache::default();
        let messages = vec![InputMessage::user("hello")];

        let lookup = cache.lookup("m", &messages, None);
        cache.record(&lookup.checkpoints, "acct-1").unwrap();

        let followup = vec![
            InputMessage::user("hello"),
            InputMessage::assistant("hi"),
            InputMessage::user("more"),
        ];
        assert!(cache.lookup("other-model", &followup, None).account_id.is_none());
        assert!(cache
            .lookup("m", &followup, Some(&SystemPrompt::Text("sys".into())))
            .account_id
            .is_none());
    }

    #[test]
    fn expired_bindings_are_ignored() {
        let cache = PrefixAffinityCache::new(1);
        let messages = vec![InputMessage::user("hello")];
        let lookup = cache.lookup("m", &messages, None);
        cache.record(&lookup.checkpoints, "acct-1").unwrap();

        // Force expiry instead of sleeping.
        for binding in cache.bindings.lock_or_recover().values_mut() {
            binding.expires_at = 0;
        }

        let followup = vec![
            InputMessage::user("hello"),
            InputMessage::assistant("hi"),
            InputMessage::user("more"),
        ];
        assert!(cache.lookup("m", &followup, None).account_id.is_none());
    }

    #[test]
    fn exact_repeat_of_a_recorded_conversation_matches_full_list() {
        let cache = PrefixAffinityCache::default();
        let messages = vec![InputMessage::user("hello")];
        let lookup = cache.lookup("m", &messages, None);
        cache.record(&lookup.checkpoints, "acct-1").unwrap();

        let lookup = cache.lookup("m", &messages, None);
        assert_eq!(lookup.account_id.as_deref(), Some("acct-1"));
    }
}

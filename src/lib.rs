pub mod config;
pub mod gateway;
pub mod models;
pub mod services;
mod shared;

pub use config::{AccountConfig, ConfigError, RelayConfig};
pub use gateway::claude::{ClaudeMessagesStage, CLAUDE_CODE_PREAMBLE};
pub use gateway::errors::{RelayError, RelayErrorCode};
pub use gateway::pipeline::{Pipeline, PipelineStage, RequestContext};
pub use gateway::routes::{build_router, RelayState};
pub use services::accounts::{Account, AccountLease, AccountPool};
pub use services::affinity::{
    AffinityCache, AffinityLookup, AffinityStoreError, Checkpoint, PrefixAffinityCache,
};
pub use services::reauth::{CookieReauthenticator, Reauthenticator};

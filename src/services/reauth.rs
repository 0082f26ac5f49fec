//! Usage: Account re-authentication (cookie credential -> fresh access token).
//!
//! The relay only owns the *trigger*: when an upstream exchange reports the
//! access token invalid or revoked, the executor asks a [`Reauthenticator`]
//! to refresh the account once. Token issuance mechanics stay behind the
//! trait; the default implementation drives the Claude OAuth token endpoint
//! with the account's stored refresh credential.

use crate::services::accounts::AccountEntry;
use crate::shared::security::mask_token;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

/// Claude OAuth token endpoint.
const CLAUDE_TOKEN_URL: &str = "https://api.anthropic.com/v1/oauth/token";
/// Public client identifier used by Claude Code desktop OAuth login.
const CLAUDE_CLIENT_ID: &str = "9d1c250a-e61b-44d9-88ed-5944d1962f5e";

pub trait Reauthenticator: Send + Sync {
    /// Refresh the account's access token in place. Returns `true` on
    /// success; on failure the account's credentials are left unchanged.
    fn refresh<'a>(
        &'a self,
        account: &'a AccountEntry,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;
}

pub struct CookieReauthenticator {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
}

impl CookieReauthenticator {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            token_url: CLAUDE_TOKEN_URL.to_string(),
            client_id: CLAUDE_CLIENT_ID.to_string(),
        }
    }

    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    async fn request_tokens(&self, refresh_credential: &str) -> Result<(String, Option<String>), String> {
        let mut form: HashMap<&str, String> = HashMap::new();
        form.insert("grant_type", "refresh_token".to_string());
        form.insert("refresh_token", refresh_credential.trim().to_string());
        form.insert("client_id", self.client_id.clone());

        let response = self
            .client
            .post(self.token_url.trim())
            .form(&form)
            .send()
            .await
            .map_err(|e| format!("token refresh request failed: {e}"))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| format!("token refresh response read failed: {e}"))?;

        if !status.is_success() {
            return Err(format!("token refresh rejected with status {status}: {body}"));
        }

        let parsed: Value = serde_json::from_str(&body)
            .map_err(|e| format!("token refresh response is not valid json: {e}"))?;
        let access_token = parsed
            .get("access_token")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| "token refresh response missing access_token".to_string())?;
        let rotated_credential = parsed
            .get("refresh_token")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        Ok((access_token.to_string(), rotated_credential))
    }
}

impl Default for CookieReauthenticator {
    fn default() -> Self {
        Self::new()
    }
}

impl Reauthenticator for CookieReauthenticator {
    fn refresh<'a>(
        &'a self,
        account: &'a AccountEntry,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move {
            let Some(credential) = account.cookie().filter(|c| !c.trim().is_empty()) else {
                tracing::warn!(
                    account = %account.organization_id(),
                    "re-authentication skipped: account has no refresh credential"
                );
                return false;
            };

            match self.request_tokens(&credential).await {
                Ok((access_token, rotated_credential)) => {
                    tracing::info!(
                        account = %account.organization_id(),
                        token = %mask_token(&access_token),
                        "re-authentication succeeded"
                    );
                    account.install_credentials(access_token, rotated_credential);
                    true
                }
                Err(err) => {
                    tracing::error!(
                        account = %account.organization_id(),
                        "re-authentication failed: {}",
                        err
                    );
                    false
                }
            }
        })
    }
}

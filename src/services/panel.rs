//! VPN panel integration and provisioning
//!
//! `VpnPanel` is the seam to the Hiddify REST API. `Provisioner` brings the
//! panel account in line with the stored entitlement after a store commit and
//! queues a resync when the panel cannot be reached.

use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use crate::config::PanelConfig;
use crate::database::UserRepository;
use crate::models::user::User;
use crate::utils::errors::{BotError, PanelError, PanelResult, Result};
use crate::utils::helpers::bytes_to_db;
use crate::utils::logging::log_panel_call;

/// Desired state of a panel account
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountSpec {
    pub username: String,
    pub data_limit: u64,
    pub expire_days: u32,
    pub enabled: bool,
}

impl AccountSpec {
    /// Spec mirroring the user's entitlement at `now`
    pub fn for_user(user: &User, now: DateTime<Utc>) -> Self {
        let entitlement = user.entitlement(now);
        let expire_days = match entitlement.expires_at {
            Some(expires_at) if entitlement.is_live() => days_until(now, expires_at),
            _ => 0,
        };

        Self {
            username: format!("tg_{}", user.telegram_id),
            data_limit: entitlement.data_limit_bytes,
            expire_days,
            enabled: entitlement.is_live(),
        }
    }
}

/// Whole days until `expires_at`, rounded up
fn days_until(now: DateTime<Utc>, expires_at: DateTime<Utc>) -> u32 {
    let seconds = (expires_at - now).num_seconds();
    if seconds <= 0 {
        return 0;
    }
    let days = (seconds + 86_399) / 86_400;
    u32::try_from(days).unwrap_or(u32::MAX)
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PanelAccount {
    pub uuid: String,
    #[serde(default)]
    pub subscription_link: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccountUsage {
    #[serde(default, alias = "used_traffic")]
    pub used_bytes: u64,
    #[serde(default)]
    pub data_limit: Option<u64>,
}

#[async_trait]
pub trait VpnPanel: Send + Sync {
    async fn create_account(&self, spec: &AccountSpec) -> PanelResult<PanelAccount>;

    async fn update_account(&self, uuid: &str, spec: &AccountSpec) -> PanelResult<()>;

    async fn delete_account(&self, uuid: &str) -> PanelResult<()>;

    async fn get_account_usage(&self, uuid: &str) -> PanelResult<AccountUsage>;

    /// Link a client imports to get its configuration
    fn subscription_url(&self, uuid: &str) -> String;
}

/// Hiddify REST client
#[derive(Debug, Clone)]
pub struct HiddifyPanel {
    client: Client,
    base_url: String,
    token: String,
    protocols: Vec<String>,
}

#[derive(Serialize)]
struct CreateUserPayload<'a> {
    username: &'a str,
    data_limit: u64,
    expire_days: u32,
    protocols: &'a [String],
}

#[derive(Serialize)]
struct UpdateUserPayload {
    data_limit: u64,
    expire_days: u32,
    enable: bool,
}

impl HiddifyPanel {
    pub fn new(config: &PanelConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent("HiddifyBot/1.0")
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.api_token.clone(),
            protocols: config.protocols.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn check(response: reqwest::Response) -> PanelResult<reqwest::Response> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(PanelError::Unauthorized);
        }
        if status.is_client_error() || status.is_server_error() {
            let message = response.text().await.unwrap_or_default();
            return Err(PanelError::Api { status: status.as_u16(), message });
        }
        Ok(response)
    }
}

#[async_trait]
impl VpnPanel for HiddifyPanel {
    async fn create_account(&self, spec: &AccountSpec) -> PanelResult<PanelAccount> {
        debug!(username = %spec.username, "Creating panel account");
        let payload = CreateUserPayload {
            username: &spec.username,
            data_limit: spec.data_limit,
            expire_days: spec.expire_days,
            protocols: &self.protocols,
        };

        let response = self.client
            .post(self.url("/users"))
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;

        let account = Self::check(response)
            .await?
            .json::<PanelAccount>()
            .await
            .map_err(|e| PanelError::InvalidResponse(e.to_string()))?;

        Ok(account)
    }

    async fn update_account(&self, uuid: &str, spec: &AccountSpec) -> PanelResult<()> {
        debug!(uuid = %uuid, enabled = spec.enabled, "Updating panel account");
        let payload = UpdateUserPayload {
            data_limit: spec.data_limit,
            expire_days: spec.expire_days,
            enable: spec.enabled,
        };

        let response = self.client
            .put(self.url(&format!("/users/{}", uuid)))
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;

        Self::check(response).await?;
        Ok(())
    }

    async fn delete_account(&self, uuid: &str) -> PanelResult<()> {
        debug!(uuid = %uuid, "Deleting panel account");
        let response = self.client
            .delete(self.url(&format!("/users/{}", uuid)))
            .bearer_auth(&self.token)
            .send()
            .await?;

        match Self::check(response).await {
            Ok(_) => Ok(()),
            Err(PanelError::Api { status: 404, .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn get_account_usage(&self, uuid: &str) -> PanelResult<AccountUsage> {
        let response = self.client
            .get(self.url(&format!("/users/{}", uuid)))
            .bearer_auth(&self.token)
            .send()
            .await?;

        let usage = Self::check(response)
            .await?
            .json::<AccountUsage>()
            .await
            .map_err(|e| PanelError::InvalidResponse(e.to_string()))?;

        Ok(usage)
    }

    fn subscription_url(&self, uuid: &str) -> String {
        let domain = self.base_url.strip_suffix("/api").unwrap_or(&self.base_url);
        format!("{}/{}", domain, uuid)
    }
}

/// What a sync attempt achieved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelSync {
    Synced { panel_uuid: String },
    /// Nothing to do: no live entitlement and no panel account
    Skipped,
}

#[derive(Clone)]
pub struct Provisioner {
    panel: Arc<dyn VpnPanel>,
    users: UserRepository,
    max_retries: u32,
    base_delay: Duration,
}

impl std::fmt::Debug for Provisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioner")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .finish()
    }
}

impl Provisioner {
    pub fn new(panel: Arc<dyn VpnPanel>, users: UserRepository, config: &PanelConfig) -> Self {
        Self {
            panel,
            users,
            max_retries: config.max_retries.max(1),
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }

    pub fn panel(&self) -> &Arc<dyn VpnPanel> {
        &self.panel
    }

    /// Retry transient panel failures with exponential backoff
    async fn with_retry<T, F, Fut>(&self, operation: &str, user_id: i64, mut call: F) -> PanelResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = PanelResult<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match call().await {
                Ok(value) => {
                    log_panel_call(operation, user_id, true, None);
                    return Ok(value);
                }
                Err(e) => {
                    log_panel_call(operation, user_id, false, Some(&e.to_string()));
                    if !e.is_transient() || attempt >= self.max_retries {
                        return Err(e);
                    }
                    let delay = self.base_delay * 2u32.saturating_pow(attempt - 1);
                    debug!(operation, attempt, delay_ms = delay.as_millis() as u64, "Retrying panel call");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Bring the panel account in line with the user's stored entitlement
    ///
    /// On failure the user is flagged for resync and `PanelUnavailable` is
    /// returned; the stored entitlement is never rolled back.
    pub async fn sync_user(&self, user: &User) -> Result<PanelSync> {
        let spec = AccountSpec::for_user(user, Utc::now());

        let result = match user.panel_uuid.as_deref() {
            None if !spec.enabled => return Ok(PanelSync::Skipped),
            None => self
                .with_retry("create_account", user.id, || self.panel.create_account(&spec))
                .await
                .map(|account| account.uuid),
            Some(uuid) => self
                .with_retry("update_account", user.id, || self.panel.update_account(uuid, &spec))
                .await
                .map(|_| uuid.to_string()),
        };

        match result {
            Ok(panel_uuid) => {
                self.users.set_panel_state(user.id, Some(&panel_uuid), false).await?;
                info!(user_id = user.id, panel_uuid = %panel_uuid, enabled = spec.enabled, "Panel account synced");
                Ok(PanelSync::Synced { panel_uuid })
            }
            Err(e) => {
                warn!(user_id = user.id, error = %e, "Panel sync failed, queued for resync");
                self.users.set_panel_state(user.id, None, true).await?;
                Err(BotError::PanelUnavailable(e.to_string()))
            }
        }
    }

    /// Remove the panel account of a blocked user
    pub async fn revoke(&self, user: &User) -> Result<()> {
        let Some(uuid) = user.panel_uuid.as_deref() else {
            return Ok(());
        };

        match self.with_retry("delete_account", user.id, || self.panel.delete_account(uuid)).await {
            Ok(()) => {
                self.users.clear_panel_account(user.id).await?;
                info!(user_id = user.id, panel_uuid = %uuid, "Panel account removed");
                Ok(())
            }
            Err(e) => {
                self.users.set_panel_state(user.id, None, true).await?;
                Err(BotError::PanelUnavailable(e.to_string()))
            }
        }
    }

    /// Refresh `used_bytes` from the panel; returns the stored user unchanged on failure
    pub async fn refresh_usage(&self, user: User) -> User {
        let Some(uuid) = user.panel_uuid.clone() else {
            return user;
        };

        match self.with_retry("get_account_usage", user.id, || self.panel.get_account_usage(&uuid)).await {
            Ok(usage) => {
                let used_bytes = bytes_to_db(usage.used_bytes);
                if let Err(e) = self.users.update_usage(user.id, used_bytes).await {
                    warn!(user_id = user.id, error = %e, "Failed to store panel usage");
                    return user;
                }
                User { used_bytes, ..user }
            }
            Err(e) => {
                debug!(user_id = user.id, error = %e, "Usage refresh skipped");
                user
            }
        }
    }

    /// Retry every user queued for resync; returns (synced, still_pending)
    pub async fn retry_pending(&self, limit: i64) -> Result<(usize, usize)> {
        let pending = self.users.list_panel_sync_pending(limit).await?;
        let mut synced = 0;
        let mut failed = 0;

        for user in &pending {
            let result = if user.is_blocked {
                self.revoke(user).await
            } else {
                self.sync_user(user).await.map(|_| ())
            };
            match result {
                Ok(()) => synced += 1,
                Err(e) => {
                    warn!(user_id = user.id, error = %e, "Resync still failing");
                    failed += 1;
                }
            }
        }

        info!(synced, failed, "Panel resync pass finished");
        Ok((synced, failed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_days_until_rounds_up() {
        let now = Utc::now();
        assert_eq!(days_until(now, now), 0);
        assert_eq!(days_until(now, now - ChronoDuration::hours(1)), 0);
        assert_eq!(days_until(now, now + ChronoDuration::hours(1)), 1);
        assert_eq!(days_until(now, now + ChronoDuration::days(30)), 30);
        assert_eq!(days_until(now, now + ChronoDuration::days(30) + ChronoDuration::minutes(1)), 31);
    }

    #[test]
    fn test_subscription_url_strips_api_suffix() {
        let config = PanelConfig {
            api_url: "https://panel.example.com/api/".to_string(),
            api_token: "t".to_string(),
            timeout_seconds: 5,
            max_retries: 3,
            retry_base_delay_ms: 10,
            protocols: vec!["vless_reality".to_string()],
        };
        let panel = HiddifyPanel::new(&config).expect("client");
        assert_eq!(panel.subscription_url("abc"), "https://panel.example.com/abc");
    }
}

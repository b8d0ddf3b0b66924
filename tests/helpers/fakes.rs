//! In-memory stand-ins for the VPN panel and the outcome sink

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use async_trait::async_trait;
use hiddify_bot::services::panel::{AccountSpec, AccountUsage, PanelAccount, VpnPanel};
use hiddify_bot::services::{OutcomeEvent, OutcomeSink};
use hiddify_bot::utils::errors::{PanelError, PanelResult};

/// Panel that keeps accounts in memory and can be switched offline
#[derive(Default)]
pub struct FakePanel {
    accounts: Mutex<HashMap<String, AccountSpec>>,
    next_id: AtomicU64,
    offline: AtomicBool,
    used_bytes: AtomicU64,
}

impl FakePanel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with a transient error until switched back
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Usage reported by `get_account_usage`
    pub fn set_used_bytes(&self, bytes: u64) {
        self.used_bytes.store(bytes, Ordering::SeqCst);
    }

    pub fn account(&self, uuid: &str) -> Option<AccountSpec> {
        self.accounts.lock().unwrap().get(uuid).cloned()
    }

    pub fn account_count(&self) -> usize {
        self.accounts.lock().unwrap().len()
    }

    fn check_online(&self) -> PanelResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(PanelError::Connection("panel is offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl VpnPanel for FakePanel {
    async fn create_account(&self, spec: &AccountSpec) -> PanelResult<PanelAccount> {
        self.check_online()?;
        let uuid = format!("uuid-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.accounts.lock().unwrap().insert(uuid.clone(), spec.clone());
        Ok(PanelAccount { uuid, subscription_link: None })
    }

    async fn update_account(&self, uuid: &str, spec: &AccountSpec) -> PanelResult<()> {
        self.check_online()?;
        let mut accounts = self.accounts.lock().unwrap();
        match accounts.get_mut(uuid) {
            Some(account) => {
                *account = spec.clone();
                Ok(())
            }
            None => Err(PanelError::Api { status: 404, message: "no such user".to_string() }),
        }
    }

    async fn delete_account(&self, uuid: &str) -> PanelResult<()> {
        self.check_online()?;
        self.accounts.lock().unwrap().remove(uuid);
        Ok(())
    }

    async fn get_account_usage(&self, uuid: &str) -> PanelResult<AccountUsage> {
        self.check_online()?;
        let accounts = self.accounts.lock().unwrap();
        let account = accounts
            .get(uuid)
            .ok_or_else(|| PanelError::Api { status: 404, message: "no such user".to_string() })?;
        Ok(AccountUsage {
            used_bytes: self.used_bytes.load(Ordering::SeqCst),
            data_limit: Some(account.data_limit),
        })
    }

    fn subscription_url(&self, uuid: &str) -> String {
        format!("https://panel.test/{}", uuid)
    }
}

/// Sink that remembers every event it receives
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<OutcomeEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<OutcomeEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Events with the given name, in emission order
    pub fn named(&self, name: &str) -> Vec<OutcomeEvent> {
        self.events().into_iter().filter(|e| e.name() == name).collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

#[async_trait]
impl OutcomeSink for RecordingSink {
    async fn emit(&self, event: OutcomeEvent) {
        self.events.lock().unwrap().push(event);
    }
}

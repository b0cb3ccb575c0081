//! Scheduler, retry, approval, and dashboard settings from a TOML file.
//!
//! Every field has a default, so an empty file (or no file) is valid:
//!
//! ```toml
//! [schedule]
//! dispatch_secs = 30
//!
//! [retry]
//! max_retries = 3
//!
//! [approval]
//! ttl_hours = 24
//!
//! [[approval.rules]]
//! name = "payment"
//! item_types = ["ledger_action"]
//! condition = { kind = "always" }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::engine::{ApprovalGate, ApprovalPolicy, PolicyRule, RetryPolicy};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub schedule: ScheduleSettings,
    pub retry: RetrySettings,
    pub approval: ApprovalSettings,
    pub dashboard: DashboardSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScheduleSettings {
    pub dispatch_secs: u64,
    pub approval_sweep_secs: u64,
    pub retry_sweep_secs: u64,
    pub reconcile_secs: u64,
    pub dashboard_secs: u64,
    /// Gap between drop folder polls.
    pub drop_folder_idle_secs: u64,
    /// How long shutdown waits for in-flight jobs.
    pub shutdown_grace_secs: u64,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            dispatch_secs: 30,
            approval_sweep_secs: 300,
            retry_sweep_secs: 60,
            reconcile_secs: 600,
            dashboard_secs: 60,
            drop_folder_idle_secs: 10,
            shutdown_grace_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_secs: 30,
            max_delay_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApprovalSettings {
    pub ttl_hours: u32,
    /// Replaces the default policy table when present.
    pub rules: Option<Vec<PolicyRule>>,
}

impl Default for ApprovalSettings {
    fn default() -> Self {
        Self {
            ttl_hours: 24,
            rules: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DashboardSettings {
    pub recent_entries: usize,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self { recent_entries: 5 }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read settings {}: {e}", path.display()))
        })?;
        Self::from_toml(&text)
            .map_err(|e| Error::Config(format!("bad settings {}: {e}", path.display())))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        let s = &self.schedule;
        let intervals = [
            ("dispatch_secs", s.dispatch_secs),
            ("approval_sweep_secs", s.approval_sweep_secs),
            ("retry_sweep_secs", s.retry_sweep_secs),
            ("reconcile_secs", s.reconcile_secs),
            ("dashboard_secs", s.dashboard_secs),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, v)| *v == 0) {
            return Err(Error::Config(format!("schedule.{name} must be positive")));
        }
        if self.retry.base_delay_secs > self.retry.max_delay_secs {
            return Err(Error::Config(
                "retry.base_delay_secs exceeds retry.max_delay_secs".into(),
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry.max_retries,
            base_delay: Duration::from_secs(self.retry.base_delay_secs),
            max_delay: Duration::from_secs(self.retry.max_delay_secs),
        }
    }

    pub fn approval_gate(&self) -> ApprovalGate {
        let policy = match &self.approval.rules {
            Some(rules) => ApprovalPolicy {
                rules: rules.clone(),
            },
            None => ApprovalPolicy::default(),
        };
        ApprovalGate::new(policy, chrono::Duration::hours(i64::from(self.approval.ttl_hours)))
    }
}

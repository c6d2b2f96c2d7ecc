//! Append-only trail of administrative actions on users.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;

use serde::Serialize;

use crate::{CoreError, EntityId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    ChangeStatus,
    Suspend,
    Delete,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::ChangeStatus => "change_status",
            AuditAction::Suspend => "suspend",
            AuditAction::Delete => "delete",
        }
    }
}

/// Who did what to which record, and when.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    pub timestamp: SystemTime,
    pub actor_id: EntityId,
    pub action: AuditAction,
    pub target_type: &'static str,
    pub target_id: EntityId,
    pub details: BTreeMap<String, String>,
}

impl AuditEntry {
    /// Entry targeting a user record.
    pub fn user(
        actor_id: EntityId,
        action: AuditAction,
        target_id: EntityId,
        timestamp: SystemTime,
    ) -> Self {
        Self {
            timestamp,
            actor_id,
            action,
            target_type: "User",
            target_id,
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Default)]
pub struct AuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries_mut(&self) -> Result<MutexGuard<'_, Vec<AuditEntry>>, CoreError> {
        self.entries
            .lock()
            .map_err(|_| CoreError::Repository("audit log mutex poisoned".into()))
    }

    pub fn record(&self, entry: AuditEntry) -> Result<(), CoreError> {
        tracing::info!(
            actor_id = entry.actor_id,
            action = entry.action.as_str(),
            target_id = entry.target_id,
            "audit"
        );
        self.entries_mut()?.push(entry);
        Ok(())
    }

    /// All entries in recording order.
    pub fn entries(&self) -> Result<Vec<AuditEntry>, CoreError> {
        Ok(self.entries_mut()?.clone())
    }

    pub fn for_target(&self, target_id: EntityId) -> Result<Vec<AuditEntry>, CoreError> {
        Ok(self
            .entries_mut()?
            .iter()
            .filter(|e| e.target_id == target_id)
            .cloned()
            .collect())
    }

    pub fn len(&self) -> Result<usize, CoreError> {
        Ok(self.entries_mut()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, CoreError> {
        Ok(self.len()? == 0)
    }
}

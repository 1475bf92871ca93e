// Change-notification event types
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kind of change notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    /// Cached records of a section/resource were replaced by fresher ones
    DataRefreshed,
    /// Cached audit log entries were replaced by fresher ones
    LogsRefreshed,
    /// A cached role assignment changed
    RoleRefreshed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::DataRefreshed => "data-refreshed",
            EventKind::LogsRefreshed => "logs-refreshed",
            EventKind::RoleRefreshed => "role-refreshed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a notification is about
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventScope {
    pub section: Option<String>,
    pub resource: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub kind: EventKind,
    pub scope: EventScope,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(kind: EventKind, scope: EventScope) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            scope,
            timestamp: Utc::now(),
        }
    }

    /// Notification for a refreshed `(section, resource)` store
    pub fn data_refreshed(section: &str, resource: &str) -> Self {
        Self::new(
            EventKind::DataRefreshed,
            EventScope {
                section: Some(section.to_string()),
                resource: Some(resource.to_string()),
                user_id: None,
            },
        )
    }

    /// Notification for a refreshed audit log store
    pub fn logs_refreshed(section: &str) -> Self {
        Self::new(
            EventKind::LogsRefreshed,
            EventScope {
                section: Some(section.to_string()),
                resource: Some("audit_logs".to_string()),
                user_id: None,
            },
        )
    }

    /// Notification for a changed role assignment
    pub fn role_refreshed(user_id: &str) -> Self {
        Self::new(
            EventKind::RoleRefreshed,
            EventScope {
                section: None,
                resource: None,
                user_id: Some(user_id.to_string()),
            },
        )
    }

    /// Whether this event is about the given section/resource
    pub fn concerns(&self, section: &str, resource: &str) -> bool {
        self.scope.section.as_deref() == Some(section)
            && self.scope.resource.as_deref() == Some(resource)
    }
}

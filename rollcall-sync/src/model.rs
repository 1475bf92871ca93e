//! Roster domain types
//!
//! Sections partition every store; members carry dated marks whose shape
//! depends on the section. Validation runs before a mutation is committed or
//! queued, so nothing invalid ever reaches the pending-write log.

use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Prefix of locally generated placeholder ids
pub const TEMP_ID_PREFIX: &str = "offline_";

/// Score recorded for an absent member
pub const ABSENT_SCORE: f64 = -1.0;

const SCORE_TOLERANCE: f64 = 0.001;

/// Top-level partition of the dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    Company,
    Junior,
}

impl Section {
    pub const ALL: [Section; 2] = [Section::Company, Section::Junior];

    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Company => "company",
            Section::Junior => "junior",
        }
    }

    /// Number of squads a member can belong to
    pub fn squad_count(&self) -> u8 {
        match self {
            Section::Company => 3,
            Section::Junior => 4,
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Section {
    type Err = SyncError;

    fn from_str(s: &str) -> SyncResult<Self> {
        match s {
            "company" => Ok(Section::Company),
            "junior" => Ok(Section::Junior),
            _ => Err(SyncError::Validation(format!("Unknown section: {s}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Members,
    AuditLogs,
    InviteCodes,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Members => "members",
            ResourceKind::AuditLogs => "audit_logs",
            ResourceKind::InviteCodes => "invite_codes",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{section}_{resource}`; names both the local store and the remote table
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreName {
    name: String,
    kind: ResourceKind,
}

impl StoreName {
    pub fn new(section: Section, kind: ResourceKind) -> Self {
        Self {
            name: format!("{}_{}", section.as_str(), kind.as_str()),
            kind,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Column holding the record id in the remote table
    pub fn key_column(&self) -> &'static str {
        match self.kind {
            ResourceKind::InviteCodes => "code",
            ResourceKind::Members | ResourceKind::AuditLogs => "id",
        }
    }
}

impl fmt::Display for StoreName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Record identifier, either server-issued or a temporary placeholder
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh `offline_<uuid>` placeholder
    pub fn temporary() -> Self {
        Self(format!("{TEMP_ID_PREFIX}{}", Uuid::new_v4()))
    }

    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMP_ID_PREFIX)
    }

    /// Id the record is inserted under remotely
    ///
    /// A placeholder keeps its uuid, so replaying the same create hits the
    /// primary key instead of adding a second row.
    pub fn promoted(&self) -> RecordId {
        match self.0.strip_prefix(TEMP_ID_PREFIX) {
            Some(uuid) => Self(uuid.to_string()),
            None => self.clone(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A cached, section-scoped record type
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: ResourceKind;

    fn record_id(&self) -> String;

    fn store_name(section: Section) -> StoreName {
        StoreName::new(section, Self::KIND)
    }
}

/// One dated attendance/behaviour mark
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mark {
    pub date: NaiveDate,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uniform: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behaviour: Option<f64>,
}

impl Mark {
    pub fn company(date: NaiveDate, score: f64) -> Self {
        Self {
            date,
            score,
            uniform: None,
            behaviour: None,
        }
    }

    pub fn junior(date: NaiveDate, uniform: f64, behaviour: f64) -> Self {
        Self {
            date,
            score: uniform + behaviour,
            uniform: Some(uniform),
            behaviour: Some(behaviour),
        }
    }

    pub fn absent(date: NaiveDate) -> Self {
        Self::company(date, ABSENT_SCORE)
    }

    pub fn is_absent(&self) -> bool {
        self.score == ABSENT_SCORE
    }

    pub fn validate(&self, section: Section) -> SyncResult<()> {
        if self.is_absent() {
            if self.uniform.is_some() || self.behaviour.is_some() {
                return Err(invalid_mark(self.date, "absent marks carry no sub-scores"));
            }
            return Ok(());
        }

        match section {
            Section::Company => {
                if self.uniform.is_some() || self.behaviour.is_some() {
                    return Err(invalid_mark(self.date, "company marks carry no sub-scores"));
                }
                check_score(self.date, "score", self.score, 10.0)
            }
            Section::Junior => {
                let (Some(uniform), Some(behaviour)) = (self.uniform, self.behaviour) else {
                    return Err(invalid_mark(
                        self.date,
                        "junior marks need uniform and behaviour scores",
                    ));
                };
                check_score(self.date, "uniform", uniform, 10.0)?;
                check_score(self.date, "behaviour", behaviour, 5.0)?;
                check_score(self.date, "score", self.score, 15.0)?;
                if (uniform + behaviour - self.score).abs() > SCORE_TOLERANCE {
                    return Err(invalid_mark(
                        self.date,
                        "score must equal uniform plus behaviour",
                    ));
                }
                Ok(())
            }
        }
    }
}

fn check_score(date: NaiveDate, field: &str, value: f64, max: f64) -> SyncResult<()> {
    if !value.is_finite() || !(0.0..=max).contains(&value) {
        return Err(invalid_mark(date, &format!("{field} must be between 0 and {max}")));
    }
    if !has_at_most_two_decimals(value) {
        return Err(invalid_mark(date, &format!("{field} has more than two decimals")));
    }
    Ok(())
}

fn has_at_most_two_decimals(value: f64) -> bool {
    let scaled = value * 100.0;
    (scaled - scaled.round()).abs() < 1e-6
}

fn invalid_mark(date: NaiveDate, reason: &str) -> SyncError {
    SyncError::Validation(format!("Mark for {date}: {reason}"))
}

/// Roster entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: RecordId,
    pub name: String,
    pub squad: u8,
    pub year: String,
    #[serde(default)]
    pub is_squad_leader: bool,
    #[serde(default)]
    pub marks: Vec<Mark>,
}

impl Member {
    pub fn validate(&self, section: Section) -> SyncResult<()> {
        if self.name.trim().is_empty() {
            return Err(SyncError::Validation("Member name is required".to_string()));
        }
        if self.squad == 0 || self.squad > section.squad_count() {
            return Err(SyncError::Validation(format!(
                "Squad {} is outside 1..={} for the {section} section",
                self.squad,
                section.squad_count()
            )));
        }
        if self.year.trim().is_empty() {
            return Err(SyncError::Validation("Member year is required".to_string()));
        }

        let mut seen = HashSet::new();
        for mark in &self.marks {
            if !seen.insert(mark.date) {
                return Err(invalid_mark(mark.date, "duplicate date"));
            }
            mark.validate(section)?;
        }
        Ok(())
    }

    pub fn mark(&self, date: NaiveDate) -> Option<&Mark> {
        self.marks.iter().find(|mark| mark.date == date)
    }

    /// Insert or replace the mark for its date
    pub fn set_mark(&mut self, mark: Mark) {
        self.marks.retain(|existing| existing.date != mark.date);
        self.marks.push(mark);
        self.marks.sort_by_key(|m| m.date);
    }
}

impl Record for Member {
    const KIND: ResourceKind = ResourceKind::Members;

    fn record_id(&self) -> String {
        self.id.to_string()
    }
}

/// Fields supplied when adding a member; the id is assigned locally
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberDraft {
    pub name: String,
    pub squad: u8,
    pub year: String,
    #[serde(default)]
    pub is_squad_leader: bool,
    #[serde(default)]
    pub marks: Vec<Mark>,
}

impl MemberDraft {
    pub fn into_member(self) -> Member {
        Member {
            id: RecordId::temporary(),
            name: self.name,
            squad: self.squad,
            year: self.year,
            is_squad_leader: self.is_squad_leader,
            marks: self.marks,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Captain,
    Officer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Captain => "captain",
            Role::Officer => "officer",
        }
    }
}

/// Role assignment of one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRoleInfo {
    pub role: Role,
    #[serde(default)]
    pub sections: Vec<Section>,
}

impl UserRoleInfo {
    pub fn new(role: Role, mut sections: Vec<Section>) -> Self {
        sections.sort();
        sections.dedup();
        Self { role, sections }
    }

    pub fn can_access(&self, section: Section) -> bool {
        self.role == Role::Admin || self.sections.contains(&section)
    }
}

/// Invitation granting a role in a section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteCode {
    pub code: String,
    pub section: Section,
    pub role: Role,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl InviteCode {
    pub fn new(code: String, section: Section, role: Role, created_by: &str, ttl: Duration) -> Self {
        let created_at = Utc::now();
        Self {
            code,
            section,
            role,
            created_by: created_by.to_string(),
            created_at,
            expires_at: created_at + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl Record for InviteCode {
    const KIND: ResourceKind = ResourceKind::InviteCodes;

    fn record_id(&self) -> String {
        self.code.clone()
    }
}

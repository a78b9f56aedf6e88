use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Timestamp — canonical time representation (seconds + nanoseconds)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds_since_epoch: u64,
    pub nanoseconds: u32,
}

impl Timestamp {
    pub fn now() -> Self {
        let now = chrono::Utc::now();
        Self {
            seconds_since_epoch: now.timestamp() as u64,
            nanoseconds: now.timestamp_subsec_nanos(),
        }
    }

    pub fn from_seconds(seconds: u64) -> Self {
        Self {
            seconds_since_epoch: seconds,
            nanoseconds: 0,
        }
    }

    pub fn to_rfc3339(&self) -> String {
        let dt =
            chrono::DateTime::from_timestamp(self.seconds_since_epoch as i64, self.nanoseconds);
        dt.map(|d| d.to_rfc3339())
            .unwrap_or_else(|| "invalid".to_string())
    }

    /// Seconds elapsed from `earlier` to `self`, saturating at zero when
    /// `earlier` is in the future.
    pub fn seconds_since(&self, earlier: Timestamp) -> u64 {
        self.seconds_since_epoch
            .saturating_sub(earlier.seconds_since_epoch)
    }

    pub fn plus_seconds(&self, seconds: u64) -> Self {
        Self {
            seconds_since_epoch: self.seconds_since_epoch.saturating_add(seconds),
            nanoseconds: self.nanoseconds,
        }
    }

    pub fn is_past(&self) -> bool {
        *self < Self::now()
    }
}

impl From<chrono::DateTime<chrono::Utc>> for Timestamp {
    fn from(dt: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            seconds_since_epoch: dt.timestamp() as u64,
            nanoseconds: dt.timestamp_subsec_nanos(),
        }
    }
}

// ---------------------------------------------------------------------------
// Typed identifiers — prevent stringly-typed confusion
// ---------------------------------------------------------------------------

macro_rules! define_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

define_id!(PolicyId, "Unique identifier for a governed policy.");
define_id!(UserId, "Unique identifier for an acting user.");
define_id!(RequestId, "Unique identifier for an inbound request.");
define_id!(SessionId, "Unique identifier for a caller session.");
define_id!(AuditEntryId, "Unique identifier for an audit trail entry.");
define_id!(ChangeId, "Unique identifier for a recorded policy change.");
define_id!(PlanId, "Unique identifier for a rollback plan.");

// ---------------------------------------------------------------------------
// ContentHash / IntegrityHash — 32-byte SHA-256 / HMAC-SHA-256 digests
// ---------------------------------------------------------------------------

/// SHA-256 digest of a policy version's canonical content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(#[serde(with = "hex_bytes")] pub [u8; 32]);

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Keyed HMAC-SHA-256 digest over an audit entry's canonical fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntegrityHash(#[serde(with = "hex_bytes")] pub [u8; 32]);

impl fmt::Display for IntegrityHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

// ---------------------------------------------------------------------------
// RiskLevel — declared risk of a decision, change, or rollback
// ---------------------------------------------------------------------------

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
            RiskLevel::Critical => write!(f, "critical"),
        }
    }
}

// ---------------------------------------------------------------------------
// DataClassification — sensitivity of the data a decision or entry touches
//
// Retention and cache TTL both key off this. Cultural material is treated
// as the most sensitive category in the governed domain.
// ---------------------------------------------------------------------------

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum DataClassification {
    Public,
    #[default]
    Internal,
    Financial,
    Sensitive,
    Cultural,
}

impl DataClassification {
    /// True for classifications that force the shortest cache lifetime and
    /// consent-scoped invalidation.
    pub fn is_restricted(self) -> bool {
        matches!(
            self,
            DataClassification::Cultural | DataClassification::Sensitive
        )
    }
}

impl fmt::Display for DataClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataClassification::Public => write!(f, "public"),
            DataClassification::Internal => write!(f, "internal"),
            DataClassification::Financial => write!(f, "financial"),
            DataClassification::Sensitive => write!(f, "sensitive"),
            DataClassification::Cultural => write!(f, "cultural"),
        }
    }
}

// ---------------------------------------------------------------------------
// ConflictSeverity — severity of a detected rollback conflict
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for ConflictSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictSeverity::Low => write!(f, "low"),
            ConflictSeverity::Medium => write!(f, "medium"),
            ConflictSeverity::High => write!(f, "high"),
            ConflictSeverity::Critical => write!(f, "critical"),
        }
    }
}

// ---------------------------------------------------------------------------
// VersionStatus — policy version lifecycle
//
// Transitions are forward-only: Draft -> Review -> Approved -> Active ->
// Deprecated. A rollback never rewinds a status; it creates a new version.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionStatus {
    Draft,
    Review,
    Approved,
    Active,
    Deprecated,
}

impl VersionStatus {
    fn ordinal(self) -> u8 {
        match self {
            VersionStatus::Draft => 0,
            VersionStatus::Review => 1,
            VersionStatus::Approved => 2,
            VersionStatus::Active => 3,
            VersionStatus::Deprecated => 4,
        }
    }

    /// True if moving from `self` to `next` walks the lifecycle forward.
    pub fn can_transition_to(self, next: VersionStatus) -> bool {
        next.ordinal() > self.ordinal()
    }
}

impl fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionStatus::Draft => write!(f, "draft"),
            VersionStatus::Review => write!(f, "review"),
            VersionStatus::Approved => write!(f, "approved"),
            VersionStatus::Active => write!(f, "active"),
            VersionStatus::Deprecated => write!(f, "deprecated"),
        }
    }
}

// ---------------------------------------------------------------------------
// PolicyVersion — immutable content-hashed snapshot of a policy
// ---------------------------------------------------------------------------

/// Metadata carried by every policy version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionMetadata {
    pub category: String,
    pub impact: RiskLevel,
    #[serde(default)]
    pub approver: Option<UserId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// An immutable snapshot of a policy's rules at one point in its history.
///
/// `content` is opaque to the core: a tagged scalar/array/object tree that
/// is hashed, diffed, and scanned for a `dependencies` list, never evaluated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyVersion {
    pub policy_id: PolicyId,
    pub version: String,
    pub content_hash: ContentHash,
    pub content: serde_json::Value,
    pub metadata: VersionMetadata,
    #[serde(default)]
    pub parent_version: Option<String>,
    #[serde(default)]
    pub branches: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub status: VersionStatus,
}

impl PolicyVersion {
    /// Dependencies declared in the policy content as
    /// `{"dependencies": [{"depends_on": "...", "required": bool}]}`.
    pub fn declared_dependencies(&self) -> Vec<PolicyDependency> {
        self.content
            .get("dependencies")
            .and_then(|d| d.as_array())
            .map(|deps| {
                deps.iter()
                    .filter_map(|d| serde_json::from_value(d.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// One declared dependency edge in policy content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDependency {
    pub depends_on: PolicyId,
    #[serde(default)]
    pub required: bool,
}

// ---------------------------------------------------------------------------
// PolicyDiff — structural difference between two content trees
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffKind {
    Add,
    Modify,
    Delete,
}

/// One leaf-level difference at a JSON-pointer-style path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffEntry {
    pub path: String,
    pub kind: DiffKind,
    #[serde(default)]
    pub before: Option<serde_json::Value>,
    #[serde(default)]
    pub after: Option<serde_json::Value>,
}

/// Complexity tier derived from the total number of leaf changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeComplexity {
    Trivial,
    Simple,
    Moderate,
    Complex,
    Major,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDiff {
    pub entries: Vec<DiffEntry>,
    pub additions: usize,
    pub modifications: usize,
    pub deletions: usize,
    pub complexity: ChangeComplexity,
}

impl PolicyDiff {
    pub fn total_changes(&self) -> usize {
        self.additions + self.modifications + self.deletions
    }
}

// ---------------------------------------------------------------------------
// Changeset — ordered atomic operations with per-operation rollback
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Set,
    Remove,
}

/// One atomic content operation plus the instruction that reverses it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeOperation {
    pub index: usize,
    pub kind: OperationKind,
    pub path: String,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    pub rollback: RollbackInstruction,
}

/// How to undo a single change operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackInstruction {
    pub kind: OperationKind,
    pub path: String,
    #[serde(default)]
    pub restore: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Changeset {
    pub operations: Vec<ChangeOperation>,
}

// ---------------------------------------------------------------------------
// PolicyChange — one recorded version transition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeUrgency {
    Routine,
    Elevated,
    Emergency,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeMetadata {
    pub reason: String,
    pub urgency: ChangeUrgency,
    pub impact: RiskLevel,
    #[serde(default)]
    pub affected_systems: Vec<String>,
    #[serde(default)]
    pub affected_users: Vec<UserId>,
    pub rollback_complexity: ChangeComplexity,
}

/// Immutable record of one version transition. `from_version` is `None`
/// for the creation of a policy's first version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyChange {
    pub change_id: ChangeId,
    pub policy_id: PolicyId,
    #[serde(default)]
    pub from_version: Option<String>,
    pub to_version: String,
    pub diff: PolicyDiff,
    pub changeset: Changeset,
    pub metadata: ChangeMetadata,
    pub audit_entry_ids: Vec<AuditEntryId>,
    pub recorded_at: Timestamp,
}

// ---------------------------------------------------------------------------
// AuditEntry — one tamper-evident audit record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    VersionCreated,
    VersionUpdated,
    VersionSubmitted,
    VersionApproved,
    VersionDeployed,
    VersionBranched,
    VersionsMerged,
    RollbackValidated,
    RollbackExecuted,
    RollbackAborted,
    CacheInvalidated,
    ComplianceReportGenerated,
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditEventType::VersionCreated => "version_created",
            AuditEventType::VersionUpdated => "version_updated",
            AuditEventType::VersionSubmitted => "version_submitted",
            AuditEventType::VersionApproved => "version_approved",
            AuditEventType::VersionDeployed => "version_deployed",
            AuditEventType::VersionBranched => "version_branched",
            AuditEventType::VersionsMerged => "versions_merged",
            AuditEventType::RollbackValidated => "rollback_validated",
            AuditEventType::RollbackExecuted => "rollback_executed",
            AuditEventType::RollbackAborted => "rollback_aborted",
            AuditEventType::CacheInvalidated => "cache_invalidated",
            AuditEventType::ComplianceReportGenerated => "compliance_report_generated",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Failure,
}

/// One append-only, hash-linked audit record.
///
/// `integrity_hash` is a keyed hash over the entry's canonical fields;
/// `previous_hash` links to the preceding entry in the same chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entry_id: AuditEntryId,
    pub request_id: RequestId,
    #[serde(default)]
    pub session_id: Option<SessionId>,
    pub timestamp: Timestamp,
    pub event_type: AuditEventType,
    pub user_id: UserId,
    pub target: String,
    pub details: serde_json::Value,
    pub result: AuditOutcome,
    pub classification: DataClassification,
    pub retention_until: Timestamp,
    pub integrity_hash: IntegrityHash,
    #[serde(default)]
    pub previous_hash: Option<IntegrityHash>,
}

/// Filter for audit trail queries. All bounds are inclusive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditFilter {
    #[serde(default)]
    pub from: Option<Timestamp>,
    #[serde(default)]
    pub to: Option<Timestamp>,
    #[serde(default)]
    pub event_type: Option<AuditEventType>,
    #[serde(default)]
    pub user_id: Option<UserId>,
}

impl AuditFilter {
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(from) = self.from {
            if entry.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if entry.timestamp > to {
                return false;
            }
        }
        if let Some(event_type) = self.event_type {
            if entry.event_type != event_type {
                return false;
            }
        }
        if let Some(ref user_id) = self.user_id {
            if entry.user_id != *user_id {
                return false;
            }
        }
        true
    }
}

/// Filter for recorded policy changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeFilter {
    #[serde(default)]
    pub from: Option<Timestamp>,
    #[serde(default)]
    pub to: Option<Timestamp>,
    #[serde(default)]
    pub urgency: Option<ChangeUrgency>,
}

impl ChangeFilter {
    pub fn matches(&self, change: &PolicyChange) -> bool {
        if let Some(from) = self.from {
            if change.recorded_at < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if change.recorded_at > to {
                return false;
            }
        }
        if let Some(urgency) = self.urgency {
            if change.metadata.urgency != urgency {
                return false;
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// OperationContext — caller identity attached to every mutating operation
// ---------------------------------------------------------------------------

/// Who is performing a mutating operation, under which request and session,
/// and how sensitive the touched data is. Every audit entry is stamped
/// with this context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationContext {
    pub user_id: UserId,
    pub request_id: RequestId,
    #[serde(default)]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub classification: DataClassification,
}

impl OperationContext {
    pub fn new(user_id: impl Into<UserId>, request_id: impl Into<RequestId>) -> Self {
        Self {
            user_id: user_id.into(),
            request_id: request_id.into(),
            session_id: None,
            classification: DataClassification::default(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<SessionId>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_classification(mut self, classification: DataClassification) -> Self {
        self.classification = classification;
        self
    }
}

// ---------------------------------------------------------------------------
// RollbackPlan — a proposed reversal, pending validation
// ---------------------------------------------------------------------------

/// How the rollback target is addressed. Resolution to a concrete
/// `PolicyVersion` happens per policy id during validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollbackTarget {
    Version(String),
    Timestamp(Timestamp),
    Changeset(ChangeId),
    Tag(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackMetadata {
    pub justification: String,
    pub estimated_duration_secs: u64,
    pub declared_risk: RiskLevel,
    pub approval_required: bool,
    #[serde(default)]
    pub maintenance_window: Option<(Timestamp, Timestamp)>,
}

/// Rollback plan lifecycle. Executed and Aborted are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanState {
    Proposed,
    Validated,
    Blocked,
    Executable,
    Executed,
    Aborted,
}

impl PlanState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PlanState::Executed | PlanState::Aborted)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackPlan {
    pub plan_id: PlanId,
    pub target: RollbackTarget,
    pub scope: Vec<PolicyId>,
    pub metadata: RollbackMetadata,
    pub state: PlanState,
    pub created_at: Timestamp,
}

// ---------------------------------------------------------------------------
// Hex serialization helper for fixed-size byte arrays
// ---------------------------------------------------------------------------

mod hex_bytes {
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom(format!("expected {} bytes", N)))
    }
}

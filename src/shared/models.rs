use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Response envelope type. Serialized as the stable upper-case wire codes
/// the frontend depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseType {
    Answer,
    RunbookResult,
    Proposal,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    KpiCurrent,
    ExplainOee,
    ExplainPlanChange,
    QualitySummary,
    DataIntegrity,
    RunbookRequest,
    Generic,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::KpiCurrent => "kpi_current",
            Intent::ExplainOee => "explain_oee",
            Intent::ExplainPlanChange => "explain_plan_change",
            Intent::QualitySummary => "quality_summary",
            Intent::DataIntegrity => "data_integrity",
            Intent::RunbookRequest => "runbook_request",
            Intent::Generic => "generic",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "kpi_current" => Some(Intent::KpiCurrent),
            "explain_oee" => Some(Intent::ExplainOee),
            "explain_plan_change" => Some(Intent::ExplainPlanChange),
            "quality_summary" => Some(Intent::QualitySummary),
            "data_integrity" => Some(Intent::DataIntegrity),
            "runbook_request" => Some(Intent::RunbookRequest),
            "generic" => Some(Intent::Generic),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Db,
    Rag,
    Event,
    Calculation,
}

impl SourceType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "db" => Some(SourceType::Db),
            "rag" => Some(SourceType::Rag),
            "event" => Some(SourceType::Event),
            "calculation" => Some(SourceType::Calculation),
            _ => None,
        }
    }
}

/// Closed allow-list of action types the copilot may propose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    CreateDecisionPr,
    DryRun,
    OpenEntity,
    RunRunbook,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::CreateDecisionPr => "CREATE_DECISION_PR",
            ActionType::DryRun => "DRY_RUN",
            ActionType::OpenEntity => "OPEN_ENTITY",
            ActionType::RunRunbook => "RUN_RUNBOOK",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CREATE_DECISION_PR" => Some(ActionType::CreateDecisionPr),
            "DRY_RUN" => Some(ActionType::DryRun),
            "OPEN_ENTITY" => Some(ActionType::OpenEntity),
            "RUN_RUNBOOK" => Some(ActionType::RunRunbook),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WarningCode {
    InsufficientEvidence,
    SecurityFlag,
    LowTrustIndex,
    ModelOffline,
    ValidationFailed,
    RateLimited,
}

impl WarningCode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "INSUFFICIENT_EVIDENCE" => Some(WarningCode::InsufficientEvidence),
            "SECURITY_FLAG" => Some(WarningCode::SecurityFlag),
            "LOW_TRUST_INDEX" => Some(WarningCode::LowTrustIndex),
            "MODEL_OFFLINE" => Some(WarningCode::ModelOffline),
            "VALIDATION_FAILED" => Some(WarningCode::ValidationFailed),
            "RATE_LIMITED" => Some(WarningCode::RateLimited),
            _ => None,
        }
    }
}

/// Citation attached to a fact. `ref` identifies the underlying record:
/// a retrieved chunk id (`rag:<uuid>`) or a snapshot marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub source_type: SourceType,
    #[serde(rename = "ref")]
    pub reference: String,
    pub label: String,
    pub confidence: f32,
    pub trust_index: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub text: String,
    pub citations: Vec<Citation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub action_type: ActionType,
    pub label: String,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Warning {
    pub code: WarningCode,
    pub message: String,
}

impl Warning {
    pub fn new(code: WarningCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMeta {
    pub model: String,
    pub tokens: i64,
    pub latency_ms: i64,
    pub validation_passed: bool,
}

impl Default for ResponseMeta {
    fn default() -> Self {
        Self {
            model: String::new(),
            tokens: 0,
            latency_ms: 0,
            validation_passed: false,
        }
    }
}

/// The structured answer returned by every copilot operation.
///
/// For `type` in {ANSWER, PROPOSAL} either `facts` is non-empty with every
/// fact cited, or `warnings` carries INSUFFICIENT_EVIDENCE. The guardrail
/// pipeline enforces this before a response leaves the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopilotResponse {
    pub suggestion_id: Uuid,
    pub correlation_id: Uuid,
    #[serde(rename = "type")]
    pub response_type: ResponseType,
    pub intent: Intent,
    pub summary: String,
    #[serde(default)]
    pub facts: Vec<Fact>,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub warnings: Vec<Warning>,
    pub meta: ResponseMeta,
}

impl CopilotResponse {
    pub fn has_warning(&self, code: WarningCode) -> bool {
        self.warnings.iter().any(|w| w.code == code)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskRequest {
    pub user_query: String,
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default = "default_window_hours")]
    pub context_window_hours: i64,
    #[serde(default = "default_true")]
    pub include_citations: bool,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
}

fn default_window_hours() -> i64 {
    24
}

fn default_true() -> bool {
    true
}

impl AskRequest {
    pub fn new(user_query: impl Into<String>) -> Self {
        Self {
            user_query: user_query.into(),
            entity_type: None,
            entity_id: None,
            context_window_hours: default_window_hours(),
            include_citations: true,
            idempotency_key: None,
            conversation_id: None,
        }
    }
}

/// Request to record an allow-listed action against a past suggestion.
/// Actions remain proposals; nothing is executed by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopilotActionRequest {
    pub action_type: ActionType,
    pub suggestion_id: Uuid,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedbackSeverity {
    Critical,
    Warn,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackBullet {
    pub severity: FeedbackSeverity,
    pub title: String,
    pub text: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyFeedback {
    pub date: NaiveDate,
    pub bullets: Vec<FeedbackBullet>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightItem {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<FeedbackSeverity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub title: String,
    pub text: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insights {
    pub date: NaiveDate,
    pub now: Vec<InsightItem>,
    pub next: Vec<InsightItem>,
    pub meta: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitInfo {
    pub per_hour: u32,
    pub per_day: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub ollama: String,
    pub embeddings_model: String,
    pub rate_limit: RateLimitInfo,
}

/// Deterministic improvement recommendation derived from snapshot analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub priority: i32,
    pub category: String,
    pub title: String,
    pub description: String,
    pub impact_metric: String,
    pub impact_value: f32,
    #[serde(default)]
    pub affected_phases: Vec<String>,
    #[serde(default)]
    pub suggested_actions: Vec<String>,
}

/// Audit record written unconditionally for every answered request.
#[derive(Debug, Clone)]
pub struct SuggestionAudit {
    pub suggestion_id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub correlation_id: Uuid,
    pub user_query: String,
    pub intent: Intent,
    pub prompt_rendered: String,
    pub prompt_hash: String,
    pub llm_raw_response: String,
    pub llm_response_hash: String,
    pub response: CopilotResponse,
    pub validation_passed: bool,
    pub latency_ms: i64,
    pub model: String,
    pub tokens: Option<i64>,
    pub idempotency_key: Option<String>,
}

pub mod schema {
    diesel::table! {
        copilot_rag_chunks (id) {
            id -> Uuid,
            tenant_id -> Uuid,
            source_ref -> Text,
            ordinal -> Int4,
            chunk_text -> Text,
            embedding -> Jsonb,
            tags -> Nullable<Jsonb>,
            created_at -> Timestamptz,
        }
    }

    diesel::table! {
        copilot_conversations (id) {
            id -> Uuid,
            tenant_id -> Uuid,
            user_id -> Uuid,
            title -> Text,
            is_archived -> Bool,
            last_message_at -> Nullable<Timestamptz>,
            created_at -> Timestamptz,
        }
    }

    diesel::table! {
        copilot_messages (id) {
            id -> Uuid,
            conversation_id -> Uuid,
            tenant_id -> Uuid,
            actor_role -> Text,
            content_text -> Text,
            content_structured -> Nullable<Jsonb>,
            correlation_id -> Nullable<Uuid>,
            created_at -> Timestamptz,
        }
    }

    diesel::table! {
        copilot_suggestions (id) {
            id -> Uuid,
            tenant_id -> Uuid,
            user_id -> Uuid,
            correlation_id -> Uuid,
            user_query -> Text,
            intent -> Text,
            prompt_rendered -> Text,
            prompt_hash -> Text,
            llm_raw_response -> Text,
            llm_response_hash -> Text,
            response_json -> Jsonb,
            validation_passed -> Bool,
            latency_ms -> Int4,
            model -> Text,
            tokens -> Nullable<Int4>,
            idempotency_key -> Nullable<Text>,
            created_at -> Timestamptz,
        }
    }

    diesel::table! {
        copilot_daily_feedback (id) {
            id -> Uuid,
            tenant_id -> Uuid,
            feedback_date -> Date,
            feedback_json -> Jsonb,
            generated_at -> Timestamptz,
            expires_at -> Timestamptz,
        }
    }

    diesel::table! {
        copilot_action_records (id) {
            id -> Uuid,
            tenant_id -> Uuid,
            user_id -> Uuid,
            suggestion_id -> Uuid,
            action_type -> Text,
            payload -> Jsonb,
            status -> Text,
            approved_by -> Nullable<Uuid>,
            approved_at -> Nullable<Timestamptz>,
            created_at -> Timestamptz,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable, Selectable)]
#[diesel(table_name = schema::copilot_rag_chunks)]
pub struct ChunkRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub source_ref: String,
    pub ordinal: i32,
    pub chunk_text: String,
    pub embedding: serde_json::Value,
    pub tags: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable, Selectable)]
#[diesel(table_name = schema::copilot_conversations)]
pub struct ConversationRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub is_archived: bool,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable, Selectable)]
#[diesel(table_name = schema::copilot_messages)]
pub struct MessageRow {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub tenant_id: Uuid,
    pub actor_role: String,
    pub content_text: String,
    pub content_structured: Option<serde_json::Value>,
    pub correlation_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable, Selectable)]
#[diesel(table_name = schema::copilot_suggestions)]
pub struct SuggestionRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub correlation_id: Uuid,
    pub user_query: String,
    pub intent: String,
    pub prompt_rendered: String,
    pub prompt_hash: String,
    pub llm_raw_response: String,
    pub llm_response_hash: String,
    pub response_json: serde_json::Value,
    pub validation_passed: bool,
    pub latency_ms: i32,
    pub model: String,
    pub tokens: Option<i32>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable, Selectable)]
#[diesel(table_name = schema::copilot_daily_feedback)]
pub struct DailyFeedbackRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub feedback_date: NaiveDate,
    pub feedback_json: serde_json::Value,
    pub generated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// A proposed action persisted against an audited suggestion. Stays PENDING
/// until an external approver resolves it; the core never executes it.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable, Selectable)]
#[diesel(table_name = schema::copilot_action_records)]
pub struct ActionRecordRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub suggestion_id: Uuid,
    pub action_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

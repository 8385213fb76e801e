use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use diesel::prelude::*;
use log::warn;
use serde_json::json;
use uuid::Uuid;

use crate::shared::context::RequestContext;
use crate::shared::models::schema::{
    copilot_action_records, copilot_conversations, copilot_daily_feedback, copilot_messages,
    copilot_suggestions,
};
use crate::shared::models::{
    ActionRecordRow, ActionType, ConversationRow, CopilotResponse, DailyFeedback, DailyFeedbackRow,
    MessageRow, SuggestionAudit, SuggestionRow,
};
use crate::shared::utils::DbPool;

pub const ROLE_USER: &str = "user";
pub const ROLE_COPILOT: &str = "copilot";

/// Action records await external approval in this state.
pub const ACTION_STATUS_PENDING: &str = "PENDING";

/// How long a repeated idempotency key returns the stored response.
const IDEMPOTENCY_WINDOW_HOURS: i64 = 24;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Also returned for rows that exist under another tenant; existence is
    /// never leaked across tenants.
    #[error("not found")]
    NotFound,
    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<diesel::result::Error> for StoreError {
    fn from(error: diesel::result::Error) -> Self {
        match error {
            diesel::result::Error::NotFound => StoreError::NotFound,
            other => StoreError::Backend(other.to_string()),
        }
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(error: r2d2::Error) -> Self {
        StoreError::Backend(error.to_string())
    }
}

/// Conversations, messages and the suggestion audit trail, all scoped by
/// the caller's tenant on every operation.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_conversation(
        &self,
        ctx: &RequestContext,
        title: &str,
    ) -> Result<ConversationRow, StoreError>;

    /// Idempotent create-or-return for callers that want a conversation on
    /// first turn. Matches on (tenant, user, title), ignoring archived ones.
    async fn ensure_conversation(
        &self,
        ctx: &RequestContext,
        title: &str,
    ) -> Result<ConversationRow, StoreError>;

    async fn list_conversations(
        &self,
        ctx: &RequestContext,
        limit: i64,
        offset: i64,
        include_archived: bool,
    ) -> Result<Vec<ConversationRow>, StoreError>;

    async fn list_messages(
        &self,
        ctx: &RequestContext,
        conversation_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<MessageRow>, StoreError>;

    /// Atomic write of the user turn and the copilot turn, bumping the
    /// conversation's last-message-at. The copilot row references the
    /// response's suggestion audit through its structured content.
    async fn append_turn(
        &self,
        ctx: &RequestContext,
        conversation_id: Uuid,
        user_text: &str,
        response: &CopilotResponse,
    ) -> Result<(), StoreError>;

    async fn rename(
        &self,
        ctx: &RequestContext,
        conversation_id: Uuid,
        title: &str,
    ) -> Result<(), StoreError>;

    async fn archive(&self, ctx: &RequestContext, conversation_id: Uuid)
        -> Result<(), StoreError>;

    async fn record_suggestion(
        &self,
        ctx: &RequestContext,
        audit: &SuggestionAudit,
    ) -> Result<(), StoreError>;

    async fn get_suggestion(
        &self,
        ctx: &RequestContext,
        suggestion_id: Uuid,
    ) -> Result<CopilotResponse, StoreError>;

    async fn find_by_idempotency(
        &self,
        ctx: &RequestContext,
        key: &str,
    ) -> Result<Option<CopilotResponse>, StoreError>;

    /// Persist a proposed action against an audited suggestion as a PENDING
    /// record for external approval. The suggestion must belong to the
    /// caller's tenant.
    async fn record_action(
        &self,
        ctx: &RequestContext,
        suggestion_id: Uuid,
        action_type: ActionType,
        payload: serde_json::Value,
    ) -> Result<ActionRecordRow, StoreError>;

    async fn daily_feedback_cached(
        &self,
        ctx: &RequestContext,
        date: NaiveDate,
    ) -> Result<Option<DailyFeedback>, StoreError>;

    async fn cache_daily_feedback(
        &self,
        ctx: &RequestContext,
        feedback: &DailyFeedback,
    ) -> Result<(), StoreError>;
}

/// Postgres-backed store. Writes are single- or two-row transactions; the
/// per-conversation transaction serializes concurrent appends so message
/// order reflects acceptance order.
pub struct PgConversationStore {
    pool: DbPool,
}

impl PgConversationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conversation_for_tenant(
        conn: &mut PgConnection,
        tenant_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<ConversationRow, StoreError> {
        copilot_conversations::table
            .filter(copilot_conversations::id.eq(conversation_id))
            .filter(copilot_conversations::tenant_id.eq(tenant_id))
            .first::<ConversationRow>(conn)
            .map_err(StoreError::from)
    }
}

#[async_trait]
impl ConversationStore for PgConversationStore {
    async fn create_conversation(
        &self,
        ctx: &RequestContext,
        title: &str,
    ) -> Result<ConversationRow, StoreError> {
        let mut conn = self.pool.get()?;
        let row = ConversationRow {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id,
            user_id: ctx.user_id,
            title: title.to_string(),
            is_archived: false,
            last_message_at: None,
            created_at: Utc::now(),
        };
        diesel::insert_into(copilot_conversations::table)
            .values(&row)
            .execute(&mut conn)?;
        Ok(row)
    }

    async fn ensure_conversation(
        &self,
        ctx: &RequestContext,
        title: &str,
    ) -> Result<ConversationRow, StoreError> {
        let mut conn = self.pool.get()?;
        let existing = copilot_conversations::table
            .filter(copilot_conversations::tenant_id.eq(ctx.tenant_id))
            .filter(copilot_conversations::user_id.eq(ctx.user_id))
            .filter(copilot_conversations::title.eq(title))
            .filter(copilot_conversations::is_archived.eq(false))
            .order(copilot_conversations::created_at.desc())
            .first::<ConversationRow>(&mut conn)
            .optional()?;
        if let Some(row) = existing {
            return Ok(row);
        }
        drop(conn);
        self.create_conversation(ctx, title).await
    }

    async fn list_conversations(
        &self,
        ctx: &RequestContext,
        limit: i64,
        offset: i64,
        include_archived: bool,
    ) -> Result<Vec<ConversationRow>, StoreError> {
        let mut conn = self.pool.get()?;
        let mut query = copilot_conversations::table
            .filter(copilot_conversations::tenant_id.eq(ctx.tenant_id))
            .filter(copilot_conversations::user_id.eq(ctx.user_id))
            .into_boxed();
        if !include_archived {
            query = query.filter(copilot_conversations::is_archived.eq(false));
        }
        let rows = query
            .order((
                copilot_conversations::last_message_at.desc().nulls_last(),
                copilot_conversations::created_at.desc(),
            ))
            .limit(limit.clamp(1, 200))
            .offset(offset.max(0))
            .load::<ConversationRow>(&mut conn)?;
        Ok(rows)
    }

    async fn list_messages(
        &self,
        ctx: &RequestContext,
        conversation_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<MessageRow>, StoreError> {
        let mut conn = self.pool.get()?;
        Self::conversation_for_tenant(&mut conn, ctx.tenant_id, conversation_id)?;
        let rows = copilot_messages::table
            .filter(copilot_messages::conversation_id.eq(conversation_id))
            .filter(copilot_messages::tenant_id.eq(ctx.tenant_id))
            .order(copilot_messages::created_at.asc())
            .limit(limit.clamp(1, 500))
            .offset(offset.max(0))
            .load::<MessageRow>(&mut conn)?;
        Ok(rows)
    }

    async fn append_turn(
        &self,
        ctx: &RequestContext,
        conversation_id: Uuid,
        user_text: &str,
        response: &CopilotResponse,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.get()?;
        let tenant_id = ctx.tenant_id;
        let correlation_id = ctx.correlation_id;

        conn.transaction::<_, StoreError, _>(|conn| {
            Self::conversation_for_tenant(conn, tenant_id, conversation_id)?;

            let user_at = Utc::now();
            let copilot_at = user_at + Duration::microseconds(1);

            let user_row = MessageRow {
                id: Uuid::new_v4(),
                conversation_id,
                tenant_id,
                actor_role: ROLE_USER.to_string(),
                content_text: user_text.to_string(),
                content_structured: None,
                correlation_id: Some(correlation_id),
                created_at: user_at,
            };
            let copilot_row = MessageRow {
                id: Uuid::new_v4(),
                conversation_id,
                tenant_id,
                actor_role: ROLE_COPILOT.to_string(),
                content_text: response.summary.clone(),
                content_structured: serde_json::to_value(response).ok(),
                correlation_id: Some(correlation_id),
                created_at: copilot_at,
            };

            diesel::insert_into(copilot_messages::table)
                .values(&vec![user_row, copilot_row])
                .execute(conn)?;

            diesel::update(
                copilot_conversations::table
                    .filter(copilot_conversations::id.eq(conversation_id))
                    .filter(copilot_conversations::tenant_id.eq(tenant_id)),
            )
            .set(copilot_conversations::last_message_at.eq(Some(copilot_at)))
            .execute(conn)?;

            Ok(())
        })
    }

    async fn rename(
        &self,
        ctx: &RequestContext,
        conversation_id: Uuid,
        title: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.get()?;
        let updated = diesel::update(
            copilot_conversations::table
                .filter(copilot_conversations::id.eq(conversation_id))
                .filter(copilot_conversations::tenant_id.eq(ctx.tenant_id)),
        )
        .set(copilot_conversations::title.eq(title))
        .execute(&mut conn)?;
        if updated == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn archive(
        &self,
        ctx: &RequestContext,
        conversation_id: Uuid,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.get()?;
        let updated = diesel::update(
            copilot_conversations::table
                .filter(copilot_conversations::id.eq(conversation_id))
                .filter(copilot_conversations::tenant_id.eq(ctx.tenant_id)),
        )
        .set(copilot_conversations::is_archived.eq(true))
        .execute(&mut conn)?;
        if updated == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn record_suggestion(
        &self,
        ctx: &RequestContext,
        audit: &SuggestionAudit,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.get()?;
        let row = SuggestionRow {
            id: audit.suggestion_id,
            tenant_id: ctx.tenant_id,
            user_id: ctx.user_id,
            correlation_id: audit.correlation_id,
            user_query: audit.user_query.clone(),
            intent: audit.intent.as_str().to_string(),
            prompt_rendered: audit.prompt_rendered.clone(),
            prompt_hash: audit.prompt_hash.clone(),
            llm_raw_response: audit.llm_raw_response.clone(),
            llm_response_hash: audit.llm_response_hash.clone(),
            response_json: serde_json::to_value(&audit.response)
                .unwrap_or_else(|_| json!({})),
            validation_passed: audit.validation_passed,
            latency_ms: audit.latency_ms.min(i32::MAX as i64) as i32,
            model: audit.model.clone(),
            tokens: audit.tokens.map(|t| t.min(i32::MAX as i64) as i32),
            idempotency_key: audit.idempotency_key.clone(),
            created_at: Utc::now(),
        };
        diesel::insert_into(copilot_suggestions::table)
            .values(&row)
            .execute(&mut conn)?;
        Ok(())
    }

    async fn get_suggestion(
        &self,
        ctx: &RequestContext,
        suggestion_id: Uuid,
    ) -> Result<CopilotResponse, StoreError> {
        let mut conn = self.pool.get()?;
        let row = copilot_suggestions::table
            .filter(copilot_suggestions::id.eq(suggestion_id))
            .filter(copilot_suggestions::tenant_id.eq(ctx.tenant_id))
            .first::<SuggestionRow>(&mut conn)?;
        serde_json::from_value(row.response_json)
            .map_err(|e| StoreError::Backend(format!("stored response unreadable: {}", e)))
    }

    async fn find_by_idempotency(
        &self,
        ctx: &RequestContext,
        key: &str,
    ) -> Result<Option<CopilotResponse>, StoreError> {
        let mut conn = self.pool.get()?;
        let cutoff = Utc::now() - Duration::hours(IDEMPOTENCY_WINDOW_HOURS);
        let row = copilot_suggestions::table
            .filter(copilot_suggestions::tenant_id.eq(ctx.tenant_id))
            .filter(copilot_suggestions::user_id.eq(ctx.user_id))
            .filter(copilot_suggestions::idempotency_key.eq(key))
            .filter(copilot_suggestions::created_at.gt(cutoff))
            .order(copilot_suggestions::created_at.desc())
            .first::<SuggestionRow>(&mut conn)
            .optional()?;

        match row {
            Some(row) => match serde_json::from_value(row.response_json) {
                Ok(response) => Ok(Some(response)),
                Err(e) => {
                    warn!("Stored idempotent response unreadable: {}", e);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn record_action(
        &self,
        ctx: &RequestContext,
        suggestion_id: Uuid,
        action_type: ActionType,
        payload: serde_json::Value,
    ) -> Result<ActionRecordRow, StoreError> {
        let mut conn = self.pool.get()?;
        copilot_suggestions::table
            .filter(copilot_suggestions::id.eq(suggestion_id))
            .filter(copilot_suggestions::tenant_id.eq(ctx.tenant_id))
            .select(copilot_suggestions::id)
            .first::<Uuid>(&mut conn)?;

        let row = ActionRecordRow {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id,
            user_id: ctx.user_id,
            suggestion_id,
            action_type: action_type.as_str().to_string(),
            payload,
            status: ACTION_STATUS_PENDING.to_string(),
            approved_by: None,
            approved_at: None,
            created_at: Utc::now(),
        };
        diesel::insert_into(copilot_action_records::table)
            .values(&row)
            .execute(&mut conn)?;
        Ok(row)
    }

    async fn daily_feedback_cached(
        &self,
        ctx: &RequestContext,
        date: NaiveDate,
    ) -> Result<Option<DailyFeedback>, StoreError> {
        let mut conn = self.pool.get()?;
        let row = copilot_daily_feedback::table
            .filter(copilot_daily_feedback::tenant_id.eq(ctx.tenant_id))
            .filter(copilot_daily_feedback::feedback_date.eq(date))
            .filter(copilot_daily_feedback::expires_at.gt(Utc::now()))
            .first::<DailyFeedbackRow>(&mut conn)
            .optional()?;

        Ok(row.and_then(|row| serde_json::from_value(row.feedback_json).ok()))
    }

    async fn cache_daily_feedback(
        &self,
        ctx: &RequestContext,
        feedback: &DailyFeedback,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.get()?;
        let tenant_id = ctx.tenant_id;
        let row = DailyFeedbackRow {
            id: Uuid::new_v4(),
            tenant_id,
            feedback_date: feedback.date,
            feedback_json: serde_json::to_value(feedback).unwrap_or_else(|_| json!({})),
            generated_at: feedback.generated_at,
            expires_at: Utc::now() + Duration::hours(24),
        };
        conn.transaction::<_, StoreError, _>(|conn| {
            diesel::delete(
                copilot_daily_feedback::table
                    .filter(copilot_daily_feedback::tenant_id.eq(tenant_id))
                    .filter(copilot_daily_feedback::feedback_date.eq(feedback.date)),
            )
            .execute(conn)?;
            diesel::insert_into(copilot_daily_feedback::table)
                .values(&row)
                .execute(conn)?;
            Ok(())
        })
    }
}

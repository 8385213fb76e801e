use chrono::{NaiveDate, Utc};
use log::{info, warn};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

use crate::config::CopilotConfig;
use crate::context::{ContextBuilder, OperationalSnapshot};
use crate::conversation::{ConversationStore, StoreError};
use crate::fastpath;
use crate::guardrails::{self, redaction, GroundingSet, ModelOutput};
use crate::intent;
use crate::llm::{ModelGateway, ModelHealth, ModelOptions};
use crate::normalizer;
use crate::prompt::{self, RenderedPrompt};
use crate::rate_limit::{BudgetGuard, RateLimiter};
use crate::retrieval::{RetrievalStore, RetrievedChunk};
use crate::shared::context::RequestContext;
use crate::shared::models::{
    ActionRecordRow, AskRequest, CopilotActionRequest, CopilotResponse, DailyFeedback,
    FeedbackBullet, FeedbackSeverity, HealthStatus, InsightItem, Insights, Intent, RateLimitInfo,
    Recommendation, ResponseType, SuggestionAudit, Warning, WarningCode,
};
use crate::shared::utils::{estimate_token_count, sha256_hex};

const MAX_QUERY_CHARS: usize = 2000;

const VALIDATION_FAILED_SUMMARY: &str =
    "I couldn't validate my own answer, please rephrase the question.";
const MODEL_OFFLINE_SUMMARY: &str =
    "The answering model is unavailable right now, please try again shortly.";
const SECURITY_SUMMARY: &str = "This question was blocked by the safety filter.";

/// Top-level `process_ask` pipeline:
/// RECEIVE -> RATE_CHECK -> INTENT -> SNAPSHOT -> (FAST_RESOLVE |
/// RETRIEVE -> RENDER -> GENERATE) -> VALIDATE -> NORMALIZE -> PERSIST.
/// Every failure kind collapses into a well-formed ERROR response; raw
/// errors never reach the caller.
pub struct CopilotService {
    config: CopilotConfig,
    gateway: Arc<dyn ModelGateway>,
    retrieval: Arc<RetrievalStore>,
    context: ContextBuilder,
    store: Arc<dyn ConversationStore>,
    limiter: RateLimiter,
}

struct PipelineResult {
    response: CopilotResponse,
    intent: Intent,
    prompt: String,
    raw_reply: String,
}

impl CopilotService {
    pub fn new(
        config: CopilotConfig,
        gateway: Arc<dyn ModelGateway>,
        retrieval: Arc<RetrievalStore>,
        context: ContextBuilder,
        store: Arc<dyn ConversationStore>,
        limiter: RateLimiter,
    ) -> Self {
        Self {
            config,
            gateway,
            retrieval,
            context,
            store,
            limiter,
        }
    }

    pub async fn process_ask(
        &self,
        ctx: &RequestContext,
        request: &AskRequest,
    ) -> CopilotResponse {
        let guard = BudgetGuard::new(self.config.wall_clock_budget_ms);

        // replays return the stored response verbatim and skip quota
        if let Some(key) = &request.idempotency_key {
            match self.store.find_by_idempotency(ctx, key).await {
                Ok(Some(stored)) => {
                    info!(
                        "Idempotent replay for key {} (suggestion {})",
                        key, stored.suggestion_id
                    );
                    return stored;
                }
                Ok(None) => {}
                Err(e) => warn!("Idempotency lookup failed: {}", e),
            }
        }

        let result = self.run_pipeline(ctx, request, &guard).await;
        self.persist(ctx, request, &result).await;

        result.response
    }

    async fn run_pipeline(
        &self,
        ctx: &RequestContext,
        request: &AskRequest,
        guard: &BudgetGuard,
    ) -> PipelineResult {
        let query_chars = request.user_query.chars().count();
        if query_chars == 0 || query_chars > MAX_QUERY_CHARS {
            return self.error_result(
                ctx,
                Intent::Generic,
                WarningCode::ValidationFailed,
                "Your question must be between 1 and 2000 characters.",
                guard,
            );
        }

        let decision = self.limiter.check(ctx.tenant_id, ctx.user_id).await;
        if !decision.allowed {
            let message = match decision.retry_after_secs {
                Some(secs) => format!(
                    "You have reached the question limit. Try again in {} seconds.",
                    secs
                ),
                None => "You have reached the question limit.".to_string(),
            };
            return self.error_result(
                ctx,
                Intent::Generic,
                WarningCode::RateLimited,
                &message,
                guard,
            );
        }

        if guardrails::check_security_flag(&request.user_query) {
            return self.error_result(
                ctx,
                Intent::Generic,
                WarningCode::SecurityFlag,
                SECURITY_SUMMARY,
                guard,
            );
        }

        let intent_started = Instant::now();
        let routed = intent::classify(&request.user_query);
        let intent_ms = intent_started.elapsed().as_millis();

        let entity_hint = match (&request.entity_type, &request.entity_id) {
            (Some(entity_type), Some(entity_id)) => {
                Some((entity_type.as_str(), entity_id.as_str()))
            }
            _ => None,
        };

        let snapshot_started = Instant::now();
        let snapshot = self
            .context
            .build(ctx.tenant_id, request.context_window_hours, entity_hint)
            .await;
        let snapshot_ms = snapshot_started.elapsed().as_millis();

        if routed.fast_path && self.config.fast_path_enabled {
            let resolution = fastpath::resolve(&request.user_query, &snapshot);
            let response = normalizer::finalize(
                ctx.correlation_id,
                ResponseType::Answer,
                routed.intent,
                resolution.summary,
                resolution.facts,
                Vec::new(),
                resolution.warnings,
                "fast_path",
                0,
                guard.elapsed_ms(),
            );
            info!(
                "Fast path answered in {}ms (intent {}ms, snapshot {}ms)",
                guard.elapsed_ms(),
                intent_ms,
                snapshot_ms
            );
            return PipelineResult {
                response,
                intent: routed.intent,
                prompt: String::new(),
                raw_reply: String::new(),
            };
        }

        let retrieval_started = Instant::now();
        let chunks = self.retrieve(ctx, request, routed.budget.top_k_chunks()).await;
        let retrieval_ms = retrieval_started.elapsed().as_millis();

        let render_started = Instant::now();
        let rendered = prompt::render(
            &request.user_query,
            routed.intent,
            routed.budget,
            &snapshot,
            &chunks,
        );
        let render_ms = render_started.elapsed().as_millis();
        let grounding = GroundingSet::new(&rendered.chunk_refs, &rendered.marker_refs);

        let llm_started = Instant::now();
        let generated = self
            .generate_validated(ctx, guard, routed.intent, &rendered, &grounding)
            .await;
        let llm_ms = llm_started.elapsed().as_millis();

        let (outcome, raw_reply, tokens) = match generated {
            Ok(parts) => parts,
            Err(result) => return *result,
        };

        if outcome.security_blocked {
            let mut result = self.error_result(
                ctx,
                routed.intent,
                WarningCode::SecurityFlag,
                SECURITY_SUMMARY,
                guard,
            );
            result.prompt = rendered.text;
            result.raw_reply = raw_reply;
            return result;
        }

        let mut response = normalizer::finalize(
            ctx.correlation_id,
            outcome.response_type,
            routed.intent,
            outcome.summary,
            outcome.facts,
            outcome.actions,
            outcome.warnings,
            self.gateway.model_name(),
            tokens,
            guard.elapsed_ms(),
        );

        if self.config.redact_employee_names {
            redaction::redact_response(&mut response, &snapshot.employee_names());
        }

        info!(
            "Copilot answered. Correlation {}. Intent {}. Total {}ms \
             (intent={}ms snapshot={}ms retrieval={}ms render={}ms llm={}ms, \
             prompt {} bytes ~{} tokens)",
            ctx.correlation_id,
            routed.intent.as_str(),
            guard.elapsed_ms(),
            intent_ms,
            snapshot_ms,
            retrieval_ms,
            render_ms,
            llm_ms,
            rendered.text.len(),
            estimate_token_count(&rendered.text)
        );

        PipelineResult {
            response,
            intent: routed.intent,
            prompt: rendered.text,
            raw_reply,
        }
    }

    async fn retrieve(
        &self,
        ctx: &RequestContext,
        request: &AskRequest,
        top_k: usize,
    ) -> Vec<RetrievedChunk> {
        if !request.include_citations {
            return Vec::new();
        }
        match self
            .retrieval
            .search(ctx.tenant_id, &request.user_query, top_k)
            .await
        {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!("Retrieval degraded, continuing without RAG: {}", e);
                Vec::new()
            }
        }
    }

    /// Generate, parse, and if the first reply is not valid JSON run one
    /// repair pass. The second failure is final.
    async fn generate_validated(
        &self,
        ctx: &RequestContext,
        guard: &BudgetGuard,
        intent: Intent,
        rendered: &RenderedPrompt,
        grounding: &GroundingSet,
    ) -> Result<(guardrails::ValidationOutcome, String, i64), Box<PipelineResult>> {
        let (raw, tokens) = self
            .call_model(ctx, guard, intent, &rendered.text)
            .await
            .map_err(Box::new)?;

        match guardrails::parse_reply(&raw) {
            ModelOutput::Parsed(value) => {
                let outcome =
                    guardrails::validate(&value, grounding, self.config.low_trust_threshold);
                Ok((outcome, raw, tokens))
            }
            ModelOutput::Malformed { error, .. } => {
                warn!(
                    "Model reply unparseable ({}), running repair pass. Correlation {}",
                    error, ctx.correlation_id
                );
                let repair_prompt = format!("{}{}", rendered.text, prompt::REPAIR_INSTRUCTION);
                let (raw, tokens) = self
                    .call_model(ctx, guard, intent, &repair_prompt)
                    .await
                    .map_err(Box::new)?;

                match guardrails::parse_reply(&raw) {
                    ModelOutput::Parsed(value) => {
                        let outcome = guardrails::validate(
                            &value,
                            grounding,
                            self.config.low_trust_threshold,
                        );
                        Ok((outcome, raw, tokens))
                    }
                    ModelOutput::Malformed { error, .. } => {
                        warn!(
                            "Repair pass still unparseable ({}). Correlation {}",
                            error, ctx.correlation_id
                        );
                        Err(Box::new(self.error_result(
                            ctx,
                            intent,
                            WarningCode::ValidationFailed,
                            VALIDATION_FAILED_SUMMARY,
                            guard,
                        )))
                    }
                }
            }
        }
    }

    /// One model call under the remaining wall-clock budget. On timeout the
    /// future is dropped, which aborts the outbound request.
    async fn call_model(
        &self,
        ctx: &RequestContext,
        guard: &BudgetGuard,
        intent: Intent,
        prompt_text: &str,
    ) -> Result<(String, i64), PipelineResult> {
        let remaining = guard.remaining();
        if remaining.is_zero() {
            return Err(self.error_result(
                ctx,
                intent,
                WarningCode::ModelOffline,
                MODEL_OFFLINE_SUMMARY,
                guard,
            ));
        }

        let options = ModelOptions {
            timeout: std::cmp::min(
                std::time::Duration::from_secs(self.config.model_timeout_seconds),
                remaining,
            ),
            ..ModelOptions::default()
        };

        match tokio::time::timeout(remaining, self.gateway.generate(prompt_text, &options)).await
        {
            Ok(Ok(reply)) => Ok((reply.text, reply.eval_count)),
            Ok(Err(e)) => {
                warn!("Model call failed: {}. Correlation {}", e, ctx.correlation_id);
                Err(self.error_result(
                    ctx,
                    intent,
                    WarningCode::ModelOffline,
                    MODEL_OFFLINE_SUMMARY,
                    guard,
                ))
            }
            Err(_) => {
                warn!(
                    "Wall-clock budget exceeded, in-flight model call cancelled. Correlation {}",
                    ctx.correlation_id
                );
                Err(self.error_result(
                    ctx,
                    intent,
                    WarningCode::ModelOffline,
                    MODEL_OFFLINE_SUMMARY,
                    guard,
                ))
            }
        }
    }

    fn error_result(
        &self,
        ctx: &RequestContext,
        intent: Intent,
        code: WarningCode,
        message: &str,
        guard: &BudgetGuard,
    ) -> PipelineResult {
        let response = normalizer::finalize(
            ctx.correlation_id,
            ResponseType::Error,
            intent,
            message.to_string(),
            Vec::new(),
            Vec::new(),
            vec![Warning::new(code, message)],
            self.gateway.model_name(),
            0,
            guard.elapsed_ms(),
        );
        PipelineResult {
            response,
            intent,
            prompt: String::new(),
            raw_reply: String::new(),
        }
    }

    /// Best-effort persistence: the audit row always, the conversation turn
    /// when the request names one. Failures are logged and never change the
    /// response already produced.
    async fn persist(&self, ctx: &RequestContext, request: &AskRequest, result: &PipelineResult) {
        let audit = SuggestionAudit {
            suggestion_id: result.response.suggestion_id,
            tenant_id: ctx.tenant_id,
            user_id: ctx.user_id,
            correlation_id: ctx.correlation_id,
            user_query: request.user_query.clone(),
            intent: result.intent,
            prompt_rendered: result.prompt.clone(),
            prompt_hash: sha256_hex(&result.prompt),
            llm_raw_response: result.raw_reply.clone(),
            llm_response_hash: sha256_hex(&result.raw_reply),
            response: result.response.clone(),
            validation_passed: result.response.meta.validation_passed,
            latency_ms: result.response.meta.latency_ms,
            model: result.response.meta.model.clone(),
            tokens: Some(result.response.meta.tokens),
            idempotency_key: request.idempotency_key.clone(),
        };

        if let Err(e) = self.store.record_suggestion(ctx, &audit).await {
            warn!(
                "Suggestion audit write failed (response still returned): {}. Correlation {}",
                e, ctx.correlation_id
            );
        }

        if let Some(conversation_id) = request.conversation_id {
            if let Err(e) = self
                .store
                .append_turn(ctx, conversation_id, &request.user_query, &result.response)
                .await
            {
                warn!(
                    "Conversation turn write failed (response still returned): {}. Correlation {}",
                    e, ctx.correlation_id
                );
            }
        }
    }

    /// Manual circuit-breaker reset for the health surface.
    pub fn reset_model_breaker(&self) {
        self.gateway.reset_breaker();
    }

    pub async fn health(&self) -> HealthStatus {
        let model_health = self.gateway.health().await;
        let status = match model_health {
            ModelHealth::Online => "healthy",
            ModelHealth::Degraded => "degraded",
            ModelHealth::Offline => "unhealthy",
        };
        HealthStatus {
            status: status.to_string(),
            ollama: model_health.as_str().to_string(),
            embeddings_model: self.config.embedding_model.clone(),
            rate_limit: RateLimitInfo {
                per_hour: self.limiter.per_hour(),
                per_day: self.limiter.per_day(),
            },
        }
    }

    pub async fn get_suggestion(
        &self,
        ctx: &RequestContext,
        suggestion_id: uuid::Uuid,
    ) -> Result<CopilotResponse, StoreError> {
        self.store.get_suggestion(ctx, suggestion_id).await
    }

    /// Record an allow-listed action against a past suggestion as a PENDING
    /// action record. Nothing is executed; the record is what an external
    /// approver acts on.
    pub async fn record_action(
        &self,
        ctx: &RequestContext,
        request: &CopilotActionRequest,
    ) -> Result<ActionRecordRow, StoreError> {
        let record = self
            .store
            .record_action(
                ctx,
                request.suggestion_id,
                request.action_type,
                request.payload.clone(),
            )
            .await?;
        info!(
            "Action {:?} recorded as {} for suggestion {} (tenant {})",
            request.action_type, record.id, request.suggestion_id, ctx.tenant_id
        );
        Ok(record)
    }

    /// Daily operational feedback: a pre-canned question through the normal
    /// pipeline, mapped to severity bullets and cached per (tenant, date).
    pub async fn daily_feedback(
        &self,
        ctx: &RequestContext,
        date: Option<NaiveDate>,
    ) -> DailyFeedback {
        let date = date.unwrap_or_else(|| Utc::now().date_naive());

        match self.store.daily_feedback_cached(ctx, date).await {
            Ok(Some(cached)) => return cached,
            Ok(None) => {}
            Err(e) => warn!("Daily feedback cache read failed: {}", e),
        }

        let request = AskRequest::new(
            "Summarize today's operational status: KPIs, anomalies and risks.",
        );
        let response = self.process_ask(ctx, &request).await;

        let mut bullets: Vec<FeedbackBullet> = Vec::new();
        for fact in &response.facts {
            bullets.push(FeedbackBullet {
                severity: classify_severity(&fact.text),
                title: fact
                    .citations
                    .first()
                    .map(|c| c.label.clone())
                    .unwrap_or_else(|| "Operational note".to_string()),
                text: fact.text.clone(),
                citations: fact.citations.clone(),
            });
        }
        if bullets.is_empty() {
            bullets.push(FeedbackBullet {
                severity: FeedbackSeverity::Info,
                title: "Daily analysis".to_string(),
                text: response.summary.clone(),
                citations: Vec::new(),
            });
        }
        bullets.sort_by_key(|b| b.severity);

        let feedback = DailyFeedback {
            date,
            bullets,
            generated_at: Utc::now(),
        };

        if let Err(e) = self.store.cache_daily_feedback(ctx, &feedback).await {
            warn!("Daily feedback cache write failed: {}", e);
        }

        feedback
    }

    /// Aggregated dashboard view: "now" from the daily feedback, "next"
    /// from the deterministic recommendations.
    pub async fn insights(&self, ctx: &RequestContext, date: Option<NaiveDate>) -> Insights {
        let feedback = self.daily_feedback(ctx, date).await;

        let mut now: Vec<InsightItem> = Vec::new();
        for bullet in &feedback.bullets {
            let duplicate = now
                .iter()
                .any(|item| item.title == bullet.title && item.text == bullet.text);
            if duplicate {
                continue;
            }
            now.push(InsightItem {
                id: format!("alert-{}", now.len() + 1),
                severity: Some(bullet.severity),
                priority: None,
                category: None,
                title: bullet.title.clone(),
                text: bullet.text.clone(),
                citations: bullet.citations.clone(),
            });
        }

        let snapshot = self
            .context
            .build(ctx.tenant_id, self.config.context_window_hours_default, None)
            .await;
        let next: Vec<InsightItem> = recommendations(&snapshot)
            .into_iter()
            .enumerate()
            .map(|(i, rec)| InsightItem {
                id: format!("rec-{}", i + 1),
                severity: None,
                priority: Some(rec.priority),
                category: Some(rec.category),
                title: rec.title,
                text: rec.description,
                citations: Vec::new(),
            })
            .collect();

        Insights {
            date: feedback.date,
            now,
            next,
            meta: json!({
                "generated_at": Utc::now().to_rfc3339(),
                "sources": ["daily_feedback", "recommendations"],
            }),
        }
    }

    pub async fn recommendations_for_tenant(&self, ctx: &RequestContext) -> Vec<Recommendation> {
        let snapshot = self
            .context
            .build(ctx.tenant_id, self.config.context_window_hours_default, None)
            .await;
        recommendations(&snapshot)
    }
}

fn classify_severity(text: &str) -> FeedbackSeverity {
    let lower = text.to_lowercase();
    if lower.contains("critical") || lower.contains("halt") || lower.contains("stopped") {
        FeedbackSeverity::Critical
    } else if lower.contains("drop")
        || lower.contains("below")
        || lower.contains("exceed")
        || lower.contains("risk")
        || lower.contains("rework")
    {
        FeedbackSeverity::Warn
    } else {
        FeedbackSeverity::Info
    }
}

/// Deterministic snapshot analysis feeding `insights.next`. No model call;
/// every number comes straight from the snapshot.
pub fn recommendations(snapshot: &OperationalSnapshot) -> Vec<Recommendation> {
    let mut recommendations = Vec::new();

    if let Some(rework) = snapshot.kpis.rework_rate {
        if rework > 15.0 {
            let phase = top_error_phase(snapshot).unwrap_or_else(|| "the first phase".to_string());
            recommendations.push(Recommendation {
                priority: 1,
                category: "QUALITY".to_string(),
                title: "Add a quality gate".to_string(),
                description: format!(
                    "Rework rate is {:.1}%, above the 15% threshold. A quality gate at {} would catch defects before they propagate.",
                    rework, phase
                ),
                impact_metric: "rework_rate".to_string(),
                impact_value: rework,
                affected_phases: top_error_phase(snapshot).into_iter().collect(),
                suggested_actions: vec![
                    "Define acceptance criteria for the gate".to_string(),
                    "Schedule a dry run on the next shift".to_string(),
                ],
            });
        }
    }

    let components = [
        ("availability", snapshot.kpis.availability),
        ("performance", snapshot.kpis.performance),
        ("quality", snapshot.kpis.quality),
    ];
    let weakest = components
        .iter()
        .filter_map(|(name, value)| value.map(|v| (*name, v)))
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    if let Some((name, value)) = weakest {
        if value < 60.0 {
            recommendations.push(Recommendation {
                priority: 2,
                category: "PERFORMANCE".to_string(),
                title: format!("Investigate low {}", name),
                description: format!(
                    "{} is {:.1}%, the weakest OEE component in the window. It bounds the overall OEE.",
                    name, value
                ),
                impact_metric: name.to_string(),
                impact_value: value,
                affected_phases: Vec::new(),
                suggested_actions: vec![format!("Review {} losses per phase", name)],
            });
        }
    }

    if let Some(phase) = top_error_phase(snapshot) {
        let count = snapshot
            .recent_errors
            .iter()
            .filter(|e| e.phase == phase)
            .count();
        if count >= 3 {
            recommendations.push(Recommendation {
                priority: 3,
                category: "MAINTENANCE".to_string(),
                title: format!("Inspect equipment on {}", phase),
                description: format!(
                    "{} errors were recorded on {} inside the window; recurring errors on one phase usually point at equipment drift.",
                    count, phase
                ),
                impact_metric: "error_count".to_string(),
                impact_value: count as f32,
                affected_phases: vec![phase],
                suggested_actions: vec!["Schedule an inspection during the next changeover".to_string()],
            });
        }
    }

    recommendations.sort_by_key(|r| r.priority);
    recommendations.truncate(5);
    recommendations
}

fn top_error_phase(snapshot: &OperationalSnapshot) -> Option<String> {
    use std::collections::HashMap;
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for error in &snapshot.recent_errors {
        *counts.entry(error.phase.as_str()).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(phase, _)| phase.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ErrorSeverity, RecentError};
    use chrono::Duration;
    use uuid::Uuid;

    fn snapshot() -> OperationalSnapshot {
        let end = Utc::now();
        OperationalSnapshot::empty(end - Duration::hours(24), end)
    }

    #[test]
    fn high_rework_yields_quality_recommendation() {
        let mut snapshot = snapshot();
        snapshot.kpis.rework_rate = Some(22.0);
        let recs = recommendations(&snapshot);
        assert_eq!(recs[0].category, "QUALITY");
        assert_eq!(recs[0].priority, 1);
        assert!((recs[0].impact_value - 22.0).abs() < f32::EPSILON);
    }

    #[test]
    fn weakest_component_is_flagged() {
        let mut snapshot = snapshot();
        snapshot.kpis.availability = Some(84.0);
        snapshot.kpis.performance = Some(45.0);
        snapshot.kpis.quality = Some(70.0);
        let recs = recommendations(&snapshot);
        assert!(recs.iter().any(|r| r.impact_metric == "performance"));
    }

    #[test]
    fn recurring_phase_errors_suggest_maintenance() {
        let mut snapshot = snapshot();
        snapshot.recent_errors = (0..4)
            .map(|i| RecentError {
                id: Uuid::new_v4(),
                phase: "molding".to_string(),
                severity: ErrorSeverity::Major,
                description: "temperature drift".to_string(),
                occurred_at: snapshot.window_end - Duration::hours(i),
            })
            .collect();
        let recs = recommendations(&snapshot);
        assert!(recs
            .iter()
            .any(|r| r.category == "MAINTENANCE" && r.affected_phases == vec!["molding"]));
    }

    #[test]
    fn healthy_snapshot_yields_no_recommendations() {
        let mut snapshot = snapshot();
        snapshot.kpis.availability = Some(95.0);
        snapshot.kpis.performance = Some(92.0);
        snapshot.kpis.quality = Some(97.0);
        snapshot.kpis.rework_rate = Some(3.0);
        assert!(recommendations(&snapshot).is_empty());
    }

    #[test]
    fn severity_classification() {
        assert_eq!(
            classify_severity("Critical stop on line 2"),
            FeedbackSeverity::Critical
        );
        assert_eq!(
            classify_severity("OEE dropped below target"),
            FeedbackSeverity::Warn
        );
        assert_eq!(classify_severity("12 orders completed"), FeedbackSeverity::Info);
    }
}

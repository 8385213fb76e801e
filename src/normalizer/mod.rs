use uuid::Uuid;

use crate::shared::models::{
    Action, CopilotResponse, Fact, Intent, ResponseMeta, ResponseType, Warning, WarningCode,
};

/// Assemble the final response envelope: fresh suggestion id, propagated
/// correlation id, populated meta, arrays present even when empty.
#[allow(clippy::too_many_arguments)]
pub fn finalize(
    correlation_id: Uuid,
    response_type: ResponseType,
    intent: Intent,
    summary: String,
    facts: Vec<Fact>,
    actions: Vec<Action>,
    warnings: Vec<Warning>,
    model: &str,
    tokens: i64,
    latency_ms: i64,
) -> CopilotResponse {
    let mut summary = summary.trim().to_string();
    if summary.is_empty() {
        summary = match response_type {
            ResponseType::Error => "The request could not be answered.".to_string(),
            _ => facts
                .first()
                .map(|f| f.text.clone())
                .unwrap_or_else(|| "No grounded answer is available.".to_string()),
        };
    }

    // one warning per code is enough for the caller
    let mut deduped: Vec<Warning> = Vec::with_capacity(warnings.len());
    for warning in warnings {
        if !deduped.iter().any(|w| w.code == warning.code) {
            deduped.push(warning);
        }
    }

    let validation_passed = !deduped
        .iter()
        .any(|w| w.code == WarningCode::ValidationFailed);

    CopilotResponse {
        suggestion_id: Uuid::new_v4(),
        correlation_id,
        response_type,
        intent,
        summary,
        facts,
        actions,
        warnings: deduped,
        meta: ResponseMeta {
            model: model.to_string(),
            tokens,
            latency_ms,
            validation_passed,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_is_populated_and_arrays_present() {
        let correlation_id = Uuid::new_v4();
        let response = finalize(
            correlation_id,
            ResponseType::Answer,
            Intent::Generic,
            "All good.".to_string(),
            Vec::new(),
            Vec::new(),
            vec![Warning::new(WarningCode::InsufficientEvidence, "no data")],
            "llama3.2",
            128,
            250,
        );

        assert_eq!(response.correlation_id, correlation_id);
        assert_eq!(response.meta.model, "llama3.2");
        assert_eq!(response.meta.tokens, 128);
        assert!(response.meta.validation_passed);

        let json = serde_json::to_value(&response).unwrap();
        assert!(json["facts"].is_array());
        assert!(json["actions"].is_array());
    }

    #[test]
    fn validation_failed_warning_clears_flag() {
        let response = finalize(
            Uuid::new_v4(),
            ResponseType::Error,
            Intent::Generic,
            String::new(),
            Vec::new(),
            Vec::new(),
            vec![Warning::new(WarningCode::ValidationFailed, "bad output")],
            "llama3.2",
            0,
            10,
        );
        assert!(!response.meta.validation_passed);
        assert!(!response.summary.is_empty());
    }

    #[test]
    fn duplicate_warning_codes_collapse() {
        let response = finalize(
            Uuid::new_v4(),
            ResponseType::Answer,
            Intent::Generic,
            "s".to_string(),
            Vec::new(),
            Vec::new(),
            vec![
                Warning::new(WarningCode::InsufficientEvidence, "a"),
                Warning::new(WarningCode::InsufficientEvidence, "b"),
            ],
            "m",
            0,
            0,
        );
        assert_eq!(response.warnings.len(), 1);
        assert_eq!(response.warnings[0].message, "a");
    }
}

use crate::context::OperationalSnapshot;
use crate::shared::models::{Citation, Fact, SourceType, Warning, WarningCode};

const FAST_CONFIDENCE: f32 = 0.95;
const FAST_TRUST: f32 = 0.9;

/// KPI keyword -> (snapshot key, display label). Bilingual, matched on the
/// lowercased query.
const KPI_KEYWORDS: &[(&str, &str, &str)] = &[
    ("oee", "oee", "OEE"),
    ("availability", "availability", "Availability"),
    ("disponibilidade", "availability", "Availability"),
    ("performance", "performance", "Performance"),
    ("desempenho", "performance", "Performance"),
    ("fpy", "fpy", "FPY"),
    ("quality", "quality", "Quality"),
    ("qualidade", "quality", "Quality"),
    ("rework", "rework_rate", "Rework rate"),
    ("retrabalho", "rework_rate", "Rework rate"),
];

const ALL_KPIS: &[(&str, &str)] = &[
    ("oee", "OEE"),
    ("availability", "Availability"),
    ("performance", "Performance"),
    ("quality", "Quality"),
    ("fpy", "FPY"),
    ("rework_rate", "Rework rate"),
];

#[derive(Debug, Clone)]
pub struct FastResolution {
    pub summary: String,
    pub facts: Vec<Fact>,
    pub warnings: Vec<Warning>,
}

fn window_citation(snapshot: &OperationalSnapshot, label: &str) -> Citation {
    Citation {
        source_type: SourceType::Calculation,
        reference: snapshot.window_ref(),
        label: format!("{} from KPI snapshot", label),
        confidence: FAST_CONFIDENCE,
        trust_index: FAST_TRUST,
    }
}

/// Deterministic answer for current-KPI questions, straight from the
/// snapshot and without any model call. Requested KPIs that are null in the
/// snapshot produce INSUFFICIENT_EVIDENCE instead of facts.
pub fn resolve(query: &str, snapshot: &OperationalSnapshot) -> FastResolution {
    let query = query.to_lowercase();

    let mut requested: Vec<(&str, &str)> = Vec::new();
    for &(keyword, key, label) in KPI_KEYWORDS {
        if query.contains(keyword) && !requested.iter().any(|&(k, _)| k == key) {
            requested.push((key, label));
        }
    }
    // ambiguous question: answer with every main KPI
    if requested.is_empty() {
        requested = ALL_KPIS.to_vec();
    }

    let mut facts: Vec<Fact> = Vec::new();
    let mut missing: Vec<&str> = Vec::new();

    for &(key, label) in &requested {
        match snapshot.kpis.get(key) {
            Some(value) => {
                let text = format!("{} is currently {:.1}%.", label, value);
                facts.push(Fact {
                    text: text.clone(),
                    citations: vec![window_citation(snapshot, label)],
                });
            }
            None => missing.push(label),
        }
    }

    if facts.is_empty() {
        return FastResolution {
            summary: "No KPI data is available for the requested window.".to_string(),
            facts: Vec::new(),
            warnings: vec![Warning::new(
                WarningCode::InsufficientEvidence,
                format!(
                    "No source data for {} in the snapshot window.",
                    missing.join(", ")
                ),
            )],
        };
    }

    let summary = facts
        .iter()
        .map(|f| f.text.trim_end_matches('.'))
        .collect::<Vec<_>>()
        .join(". ");

    FastResolution {
        summary,
        facts,
        warnings: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn snapshot_with(oee: Option<f32>, fpy: Option<f32>) -> OperationalSnapshot {
        let end = Utc::now();
        let mut snapshot = OperationalSnapshot::empty(end - Duration::hours(24), end);
        snapshot.kpis.oee = oee;
        snapshot.kpis.fpy = fpy;
        snapshot
    }

    #[test]
    fn answers_specific_kpi_with_calculation_citation() {
        let snapshot = snapshot_with(Some(47.0), Some(32.0));
        let resolution = resolve("what is the oee right now?", &snapshot);

        assert_eq!(resolution.facts.len(), 1);
        assert!(resolution.facts[0].text.contains("47.0"));
        let citation = &resolution.facts[0].citations[0];
        assert_eq!(citation.source_type, SourceType::Calculation);
        assert_eq!(citation.reference, snapshot.window_ref());
        assert!((citation.confidence - 0.95).abs() < f32::EPSILON);
        assert!((citation.trust_index - 0.9).abs() < f32::EPSILON);
        assert!(resolution.warnings.is_empty());
    }

    #[test]
    fn ambiguous_question_answers_all_available_kpis() {
        let snapshot = snapshot_with(Some(47.0), Some(32.0));
        let resolution = resolve("how are the kpis?", &snapshot);

        assert_eq!(resolution.facts.len(), 2);
        assert!(resolution.summary.contains("47.0"));
        assert!(resolution.summary.contains("32.0"));
    }

    #[test]
    fn null_kpi_yields_insufficient_evidence() {
        let snapshot = snapshot_with(None, Some(32.0));
        let resolution = resolve("qual o oee atual?", &snapshot);

        assert!(resolution.facts.is_empty());
        assert_eq!(resolution.warnings.len(), 1);
        assert_eq!(
            resolution.warnings[0].code,
            WarningCode::InsufficientEvidence
        );
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use uuid::Uuid;

/// Bounds on domain sub-queries. The readers' contracts: list queries never
/// return more than this, regardless of window size.
pub const MAX_RECENT_ORDERS: usize = 50;
pub const MAX_RECENT_ERRORS: usize = 100;
pub const MAX_ALLOCATIONS: usize = 50;
pub const MAX_WIP_PHASES: usize = 10;

const SNAPSHOT_SOFT_CAP: usize = 8 * 1024;
const SNAPSHOT_HARD_CAP: usize = 16 * 1024;

#[derive(Debug, thiserror::Error)]
#[error("domain read failed: {0}")]
pub struct DomainReadError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Minor,
    Major,
    Critical,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Minor => "MINOR",
            ErrorSeverity::Major => "MAJOR",
            ErrorSeverity::Critical => "CRITICAL",
        }
    }
}

/// Current KPI values, each in [0,100] or absent when no source data exists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KpiSet {
    pub availability: Option<f32>,
    pub performance: Option<f32>,
    pub quality: Option<f32>,
    pub oee: Option<f32>,
    pub fpy: Option<f32>,
    pub rework_rate: Option<f32>,
}

impl KpiSet {
    pub fn get(&self, name: &str) -> Option<f32> {
        match name {
            "availability" => self.availability,
            "performance" => self.performance,
            "quality" => self.quality,
            "oee" => self.oee,
            "fpy" => self.fpy,
            "rework_rate" => self.rework_rate,
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.availability.is_none()
            && self.performance.is_none()
            && self.quality.is_none()
            && self.oee.is_none()
            && self.fpy.is_none()
            && self.rework_rate.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderCounts {
    pub total: i64,
    pub in_progress: i64,
    pub completed: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentError {
    pub id: Uuid,
    pub phase: String,
    pub severity: ErrorSeverity,
    pub description: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseWip {
    pub phase: String,
    pub wip: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allocation {
    pub employee_id: Uuid,
    pub employee_name: String,
    pub phase: String,
    pub hours: f32,
}

/// Immutable per-request view of the operational state. Built once, handed
/// around by reference, never mutated afterwards.
#[derive(Debug, Clone)]
pub struct OperationalSnapshot {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub kpis: KpiSet,
    pub orders: OrderCounts,
    pub recent_errors: Vec<RecentError>,
    pub top_phases_by_wip: Vec<PhaseWip>,
    pub allocations: Vec<Allocation>,
    pub data_gaps: Vec<String>,
}

impl OperationalSnapshot {
    pub fn empty(window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> Self {
        Self {
            window_start,
            window_end,
            kpis: KpiSet::default(),
            orders: OrderCounts::default(),
            recent_errors: Vec::new(),
            top_phases_by_wip: Vec::new(),
            allocations: Vec::new(),
            data_gaps: Vec::new(),
        }
    }

    /// Ref the fast path cites: the calculation window the KPI values came
    /// from.
    pub fn window_ref(&self) -> String {
        format!(
            "calc:kpi_window:{}..{}",
            self.window_start.timestamp(),
            self.window_end.timestamp()
        )
    }

    pub fn employee_names(&self) -> Vec<(Uuid, String)> {
        self.allocations
            .iter()
            .map(|a| (a.employee_id, a.employee_name.clone()))
            .collect()
    }
}

#[async_trait]
pub trait OrdersReader: Send + Sync {
    async fn kpi_snapshot(
        &self,
        tenant_id: Uuid,
        window_start: DateTime<Utc>,
    ) -> Result<KpiSet, DomainReadError>;

    /// Counts by status over the most recent orders (bounded to
    /// MAX_RECENT_ORDERS by the reader).
    async fn order_counts(
        &self,
        tenant_id: Uuid,
        window_start: DateTime<Utc>,
    ) -> Result<OrderCounts, DomainReadError>;

    async fn top_phases_by_wip(
        &self,
        tenant_id: Uuid,
        limit: usize,
    ) -> Result<Vec<PhaseWip>, DomainReadError>;
}

#[async_trait]
pub trait QualityReader: Send + Sync {
    async fn recent_errors(
        &self,
        tenant_id: Uuid,
        window_start: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RecentError>, DomainReadError>;
}

#[async_trait]
pub trait AllocationsReader: Send + Sync {
    async fn allocations(
        &self,
        tenant_id: Uuid,
        window_start: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Allocation>, DomainReadError>;
}

/// Assembles the OperationalSnapshot from the domain collaborators.
/// Best-effort: a failed sub-query becomes a data gap, not an error.
pub struct ContextBuilder {
    orders: Arc<dyn OrdersReader>,
    quality: Arc<dyn QualityReader>,
    allocations: Arc<dyn AllocationsReader>,
}

impl ContextBuilder {
    pub fn new(
        orders: Arc<dyn OrdersReader>,
        quality: Arc<dyn QualityReader>,
        allocations: Arc<dyn AllocationsReader>,
    ) -> Self {
        Self {
            orders,
            quality,
            allocations,
        }
    }

    /// `entity_hint` narrows the error/WIP/allocation views to one phase
    /// when the caller asks about a specific entity.
    pub async fn build(
        &self,
        tenant_id: Uuid,
        window_hours: i64,
        entity_hint: Option<(&str, &str)>,
    ) -> OperationalSnapshot {
        let window_hours = window_hours.clamp(1, 720);
        let window_end = Utc::now();
        let window_start = window_end - Duration::hours(window_hours);
        let mut snapshot = OperationalSnapshot::empty(window_start, window_end);

        match self.orders.kpi_snapshot(tenant_id, window_start).await {
            Ok(kpis) => snapshot.kpis = kpis,
            Err(e) => {
                warn!("KPI snapshot read failed for tenant {}: {}", tenant_id, e);
                snapshot.data_gaps.push(format!("kpis: {}", e));
            }
        }

        match self.orders.order_counts(tenant_id, window_start).await {
            Ok(orders) => snapshot.orders = orders,
            Err(e) => {
                warn!("Order counts read failed for tenant {}: {}", tenant_id, e);
                snapshot.data_gaps.push(format!("orders: {}", e));
            }
        }

        match self
            .orders
            .top_phases_by_wip(tenant_id, MAX_WIP_PHASES)
            .await
        {
            Ok(phases) => snapshot.top_phases_by_wip = phases,
            Err(e) => {
                warn!("WIP read failed for tenant {}: {}", tenant_id, e);
                snapshot.data_gaps.push(format!("wip: {}", e));
            }
        }

        match self
            .quality
            .recent_errors(tenant_id, window_start, MAX_RECENT_ERRORS)
            .await
        {
            Ok(mut errors) => {
                errors.truncate(MAX_RECENT_ERRORS);
                // newest first, so budget truncation drops the oldest
                errors.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
                snapshot.recent_errors = errors;
            }
            Err(e) => {
                warn!("Errors read failed for tenant {}: {}", tenant_id, e);
                snapshot.data_gaps.push(format!("errors: {}", e));
            }
        }

        match self
            .allocations
            .allocations(tenant_id, window_start, MAX_ALLOCATIONS)
            .await
        {
            Ok(mut allocations) => {
                allocations.truncate(MAX_ALLOCATIONS);
                snapshot.allocations = allocations;
            }
            Err(e) => {
                warn!("Allocations read failed for tenant {}: {}", tenant_id, e);
                snapshot.data_gaps.push(format!("allocations: {}", e));
            }
        }

        if let Some(("phase", phase)) = entity_hint {
            snapshot.recent_errors.retain(|e| e.phase == phase);
            snapshot.top_phases_by_wip.retain(|p| p.phase == phase);
            snapshot.allocations.retain(|a| a.phase == phase);
        }

        snapshot
    }
}

#[derive(Debug, Clone)]
pub struct RenderedSnapshot {
    pub text: String,
    /// Refs the model may cite, one per marker present in the text.
    pub marker_refs: Vec<String>,
}

/// Serialize the snapshot to the marker-bearing text block handed to the
/// prompt renderer. `max_errors` limits the error section; the prompt
/// renderer lowers it when squeezing into the intent budget.
pub fn render_snapshot(snapshot: &OperationalSnapshot, max_errors: usize) -> RenderedSnapshot {
    let mut text = String::new();
    let mut markers: Vec<String> = Vec::new();

    let window_ref = snapshot.window_ref();
    let _ = writeln!(
        text,
        "## OPERATIONAL SNAPSHOT [{}]",
        window_ref.to_uppercase()
    );
    let _ = writeln!(
        text,
        "Window: {} .. {}",
        snapshot.window_start.to_rfc3339(),
        snapshot.window_end.to_rfc3339()
    );
    markers.push(window_ref);

    text.push_str("\nKPIs:\n");
    for name in [
        "availability",
        "performance",
        "quality",
        "oee",
        "fpy",
        "rework_rate",
    ] {
        match snapshot.kpis.get(name) {
            Some(value) => {
                let marker = format!("db:kpi:{}", name);
                let _ = writeln!(text, "- [{}] {}: {:.1}%", marker.to_uppercase(), name, value);
                markers.push(marker);
            }
            None => {
                let _ = writeln!(text, "- {}: n/a (no source data)", name);
            }
        }
    }

    let orders_marker = "db:orders:status_counts".to_string();
    let _ = writeln!(
        text,
        "\nOrders [{}]: total={} in_progress={} completed={}",
        orders_marker.to_uppercase(),
        snapshot.orders.total,
        snapshot.orders.in_progress,
        snapshot.orders.completed
    );
    markers.push(orders_marker);

    if !snapshot.recent_errors.is_empty() {
        text.push_str("\nRecent errors (newest first):\n");
        for error in snapshot.recent_errors.iter().take(max_errors) {
            let marker = format!("db:error:{}", error.id);
            let _ = writeln!(
                text,
                "- [{}] {} {} {}: {}",
                marker.to_uppercase(),
                error.occurred_at.to_rfc3339(),
                error.phase,
                error.severity.as_str(),
                error.description
            );
            markers.push(marker);
        }
        let hidden = snapshot.recent_errors.len().saturating_sub(max_errors);
        if hidden > 0 {
            let _ = writeln!(text, "- ({} older errors omitted)", hidden);
        }
    }

    if !snapshot.top_phases_by_wip.is_empty() {
        text.push_str("\nTop phases by WIP:\n");
        for phase in &snapshot.top_phases_by_wip {
            let marker = format!("db:wip:{}", phase.phase.to_lowercase());
            let _ = writeln!(
                text,
                "- [{}] {}: {}",
                marker.to_uppercase(),
                phase.phase,
                phase.wip
            );
            markers.push(marker);
        }
    }

    if !snapshot.allocations.is_empty() {
        text.push_str("\nAllocations:\n");
        for allocation in &snapshot.allocations {
            let marker = format!("db:alloc:{}", allocation.phase.to_lowercase());
            let _ = writeln!(
                text,
                "- [{}] {} on {}: {:.1}h",
                marker.to_uppercase(),
                allocation.employee_name,
                allocation.phase,
                allocation.hours
            );
            markers.push(marker);
        }
    }

    if !snapshot.data_gaps.is_empty() {
        text.push_str("\nData gaps (sub-queries that failed):\n");
        for gap in &snapshot.data_gaps {
            let name = gap.split(':').next().unwrap_or("unknown").trim();
            let marker = format!("calc:data_gap:{}", name);
            let _ = writeln!(text, "- [{}] {}", marker.to_uppercase(), gap);
            markers.push(marker);
        }
    }

    if text.len() > SNAPSHOT_HARD_CAP {
        let mut cut = SNAPSHOT_HARD_CAP;
        while cut > 0 && !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }

    markers.sort();
    markers.dedup();
    RenderedSnapshot {
        text,
        marker_refs: markers,
    }
}

/// Render under the soft cap by shedding the oldest errors first.
pub fn render_snapshot_bounded(snapshot: &OperationalSnapshot) -> RenderedSnapshot {
    let mut max_errors = snapshot.recent_errors.len();
    loop {
        let rendered = render_snapshot(snapshot, max_errors);
        if rendered.text.len() <= SNAPSHOT_SOFT_CAP || max_errors == 0 {
            return rendered;
        }
        max_errors /= 2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_snapshot() -> OperationalSnapshot {
        let end = Utc::now();
        let mut snapshot = OperationalSnapshot::empty(end - Duration::hours(24), end);
        snapshot.kpis.oee = Some(47.0);
        snapshot.kpis.availability = Some(84.0);
        snapshot.orders = OrderCounts {
            total: 12,
            in_progress: 5,
            completed: 6,
        };
        snapshot.recent_errors = (0..5)
            .map(|i| RecentError {
                id: Uuid::new_v4(),
                phase: "molding".to_string(),
                severity: ErrorSeverity::Major,
                description: format!("clamp misalignment {}", i),
                occurred_at: end - Duration::hours(i),
            })
            .collect();
        snapshot
    }

    #[test]
    fn render_emits_markers_for_present_data() {
        let snapshot = sample_snapshot();
        let rendered = render_snapshot(&snapshot, 100);

        assert!(rendered.marker_refs.contains(&"db:kpi:oee".to_string()));
        assert!(rendered
            .marker_refs
            .contains(&"db:orders:status_counts".to_string()));
        assert!(rendered.marker_refs.iter().any(|m| m.starts_with("db:error:")));
        assert!(!rendered.marker_refs.contains(&"db:kpi:fpy".to_string()));
        assert!(rendered.text.contains("47.0%"));
    }

    #[test]
    fn error_section_respects_limit() {
        let snapshot = sample_snapshot();
        let rendered = render_snapshot(&snapshot, 2);
        let error_markers = rendered
            .marker_refs
            .iter()
            .filter(|m| m.starts_with("db:error:"))
            .count();
        assert_eq!(error_markers, 2);
        assert!(rendered.text.contains("3 older errors omitted"));
    }

    #[test]
    fn bounded_render_stays_under_soft_cap() {
        let mut snapshot = sample_snapshot();
        snapshot.recent_errors = (0..100)
            .map(|i| RecentError {
                id: Uuid::new_v4(),
                phase: "molding".to_string(),
                severity: ErrorSeverity::Minor,
                description: "long description of a recurring alignment problem ".repeat(5),
                occurred_at: snapshot.window_end - Duration::minutes(i),
            })
            .collect();

        let rendered = render_snapshot_bounded(&snapshot);
        assert!(rendered.text.len() <= SNAPSHOT_SOFT_CAP);
    }

    #[test]
    fn data_gaps_become_calc_markers() {
        let mut snapshot = sample_snapshot();
        snapshot.data_gaps.push("allocations: timeout".to_string());
        let rendered = render_snapshot(&snapshot, 10);
        assert!(rendered
            .marker_refs
            .contains(&"calc:data_gap:allocations".to_string()));
    }
}

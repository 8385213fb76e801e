use uuid::Uuid;

/// Per-request carrier for tenant and actor identity.
///
/// Every component takes this explicitly; nothing in the core reads a
/// "current tenant" from process-wide state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub correlation_id: Uuid,
}

impl RequestContext {
    pub fn new(tenant_id: Uuid, user_id: Uuid) -> Self {
        Self {
            tenant_id,
            user_id,
            correlation_id: Uuid::new_v4(),
        }
    }

    pub fn with_correlation(tenant_id: Uuid, user_id: Uuid, correlation_id: Uuid) -> Self {
        Self {
            tenant_id,
            user_id,
            correlation_id,
        }
    }
}

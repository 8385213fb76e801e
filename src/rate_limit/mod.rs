use governor::{
    clock::DefaultClock,
    state::keyed::DefaultKeyedStateStore,
    Quota, RateLimiter as GovernorLimiter,
};
use log::warn;
use redis::AsyncCommands;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::config::CopilotConfig;

type KeyedLimiter = GovernorLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    pub retry_after_secs: Option<i64>,
}

impl RateDecision {
    fn allowed() -> Self {
        Self {
            allowed: true,
            retry_after_secs: None,
        }
    }

    fn limited(retry_after_secs: i64) -> Self {
        Self {
            allowed: false,
            retry_after_secs: Some(retry_after_secs),
        }
    }
}

/// Per-(tenant, user) hour/day quotas.
///
/// Counters live in the shared cache tier when it is reachable; otherwise an
/// in-process keyed token bucket takes over. The fallback is coarser (token
/// bucket, not fixed window) and per-process — documented behavior.
pub struct RateLimiter {
    cache: Option<Arc<redis::Client>>,
    per_hour: u32,
    per_day: u32,
    hourly_fallback: KeyedLimiter,
    daily_fallback: KeyedLimiter,
}

impl RateLimiter {
    pub fn new(config: &CopilotConfig, cache: Option<Arc<redis::Client>>) -> Self {
        let per_hour = config.rate_per_hour.max(1);
        let per_day = config.rate_per_day.max(1);

        let hourly_quota = Quota::per_hour(NonZeroU32::new(per_hour).unwrap_or(NonZeroU32::MIN));
        let daily_period = Duration::from_secs(86_400 / per_day.max(1) as u64);
        let daily_quota = Quota::with_period(daily_period)
            .unwrap_or_else(|| Quota::per_hour(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::new(per_day).unwrap_or(NonZeroU32::MIN));

        Self {
            cache,
            per_hour,
            per_day,
            hourly_fallback: GovernorLimiter::keyed(hourly_quota),
            daily_fallback: GovernorLimiter::keyed(daily_quota),
        }
    }

    pub fn per_hour(&self) -> u32 {
        self.per_hour
    }

    pub fn per_day(&self) -> u32 {
        self.per_day
    }

    pub async fn check(&self, tenant_id: Uuid, user_id: Uuid) -> RateDecision {
        if let Some(cache) = &self.cache {
            match self.check_shared(cache, tenant_id, user_id).await {
                Ok(decision) => return decision,
                Err(e) => {
                    warn!("Shared rate-limit counters unreachable, using in-process fallback: {}", e);
                }
            }
        }
        self.check_fallback(tenant_id, user_id)
    }

    async fn check_shared(
        &self,
        cache: &redis::Client,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<RateDecision, redis::RedisError> {
        let mut conn = cache.get_multiplexed_async_connection().await?;

        let hour_key = format!("copilot:rate:{}:{}:hour", tenant_id, user_id);
        let day_key = format!("copilot:rate:{}:{}:day", tenant_id, user_id);

        let hour_count: i64 = conn.get(&hour_key).await.unwrap_or(0);
        let day_count: i64 = conn.get(&day_key).await.unwrap_or(0);

        if hour_count >= self.per_hour as i64 {
            let ttl: i64 = conn.ttl(&hour_key).await.unwrap_or(60);
            return Ok(RateDecision::limited(ttl.max(60)));
        }
        if day_count >= self.per_day as i64 {
            let ttl: i64 = conn.ttl(&day_key).await.unwrap_or(3600);
            return Ok(RateDecision::limited(ttl.max(3600)));
        }

        let _: i64 = conn.incr(&hour_key, 1).await?;
        let _: bool = conn.expire(&hour_key, 3600).await?;
        let _: i64 = conn.incr(&day_key, 1).await?;
        let _: bool = conn.expire(&day_key, 86_400).await?;

        Ok(RateDecision::allowed())
    }

    fn check_fallback(&self, tenant_id: Uuid, user_id: Uuid) -> RateDecision {
        let key = format!("{}:{}", tenant_id, user_id);
        if self.hourly_fallback.check_key(&key).is_err() {
            return RateDecision::limited(60);
        }
        if self.daily_fallback.check_key(&key).is_err() {
            return RateDecision::limited(3600);
        }
        RateDecision::allowed()
    }
}

/// Wall-clock ceiling for a single request, from query receipt to response
/// emission.
#[derive(Debug, Clone, Copy)]
pub struct BudgetGuard {
    started: Instant,
    budget: Duration,
}

impl BudgetGuard {
    pub fn new(budget_ms: u64) -> Self {
        Self {
            started: Instant::now(),
            budget: Duration::from_millis(budget_ms),
        }
    }

    pub fn elapsed_ms(&self) -> i64 {
        self.started.elapsed().as_millis() as i64
    }

    pub fn exceeded(&self) -> bool {
        self.started.elapsed() >= self.budget
    }

    /// Time left for an outbound call; the caller wraps the call in a
    /// timeout of this much so cancellation propagates by dropping it.
    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.started.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(per_hour: u32, per_day: u32) -> RateLimiter {
        let config = CopilotConfig {
            rate_per_hour: per_hour,
            rate_per_day: per_day,
            ..CopilotConfig::default()
        };
        RateLimiter::new(&config, None)
    }

    #[tokio::test]
    async fn fallback_enforces_hourly_quota() {
        let limiter = limiter(2, 1000);
        let tenant = Uuid::new_v4();
        let user = Uuid::new_v4();

        assert!(limiter.check(tenant, user).await.allowed);
        assert!(limiter.check(tenant, user).await.allowed);
        let third = limiter.check(tenant, user).await;
        assert!(!third.allowed);
        assert!(third.retry_after_secs.unwrap_or(0) > 0);
    }

    #[tokio::test]
    async fn fallback_is_scoped_per_tenant_and_user() {
        let limiter = limiter(1, 1000);
        let tenant = Uuid::new_v4();

        assert!(limiter.check(tenant, Uuid::new_v4()).await.allowed);
        // a different user still has their own budget
        assert!(limiter.check(tenant, Uuid::new_v4()).await.allowed);
    }

    #[test]
    fn budget_guard_tracks_remaining_time() {
        let guard = BudgetGuard::new(20_000);
        assert!(!guard.exceeded());
        assert!(guard.remaining() <= Duration::from_millis(20_000));
        assert!(guard.remaining() > Duration::from_millis(19_000));

        let spent = BudgetGuard::new(0);
        assert!(spent.exceeded());
        assert_eq!(spent.remaining(), Duration::ZERO);
    }
}

//! Subscription activation against the shared `subscriptions` table

use async_trait::async_trait;
use eyre::{Result, WrapErr};
use sqlx::postgres::PgPool;
use tracing::info;

use super::SubscriptionActivator;

/// Grants a tier by upserting the user's subscription row. An unexpired
/// subscription is extended from its current expiry, not from now.
pub struct PgSubscriptionActivator {
    pool: PgPool,
}

impl PgSubscriptionActivator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionActivator for PgSubscriptionActivator {
    async fn activate_subscription(
        &self,
        user_id: i64,
        tier: &str,
        duration_days: i32,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (user_id, tier, expires_at)
            VALUES ($1, $2, NOW() + make_interval(days => $3))
            ON CONFLICT (user_id) DO UPDATE SET
                tier = EXCLUDED.tier,
                expires_at = GREATEST(subscriptions.expires_at, NOW())
                    + make_interval(days => $3),
                updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(tier)
        .bind(duration_days)
        .execute(&self.pool)
        .await
        .wrap_err_with(|| format!("Failed to activate {} for user {}", tier, user_id))?;

        info!(user_id, tier, duration_days, "Subscription activated");
        Ok(())
    }
}

//! Outbound collaborators
//!
//! Completing an intent grants the subscription and tells people about it.
//! Both sides are traits so the engine can be exercised with recording fakes.

use async_trait::async_trait;
use eyre::Result;
use tracing::info;

use crate::classifier::DecodedTransfer;
use crate::store::{PendingIntent, ReviewFlag};

pub mod subscription;
pub mod telegram;

pub use subscription::PgSubscriptionActivator;
pub use telegram::TelegramNotifier;

#[async_trait]
pub trait SubscriptionActivator: Send + Sync {
    /// Grant or extend `tier` for `duration_days`
    async fn activate_subscription(&self, user_id: i64, tier: &str, duration_days: i32)
        -> Result<()>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_user(&self, user_id: i64, text: &str) -> Result<()>;

    async fn notify_admins(&self, text: &str) -> Result<()>;
}

/// Notifier used when no bot token is configured
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_user(&self, user_id: i64, text: &str) -> Result<()> {
        info!(user_id, text, "User notification (no bot configured)");
        Ok(())
    }

    async fn notify_admins(&self, text: &str) -> Result<()> {
        info!(text, "Admin notification (no bot configured)");
        Ok(())
    }
}

pub fn payment_confirmed_message(intent: &PendingIntent, transfer: &DecodedTransfer) -> String {
    format!(
        "Payment received: {} {}.\nYour {} plan is active for {} days.",
        transfer.amount.normalized(),
        transfer.asset,
        intent.tier,
        intent.duration_days
    )
}

pub fn admin_completed_message(intent: &PendingIntent, transfer: &DecodedTransfer) -> String {
    format!(
        "Payment completed\nmemo: {}\nuser: {}\ntier: {} ({} days)\namount: {} {}\ntx: {}",
        intent.memo,
        intent.user_id,
        intent.tier,
        intent.duration_days,
        transfer.amount.normalized(),
        transfer.asset,
        transfer.tx_hash
    )
}

pub fn admin_review_message(intent: &PendingIntent, flag: &ReviewFlag) -> String {
    let expected = intent
        .expected(flag.asset)
        .map(|e| e.normalized().to_string())
        .unwrap_or_else(|| "not accepted".to_string());
    format!(
        "Payment held for review ({})\nmemo: {}\nuser: {}\nreceived: {} {}\nexpected: {}\ntx: {}\n{}",
        flag.reason,
        intent.memo,
        intent.user_id,
        flag.amount.normalized(),
        flag.asset,
        expected,
        flag.tx_hash,
        flag.detail
    )
}

pub fn admin_activation_failed_message(intent: &PendingIntent, error: &str) -> String {
    format!(
        "Subscription activation FAILED after payment\nmemo: {}\nuser: {}\ntier: {} ({} days)\nerror: {}",
        intent.memo, intent.user_id, intent.tier, intent.duration_days, error
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Asset;
    use crate::store::ReviewReason;
    use bigdecimal::BigDecimal;
    use chrono::Utc;
    use std::str::FromStr;

    fn intent() -> PendingIntent {
        PendingIntent {
            id: 1,
            user_id: 42,
            tier: "pro".into(),
            duration_days: 30,
            memo: "PAY_A1B2C3D4".into(),
            expected_ton: Some(BigDecimal::from_str("0.90").unwrap()),
            expected_usdt: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_review_message_mentions_reason_and_amounts() {
        let flag = ReviewFlag {
            intent_id: 1,
            tx_hash: "abc".into(),
            lt: 9,
            reason: ReviewReason::AmountMismatch,
            asset: Asset::Ton,
            amount: BigDecimal::from_str("0.500000000").unwrap(),
            sender: None,
            detail: "deviation 4444.44 bps".into(),
        };
        let text = admin_review_message(&intent(), &flag);
        assert!(text.contains("amount_mismatch"));
        assert!(text.contains("received: 0.5 TON"));
        assert!(text.contains("expected: 0.9"));
    }

    #[test]
    fn test_review_message_for_unaccepted_asset() {
        let flag = ReviewFlag {
            intent_id: 1,
            tx_hash: "abc".into(),
            lt: 9,
            reason: ReviewReason::AssetNotAccepted,
            asset: Asset::Usdt,
            amount: BigDecimal::from(5),
            sender: None,
            detail: String::new(),
        };
        assert!(admin_review_message(&intent(), &flag).contains("expected: not accepted"));
    }
}

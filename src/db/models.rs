use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;

use crate::store::PendingIntent;

// Amounts are read as TEXT (`expected_ton::TEXT`) and written with a
// `$n::NUMERIC` cast, then parsed into BigDecimal at the edge.

/// Row of `payment_intents` as needed for reconciliation
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PaymentIntentRow {
    pub id: i64,
    pub user_id: i64,
    pub tier: String,
    pub duration_days: i32,
    pub memo: String,
    pub expected_ton: Option<String>,
    pub expected_usdt: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<PaymentIntentRow> for PendingIntent {
    type Error = eyre::Report;

    fn try_from(row: PaymentIntentRow) -> Result<Self> {
        Ok(PendingIntent {
            expected_ton: parse_amount(row.expected_ton.as_deref())
                .wrap_err_with(|| format!("Invalid expected_ton on intent {}", row.id))?,
            expected_usdt: parse_amount(row.expected_usdt.as_deref())
                .wrap_err_with(|| format!("Invalid expected_usdt on intent {}", row.id))?,
            id: row.id,
            user_id: row.user_id,
            tier: row.tier,
            duration_days: row.duration_days,
            memo: row.memo,
            created_at: row.created_at,
        })
    }
}

fn parse_amount(raw: Option<&str>) -> Result<Option<BigDecimal>> {
    raw.map(|s| BigDecimal::from_str(s).wrap_err_with(|| format!("not a decimal: {}", s)))
        .transpose()
}

/// Open review joined with its intent, served by the status API
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ReviewRow {
    pub id: i64,
    pub intent_id: i64,
    pub memo: String,
    pub user_id: i64,
    pub intent_status: String,
    pub tx_hash: String,
    pub lt: i64,
    pub reason: String,
    pub asset: String,
    pub amount: String,
    pub expected_amount: Option<String>,
    pub sender_address: Option<String>,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

/// Intent counts by status
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntentCounts {
    pub pending: i64,
    pub flagged: i64,
    pub completed: i64,
    pub failed: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> PaymentIntentRow {
        PaymentIntentRow {
            id: 3,
            user_id: 99,
            tier: "pro".into(),
            duration_days: 30,
            memo: "PAY_A1B2C3D4".into(),
            expected_ton: Some("0.900000000".into()),
            expected_usdt: None,
            status: "pending".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_row_to_pending_intent() {
        let intent = PendingIntent::try_from(row()).unwrap();
        assert_eq!(intent.expected_ton, Some(BigDecimal::from_str("0.9").unwrap()));
        assert_eq!(intent.expected_usdt, None);
        assert_eq!(intent.memo, "PAY_A1B2C3D4");
    }

    #[test]
    fn test_row_with_bad_amount() {
        let mut bad = row();
        bad.expected_usdt = Some("ten".into());
        assert!(PendingIntent::try_from(bad).is_err());
    }
}

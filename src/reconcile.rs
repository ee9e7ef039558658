//! Reconciliation engine
//!
//! Matches a decoded transfer to the pending intent named by its memo and
//! completes that intent at most once.
//!
//! ```text
//! no / malformed memo            -> SkippedNoMemo
//! no pending intent for memo     -> SkippedUnknownIntent
//! USDT from unauthentic wallet   -> Flagged(counterfeit_token), stays pending
//! USDT wallet lookup failed      -> Flagged(verification_unavailable), stays pending
//! asset not expected by intent   -> Flagged(asset_not_accepted), stays pending
//! amount outside tolerance       -> Flagged(amount_mismatch), stays pending
//! otherwise                      -> pending -> completed, activate, notify
//! ```
//!
//! The conditional `pending -> completed` update is the only guard against
//! double completion. Activation and notifications run only when that update
//! reports a transition, so replaying a transaction (or racing another
//! producer) can never grant a subscription twice.

use eyre::Result;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::amount::{deviation_bps, Asset, Tolerance};
use crate::authenticity::AuthenticityValidator;
use crate::classifier::DecodedTransfer;
use crate::hooks::{self, Notifier, SubscriptionActivator};
use crate::metrics;
use crate::store::{IntentStore, PendingIntent, Receipt, ReviewFlag, ReviewReason};

pub const MEMO_PREFIX: &str = "PAY_";
const MEMO_HEX_LEN: usize = 8;

/// Return the memo if `text` is exactly `PAY_` followed by eight uppercase
/// hex digits (surrounding whitespace ignored).
pub fn parse_memo(text: &str) -> Option<&str> {
    let memo = text.trim();
    let hex = memo.strip_prefix(MEMO_PREFIX)?;
    if hex.len() == MEMO_HEX_LEN
        && hex
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b))
    {
        Some(memo)
    } else {
        None
    }
}

/// What happened to one transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Chain noise: no memo or not in the payment format
    SkippedNoMemo,
    /// No pending intent carries the memo (unknown, already completed, failed)
    SkippedUnknownIntent,
    /// Held for an operator; the intent stays pending
    Flagged {
        intent_id: i64,
        reason: ReviewReason,
        /// `false` when this transaction was already flagged earlier
        first_time: bool,
    },
    Completed { intent_id: i64 },
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::SkippedNoMemo => "skipped_no_memo",
            ReconcileOutcome::SkippedUnknownIntent => "skipped_unknown_intent",
            ReconcileOutcome::Flagged { .. } => "flagged",
            ReconcileOutcome::Completed { .. } => "completed",
        }
    }
}

pub struct ReconciliationEngine {
    store: Arc<dyn IntentStore>,
    validator: AuthenticityValidator,
    activator: Arc<dyn SubscriptionActivator>,
    notifier: Arc<dyn Notifier>,
    tolerance: Tolerance,
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<dyn IntentStore>,
        validator: AuthenticityValidator,
        activator: Arc<dyn SubscriptionActivator>,
        notifier: Arc<dyn Notifier>,
        tolerance: Tolerance,
    ) -> Self {
        Self {
            store,
            validator,
            activator,
            notifier,
            tolerance,
        }
    }

    /// Called by the scanner at the start of every cycle
    pub fn begin_cycle(&mut self) {
        self.validator.begin_cycle();
    }

    /// Reconcile one transfer. Errors are storage failures; the caller must
    /// revisit the transfer later.
    pub async fn reconcile(&mut self, transfer: &DecodedTransfer) -> Result<ReconcileOutcome> {
        let outcome = self.reconcile_inner(transfer).await?;
        metrics::record_outcome(outcome.as_str());
        Ok(outcome)
    }

    async fn reconcile_inner(&mut self, transfer: &DecodedTransfer) -> Result<ReconcileOutcome> {
        let memo = match transfer.memo.as_deref().and_then(parse_memo) {
            Some(memo) => memo,
            None => {
                debug!(tx = %transfer.tx_hash, lt = transfer.lt, "No payment memo");
                return Ok(ReconcileOutcome::SkippedNoMemo);
            }
        };

        let intent = match self.store.find_pending_by_memo(memo).await? {
            Some(intent) => intent,
            None => {
                debug!(memo, tx = %transfer.tx_hash, "No pending intent for memo");
                return Ok(ReconcileOutcome::SkippedUnknownIntent);
            }
        };

        if transfer.asset == Asset::Usdt {
            let verdict = match transfer.source_wallet {
                Some(wallet) => {
                    let result = self.validator.validate(&wallet).await;
                    if result.is_valid {
                        None
                    } else {
                        let reason = if result.unavailable {
                            ReviewReason::VerificationUnavailable
                        } else {
                            ReviewReason::CounterfeitToken
                        };
                        let detail = format!(
                            "jetton wallet {} rejected: {}",
                            wallet,
                            result.reason.unwrap_or_default()
                        );
                        Some((reason, detail))
                    }
                }
                None => Some((
                    ReviewReason::CounterfeitToken,
                    "notification has no source wallet".to_string(),
                )),
            };
            if let Some((reason, detail)) = verdict {
                return self.flag(&intent, transfer, reason, detail).await;
            }
        }

        let expected = match intent.expected(transfer.asset) {
            Some(expected) => expected.clone(),
            None => {
                let detail = format!("intent does not accept {}", transfer.asset);
                return self
                    .flag(&intent, transfer, ReviewReason::AssetNotAccepted, detail)
                    .await;
            }
        };

        if !self.tolerance.accepts(&expected, &transfer.amount) {
            let deviation = deviation_bps(&expected, &transfer.amount)
                .map(|d| format!("{} bps", d))
                .unwrap_or_else(|| "undefined".to_string());
            let detail = format!(
                "expected {} {}, received {} (deviation {}, tolerance {} bps)",
                expected.normalized(),
                transfer.asset,
                transfer.amount.normalized(),
                deviation,
                self.tolerance.bps()
            );
            return self
                .flag(&intent, transfer, ReviewReason::AmountMismatch, detail)
                .await;
        }

        let receipt = Receipt {
            tx_hash: transfer.tx_hash.clone(),
            lt: transfer.lt,
            asset: transfer.asset,
            amount: transfer.amount.clone(),
            sender: transfer.sender.map(|s| s.to_raw()),
        };

        if !self.store.complete_intent(intent.id, &receipt).await? {
            info!(
                intent_id = intent.id,
                memo,
                tx = %transfer.tx_hash,
                "Intent left pending state concurrently, skipping"
            );
            return Ok(ReconcileOutcome::SkippedUnknownIntent);
        }

        info!(
            intent_id = intent.id,
            user_id = intent.user_id,
            memo,
            asset = %transfer.asset,
            amount = %transfer.amount,
            tx = %transfer.tx_hash,
            lt = transfer.lt,
            utime = transfer.utime,
            "Payment intent completed"
        );

        self.after_completion(&intent, transfer).await;
        Ok(ReconcileOutcome::Completed {
            intent_id: intent.id,
        })
    }

    /// Activation and notifications. The intent is already completed, so
    /// nothing here may fail the transfer.
    async fn after_completion(&self, intent: &PendingIntent, transfer: &DecodedTransfer) {
        match self
            .activator
            .activate_subscription(intent.user_id, &intent.tier, intent.duration_days)
            .await
        {
            Ok(()) => {
                let user_text = hooks::payment_confirmed_message(intent, transfer);
                if let Err(e) = self.notifier.notify_user(intent.user_id, &user_text).await {
                    warn!(intent_id = intent.id, error = %e, "Failed to notify user");
                }
                let admin_text = hooks::admin_completed_message(intent, transfer);
                if let Err(e) = self.notifier.notify_admins(&admin_text).await {
                    warn!(intent_id = intent.id, error = %e, "Failed to notify admins");
                }
            }
            Err(e) => {
                let message = format!("{:#}", e);
                error!(
                    intent_id = intent.id,
                    user_id = intent.user_id,
                    error = %message,
                    "Subscription activation failed for completed intent"
                );
                metrics::record_error("activation");
                if let Err(e) = self
                    .store
                    .record_activation_error(intent.id, &message)
                    .await
                {
                    error!(intent_id = intent.id, error = %e, "Failed to record activation error");
                }
                let admin_text = hooks::admin_activation_failed_message(intent, &message);
                if let Err(e) = self.notifier.notify_admins(&admin_text).await {
                    warn!(intent_id = intent.id, error = %e, "Failed to notify admins");
                }
            }
        }
    }

    async fn flag(
        &self,
        intent: &PendingIntent,
        transfer: &DecodedTransfer,
        reason: ReviewReason,
        detail: String,
    ) -> Result<ReconcileOutcome> {
        let flag = ReviewFlag {
            intent_id: intent.id,
            tx_hash: transfer.tx_hash.clone(),
            lt: transfer.lt,
            reason,
            asset: transfer.asset,
            amount: transfer.amount.clone(),
            sender: transfer.sender.map(|s| s.to_raw()),
            detail,
        };

        let first_time = self.store.flag_for_review(&flag).await?;
        if first_time {
            warn!(
                intent_id = intent.id,
                memo = %intent.memo,
                reason = %reason,
                tx = %transfer.tx_hash,
                detail = %flag.detail,
                "Payment held for manual review"
            );
            metrics::record_flagged(reason.as_str());
            let text = hooks::admin_review_message(intent, &flag);
            if let Err(e) = self.notifier.notify_admins(&text).await {
                warn!(intent_id = intent.id, error = %e, "Failed to notify admins");
            }
        } else {
            debug!(
                intent_id = intent.id,
                tx = %transfer.tx_hash,
                "Transfer already flagged"
            );
        }

        Ok(ReconcileOutcome::Flagged {
            intent_id: intent.id,
            reason,
            first_time,
        })
    }
}

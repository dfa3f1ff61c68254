//! Ledger invariants
//!
//! Runnable consistency checks over the payment engine's state. The worker
//! runs the full sweep daily; operators can run individual checks after a
//! webhook replay or a manual correction.
//!
//! ## Design Principles
//!
//! 1. **Executable**: each invariant is a real SQL query
//! 2. **Explanatory**: violations carry enough context to debug
//! 3. **Non-destructive**: checks only read, never write

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::PaymentResult;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// Community (or user) affected
    pub subject_ids: Vec<Uuid>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Money is (or can be) wrong
    Critical,
    /// Data inconsistency that needs attention
    High,
    /// Potential issue, should investigate
    Medium,
    /// Informational
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct PendingMismatchRow {
    community_id: Uuid,
    recorded_cents: i64,
    actual_cents: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct AvailableBoundRow {
    community_id: Uuid,
    total_earnings_cents: i64,
    pending_withdrawals_cents: i64,
    available_for_withdrawal_cents: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct MemberCountRow {
    community_id: Uuid,
    recorded_count: i32,
    actual_count: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct UngrantedTransactionRow {
    transaction_id: Uuid,
    community_id: Uuid,
    user_id: Uuid,
}

#[derive(Debug, sqlx::FromRow)]
struct UngrantedPlanRow {
    transaction_id: Uuid,
    user_id: Uuid,
    plan_id: Uuid,
}

#[derive(Debug, sqlx::FromRow)]
struct StaleWithdrawalRow {
    community_id: Uuid,
    reference: String,
    amount_cents: i64,
    created_at: OffsetDateTime,
}

/// Service for running ledger invariant checks
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> PaymentResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_pending_matches_history().await?);
        violations.extend(self.check_available_within_bound().await?);
        violations.extend(self.check_member_count().await?);
        violations.extend(self.check_completed_membership_granted().await?);
        violations.extend(self.check_completed_plan_granted().await?);
        violations.extend(self.check_stale_pending_withdrawals().await?);

        let checks_run = Self::available_checks().len();
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();
        let checks_passed = checks_run - checks_failed;

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Invariant 1: `pending_withdrawals_cents` equals the sum of pending
    /// withdrawal amounts.
    async fn check_pending_matches_history(&self) -> PaymentResult<Vec<InvariantViolation>> {
        let rows: Vec<PendingMismatchRow> = sqlx::query_as(
            r#"
            SELECT
                c.id AS community_id,
                c.pending_withdrawals_cents AS recorded_cents,
                COALESCE(SUM(w.amount_cents) FILTER (WHERE w.status = 'pending'), 0)::BIGINT
                    AS actual_cents
            FROM communities c
            LEFT JOIN withdrawals w ON w.community_id = c.id
            GROUP BY c.id
            HAVING c.pending_withdrawals_cents
                <> COALESCE(SUM(w.amount_cents) FILTER (WHERE w.status = 'pending'), 0)
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "pending_matches_history".to_string(),
                subject_ids: vec![row.community_id],
                description: format!(
                    "Community records {} pending cents but withdrawal history sums to {}",
                    row.recorded_cents, row.actual_cents
                ),
                context: serde_json::json!({
                    "recorded_cents": row.recorded_cents,
                    "actual_cents": row.actual_cents,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 2: `available <= total_earnings - pending_withdrawals`
    async fn check_available_within_bound(&self) -> PaymentResult<Vec<InvariantViolation>> {
        let rows: Vec<AvailableBoundRow> = sqlx::query_as(
            r#"
            SELECT
                id AS community_id,
                total_earnings_cents,
                pending_withdrawals_cents,
                available_for_withdrawal_cents
            FROM communities
            WHERE available_for_withdrawal_cents
                > total_earnings_cents - pending_withdrawals_cents
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "available_within_bound".to_string(),
                subject_ids: vec![row.community_id],
                description: format!(
                    "Available ({}) exceeds total ({}) minus pending ({})",
                    row.available_for_withdrawal_cents,
                    row.total_earnings_cents,
                    row.pending_withdrawals_cents
                ),
                context: serde_json::json!({
                    "total_earnings_cents": row.total_earnings_cents,
                    "pending_withdrawals_cents": row.pending_withdrawals_cents,
                    "available_for_withdrawal_cents": row.available_for_withdrawal_cents,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 3: `member_count` equals the number of active members
    async fn check_member_count(&self) -> PaymentResult<Vec<InvariantViolation>> {
        let rows: Vec<MemberCountRow> = sqlx::query_as(
            r#"
            SELECT
                c.id AS community_id,
                c.member_count AS recorded_count,
                COUNT(m.id) FILTER (WHERE m.status = 'active') AS actual_count
            FROM communities c
            LEFT JOIN community_members m ON m.community_id = c.id
            GROUP BY c.id
            HAVING c.member_count <> COUNT(m.id) FILTER (WHERE m.status = 'active')
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "member_count_consistent".to_string(),
                subject_ids: vec![row.community_id],
                description: format!(
                    "Community records {} members but {} are active",
                    row.recorded_count, row.actual_count
                ),
                context: serde_json::json!({
                    "recorded_count": row.recorded_count,
                    "actual_count": row.actual_count,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 4: every completed community transaction has a matching
    /// active membership carrying its id.
    async fn check_completed_membership_granted(&self) -> PaymentResult<Vec<InvariantViolation>> {
        let rows: Vec<UngrantedTransactionRow> = sqlx::query_as(
            r#"
            SELECT t.id AS transaction_id, t.community_id, t.user_id
            FROM transactions t
            WHERE t.status = 'completed'
              AND t.community_id IS NOT NULL
              AND NOT EXISTS (
                  SELECT 1 FROM community_members m
                  WHERE m.community_id = t.community_id
                    AND m.user_id = t.user_id
                    AND m.sub_transaction_id = t.id
              )
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "completed_membership_granted".to_string(),
                subject_ids: vec![row.community_id],
                description: format!(
                    "Completed transaction {} has no membership carrying it",
                    row.transaction_id
                ),
                context: serde_json::json!({
                    "transaction_id": row.transaction_id,
                    "user_id": row.user_id,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 5: every completed plan transaction left its plan id on the
    /// user (preserved even after expiry).
    async fn check_completed_plan_granted(&self) -> PaymentResult<Vec<InvariantViolation>> {
        let rows: Vec<UngrantedPlanRow> = sqlx::query_as(
            r#"
            SELECT t.id AS transaction_id, t.user_id, t.plan_id
            FROM transactions t
            JOIN users u ON u.id = t.user_id
            WHERE t.status = 'completed'
              AND t.plan_id IS NOT NULL
              AND u.subscription_plan_id IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "completed_plan_granted".to_string(),
                subject_ids: vec![row.user_id],
                description: format!(
                    "Completed plan transaction {} but user carries no plan id",
                    row.transaction_id
                ),
                context: serde_json::json!({
                    "transaction_id": row.transaction_id,
                    "plan_id": row.plan_id,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Operational probe: withdrawals pending for more than seven days
    /// usually mean the external processor lost the callback.
    async fn check_stale_pending_withdrawals(&self) -> PaymentResult<Vec<InvariantViolation>> {
        let rows: Vec<StaleWithdrawalRow> = sqlx::query_as(
            r#"
            SELECT community_id, reference, amount_cents, created_at
            FROM withdrawals
            WHERE status = 'pending'
              AND created_at < NOW() - INTERVAL '7 days'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "stale_pending_withdrawals".to_string(),
                subject_ids: vec![row.community_id],
                description: format!(
                    "Withdrawal {} ({} cents) pending since {}",
                    row.reference, row.amount_cents, row.created_at
                ),
                context: serde_json::json!({
                    "reference": row.reference,
                    "amount_cents": row.amount_cents,
                }),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }

    /// Run a single invariant check by name
    pub async fn run_check(&self, name: &str) -> PaymentResult<Vec<InvariantViolation>> {
        match name {
            "pending_matches_history" => self.check_pending_matches_history().await,
            "available_within_bound" => self.check_available_within_bound().await,
            "member_count_consistent" => self.check_member_count().await,
            "completed_membership_granted" => self.check_completed_membership_granted().await,
            "completed_plan_granted" => self.check_completed_plan_granted().await,
            "stale_pending_withdrawals" => self.check_stale_pending_withdrawals().await,
            _ => Ok(vec![]),
        }
    }

    /// Get list of all available invariant checks
    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "pending_matches_history",
            "available_within_bound",
            "member_count_consistent",
            "completed_membership_granted",
            "completed_plan_granted",
            "stale_pending_withdrawals",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_severity_display() {
        assert_eq!(ViolationSeverity::Critical.to_string(), "CRITICAL");
        assert_eq!(ViolationSeverity::High.to_string(), "HIGH");
        assert_eq!(ViolationSeverity::Medium.to_string(), "MEDIUM");
        assert_eq!(ViolationSeverity::Low.to_string(), "LOW");
    }

    #[test]
    fn test_available_checks() {
        let checks = InvariantChecker::available_checks();
        assert_eq!(checks.len(), 6);
        assert!(checks.contains(&"pending_matches_history"));
        assert!(checks.contains(&"available_within_bound"));
    }
}

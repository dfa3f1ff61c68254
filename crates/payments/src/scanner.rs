//! Expiration scanner
//!
//! Two daily sweeps: closing expired platform subscriptions and paid
//! memberships at midnight, and sending "expiring soon" reminders at 09:00.
//! The clock is injected so both cadences are deterministic under test.
//! Reminders de-duplicate on `(member, sub_end)` via the `reminder_sent_for`
//! marker, so a re-run the same day sends nothing twice.

use std::sync::Arc;

use serde::Serialize;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::email::Notifier;
use crate::error::{PaymentError, PaymentResult};
use crate::store::Store;

/// Reminder window ahead of a membership's end date
const REMINDER_WINDOW_DAYS: i64 = 7;

pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ExpirySweep {
    pub users_expired: u64,
    pub memberships_expired: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ReminderSweep {
    pub sent: u64,
    pub failed: u64,
}

#[derive(Debug, sqlx::FromRow)]
struct ReminderRow {
    member_id: Uuid,
    sub_end: OffsetDateTime,
    email: String,
    community_name: String,
}

pub struct ExpirationScanner {
    store: Store,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl ExpirationScanner {
    pub fn new(store: Store, notifier: Arc<dyn Notifier>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            notifier,
            clock,
        }
    }

    /// Close everything whose paid period has ended.
    ///
    /// Platform subscriptions flip to inactive with the plan id preserved
    /// for audit; paid memberships flip `sub_is_active` off but the member
    /// row remains. Members with `sub_end IS NULL` hold lifetime access and
    /// are never touched.
    pub async fn close_expired(&self) -> PaymentResult<ExpirySweep> {
        let now = self.clock.now();

        let users = sqlx::query(
            "UPDATE users SET subscription_status = 'inactive', golden_tick = FALSE, \
             subscription_expiry = NULL, updated_at = $1 \
             WHERE subscription_status = 'active' AND subscription_expiry <= $1",
        )
        .bind(now)
        .execute(self.store.pool())
        .await
        .map_err(PaymentError::from)?
        .rows_affected();

        let memberships = sqlx::query(
            "UPDATE community_members SET sub_is_active = FALSE, updated_at = $1 \
             WHERE sub_is_active = TRUE AND sub_end IS NOT NULL AND sub_end <= $1",
        )
        .bind(now)
        .execute(self.store.pool())
        .await
        .map_err(PaymentError::from)?
        .rows_affected();

        let sweep = ExpirySweep {
            users_expired: users,
            memberships_expired: memberships,
        };
        tracing::info!(
            users_expired = sweep.users_expired,
            memberships_expired = sweep.memberships_expired,
            "Expiration sweep complete"
        );
        Ok(sweep)
    }

    /// Send one reminder per member whose paid membership ends within the
    /// next seven days. Errors notifying one member never stop the sweep.
    pub async fn send_expiry_reminders(&self) -> PaymentResult<ReminderSweep> {
        let now = self.clock.now();
        let horizon = now + Duration::days(REMINDER_WINDOW_DAYS);

        let due: Vec<ReminderRow> = sqlx::query_as(
            "SELECT m.id AS member_id, m.sub_end, u.email, c.name AS community_name \
             FROM community_members m \
             JOIN communities c ON c.id = m.community_id \
             JOIN users u ON u.id = m.user_id \
             WHERE c.is_paid_community = TRUE \
               AND m.sub_is_active = TRUE \
               AND m.sub_end IS NOT NULL \
               AND m.sub_end > $1 AND m.sub_end <= $2 \
               AND (m.reminder_sent_for IS NULL OR m.reminder_sent_for <> m.sub_end)",
        )
        .bind(now)
        .bind(horizon)
        .fetch_all(self.store.pool())
        .await
        .map_err(PaymentError::from)?;

        let mut sweep = ReminderSweep::default();
        for row in due {
            let days_left = days_until(row.sub_end, now);
            match self
                .notifier
                .send_expiration_reminder(&row.email, &row.community_name, days_left)
                .await
            {
                Ok(()) => {
                    // Marker written only after a successful send: a re-run
                    // retries failures and skips successes
                    let marked = sqlx::query(
                        "UPDATE community_members SET reminder_sent_for = $1, updated_at = $2 \
                         WHERE id = $3",
                    )
                    .bind(row.sub_end)
                    .bind(now)
                    .bind(row.member_id)
                    .execute(self.store.pool())
                    .await;
                    if let Err(e) = marked {
                        tracing::error!(
                            member_id = %row.member_id,
                            error = %e,
                            "Reminder sent but marker write failed"
                        );
                    }
                    sweep.sent += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        member_id = %row.member_id,
                        error = %e,
                        "Failed to send expiry reminder"
                    );
                    sweep.failed += 1;
                }
            }
        }

        tracing::info!(
            sent = sweep.sent,
            failed = sweep.failed,
            "Reminder sweep complete"
        );
        Ok(sweep)
    }
}

/// Whole days until `end`, rounded up, never below 1
pub(crate) fn days_until(end: OffsetDateTime, now: OffsetDateTime) -> i64 {
    let secs = (end - now).whole_seconds();
    ((secs + 86_399) / 86_400).max(1)
}

/// The reminder-due predicate, mirrored from the sweep's SQL
pub(crate) fn reminder_due(
    sub_is_active: bool,
    sub_end: Option<OffsetDateTime>,
    reminder_sent_for: Option<OffsetDateTime>,
    now: OffsetDateTime,
) -> bool {
    let Some(end) = sub_end else {
        // lifetime membership: nothing to remind about
        return false;
    };
    sub_is_active
        && end > now
        && end <= now + Duration::days(REMINDER_WINDOW_DAYS)
        && reminder_sent_for != Some(end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2024-04-01 09:00:00 UTC);

    #[test]
    fn days_until_rounds_up() {
        assert_eq!(days_until(NOW + Duration::hours(1), NOW), 1);
        assert_eq!(days_until(NOW + Duration::days(3), NOW), 3);
        assert_eq!(days_until(NOW + Duration::hours(73), NOW), 4);
    }

    #[test]
    fn reminder_window_is_seven_days() {
        assert!(reminder_due(true, Some(NOW + Duration::days(7)), None, NOW));
        assert!(!reminder_due(true, Some(NOW + Duration::days(8)), None, NOW));
        // already past: the expiry sweep handles it, not a reminder
        assert!(!reminder_due(true, Some(NOW - Duration::hours(1)), None, NOW));
    }

    #[test]
    fn reminder_deduplicates_per_end_date() {
        let end = NOW + Duration::days(3);
        assert!(reminder_due(true, Some(end), None, NOW));
        assert!(!reminder_due(true, Some(end), Some(end), NOW));
        // a renewal moved the end date: the old marker no longer suppresses
        let prev_end = NOW - Duration::days(25);
        assert!(reminder_due(true, Some(end), Some(prev_end), NOW));
    }

    #[test]
    fn lifetime_and_inactive_memberships_are_skipped() {
        assert!(!reminder_due(true, None, None, NOW));
        assert!(!reminder_due(false, Some(NOW + Duration::days(2)), None, NOW));
    }
}

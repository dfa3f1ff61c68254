//! Edge Case Tests for the Payment Engine
//!
//! Tests critical boundary conditions in:
//! - Payment references (PAY-R01 to PAY-R04)
//! - Ledger balance transitions (PAY-L01 to PAY-L08)
//! - Completion fencing (PAY-F01 to PAY-F03)
//! - Webhook signatures and events (PAY-W01 to PAY-W08)
//! - Subscription durations and liveness (PAY-D01 to PAY-D06)
//! - Error classification (PAY-E01 to PAY-E03)

#[cfg(test)]
mod reference_tests {
    use crate::pipeline::mint_reference;
    use time::macros::datetime;
    use uuid::Uuid;

    // =========================================================================
    // PAY-R01: Reference carries prefix, millisecond timestamp, id fragment
    // =========================================================================
    #[test]
    fn test_reference_shape() {
        let now = datetime!(2024-06-15 08:30:00.250 UTC);
        let id = Uuid::new_v4();
        let reference = mint_reference("WDR", id, now);

        let parts: Vec<&str> = reference.splitn(3, '-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "WDR");
        assert_eq!(parts[1].parse::<i128>().unwrap(), 1_718_440_200_250);
        assert_eq!(parts[2], &id.to_string()[..6]);
    }

    // =========================================================================
    // PAY-R02: Same millisecond + same scope = identical reference. The
    // unique index catches this; the pipeline re-mints on the next attempt.
    // =========================================================================
    #[test]
    fn test_same_instant_collides() {
        let now = datetime!(2024-06-15 08:30:00 UTC);
        let id = Uuid::new_v4();
        assert_eq!(mint_reference("COMM", id, now), mint_reference("COMM", id, now));
    }

    // =========================================================================
    // PAY-R03: Different scopes never collide even at the same instant
    // =========================================================================
    #[test]
    fn test_different_scopes_distinct() {
        let now = datetime!(2024-06-15 08:30:00 UTC);
        let a = mint_reference("SUB", Uuid::new_v4(), now);
        let b = mint_reference("SUB", Uuid::new_v4(), now);
        assert_ne!(a, b);
    }

    // =========================================================================
    // PAY-R04: Membership and plan references are distinguishable by prefix
    // =========================================================================
    #[test]
    fn test_prefix_discriminates_target() {
        let now = datetime!(2024-06-15 08:30:00 UTC);
        let id = Uuid::new_v4();
        assert!(mint_reference("COMM", id, now).starts_with("COMM-"));
        assert!(mint_reference("SUB", id, now).starts_with("SUB-"));
    }
}

#[cfg(test)]
mod balance_tests {
    use crate::error::PaymentError;
    use crate::ledger::CommunityBalances;

    fn balances(total: i64, pending: i64, available: i64) -> CommunityBalances {
        CommunityBalances {
            total_earnings_cents: total,
            pending_withdrawals_cents: pending,
            available_for_withdrawal_cents: available,
        }
    }

    // =========================================================================
    // PAY-L01: Request + successful completion (100 → request 30 → success)
    // =========================================================================
    #[test]
    fn test_withdrawal_happy_path() {
        let b = balances(100, 0, 100).request_withdrawal(30).unwrap();
        assert_eq!(b.pending_withdrawals_cents, 30);
        assert_eq!(b.available_for_withdrawal_cents, 70);

        let b = b.complete_withdrawal(30, true);
        assert_eq!(b.pending_withdrawals_cents, 0);
        assert_eq!(b.available_for_withdrawal_cents, 70);
        assert_eq!(b.total_earnings_cents, 100);
    }

    // =========================================================================
    // PAY-L02: Failed completion returns funds (100 → request 40 → failure)
    // =========================================================================
    #[test]
    fn test_withdrawal_failure_restores_available() {
        let b = balances(100, 0, 100).request_withdrawal(40).unwrap();
        assert_eq!(b.available_for_withdrawal_cents, 60);

        let b = b.complete_withdrawal(40, false);
        assert_eq!(b.pending_withdrawals_cents, 0);
        assert_eq!(b.available_for_withdrawal_cents, 100);
    }

    // =========================================================================
    // PAY-L03: Withdrawing the entire available balance is allowed
    // =========================================================================
    #[test]
    fn test_full_balance_withdrawal() {
        let b = balances(500, 0, 500).request_withdrawal(500).unwrap();
        assert_eq!(b.available_for_withdrawal_cents, 0);
        assert_eq!(b.pending_withdrawals_cents, 500);
    }

    // =========================================================================
    // PAY-L04: One cent over the available balance is rejected
    // =========================================================================
    #[test]
    fn test_one_cent_over_rejected() {
        let err = balances(500, 0, 500).request_withdrawal(501).unwrap_err();
        assert!(matches!(
            err,
            PaymentError::InsufficientBalance {
                requested_cents: 501,
                available_cents: 500,
            }
        ));
    }

    // =========================================================================
    // PAY-L05: A pending withdrawal shrinks what a second request can take
    // =========================================================================
    #[test]
    fn test_pending_reserves_against_second_request() {
        let b = balances(100, 0, 100).request_withdrawal(80).unwrap();
        let err = b.request_withdrawal(30).unwrap_err();
        assert!(matches!(err, PaymentError::InsufficientBalance { .. }));
        assert!(b.request_withdrawal(20).is_ok());
    }

    // =========================================================================
    // PAY-L06: Payment credit during a pending withdrawal raises available
    // without touching pending
    // =========================================================================
    #[test]
    fn test_credit_while_withdrawal_pending() {
        let b = balances(100, 0, 100)
            .request_withdrawal(100)
            .unwrap()
            .credit_payment(25);
        assert_eq!(b.total_earnings_cents, 125);
        assert_eq!(b.pending_withdrawals_cents, 100);
        assert_eq!(b.available_for_withdrawal_cents, 25);
    }

    // =========================================================================
    // PAY-L07: Available never exceeds total minus pending across a long
    // interleaving of credits, requests, and both completion outcomes
    // =========================================================================
    #[test]
    fn test_conservation_across_interleaving() {
        let mut b = balances(0, 0, 0);
        let mut completed = 0i64;

        let steps: &[(&str, i64, bool)] = &[
            ("credit", 1000, true),
            ("request", 300, true),
            ("credit", 500, true),
            ("request", 700, true),
            ("complete", 300, true),
            ("complete", 700, false),
            ("request", 1200, true),
            ("complete", 1200, true),
        ];
        for &(op, amount, success) in steps {
            b = match op {
                "credit" => b.credit_payment(amount),
                "request" => b.request_withdrawal(amount).unwrap(),
                "complete" => {
                    if success {
                        completed += amount;
                    }
                    b.complete_withdrawal(amount, success)
                }
                _ => unreachable!(),
            };
            assert!(
                b.available_for_withdrawal_cents
                    <= b.total_earnings_cents - b.pending_withdrawals_cents,
                "bound violated after {op} {amount}"
            );
        }

        assert_eq!(b.total_earnings_cents, 1500);
        assert_eq!(b.pending_withdrawals_cents, 0);
        assert_eq!(b.available_for_withdrawal_cents, 1500 - completed);
    }

    // =========================================================================
    // PAY-L08: Total earnings only ever grows
    // =========================================================================
    #[test]
    fn test_total_is_monotonic() {
        let b = balances(100, 0, 100);
        let after = b
            .request_withdrawal(100)
            .unwrap()
            .complete_withdrawal(100, true)
            .credit_payment(1);
        assert!(after.total_earnings_cents >= b.total_earnings_cents);
    }
}

#[cfg(test)]
mod fence_tests {
    use crate::pipeline::{completion_action, CompletionAction};

    // =========================================================================
    // PAY-F01: Only a pending transaction may apply side effects
    // =========================================================================
    #[test]
    fn test_pending_applies() {
        assert_eq!(completion_action("pending"), CompletionAction::Apply);
    }

    // =========================================================================
    // PAY-F02: A completed transaction reports already-processed, so the
    // loser of a verify/webhook race observes the winner's commit
    // =========================================================================
    #[test]
    fn test_completed_is_already_processed() {
        assert_eq!(
            completion_action("completed"),
            CompletionAction::AlreadyProcessed
        );
    }

    // =========================================================================
    // PAY-F03: Failed (or any unknown) status never applies
    // =========================================================================
    #[test]
    fn test_terminal_states_refuse() {
        assert_eq!(completion_action("failed"), CompletionAction::Refuse);
        assert_eq!(completion_action("void"), CompletionAction::Refuse);
    }
}

#[cfg(test)]
mod webhook_tests {
    use crate::gateway::WebhookEvent;
    use crate::paystack::PaystackGateway;
    use aeko_shared::PaymentMethod;

    fn event(event_type: &str) -> WebhookEvent {
        WebhookEvent {
            event_type: event_type.to_string(),
            reference: None,
            transaction_id: None,
        }
    }

    // =========================================================================
    // PAY-W01: Paystack only completes payments on charge.success
    // =========================================================================
    #[test]
    fn test_paystack_event_filter() {
        assert!(event("charge.success").is_payment_success(PaymentMethod::Paystack));
        assert!(!event("transfer.success").is_payment_success(PaymentMethod::Paystack));
        assert!(!event("subscription.create").is_payment_success(PaymentMethod::Paystack));
    }

    // =========================================================================
    // PAY-W02: Stripe completes on payment_intent.succeeded and
    // checkout.session.completed, nothing else
    // =========================================================================
    #[test]
    fn test_stripe_event_filter() {
        assert!(event("payment_intent.succeeded").is_payment_success(PaymentMethod::Stripe));
        assert!(event("checkout.session.completed").is_payment_success(PaymentMethod::Stripe));
        assert!(!event("payment_intent.created").is_payment_success(PaymentMethod::Stripe));
        assert!(!event("charge.refunded").is_payment_success(PaymentMethod::Stripe));
    }

    // =========================================================================
    // PAY-W03: An event routed through the wrong gateway never completes
    // =========================================================================
    #[test]
    fn test_cross_gateway_events_rejected() {
        assert!(!event("charge.success").is_payment_success(PaymentMethod::Stripe));
        assert!(!event("payment_intent.succeeded").is_payment_success(PaymentMethod::Paystack));
        assert!(!event("charge.success").is_payment_success(PaymentMethod::AekoWallet));
    }

    // =========================================================================
    // PAY-W04: Paystack signatures compare case-insensitively (providers
    // differ in hex casing)
    // =========================================================================
    #[test]
    fn test_paystack_signature_case_insensitive() {
        let gw = PaystackGateway::new("sk_test_secret", "https://app.aeko.test").unwrap();
        let body = br#"{"event":"charge.success","data":{"reference":"COMM-1-abc123"}}"#;
        let signature = PaystackGateway::sign("sk_test_secret", body).to_uppercase();
        assert!(gw.verify_webhook(body, &signature).is_ok());
    }

    // =========================================================================
    // PAY-W05: A single flipped byte in the body invalidates the signature
    // =========================================================================
    #[test]
    fn test_paystack_single_byte_tamper() {
        let gw = PaystackGateway::new("sk_test_secret", "https://app.aeko.test").unwrap();
        let body = br#"{"event":"charge.success","data":{"reference":"COMM-1-abc123"}}"#;
        let signature = PaystackGateway::sign("sk_test_secret", body);

        let mut tampered = body.to_vec();
        // bump one digit of the reference
        let pos = tampered.iter().position(|&b| b == b'1').unwrap();
        tampered[pos] = b'2';
        assert!(gw.verify_webhook(&tampered, &signature).is_err());
    }

    // =========================================================================
    // PAY-W06: Payload without metadata still parses; transaction id absent
    // =========================================================================
    #[test]
    fn test_paystack_minimal_payload() {
        let gw = PaystackGateway::new("sk_test_secret", "https://app.aeko.test").unwrap();
        let body = br#"{"event":"charge.success"}"#;
        let signature = PaystackGateway::sign("sk_test_secret", body);

        let event = gw.verify_webhook(body, &signature).unwrap();
        assert_eq!(event.event_type, "charge.success");
        assert!(event.reference.is_none());
        assert!(event.transaction_id.is_none());
    }

    // =========================================================================
    // PAY-W07: Non-uuid transaction id in metadata is ignored, not an error
    // =========================================================================
    #[test]
    fn test_paystack_garbage_transaction_id() {
        let gw = PaystackGateway::new("sk_test_secret", "https://app.aeko.test").unwrap();
        let body = serde_json::json!({
            "event": "charge.success",
            "data": {
                "reference": "COMM-1-abc123",
                "metadata": { "transaction_id": "not-a-uuid" }
            }
        })
        .to_string();
        let signature = PaystackGateway::sign("sk_test_secret", body.as_bytes());

        let event = gw.verify_webhook(body.as_bytes(), &signature).unwrap();
        assert!(event.transaction_id.is_none());
        assert_eq!(event.reference.as_deref(), Some("COMM-1-abc123"));
    }

    // =========================================================================
    // PAY-W08: Verification outcomes serialize with the wire field names the
    // return-URL client expects
    // =========================================================================
    #[test]
    fn test_outcome_wire_shape() {
        let outcome = crate::pipeline::VerificationOutcome {
            success: true,
            already_processed: true,
            reference: Some("COMM-1-abc123".to_string()),
            message: None,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["alreadyProcessed"], true);
        assert_eq!(json["reference"], "COMM-1-abc123");
        assert!(json.get("message").is_none());
    }
}

#[cfg(test)]
mod liveness_tests {
    use crate::store::{MemberRow, UserRow};
    use aeko_shared::{BillingInterval, PlanDuration};
    use time::macros::datetime;
    use time::{Duration, OffsetDateTime};
    use uuid::Uuid;

    const NOW: OffsetDateTime = datetime!(2024-06-15 12:00:00 UTC);

    fn member(sub_is_active: bool, sub_end: Option<OffsetDateTime>) -> MemberRow {
        MemberRow {
            id: Uuid::new_v4(),
            community_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            role: "member".to_string(),
            status: "active".to_string(),
            joined_at: NOW - Duration::days(100),
            sub_type: Some("monthly".to_string()),
            sub_start: Some(NOW - Duration::days(100)),
            sub_end,
            sub_is_active,
            sub_payment_method: Some("stripe".to_string()),
            sub_transaction_id: Some(Uuid::new_v4()),
            reminder_sent_for: None,
        }
    }

    // =========================================================================
    // PAY-D01: Monthly membership runs 30 fixed days, yearly 365
    // =========================================================================
    #[test]
    fn test_interval_lengths() {
        assert_eq!(BillingInterval::Monthly.period(), Some(Duration::days(30)));
        assert_eq!(BillingInterval::Yearly.period(), Some(Duration::days(365)));
        assert_eq!(PlanDuration::Monthly.period(), Duration::days(30));
    }

    // =========================================================================
    // PAY-D02: One-time purchase has no period: lifetime access
    // =========================================================================
    #[test]
    fn test_one_time_is_lifetime() {
        assert!(BillingInterval::OneTime.period().is_none());
        assert!(member(true, None).has_live_subscription(NOW));
        assert!(member(true, None).has_live_subscription(NOW + Duration::days(10_000)));
    }

    // =========================================================================
    // PAY-D03: An end date in the past makes the membership dead even before
    // the nightly sweep flips the flag
    // =========================================================================
    #[test]
    fn test_lazy_expiry() {
        let expired = member(true, Some(NOW - Duration::seconds(1)));
        assert!(!expired.has_live_subscription(NOW));
    }

    // =========================================================================
    // PAY-D04: End date exactly now is expired; one second later than now is
    // still live
    // =========================================================================
    #[test]
    fn test_expiry_boundary() {
        assert!(!member(true, Some(NOW)).has_live_subscription(NOW));
        assert!(member(true, Some(NOW + Duration::seconds(1))).has_live_subscription(NOW));
    }

    // =========================================================================
    // PAY-D05: A swept membership stays dead regardless of end date
    // =========================================================================
    #[test]
    fn test_inactive_flag_wins() {
        assert!(!member(false, Some(NOW + Duration::days(30))).has_live_subscription(NOW));
        assert!(!member(false, None).has_live_subscription(NOW));
    }

    // =========================================================================
    // PAY-D06: Platform subscription liveness requires both the status flag
    // and an unexpired expiry (no lifetime plans)
    // =========================================================================
    #[test]
    fn test_user_subscription_liveness() {
        let user = |status: &str, expiry: Option<OffsetDateTime>| UserRow {
            id: Uuid::new_v4(),
            email: "u@x".to_string(),
            subscription_plan_id: Some(Uuid::new_v4()),
            subscription_status: status.to_string(),
            subscription_expiry: expiry,
            golden_tick: true,
        };

        assert!(user("active", Some(NOW + Duration::days(1))).has_live_subscription(NOW));
        assert!(!user("active", Some(NOW - Duration::days(1))).has_live_subscription(NOW));
        assert!(!user("active", None).has_live_subscription(NOW));
        assert!(!user("inactive", Some(NOW + Duration::days(1))).has_live_subscription(NOW));
    }
}

#[cfg(test)]
mod error_tests {
    use crate::error::PaymentError;
    use std::str::FromStr;

    // =========================================================================
    // PAY-E01: Only optimistic-concurrency conflicts are re-runnable inside
    // the store transaction loop
    // =========================================================================
    #[test]
    fn test_retriable_classification() {
        assert!(PaymentError::Conflict("serialization failure".into()).is_retriable_conflict());
        for err in [
            PaymentError::DuplicateReference("COMM-1-abc".into()),
            PaymentError::NotPending("WDR-1-abc".into()),
            PaymentError::ProviderTransient("503".into()),
            PaymentError::Validation("bad".into()),
        ] {
            assert!(!err.is_retriable_conflict(), "{err} must not re-run");
        }
    }

    // =========================================================================
    // PAY-E02: Unknown enum text from a request body surfaces as validation
    // =========================================================================
    #[test]
    fn test_enum_parse_maps_to_validation() {
        let parse_err = aeko_shared::PaymentMethod::from_str("venmo").unwrap_err();
        let err: PaymentError = parse_err.into();
        assert!(matches!(err, PaymentError::Validation(_)));
    }

    // =========================================================================
    // PAY-E03: Insufficient balance reports both sides of the comparison
    // =========================================================================
    #[test]
    fn test_insufficient_balance_message() {
        let err = PaymentError::InsufficientBalance {
            requested_cents: 5000,
            available_cents: 1200,
        };
        let msg = err.to_string();
        assert!(msg.contains("5000"));
        assert!(msg.contains("1200"));
    }
}

//! Core domain enums
//!
//! All variants are persisted as lowercase snake_case text columns; the
//! database layer binds `as_str()` and parses with `FromStr` so schema
//! values and wire values stay identical.

use serde::{Deserialize, Serialize};

/// Error returned when a persisted or user-supplied enum value is unknown
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! text_enum {
    ($(#[$doc:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant,)+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(ParseEnumError {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

text_enum! {
    /// Payment gateway selected by the member at checkout.
    ///
    /// `aeko_wallet` is a valid community configuration value but has no
    /// registered gateway in this engine; initializing with it is rejected
    /// as unavailable.
    PaymentMethod {
        Paystack => "paystack",
        Stripe => "stripe",
        AekoWallet => "aeko_wallet",
    }
}

text_enum! {
    /// Billing cadence of a paid community.
    BillingInterval {
        OneTime => "one_time",
        Monthly => "monthly",
        Yearly => "yearly",
    }
}

text_enum! {
    /// Billing cadence of a platform subscription plan.
    PlanDuration {
        Monthly => "monthly",
        Yearly => "yearly",
    }
}

text_enum! {
    TransactionStatus {
        Pending => "pending",
        Completed => "completed",
        Failed => "failed",
    }
}

text_enum! {
    MemberRole {
        Owner => "owner",
        Moderator => "moderator",
        Member => "member",
    }
}

text_enum! {
    MemberStatus {
        Pending => "pending",
        Active => "active",
        Banned => "banned",
    }
}

text_enum! {
    WithdrawalStatus {
        Pending => "pending",
        Completed => "completed",
        Failed => "failed",
    }
}

text_enum! {
    /// Platform ("golden tick") subscription status on a user.
    SubscriptionStatus {
        Active => "active",
        Inactive => "inactive",
    }
}

impl BillingInterval {
    /// Length of one paid period. `None` means lifetime access: a
    /// one-time purchase never expires.
    pub fn period(&self) -> Option<time::Duration> {
        match self {
            BillingInterval::OneTime => None,
            BillingInterval::Monthly => Some(time::Duration::days(30)),
            BillingInterval::Yearly => Some(time::Duration::days(365)),
        }
    }
}

impl PlanDuration {
    pub fn period(&self) -> time::Duration {
        match self {
            PlanDuration::Monthly => time::Duration::days(30),
            PlanDuration::Yearly => time::Duration::days(365),
        }
    }
}

use serde::Deserialize;

use super::users::{TaskKind, UserRecord};

/// Body of POST /api/referral.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemRequest {
    pub referrer_code: String,
    pub new_user_address: String,
    pub reward_amount: Option<u64>,
}

/// Body of POST /api/task.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    pub wallet_address: String,
    pub task_type: TaskKind,
}

/// Business-rule rejection. These are outcomes, not errors: callers branch
/// on them and surface the message to the user as-is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    InvalidCode,
    SelfReferral,
    AlreadyReferred,
    NoChange,
    InvalidAmount,
}

impl Rejection {
    pub fn message(self) -> &'static str {
        match self {
            Rejection::InvalidCode => "Referral code is not valid",
            Rejection::SelfReferral => "You cannot use your own referral code",
            Rejection::AlreadyReferred => "This address has already been referred",
            Rejection::NoChange => "Task is already completed",
            Rejection::InvalidAmount => "Reward amount is not valid",
        }
    }
}

#[derive(Clone, Debug)]
pub enum ReferralOutcome {
    Granted {
        referrer: UserRecord,
        new_user: UserRecord,
    },
    Rejected(Rejection),
}

#[derive(Clone, Debug)]
pub enum TaskOutcome {
    Granted { user: UserRecord, reward: u64 },
    Rejected(Rejection),
}

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One-time social actions that unlock a fixed token reward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Twitter,
    Discord,
    Telegram,
    Share,
    Retweet,
    Like,
    Reply,
}

impl TaskKind {
    pub const ALL: [TaskKind; 7] = [
        TaskKind::Twitter,
        TaskKind::Discord,
        TaskKind::Telegram,
        TaskKind::Share,
        TaskKind::Retweet,
        TaskKind::Like,
        TaskKind::Reply,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Twitter => "twitter",
            TaskKind::Discord => "discord",
            TaskKind::Telegram => "telegram",
            TaskKind::Share => "share",
            TaskKind::Retweet => "retweet",
            TaskKind::Like => "like",
            TaskKind::Reply => "reply",
        }
    }

    /// Fixed one-time reward for completing the task.
    pub fn reward(self) -> u64 {
        match self {
            TaskKind::Twitter => 50,
            TaskKind::Discord => 100,
            TaskKind::Telegram => 75,
            TaskKind::Share => 25,
            TaskKind::Retweet => 30,
            TaskKind::Like => 20,
            TaskKind::Reply => 40,
        }
    }
}

/// One record per wallet address, stored at `users/{lowercased_address}.json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub wallet_address: String,
    pub token_balance: u64,
    pub referral_code: String,
    #[serde(default)]
    pub referral_count: u64,
    #[serde(default)]
    pub referrals: Vec<String>,
    #[serde(default)]
    pub tasks: BTreeMap<String, bool>,
    #[serde(default = "unknown_version")]
    pub schema_version: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    /// Stored fields we do not model; carried through read-modify-write
    /// untouched so older and newer clients can coexist.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn unknown_version() -> String {
    crate::schema::UNKNOWN_VERSION.to_string()
}

impl UserRecord {
    pub fn new(wallet_address: &str, initial_grant: u64) -> Self {
        let address = wallet_address.to_lowercase();
        let now = Utc::now();

        UserRecord {
            referral_code: referral_code_for(&address),
            wallet_address: address,
            token_balance: initial_grant,
            referral_count: 0,
            referrals: Vec::new(),
            tasks: TaskKind::ALL
                .iter()
                .map(|task| (task.as_str().to_string(), false))
                .collect(),
            schema_version: crate::schema::SCHEMA_VERSION.to_string(),
            created_at: now,
            last_updated: now,
            extra: Map::new(),
        }
    }

    pub fn task_done(&self, task: TaskKind) -> bool {
        self.tasks.get(task.as_str()).copied().unwrap_or(false)
    }

    pub fn has_referred(&self, address: &str) -> bool {
        self.referrals
            .iter()
            .any(|referred| referred.eq_ignore_ascii_case(address))
    }
}

/// Last 8 characters of the lowercased address. Uniqueness rides on the
/// address space; collisions are not handled.
pub fn referral_code_for(address: &str) -> String {
    let lower = address.to_lowercase();
    let start = lower
        .char_indices()
        .rev()
        .nth(7)
        .map(|(i, _)| i)
        .unwrap_or(0);
    lower[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn referral_code_is_lowercased_address_tail() {
        assert_eq!(
            referral_code_for("0x52908400098527886E0F7030069857D2E4169EE7"),
            "e4169ee7"
        );
        assert_eq!(referral_code_for("0xabc"), "0xabc");
    }

    #[test]
    fn new_record_carries_initial_grant_and_open_tasks() {
        let user = UserRecord::new("0xABCDEF0123456789", 2000);
        assert_eq!(user.wallet_address, "0xabcdef0123456789");
        assert_eq!(user.token_balance, 2000);
        assert_eq!(user.referral_code, "23456789");
        assert_eq!(user.tasks.len(), TaskKind::ALL.len());
        assert!(TaskKind::ALL.iter().all(|task| !user.task_done(*task)));
    }

    #[test]
    fn record_round_trips_with_camel_case_wire_names() {
        let user = UserRecord::new("0xABCDEF0123456789", 2000);
        let doc = serde_json::to_value(&user).unwrap();
        assert!(doc.get("walletAddress").is_some());
        assert!(doc.get("tokenBalance").is_some());
        assert!(doc.get("schemaVersion").is_some());

        let back: UserRecord = serde_json::from_value(doc).unwrap();
        assert_eq!(back.wallet_address, user.wallet_address);
        assert_eq!(back.referral_code, user.referral_code);
    }

    #[test]
    fn unknown_stored_fields_survive_a_round_trip() {
        let doc = serde_json::json!({
            "walletAddress": "0xabc123456789",
            "tokenBalance": 2000,
            "referralCode": "23456789",
            "createdAt": "2024-01-01T00:00:00Z",
            "lastUpdated": "2024-01-01T00:00:00Z",
            "customField": "kept",
        });

        let user: UserRecord = serde_json::from_value(doc).unwrap();
        let out = serde_json::to_value(&user).unwrap();
        assert_eq!(out["customField"], serde_json::json!("kept"));
    }
}

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use crate::models::users::{referral_code_for, UserRecord};
use crate::repositories::storage::{ObjectMetadata, StorageBackend, StoreError};
use crate::schema;

const USER_PREFIX: &str = "users/";

/// Report returned by the manual migration trigger.
#[derive(Clone, Debug)]
pub struct MigrationReport {
    pub previous_version: String,
    pub current_version: String,
}

/// Maps wallet addresses to stored records. All mutation is read-modify-write
/// without versioning: callers must read immediately before writing and
/// tolerate lost updates under concurrent writers.
#[derive(Clone)]
pub struct UserRepository {
    store: Arc<dyn StorageBackend>,
    initial_grant: u64,
}

fn user_key(address: &str) -> String {
    format!("{}{}.json", USER_PREFIX, address.to_lowercase())
}

fn address_of(key: &str) -> Option<&str> {
    key.strip_prefix(USER_PREFIX)?.strip_suffix(".json")
}

impl UserRepository {
    pub fn new(store: Arc<dyn StorageBackend>, initial_grant: u64) -> Self {
        UserRepository {
            store,
            initial_grant,
        }
    }

    /// Fetches the record for `address`, creating a default one on first
    /// read and upgrading stale records in place.
    pub async fn get_user(&self, address: &str) -> Result<UserRecord, StoreError> {
        let key = user_key(address);

        match self.store.get(&key).await? {
            Some(mut doc) => {
                let template = schema::template(address, self.initial_grant);
                if schema::migrate(&mut doc, &template) {
                    // The caller still gets the upgraded in-memory record if
                    // the persist-back fails; migration never fails a read.
                    if let Err(e) = self.persist(&key, &mut doc).await {
                        log::warn!("could not persist migrated record {}: {}", key, e);
                    }
                }
                decode(&key, doc)
            }
            None => {
                let record = UserRecord::new(address, self.initial_grant);
                let mut doc = encode(&key, &record)?;
                self.persist(&key, &mut doc).await?;
                decode(&key, doc)
            }
        }
    }

    /// Overwrite write: stamps `lastUpdated`, canonicalizes the address and
    /// persists verbatim. No optimistic-concurrency check.
    pub async fn put_user(
        &self,
        address: &str,
        mut record: UserRecord,
    ) -> Result<UserRecord, StoreError> {
        let key = user_key(address);
        record.wallet_address = address.to_lowercase();
        record.last_updated = Utc::now();

        let doc = encode(&key, &record)?;
        let meta = ObjectMetadata::from_doc(&doc);
        self.store.put(&key, &doc, &meta).await?;

        Ok(record)
    }

    /// Finds the user whose referral code matches `code`. Linear scan over
    /// the whole bucket; fine at this data size, a real secondary index is
    /// the first thing to add beyond it.
    pub async fn find_by_referral_code(
        &self,
        code: &str,
    ) -> Result<Option<UserRecord>, StoreError> {
        let code = code.to_lowercase();

        for key in self.store.list(USER_PREFIX).await? {
            let Some(doc) = self.fetch_lenient(&key).await? else {
                continue;
            };
            let Some(address) = address_of(&key) else {
                continue;
            };

            // Records predating the referralCode field fall back to the
            // address-derived code.
            let record_code = doc
                .get("referralCode")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .unwrap_or_else(|| referral_code_for(address));

            if record_code.eq_ignore_ascii_case(&code) {
                return self.get_user(address).await.map(Some);
            }
        }

        Ok(None)
    }

    /// Whether `address` already appears in any user's referral list (the
    /// global double-redemption guard).
    pub async fn is_referred(&self, address: &str) -> Result<bool, StoreError> {
        let address = address.to_lowercase();

        for key in self.store.list(USER_PREFIX).await? {
            let Some(doc) = self.fetch_lenient(&key).await? else {
                continue;
            };

            let referred = doc
                .get("referrals")
                .and_then(Value::as_array)
                .map(|list| {
                    list.iter()
                        .filter_map(Value::as_str)
                        .any(|referred| referred.eq_ignore_ascii_case(&address))
                })
                .unwrap_or(false);
            if referred {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Full scan to an address→record map (admin surface). Unparseable
    /// records are skipped, not fatal.
    pub async fn all_users(&self) -> Result<BTreeMap<String, UserRecord>, StoreError> {
        let mut users = BTreeMap::new();

        for key in self.store.list(USER_PREFIX).await? {
            let Some(address) = address_of(&key) else {
                continue;
            };
            match self.get_user(address).await {
                Ok(record) => {
                    users.insert(record.wallet_address.clone(), record);
                }
                Err(StoreError::Parse { key, reason }) => {
                    log::warn!("skipping unparseable record {}: {}", key, reason);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(users)
    }

    /// Manual migration trigger. Returns `None` for unknown addresses;
    /// unlike the read path it must not create accounts.
    pub async fn migrate_user(
        &self,
        address: &str,
    ) -> Result<Option<MigrationReport>, StoreError> {
        let key = user_key(address);
        let Some(mut doc) = self.store.get(&key).await? else {
            return Ok(None);
        };

        let previous = doc
            .get("schemaVersion")
            .and_then(Value::as_str)
            .unwrap_or(schema::UNKNOWN_VERSION)
            .to_string();

        let template = schema::template(address, self.initial_grant);
        if schema::migrate(&mut doc, &template) {
            self.persist(&key, &mut doc).await?;
        }

        Ok(Some(MigrationReport {
            previous_version: previous,
            current_version: schema::SCHEMA_VERSION.to_string(),
        }))
    }

    /// Stamps `lastUpdated` and writes the document back.
    async fn persist(&self, key: &str, doc: &mut Value) -> Result<(), StoreError> {
        if let Value::Object(map) = doc {
            map.insert(
                "lastUpdated".to_string(),
                Value::String(Utc::now().to_rfc3339()),
            );
        }

        let meta = ObjectMetadata::from_doc(doc);
        self.store.put(key, doc, &meta).await
    }

    /// Scan fetch that skips unusable records instead of failing the scan.
    async fn fetch_lenient(&self, key: &str) -> Result<Option<Value>, StoreError> {
        match self.store.get(key).await {
            Ok(Some(doc)) if doc.is_object() => Ok(Some(doc)),
            Ok(Some(_)) => {
                log::warn!("skipping malformed record {}", key);
                Ok(None)
            }
            Ok(None) => Ok(None),
            Err(StoreError::Parse { key, reason }) => {
                log::warn!("skipping unparseable record {}: {}", key, reason);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

fn encode(key: &str, record: &UserRecord) -> Result<Value, StoreError> {
    serde_json::to_value(record).map_err(|e| StoreError::Parse {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn decode(key: &str, doc: Value) -> Result<UserRecord, StoreError> {
    serde_json::from_value(doc).map_err(|e| StoreError::Parse {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

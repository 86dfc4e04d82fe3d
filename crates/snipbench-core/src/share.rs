//! Share links: suite snapshots stored under short ids with an expiry.
//!
//! The storage itself is external; [`ExpiringStore`] is the boundary.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{BenchmarkResult, Dependency, TestCase};
use crate::suite::Suite;

/// Prefix of every share key in the store.
pub const SHARE_KEY_PREFIX: &str = "mitata:share:";

/// Length of generated share ids.
pub const SHARE_ID_LEN: usize = 10;

const ID_ALPHABET: &[u8] = b"useandom-26T198340PX75pxJACKVERYMINDBUSHWOLF_GQZbfghjklqvwyzrict";

/// How long a share stays retrievable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExpiryOption {
    #[serde(rename = "7d")]
    SevenDays,
    #[default]
    #[serde(rename = "30d")]
    ThirtyDays,
}

impl ExpiryOption {
    pub fn as_str(self) -> &'static str {
        match self {
            ExpiryOption::SevenDays => "7d",
            ExpiryOption::ThirtyDays => "30d",
        }
    }

    pub fn seconds(self) -> u64 {
        match self {
            ExpiryOption::SevenDays => 7 * 24 * 60 * 60,
            ExpiryOption::ThirtyDays => 30 * 24 * 60 * 60,
        }
    }

    pub fn duration(self) -> Duration {
        Duration::from_secs(self.seconds())
    }
}

impl fmt::Display for ExpiryOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExpiryOption {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "7d" => Ok(ExpiryOption::SevenDays),
            "30d" => Ok(ExpiryOption::ThirtyDays),
            other => Err(Error::InvalidOperation(format!("Invalid expiry option: {}", other))),
        }
    }
}

/// Everything needed to reopen a shared suite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareSnapshot {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub dependencies: Vec<Dependency>,
    pub setup_code: String,
    pub test_cases: Vec<TestCase>,
    #[serde(default)]
    pub results: Vec<BenchmarkResult>,
    #[serde(default)]
    pub async_mode: bool,
    pub expiry_option: ExpiryOption,
    /// Creation time, serialized as an RFC 3339 timestamp.
    pub created_at: DateTime<Utc>,
}

impl From<ShareSnapshot> for Suite {
    fn from(snapshot: ShareSnapshot) -> Self {
        Suite {
            title: snapshot.title,
            test_cases: snapshot.test_cases,
            setup_code: snapshot.setup_code,
            async_mode: snapshot.async_mode,
            dependencies: snapshot.dependencies,
            results: snapshot.results,
        }
    }
}

/// Store key for a share id.
pub fn share_key(id: &str) -> String {
    format!("{}{}", SHARE_KEY_PREFIX, id)
}

/// A random URL-safe id of [`SHARE_ID_LEN`] characters.
pub fn generate_id() -> String {
    let mut rng = rand::rng();
    (0..SHARE_ID_LEN)
        .map(|_| ID_ALPHABET[rng.random_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

/// Key-value storage with per-key expiry.
pub trait ExpiringStore {
    fn set_with_expiry(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// `None` for missing or expired keys.
    fn get(&self, key: &str) -> Result<Option<String>>;
}

/// Creates and fetches share snapshots.
pub struct ShareService<S> {
    store: S,
}

impl<S: ExpiringStore> ShareService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Snapshot `suite` under a fresh id.
    pub fn create(&self, suite: &Suite, expiry: ExpiryOption) -> Result<ShareSnapshot> {
        let snapshot = ShareSnapshot {
            id: generate_id(),
            title: suite.title.clone(),
            dependencies: suite.dependencies.clone(),
            setup_code: suite.setup_code.clone(),
            test_cases: suite.test_cases.clone(),
            results: suite.results.clone(),
            async_mode: suite.async_mode,
            expiry_option: expiry,
            created_at: Utc::now(),
        };

        let json = serde_json::to_string(&snapshot)?;
        self.store
            .set_with_expiry(&share_key(&snapshot.id), json, expiry.duration())?;
        debug!("Created share {} expiring in {}", snapshot.id, expiry);
        Ok(snapshot)
    }

    /// Fetch a snapshot by id.
    pub fn fetch(&self, id: &str) -> Result<ShareSnapshot> {
        if id.trim().is_empty() {
            return Err(Error::InvalidOperation("ID is required".to_string()));
        }
        let json = self
            .store
            .get(&share_key(id))?
            .ok_or_else(|| Error::NotFound(format!("Share not found: {}", id)))?;
        Ok(serde_json::from_str(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap;
    use std::cell::RefCell;
    use std::time::Instant;

    /// In-memory store honoring expiry.
    #[derive(Default)]
    struct MemoryStore {
        entries: RefCell<FxHashMap<String, (String, Instant)>>,
    }

    impl ExpiringStore for MemoryStore {
        fn set_with_expiry(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
            self.entries
                .borrow_mut()
                .insert(key.to_string(), (value, Instant::now() + ttl));
            Ok(())
        }

        fn get(&self, key: &str) -> Result<Option<String>> {
            Ok(self
                .entries
                .borrow()
                .get(key)
                .filter(|(_, expires)| *expires > Instant::now())
                .map(|(value, _)| value.clone()))
        }
    }

    #[test]
    fn test_expiry_options() {
        assert_eq!(ExpiryOption::SevenDays.seconds(), 604_800);
        assert_eq!(ExpiryOption::ThirtyDays.seconds(), 2_592_000);
        assert_eq!("7d".parse::<ExpiryOption>().unwrap(), ExpiryOption::SevenDays);
        assert!("1y".parse::<ExpiryOption>().is_err());
        assert_eq!(ExpiryOption::default(), ExpiryOption::ThirtyDays);
    }

    #[test]
    fn test_ids() {
        let id = generate_id();
        assert_eq!(id.len(), SHARE_ID_LEN);
        assert!(id.bytes().all(|b| ID_ALPHABET.contains(&b)));
        assert_eq!(share_key("abc"), "mitata:share:abc");
    }

    #[test]
    fn test_create_then_fetch() {
        let service = ShareService::new(MemoryStore::default());
        let mut suite = Suite::default();
        suite.title = Some("loops".to_string());

        let created = service.create(&suite, ExpiryOption::SevenDays).unwrap();
        let fetched = service.fetch(&created.id).unwrap();
        assert_eq!(fetched, created);
        assert_eq!(fetched.expiry_option, ExpiryOption::SevenDays);

        let reopened = Suite::from(fetched);
        assert_eq!(reopened.test_cases, suite.test_cases);
        assert_eq!(reopened.title.as_deref(), Some("loops"));
    }

    #[test]
    fn test_snapshot_wire_shape() {
        let service = ShareService::new(MemoryStore::default());
        let created = service.create(&Suite::default(), ExpiryOption::ThirtyDays).unwrap();
        let stored = service.store().get(&share_key(&created.id)).unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_str(&stored).unwrap();
        assert_eq!(json["expiryOption"], "30d");
        assert!(json["setupCode"].is_string());
        assert!(json["testCases"].is_array());
        let created_at = json["createdAt"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(created_at).is_ok());
    }

    #[test]
    fn test_reads_iso_timestamps() {
        let store = MemoryStore::default();
        let json = serde_json::json!({
            "id": "abc",
            "dependencies": [],
            "setupCode": "",
            "testCases": [{"id": "1", "name": "a", "code": "1"}],
            "expiryOption": "7d",
            "createdAt": "2024-05-01T12:30:00.000Z"
        });
        store
            .set_with_expiry(&share_key("abc"), json.to_string(), Duration::from_secs(60))
            .unwrap();

        let snapshot = ShareService::new(store).fetch("abc").unwrap();
        assert_eq!(snapshot.created_at.to_rfc3339(), "2024-05-01T12:30:00+00:00");
    }

    #[test]
    fn test_missing_share() {
        let service = ShareService::new(MemoryStore::default());
        assert!(matches!(service.fetch("nothing"), Err(Error::NotFound(_))));
        assert!(matches!(service.fetch(" "), Err(Error::InvalidOperation(_))));
    }

    #[test]
    fn test_expired_share_is_missing() {
        let store = MemoryStore::default();
        store
            .set_with_expiry(&share_key("old"), "{}".to_string(), Duration::ZERO)
            .unwrap();
        let service = ShareService::new(store);
        assert!(matches!(service.fetch("old"), Err(Error::NotFound(_))));
    }
}

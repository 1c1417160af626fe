//! Per-user application documents.
//!
//! Applications keep their files under `home/<user>/securestore/<app>/<file>`.
//! Each file's payload is a JSON [`FileRecord`]; this module is the only place
//! that interprets payloads, and it does so in one typed decode step.
//!
//! SocialCalc documents are application files of the `touchcalc` app, stored
//! as `<name>.msc` with a `"type": "socialcalc_spreadsheet"` marker.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::logging::sanitize_for_log;
use crate::path::PathKey;
use crate::session::SessionRegistry;
use crate::storage::{PutOutcome, Storage};

/// First segment of every user namespace.
pub const HOME: &str = "home";

/// Directory under a user's home that holds application data.
pub const SECURESTORE: &str = "securestore";

/// Application that owns SocialCalc documents.
pub const SOCIALCALC_APP: &str = "touchcalc";

/// File name suffix of SocialCalc documents.
pub const SOCIALCALC_SUFFIX: &str = ".msc";

/// `type` marker of SocialCalc records.
pub const SOCIALCALC_TYPE: &str = "socialcalc_spreadsheet";

const BACKUP_PREFIX: &str = "backup_";
const BACKUP_SUFFIX: &str = ".json";

/// Stored form of an application file.
///
/// Fields this version does not know are kept in `extra` and written back
/// unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub content: Value,
    pub user: String,
    pub app: String,
    pub filename: String,
    /// Milliseconds since the Unix epoch, as a decimal string.
    pub timestamp: String,
    /// Backend that wrote the record.
    pub storage_backend: String,
    /// Document type, e.g. [`SOCIALCALC_TYPE`].
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FileRecord {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Content as text: strings as-is, other JSON values re-encoded.
    pub fn content_text(&self) -> String {
        match &self.content {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// True for names produced by [`AppStore::backup`].
pub fn is_backup_name(name: &str) -> bool {
    name.starts_with(BACKUP_PREFIX) && name.ends_with(BACKUP_SUFFIX)
}

/// Check that a request may act as `user`.
///
/// Requests without a session are allowed; credentials are verified upstream.
/// A session must be active, and if it is bound to a user it must be `user`.
pub fn authorize_session(
    registry: &SessionRegistry,
    session_id: Option<&str>,
    user: &str,
) -> Result<()> {
    let Some(id) = session_id else {
        return Ok(());
    };
    let session = registry.get(id).ok_or(Error::UnknownSession)?;
    match session.user() {
        Some(owner) if owner != user => Err(Error::SessionUserMismatch),
        _ => Ok(()),
    }
}

/// Application file store layered over [`Storage`].
#[derive(Clone)]
pub struct AppStore {
    storage: Storage,
}

impl AppStore {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// `home/<user>/securestore/<app>`
    pub fn app_dir(user: &str, app: &str) -> Result<PathKey> {
        Ok(PathKey::new([HOME, user, SECURESTORE, app])?)
    }

    /// `home/<user>/securestore/<app>/<filename>`
    pub fn file_path(user: &str, app: &str, filename: &str) -> Result<PathKey> {
        Ok(Self::app_dir(user, app)?.join(filename)?)
    }

    fn record(&self, user: &str, app: &str, filename: &str, content: Value) -> FileRecord {
        FileRecord {
            content,
            user: user.to_string(),
            app: app.to_string(),
            filename: filename.to_string(),
            timestamp: now_millis().to_string(),
            storage_backend: self.storage.backend_name().to_string(),
            kind: None,
            extra: Map::new(),
        }
    }

    async fn write_record(&self, record: &FileRecord) -> Result<PutOutcome> {
        let path = Self::file_path(&record.user, &record.app, &record.filename)?;
        self.storage
            .ensure_dir_all(&Self::app_dir(&record.user, &record.app)?)
            .await?;
        self.storage.put(&path, &record.encode()?).await
    }

    /// Store `content` as `filename`, creating the app directory chain if needed.
    pub async fn save_file(
        &self,
        user: &str,
        app: &str,
        filename: &str,
        content: Value,
    ) -> Result<PutOutcome> {
        let outcome = self
            .write_record(&self.record(user, app, filename, content))
            .await?;
        tracing::debug!(
            user = %sanitize_for_log(user),
            app = %sanitize_for_log(app),
            file = %sanitize_for_log(filename),
            ?outcome,
            "file saved"
        );
        Ok(outcome)
    }

    pub async fn get_file(&self, user: &str, app: &str, filename: &str) -> Result<FileRecord> {
        let path = Self::file_path(user, app, filename)?;
        FileRecord::decode(&self.storage.read_file(&path).await?)
    }

    pub async fn delete_file(&self, user: &str, app: &str, filename: &str) -> Result<()> {
        let path = Self::file_path(user, app, filename)?;
        self.storage.delete_file(&path).await
    }

    /// File names in the app directory. A new app gets an empty directory.
    pub async fn list_files(&self, user: &str, app: &str) -> Result<Vec<String>> {
        let dir = Self::app_dir(user, app)?;
        self.storage.ensure_dir_all(&dir).await?;
        self.storage.list_dir(&dir).await
    }

    /// Save several files at once. Null entries are skipped.
    ///
    /// Returns the names that were written, in iteration order.
    pub async fn save_multiple<I>(&self, user: &str, app: &str, files: I) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        self.storage.ensure_dir_all(&Self::app_dir(user, app)?).await?;
        let mut saved = Vec::new();
        for (filename, content) in files {
            if content.is_null() {
                continue;
            }
            let path = Self::file_path(user, app, &filename)?;
            let payload = self.record(user, app, &filename, content).encode()?;
            self.storage.put(&path, &payload).await?;
            saved.push(filename);
        }
        tracing::debug!(app = %sanitize_for_log(app), count = saved.len(), "files saved");
        Ok(saved)
    }

    /// Content of each named file that exists. Missing names are left out.
    pub async fn get_many(
        &self,
        user: &str,
        app: &str,
        filenames: &[String],
    ) -> Result<BTreeMap<String, Value>> {
        let mut found = BTreeMap::new();
        for filename in filenames {
            match self.get_file(user, app, filename).await {
                Ok(record) => {
                    found.insert(filename.clone(), record.content);
                }
                Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(found)
    }

    /// Save a SocialCalc document as `touchcalc/<filename>.msc`.
    pub async fn save_socialcalc(
        &self,
        user: &str,
        filename: &str,
        content: &str,
    ) -> Result<PutOutcome> {
        if filename.is_empty() {
            return Err(Error::MissingField("filename"));
        }
        if content.is_empty() {
            return Err(Error::MissingField("content"));
        }
        let stored_name = format!("{filename}{SOCIALCALC_SUFFIX}");
        let mut record = self.record(user, SOCIALCALC_APP, &stored_name, content.into());
        // The record names the document, not the file that holds it.
        record.filename = filename.to_string();
        record.kind = Some(SOCIALCALC_TYPE.to_string());

        let path = Self::file_path(user, SOCIALCALC_APP, &stored_name)?;
        self.storage
            .ensure_dir_all(&Self::app_dir(user, SOCIALCALC_APP)?)
            .await?;
        let outcome = self.storage.put(&path, &record.encode()?).await?;
        tracing::debug!(file = %sanitize_for_log(filename), ?outcome, "socialcalc document saved");
        Ok(outcome)
    }

    /// Sheet text of a SocialCalc document.
    ///
    /// A payload that is not a record with string content is returned as-is.
    pub async fn load_socialcalc(&self, user: &str, filename: &str) -> Result<String> {
        if filename.is_empty() {
            return Err(Error::MissingField("filename"));
        }
        let stored_name = format!("{filename}{SOCIALCALC_SUFFIX}");
        let path = Self::file_path(user, SOCIALCALC_APP, &stored_name)?;
        let payload = self.storage.read_file(&path).await?;
        Ok(match FileRecord::decode(&payload) {
            Ok(FileRecord {
                content: Value::String(text),
                ..
            }) => text,
            _ => String::from_utf8_lossy(&payload).into_owned(),
        })
    }

    /// Archive every non-backup file of the app into a new `backup_<millis>.json`.
    ///
    /// Records are archived as their JSON value; payloads that are not JSON
    /// are archived as a string of their text.
    ///
    /// Returns the archive's file name.
    pub async fn backup(&self, user: &str, app: &str) -> Result<String> {
        let dir = Self::app_dir(user, app)?;
        let mut archive = BTreeMap::new();
        for filename in self.storage.list_dir(&dir).await? {
            if is_backup_name(&filename) {
                continue;
            }
            let path = dir.join(filename.as_str())?;
            match self.storage.get_file(&path).await?.into_payload() {
                Some(payload) => {
                    archive.insert(filename, archived_value(&payload));
                }
                // Subdirectories are not application files.
                None => continue,
            }
        }
        let payload = serde_json::to_vec(&archive)?;

        let mut stamp = now_millis();
        loop {
            let name = format!("{BACKUP_PREFIX}{stamp}{BACKUP_SUFFIX}");
            match self.storage.create_file(&dir.join(name.as_str())?, &payload).await {
                Ok(()) => {
                    tracing::debug!(
                        app = %sanitize_for_log(app),
                        files = archive.len(),
                        backup = %name,
                        "backup written"
                    );
                    return Ok(name);
                }
                Err(Error::AlreadyExists(_)) => stamp += 1,
                Err(e) => return Err(e),
            }
        }
    }

    /// Put every file from a backup archive back in place.
    ///
    /// Returns how many files were restored.
    pub async fn restore(&self, user: &str, app: &str, backup_name: &str) -> Result<usize> {
        let path = Self::file_path(user, app, backup_name)?;
        let archive: BTreeMap<String, Value> =
            serde_json::from_slice(&self.storage.read_file(&path).await?)?;

        let mut restored = 0;
        for (filename, value) in &archive {
            let target = Self::file_path(user, app, filename)?;
            self.storage.put(&target, &restored_payload(value)?).await?;
            restored += 1;
        }
        tracing::debug!(app = %sanitize_for_log(app), restored, "backup restored");
        Ok(restored)
    }
}

/// Archive form of a stored payload: its JSON value, or its text.
fn archived_value(payload: &[u8]) -> Value {
    serde_json::from_slice(payload)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(payload).into_owned()))
}

/// Inverse of [`archived_value`]. Strings go back as raw text.
fn restored_payload(value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::String(text) => Ok(text.clone().into_bytes()),
        other => Ok(serde_json::to_vec(other)?),
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::storage::InMemoryBackend;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    fn store() -> AppStore {
        AppStore::new(Storage::new(Arc::new(InMemoryBackend::new())))
    }

    #[test]
    fn test_paths() {
        assert_eq!(
            AppStore::file_path("alice", "sheets", "q1").unwrap().to_string(),
            "home/alice/securestore/sheets/q1"
        );
        assert!(AppStore::app_dir("", "sheets").is_err());
        assert!(AppStore::file_path("alice", "sheets", "../etc").is_err());
    }

    #[test]
    fn test_content_text() {
        let mut record = FileRecord {
            content: json!("plain"),
            user: "alice".into(),
            app: "sheets".into(),
            filename: "a".into(),
            timestamp: "0".into(),
            storage_backend: "memory".into(),
            kind: None,
            extra: Map::new(),
        };
        assert_eq!(record.content_text(), "plain");
        record.content = json!({"A1": 3});
        assert_eq!(record.content_text(), r#"{"A1":3}"#);
    }

    #[test]
    fn test_decode_rejects_non_record() {
        assert!(matches!(
            FileRecord::decode(b"not json"),
            Err(Error::Record(_))
        ));
        assert!(FileRecord::decode(br#"{"content": 1}"#).is_err());
    }

    #[tokio::test]
    async fn test_save_get_delete() {
        let store = store();
        let outcome = store
            .save_file("alice", "sheets", "q1", json!("A1=1"))
            .await
            .unwrap();
        assert_eq!(outcome, PutOutcome::Created);

        let record = store.get_file("alice", "sheets", "q1").await.unwrap();
        assert_eq!(record.content_text(), "A1=1");
        assert_eq!(record.user, "alice");
        assert_eq!(record.app, "sheets");
        assert_eq!(record.storage_backend, "memory");

        let outcome = store
            .save_file("alice", "sheets", "q1", json!("A1=2"))
            .await
            .unwrap();
        assert_eq!(outcome, PutOutcome::Updated);

        store.delete_file("alice", "sheets", "q1").await.unwrap();
        assert!(matches!(
            store.get_file("alice", "sheets", "q1").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_files_for_new_app() {
        let store = store();
        assert!(store.list_files("bob", "notes").await.unwrap().is_empty());
        store
            .save_file("bob", "notes", "todo", json!("milk"))
            .await
            .unwrap();
        assert_eq!(store.list_files("bob", "notes").await.unwrap(), vec!["todo"]);
    }

    #[tokio::test]
    async fn test_save_multiple_and_get_many() {
        let store = store();
        let files = vec![
            ("a".to_string(), json!("one")),
            ("skip".to_string(), Value::Null),
            ("b".to_string(), json!({"n": 2})),
        ];
        let saved = store.save_multiple("alice", "kv", files).await.unwrap();
        assert_eq!(saved, vec!["a", "b"]);

        let names = vec!["a".to_string(), "b".to_string(), "missing".to_string()];
        let found = store.get_many("alice", "kv", &names).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found["a"], json!("one"));
        assert_eq!(found["b"], json!({"n": 2}));
    }

    #[tokio::test]
    async fn test_backup_and_restore() {
        let store = store();
        store
            .save_file("alice", "sheets", "q1", json!("v1"))
            .await
            .unwrap();
        store
            .save_file("alice", "sheets", "q2", json!("w1"))
            .await
            .unwrap();

        let backup = store.backup("alice", "sheets").await.unwrap();
        assert!(is_backup_name(&backup));

        store
            .save_file("alice", "sheets", "q1", json!("v2"))
            .await
            .unwrap();
        store.delete_file("alice", "sheets", "q2").await.unwrap();

        let restored = store.restore("alice", "sheets", &backup).await.unwrap();
        assert_eq!(restored, 2);
        assert_eq!(
            store.get_file("alice", "sheets", "q1").await.unwrap().content,
            json!("v1")
        );
        assert_eq!(
            store.get_file("alice", "sheets", "q2").await.unwrap().content,
            json!("w1")
        );
    }

    #[tokio::test]
    async fn test_second_backup_skips_first() {
        let store = store();
        store
            .save_file("alice", "sheets", "q1", json!("v1"))
            .await
            .unwrap();
        let first = store.backup("alice", "sheets").await.unwrap();
        let second = store.backup("alice", "sheets").await.unwrap();
        assert_ne!(first, second);

        let archive: BTreeMap<String, FileRecord> = serde_json::from_slice(
            &store
                .storage()
                .read_file(&AppStore::file_path("alice", "sheets", &second).unwrap())
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(archive.keys().collect::<Vec<_>>(), vec!["q1"]);
    }

    #[tokio::test]
    async fn test_backup_of_missing_app() {
        let store = store();
        assert!(matches!(
            store.backup("nobody", "sheets").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_socialcalc_save_and_load() {
        let store = store();
        let sheet = "socialcalc:version:1.0\ncell:A1:v:5\n";
        let outcome = store.save_socialcalc("alice", "budget", sheet).await.unwrap();
        assert_eq!(outcome, PutOutcome::Created);
        assert_eq!(
            store.list_files("alice", SOCIALCALC_APP).await.unwrap(),
            vec!["budget.msc"]
        );

        let record = store
            .get_file("alice", SOCIALCALC_APP, "budget.msc")
            .await
            .unwrap();
        assert_eq!(record.kind.as_deref(), Some(SOCIALCALC_TYPE));
        assert_eq!(record.filename, "budget");
        assert_eq!(record.app, SOCIALCALC_APP);
        assert_eq!(store.load_socialcalc("alice", "budget").await.unwrap(), sheet);

        let outcome = store.save_socialcalc("alice", "budget", "v2").await.unwrap();
        assert_eq!(outcome, PutOutcome::Updated);
        assert_eq!(store.load_socialcalc("alice", "budget").await.unwrap(), "v2");
    }

    #[tokio::test]
    async fn test_socialcalc_rejects_empty_fields() {
        let store = store();
        assert!(matches!(
            store.save_socialcalc("alice", "", "x").await,
            Err(Error::MissingField("filename"))
        ));
        assert!(matches!(
            store.save_socialcalc("alice", "budget", "").await,
            Err(Error::MissingField("content"))
        ));
        assert!(matches!(
            store.load_socialcalc("alice", "nothing").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_load_socialcalc_of_raw_payload() {
        let store = store();
        let path = AppStore::file_path("alice", SOCIALCALC_APP, "legacy.msc").unwrap();
        store
            .storage()
            .ensure_dir_all(&path.parent().unwrap())
            .await
            .unwrap();
        store.storage().put(&path, b"cell:A1:t:hi").await.unwrap();
        assert_eq!(
            store.load_socialcalc("alice", "legacy").await.unwrap(),
            "cell:A1:t:hi"
        );
    }

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let payload = br#"{"content":"x","user":"a","app":"b","filename":"c","timestamp":"1","storage_backend":"disk","type":"socialcalc_spreadsheet","pinned":true}"#;
        let record = FileRecord::decode(payload).unwrap();
        assert_eq!(record.kind.as_deref(), Some(SOCIALCALC_TYPE));
        assert_eq!(record.extra["pinned"], json!(true));

        let again: Value = serde_json::from_slice(&record.encode().unwrap()).unwrap();
        assert_eq!(again["type"], json!(SOCIALCALC_TYPE));
        assert_eq!(again["pinned"], json!(true));
    }

    #[tokio::test]
    async fn test_backup_keeps_type_and_raw_files() {
        let store = store();
        store.save_socialcalc("alice", "budget", "sheet").await.unwrap();
        let raw = AppStore::file_path("alice", SOCIALCALC_APP, "notes.txt").unwrap();
        store.storage().put(&raw, b"not json").await.unwrap();

        let backup = store.backup("alice", SOCIALCALC_APP).await.unwrap();
        store
            .delete_file("alice", SOCIALCALC_APP, "budget.msc")
            .await
            .unwrap();
        store.storage().put(&raw, b"changed").await.unwrap();

        let restored = store
            .restore("alice", SOCIALCALC_APP, &backup)
            .await
            .unwrap();
        assert_eq!(restored, 2);
        let record = store
            .get_file("alice", SOCIALCALC_APP, "budget.msc")
            .await
            .unwrap();
        assert_eq!(record.kind.as_deref(), Some(SOCIALCALC_TYPE));
        assert_eq!(store.load_socialcalc("alice", "budget").await.unwrap(), "sheet");
        assert_eq!(store.storage().read_file(&raw).await.unwrap(), b"not json");
    }

    #[test]
    fn test_authorize_session() {
        let registry = SessionRegistry::new();
        assert!(authorize_session(&registry, None, "alice").is_ok());
        assert!(matches!(
            authorize_session(&registry, Some("bogus"), "alice"),
            Err(Error::UnknownSession)
        ));

        let id = registry.create_for_user("alice");
        assert!(authorize_session(&registry, Some(id.as_str()), "alice").is_ok());
        assert!(matches!(
            authorize_session(&registry, Some(id.as_str()), "mallory"),
            Err(Error::SessionUserMismatch)
        ));

        let anonymous = registry.create();
        assert!(authorize_session(&registry, Some(anonymous.as_str()), "bob").is_ok());
    }
}

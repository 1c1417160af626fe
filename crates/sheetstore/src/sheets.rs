//! Per-user spreadsheets kept directly under `home/<user>`.
//!
//! Each sheet is one file, `home/<user>/<fname>`, whose payload is a JSON
//! [`SheetRecord`]. The `securestore` directory that sits next to the sheets
//! belongs to [`AppStore`](crate::AppStore) and is never listed as a sheet.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::documents::{HOME, SECURESTORE};
use crate::error::{Error, Result};
use crate::logging::sanitize_for_log;
use crate::path::PathKey;
use crate::storage::{PutOutcome, Storage};

/// Sheet created for a user who has none yet.
pub const DEFAULT_SHEET: &str = "default";

/// Stored form of a sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetRecord {
    pub user: String,
    pub fname: String,
    /// Sheet text as the editor saved it.
    pub data: String,
    /// Seconds since the Unix epoch. The bootstrap sheet has none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Set on sheets created from an uploaded file.
    #[serde(default, skip_serializing_if = "is_false")]
    pub imported: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl SheetRecord {
    fn new(user: &str, fname: &str, data: String) -> Self {
        Self {
            user: user.to_string(),
            fname: fname.to_string(),
            data,
            timestamp: Some(chrono::Utc::now().timestamp()),
            imported: false,
            extra: Map::new(),
        }
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Editor text of a stored sheet.
///
/// Prefers a string `data` field, then a string `content` field; anything
/// else (including a payload that is not JSON) is returned as its text.
pub fn sheet_text(payload: &[u8]) -> String {
    if let Ok(Value::Object(fields)) = serde_json::from_slice::<Value>(payload) {
        for field in ["data", "content"] {
            if let Some(Value::String(text)) = fields.get(field) {
                return text.clone();
            }
        }
    }
    String::from_utf8_lossy(payload).into_owned()
}

/// Spreadsheet store layered over [`Storage`].
#[derive(Clone)]
pub struct SheetStore {
    storage: Storage,
}

impl SheetStore {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// `home/<user>`
    pub fn user_dir(user: &str) -> Result<PathKey> {
        Ok(PathKey::new([HOME, user])?)
    }

    /// `home/<user>/<fname>`
    pub fn sheet_path(user: &str, fname: &str) -> Result<PathKey> {
        if fname.is_empty() {
            return Err(Error::MissingField("fname"));
        }
        Ok(Self::user_dir(user)?.join(fname)?)
    }

    /// Save `data` as sheet `fname`, creating the user's home if needed.
    pub async fn save(&self, user: &str, fname: &str, data: &str) -> Result<PutOutcome> {
        let path = Self::sheet_path(user, fname)?;
        self.storage.ensure_dir_all(&Self::user_dir(user)?).await?;
        let record = SheetRecord::new(user, fname, data.to_string());
        let outcome = self.storage.put(&path, &record.encode()?).await?;
        tracing::debug!(
            user = %sanitize_for_log(user),
            sheet = %sanitize_for_log(fname),
            ?outcome,
            "sheet saved"
        );
        Ok(outcome)
    }

    /// Store an uploaded file as a sheet named after it, minus its extension.
    ///
    /// An existing sheet of that name is replaced. Returns the sheet name.
    pub async fn import(&self, user: &str, upload_name: &str, content: &str) -> Result<String> {
        let fname = match upload_name.rsplit_once('.') {
            Some((base, _)) => base,
            None => upload_name,
        };
        let path = Self::sheet_path(user, fname)?;
        self.storage.ensure_dir_all(&Self::user_dir(user)?).await?;

        let mut record = SheetRecord::new(user, fname, content.to_string());
        record.imported = true;
        self.storage.put(&path, &record.encode()?).await?;
        tracing::debug!(user = %sanitize_for_log(user), sheet = %sanitize_for_log(fname), "sheet imported");
        Ok(fname.to_string())
    }

    /// Editor text of sheet `fname`.
    pub async fn open(&self, user: &str, fname: &str) -> Result<String> {
        let path = Self::sheet_path(user, fname)?;
        Ok(sheet_text(&self.storage.read_file(&path).await?))
    }

    /// Decoded record of sheet `fname`.
    pub async fn record(&self, user: &str, fname: &str) -> Result<SheetRecord> {
        let path = Self::sheet_path(user, fname)?;
        SheetRecord::decode(&self.storage.read_file(&path).await?)
    }

    pub async fn delete(&self, user: &str, fname: &str) -> Result<()> {
        self.storage.delete_file(&Self::sheet_path(user, fname)?).await
    }

    /// Names of the user's sheets.
    ///
    /// A user without a home gets one holding a [`DEFAULT_SHEET`] whose text
    /// is a single newline.
    pub async fn list(&self, user: &str) -> Result<Vec<String>> {
        let dir = Self::user_dir(user)?;
        let names = match self.storage.list_dir(&dir).await {
            Ok(names) => names,
            Err(Error::NotFound(missing)) if missing == dir => self.bootstrap(user, &dir).await?,
            Err(e) => return Err(e),
        };
        Ok(names.into_iter().filter(|name| name != SECURESTORE).collect())
    }

    async fn bootstrap(&self, user: &str, dir: &PathKey) -> Result<Vec<String>> {
        self.storage.ensure_dir_all(dir).await?;
        let mut record = SheetRecord::new(user, DEFAULT_SHEET, "\n".to_string());
        record.timestamp = None;

        match self
            .storage
            .create_file(&dir.join(DEFAULT_SHEET)?, &record.encode()?)
            .await
        {
            // A concurrent first visit may have created it already.
            Ok(()) | Err(Error::AlreadyExists(_)) => {}
            Err(e) => return Err(e),
        }
        tracing::debug!(user = %sanitize_for_log(user), "created default sheet");
        self.storage.list_dir(dir).await
    }
}

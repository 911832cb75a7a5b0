//! Adapter that reads exported records from a directory tree.
//!
//! Layout: `<root>/<user_id>/<kind>.json`, each file a JSON array of records
//! of that kind. A missing file means the user has no records of that kind.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use crate::records::{RecordKind, Records, TimeWindow};

use super::types::{CollectionAdapter, CollectorError, CollectorResult};

pub struct JsonDirCollector {
    root: PathBuf,
}

impl JsonDirCollector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the export file for `user_id` and `kind`.
    pub fn records_path(&self, user_id: &str, kind: RecordKind) -> CollectorResult<PathBuf> {
        let mut components = Path::new(user_id).components();
        let single_normal = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !single_normal {
            return Err(CollectorError::Rejected(format!(
                "user id '{}' is not a plain directory name",
                user_id
            )));
        }
        Ok(self.root.join(user_id).join(format!("{}.json", kind)))
    }

    /// User ids with an export directory, sorted.
    pub async fn list_users(&self) -> CollectorResult<Vec<String>> {
        let mut users = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                users.push(name.to_string());
            }
        }
        users.sort();
        Ok(users)
    }
}

#[async_trait]
impl CollectionAdapter for JsonDirCollector {
    fn name(&self) -> &str {
        "json_dir"
    }

    async fn connect(&self) -> CollectorResult<()> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            CollectorError::Unavailable(format!("cannot open {:?}: {}", self.root, e))
        })?;
        if !metadata.is_dir() {
            return Err(CollectorError::Unavailable(format!(
                "{:?} is not a directory",
                self.root
            )));
        }
        Ok(())
    }

    async fn fetch(
        &self,
        user_id: &str,
        window: &TimeWindow,
        kind: RecordKind,
    ) -> CollectorResult<Records> {
        let path = self.records_path(user_id, kind)?;

        let contents = match fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(user_id = %user_id, kind = %kind, "No export file, returning empty set");
                return Ok(Records::empty(kind));
            }
            Err(e) => return Err(e.into()),
        };

        let parse_error = |e: serde_json::Error| {
            CollectorError::ParseError(format!("{}: {}", path.display(), e))
        };
        let mut records = match kind {
            RecordKind::CalendarEvent => {
                Records::CalendarEvent(serde_json::from_slice(&contents).map_err(parse_error)?)
            }
            RecordKind::EmailMessage => {
                Records::EmailMessage(serde_json::from_slice(&contents).map_err(parse_error)?)
            }
        };

        let total = records.len();
        records.retain_window(window);
        debug!(
            user_id = %user_id,
            kind = %kind,
            total,
            in_window = records.len(),
            "Read export file"
        );
        Ok(records)
    }
}

use std::fs;
use std::path::Path;
use std::time::Duration;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::PageError;

const STORE_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS pages (
    page_id INTEGER PRIMARY KEY AUTOINCREMENT,
    page_name TEXT NOT NULL UNIQUE,
    page_text TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    page_version INTEGER NOT NULL,
    change_author TEXT,
    change_log TEXT,
    modified_at_unix INTEGER NOT NULL,
    hits INTEGER NOT NULL DEFAULT 0,
    locked_by TEXT
);

CREATE TABLE IF NOT EXISTS page_history (
    page_id INTEGER NOT NULL,
    page_name TEXT NOT NULL,
    page_version INTEGER NOT NULL,
    page_text TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    change_author TEXT,
    change_log TEXT,
    modified_at_unix INTEGER NOT NULL,
    PRIMARY KEY (page_name, page_version)
);
CREATE INDEX IF NOT EXISTS idx_page_history_name ON page_history(page_name, page_version DESC);
"#;

const PAGE_COLUMNS: &str = "page_id, page_name, page_text, content_hash, page_version, change_author, change_log, modified_at_unix, hits, locked_by";
const HISTORY_COLUMNS: &str = "page_id, page_name, page_text, content_hash, page_version, change_author, change_log, modified_at_unix, 0, NULL";

/// One stored version of a page, live or historical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageRecord {
    pub id: i64,
    pub name: String,
    pub text: String,
    pub content_hash: String,
    pub version: String,
    pub author: Option<String>,
    pub changelog: Option<String>,
    pub modified_at: i64,
    pub hits: u64,
    pub locked_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub version: String,
    pub author: Option<String>,
    pub timestamp: i64,
    pub changelog: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SaveOutcome {
    Created { version: String },
    Updated { version: String },
    Unchanged { version: String },
}

impl SaveOutcome {
    pub fn version(&self) -> &str {
        match self {
            Self::Created { version } | Self::Updated { version } | Self::Unchanged { version } => {
                version
            }
        }
    }
}

/// Persistence for page text and its version history.
///
/// `history` lists prior versions only, most recent first; the live version
/// is what `load_page` returns.
pub trait PageStore {
    fn page_id(&self, name: &str) -> Result<Option<i64>>;
    fn load_page(&self, name: &str) -> Result<Option<PageRecord>>;
    fn load_version(&self, name: &str, version: &str) -> Result<Option<PageRecord>>;
    fn history(&self, name: &str) -> Result<Vec<HistoryEntry>>;
    fn save_page(
        &self,
        name: &str,
        text: &str,
        author: Option<&str>,
        changelog: &str,
    ) -> Result<SaveOutcome>;
    fn remove_version(&self, name: &str, version: &str) -> Result<()>;
    fn remove_all_versions(&self, name: &str) -> Result<()>;
    fn page_names(&self) -> Result<Vec<String>>;
    fn set_locked(&self, name: &str, locked_by: Option<&str>) -> Result<()>;
    fn record_hit(&self, name: &str) -> Result<()>;
}

pub struct SqlitePageStore {
    connection: Connection,
}

impl SqlitePageStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        let parent = db_path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("db path has no parent: {}", db_path.display()))?;
        fs::create_dir_all(parent).with_context(|| {
            format!(
                "failed to create database parent directory {}",
                parent.display()
            )
        })?;
        let connection = Connection::open(db_path)
            .with_context(|| format!("failed to open {}", db_path.display()))?;
        connection
            .busy_timeout(Duration::from_secs(5))
            .context("failed to set sqlite busy timeout")?;
        connection
            .pragma_update(None, "journal_mode", "WAL")
            .context("failed to enable WAL journal mode")?;
        Self::with_connection(connection)
    }

    pub fn open_in_memory() -> Result<Self> {
        let connection =
            Connection::open_in_memory().context("failed to open in-memory database")?;
        Self::with_connection(connection)
    }

    fn with_connection(connection: Connection) -> Result<Self> {
        connection
            .execute_batch(STORE_SCHEMA_SQL)
            .context("failed to initialize page store schema")?;
        Ok(Self { connection })
    }

    fn current_version(&self, name: &str) -> Result<Option<(i64, i64)>> {
        self.connection
            .query_row(
                "SELECT page_id, page_version FROM pages WHERE page_name = ?1",
                [name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .with_context(|| format!("failed to read current version of {name}"))
    }
}

impl PageStore for SqlitePageStore {
    fn page_id(&self, name: &str) -> Result<Option<i64>> {
        Ok(self.current_version(name)?.map(|(id, _)| id))
    }

    fn load_page(&self, name: &str) -> Result<Option<PageRecord>> {
        self.connection
            .query_row(
                &format!("SELECT {PAGE_COLUMNS} FROM pages WHERE page_name = ?1"),
                [name],
                record_from_row,
            )
            .optional()
            .with_context(|| format!("failed to load page {name}"))
    }

    fn load_version(&self, name: &str, version: &str) -> Result<Option<PageRecord>> {
        let Some(number) = parse_version(version) else {
            return Ok(None);
        };
        if let Some(live) = self.load_page(name)?
            && live.version == number.to_string()
        {
            return Ok(Some(live));
        }
        self.connection
            .query_row(
                &format!(
                    "SELECT {HISTORY_COLUMNS} FROM page_history WHERE page_name = ?1 AND page_version = ?2"
                ),
                params![name, number],
                record_from_row,
            )
            .optional()
            .with_context(|| format!("failed to load version {version} of {name}"))
    }

    fn history(&self, name: &str) -> Result<Vec<HistoryEntry>> {
        let mut statement = self
            .connection
            .prepare(
                "SELECT page_version, change_author, modified_at_unix, change_log
                 FROM page_history WHERE page_name = ?1 ORDER BY page_version DESC",
            )
            .context("failed to prepare history query")?;
        let rows = statement
            .query_map([name], |row| {
                Ok(HistoryEntry {
                    version: row.get::<_, i64>(0)?.to_string(),
                    author: row.get(1)?,
                    timestamp: row.get(2)?,
                    changelog: row.get(3)?,
                })
            })
            .with_context(|| format!("failed to query history of {name}"))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.with_context(|| format!("failed to decode history row of {name}"))?);
        }
        Ok(out)
    }

    fn save_page(
        &self,
        name: &str,
        text: &str,
        author: Option<&str>,
        changelog: &str,
    ) -> Result<SaveOutcome> {
        let content_hash = compute_hash(text);
        let now = unix_timestamp()?;
        let transaction = self
            .connection
            .unchecked_transaction()
            .context("failed to start save transaction")?;

        let existing: Option<(i64, i64, String)> = transaction
            .query_row(
                "SELECT page_id, page_version, content_hash FROM pages WHERE page_name = ?1",
                [name],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .with_context(|| format!("failed to read {name} before save"))?;

        let outcome = match existing {
            Some((_, version, hash)) if hash == content_hash => SaveOutcome::Unchanged {
                version: version.to_string(),
            },
            Some((page_id, version, _)) => {
                transaction
                    .execute(
                        "INSERT INTO page_history (
                            page_id, page_name, page_version, page_text, content_hash,
                            change_author, change_log, modified_at_unix
                        )
                        SELECT page_id, page_name, page_version, page_text, content_hash,
                            change_author, change_log, modified_at_unix
                        FROM pages WHERE page_id = ?1",
                        [page_id],
                    )
                    .with_context(|| format!("failed to archive version {version} of {name}"))?;
                let next = version + 1;
                transaction
                    .execute(
                        "UPDATE pages SET page_text = ?1, content_hash = ?2, page_version = ?3,
                            change_author = ?4, change_log = ?5, modified_at_unix = ?6
                        WHERE page_id = ?7",
                        params![text, content_hash, next, author, changelog, now, page_id],
                    )
                    .with_context(|| format!("failed to update {name}"))?;
                SaveOutcome::Updated {
                    version: next.to_string(),
                }
            }
            None => {
                transaction
                    .execute(
                        "INSERT INTO pages (
                            page_name, page_text, content_hash, page_version,
                            change_author, change_log, modified_at_unix
                        ) VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6)",
                        params![name, text, content_hash, author, changelog, now],
                    )
                    .with_context(|| format!("failed to create {name}"))?;
                SaveOutcome::Created {
                    version: "1".to_string(),
                }
            }
        };

        transaction
            .commit()
            .context("failed to commit save transaction")?;
        debug!(page = name, version = outcome.version(), "saved page");
        Ok(outcome)
    }

    fn remove_version(&self, name: &str, version: &str) -> Result<()> {
        let invalid = || PageError::InvalidVersion {
            page: name.to_string(),
            version: version.to_string(),
        };
        let number = parse_version(version).ok_or_else(invalid)?;
        let (page_id, current) = self.current_version(name)?.ok_or_else(invalid)?;

        let transaction = self
            .connection
            .unchecked_transaction()
            .context("failed to start remove transaction")?;

        if number == current {
            let newest_prior: Option<i64> = transaction
                .query_row(
                    "SELECT MAX(page_version) FROM page_history WHERE page_name = ?1",
                    [name],
                    |row| row.get(0),
                )
                .with_context(|| format!("failed to inspect history of {name}"))?;
            match newest_prior {
                Some(prior) => {
                    transaction
                        .execute(
                            "UPDATE pages SET (page_text, content_hash, page_version, change_author,
                                change_log, modified_at_unix) = (
                                SELECT page_text, content_hash, page_version, change_author,
                                    change_log, modified_at_unix
                                FROM page_history WHERE page_name = ?1 AND page_version = ?2)
                            WHERE page_id = ?3",
                            params![name, prior, page_id],
                        )
                        .with_context(|| format!("failed to promote version {prior} of {name}"))?;
                    transaction
                        .execute(
                            "DELETE FROM page_history WHERE page_name = ?1 AND page_version = ?2",
                            params![name, prior],
                        )
                        .with_context(|| format!("failed to drop promoted version of {name}"))?;
                }
                None => {
                    transaction
                        .execute("DELETE FROM pages WHERE page_id = ?1", [page_id])
                        .with_context(|| format!("failed to delete {name}"))?;
                }
            }
        } else {
            let deleted = transaction
                .execute(
                    "DELETE FROM page_history WHERE page_name = ?1 AND page_version = ?2",
                    params![name, number],
                )
                .with_context(|| format!("failed to delete version {version} of {name}"))?;
            if deleted == 0 {
                return Err(invalid().into());
            }
        }

        transaction
            .commit()
            .context("failed to commit remove transaction")?;
        info!(page = name, version, "removed page version");
        Ok(())
    }

    fn remove_all_versions(&self, name: &str) -> Result<()> {
        let transaction = self
            .connection
            .unchecked_transaction()
            .context("failed to start remove transaction")?;
        let history_rows = transaction
            .execute("DELETE FROM page_history WHERE page_name = ?1", [name])
            .with_context(|| format!("failed to delete history of {name}"))?;
        let page_rows = transaction
            .execute("DELETE FROM pages WHERE page_name = ?1", [name])
            .with_context(|| format!("failed to delete {name}"))?;
        transaction
            .commit()
            .context("failed to commit remove transaction")?;
        if page_rows == 0 && history_rows == 0 {
            return Err(PageError::NotFound(name.to_string()).into());
        }
        info!(page = name, history_rows, "removed all page versions");
        Ok(())
    }

    fn page_names(&self) -> Result<Vec<String>> {
        let mut statement = self
            .connection
            .prepare("SELECT page_name FROM pages ORDER BY page_name")
            .context("failed to prepare page name query")?;
        let rows = statement
            .query_map([], |row| row.get::<_, String>(0))
            .context("failed to query page names")?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("failed to decode page name row")?);
        }
        Ok(out)
    }

    fn set_locked(&self, name: &str, locked_by: Option<&str>) -> Result<()> {
        let updated = self
            .connection
            .execute(
                "UPDATE pages SET locked_by = ?1 WHERE page_name = ?2",
                params![locked_by, name],
            )
            .with_context(|| format!("failed to update lock flag of {name}"))?;
        if updated == 0 {
            return Err(PageError::NotFound(name.to_string()).into());
        }
        Ok(())
    }

    fn record_hit(&self, name: &str) -> Result<()> {
        self.connection
            .execute(
                "UPDATE pages SET hits = hits + 1 WHERE page_name = ?1",
                [name],
            )
            .with_context(|| format!("failed to count hit for {name}"))?;
        Ok(())
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<PageRecord> {
    Ok(PageRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        text: row.get(2)?,
        content_hash: row.get(3)?,
        version: row.get::<_, i64>(4)?.to_string(),
        author: row.get(5)?,
        changelog: row.get(6)?,
        modified_at: row.get(7)?,
        hits: u64::try_from(row.get::<_, i64>(8)?).unwrap_or(0),
        locked_by: row.get(9)?,
    })
}

fn parse_version(version: &str) -> Option<i64> {
    version.trim().parse::<i64>().ok().filter(|value| *value > 0)
}

/// Version ids compare by number, so `"03"` and `" 3"` name version 3.
pub fn same_version(left: &str, right: &str) -> bool {
    match (parse_version(left), parse_version(right)) {
        (Some(left), Some(right)) => left == right,
        _ => left == right,
    }
}

fn compute_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let mut output = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

fn unix_timestamp() -> Result<i64> {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before UNIX_EPOCH")?
        .as_secs();
    i64::try_from(seconds).context("timestamp does not fit into i64")
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::error::PageError;

    fn seeded(name: &str, versions: &[&str]) -> SqlitePageStore {
        let store = SqlitePageStore::open_in_memory().expect("store");
        for (index, text) in versions.iter().enumerate() {
            store
                .save_page(name, text, Some("alice"), &format!("edit {}", index + 1))
                .expect("save");
        }
        store
    }

    #[test]
    fn save_creates_then_archives_previous_versions() {
        let store = seeded("Foo", &["one", "two", "three"]);

        let live = store.load_page("Foo").expect("load").expect("exists");
        assert_eq!(live.version, "3");
        assert_eq!(live.text, "three");
        assert_eq!(live.author.as_deref(), Some("alice"));
        assert_eq!(live.changelog.as_deref(), Some("edit 3"));

        let history = store.history("Foo").expect("history");
        let versions: Vec<&str> = history.iter().map(|entry| entry.version.as_str()).collect();
        assert_eq!(versions, vec!["2", "1"]);

        let first = store.load_version("Foo", "1").expect("load").expect("exists");
        assert_eq!(first.text, "one");
        assert_eq!(first.id, live.id);
    }

    #[test]
    fn identical_text_is_not_a_new_version() {
        let store = seeded("Foo", &["same"]);
        let outcome = store
            .save_page("Foo", "same", Some("bob"), "noop")
            .expect("save");
        assert_eq!(
            outcome,
            SaveOutcome::Unchanged {
                version: "1".to_string()
            }
        );
        assert!(store.history("Foo").expect("history").is_empty());
    }

    #[test]
    fn load_version_returns_live_record_for_current_version() {
        let store = seeded("Foo", &["one", "two"]);
        let current = store.load_version("Foo", "2").expect("load").expect("exists");
        assert_eq!(current.text, "two");
        assert!(store.load_version("Foo", "9").expect("load").is_none());
        assert!(store.load_version("Foo", "abc").expect("load").is_none());
    }

    #[test]
    fn versions_compare_numerically() {
        assert!(same_version("3", "3"));
        assert!(same_version("03", "3"));
        assert!(same_version(" 3", "3"));
        assert!(!same_version("2", "3"));
        assert!(!same_version("abc", "3"));
        assert!(same_version("abc", "abc"));
    }

    #[test]
    fn remove_historical_version_leaves_live_page() {
        let store = seeded("Foo", &["one", "two", "three"]);
        store.remove_version("Foo", "2").expect("remove");

        let live = store.load_page("Foo").expect("load").expect("exists");
        assert_eq!(live.version, "3");
        let versions: Vec<String> = store
            .history("Foo")
            .expect("history")
            .into_iter()
            .map(|entry| entry.version)
            .collect();
        assert_eq!(versions, vec!["1".to_string()]);
    }

    #[test]
    fn remove_current_version_promotes_newest_prior() {
        let store = seeded("Foo", &["one", "two"]);
        store.remove_version("Foo", "2").expect("remove");

        let live = store.load_page("Foo").expect("load").expect("exists");
        assert_eq!(live.version, "1");
        assert_eq!(live.text, "one");
        assert!(store.history("Foo").expect("history").is_empty());

        store.remove_version("Foo", "1").expect("remove last");
        assert!(store.load_page("Foo").expect("load").is_none());
    }

    #[test]
    fn remove_unknown_version_is_invalid_version() {
        let store = seeded("Foo", &["one"]);
        let error = store.remove_version("Foo", "7").expect_err("must fail");
        assert_eq!(
            error.downcast_ref::<PageError>(),
            Some(&PageError::InvalidVersion {
                page: "Foo".to_string(),
                version: "7".to_string()
            })
        );
    }

    #[test]
    fn remove_all_versions_clears_page_and_history() {
        let store = seeded("Foo", &["one", "two"]);
        store.remove_all_versions("Foo").expect("remove");
        assert!(store.page_id("Foo").expect("id").is_none());
        assert!(store.history("Foo").expect("history").is_empty());
        assert!(store.remove_all_versions("Foo").is_err());
    }

    #[test]
    fn page_names_lock_flag_and_hits() {
        let store = seeded("Beta", &["b"]);
        store.save_page("Alpha", "a", None, "").expect("save");
        assert_eq!(
            store.page_names().expect("names"),
            vec!["Alpha".to_string(), "Beta".to_string()]
        );

        store.set_locked("Alpha", Some("bob")).expect("lock");
        store.record_hit("Alpha").expect("hit");
        store.record_hit("Alpha").expect("hit");
        let alpha = store.load_page("Alpha").expect("load").expect("exists");
        assert_eq!(alpha.locked_by.as_deref(), Some("bob"));
        assert_eq!(alpha.hits, 2);

        store.set_locked("Alpha", None).expect("unlock");
        assert!(store.set_locked("Missing", Some("bob")).is_err());
    }

    #[test]
    fn open_creates_database_file() {
        let temp = tempdir().expect("tempdir");
        let db_path = temp.path().join("nested").join("wikipage.db");
        {
            let store = SqlitePageStore::open(&db_path).expect("open");
            store.save_page("Foo", "text", None, "").expect("save");
        }
        assert!(db_path.exists());
        let reopened = SqlitePageStore::open(&db_path).expect("reopen");
        assert!(reopened.page_id("Foo").expect("id").is_some());
    }
}

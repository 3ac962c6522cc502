//! Persisted analysis results.
//!
//! The persistent tier behind [`ResultCache`](super::ResultCache). Rows are
//! keyed by the SHA-256 of the cache key; screenshot bytes live in companion
//! files, only the `has_screenshot` flag is stored here.

use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::{params, rusqlite};

use super::connection::CacheDb;
use super::hash::url_hash;
use crate::Error;
use crate::analysis::AnalysisResult;

/// A row of the `result_entries` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub key_hash: String,
    pub cache_key: String,
    pub url: String,
    pub title: Option<String>,
    pub text: String,
    pub has_screenshot: bool,
    pub created_at: String,
    pub expires_at: String,
}

impl PersistedEntry {
    /// Rebuild the in-memory result, attaching screenshot bytes loaded from disk.
    pub fn into_result(self, screenshot: Option<Bytes>) -> AnalysisResult {
        AnalysisResult {
            url: self.url,
            title: self.title,
            text: self.text,
            has_screenshot: screenshot.is_some(),
            screenshot,
            analyzed_at: self.created_at,
        }
    }
}

const COLUMNS: &str =
    "key_hash, cache_key, url, title, text, has_screenshot, created_at, expires_at";

fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PersistedEntry> {
    Ok(PersistedEntry {
        key_hash: row.get(0)?,
        cache_key: row.get(1)?,
        url: row.get(2)?,
        title: row.get(3)?,
        text: row.get(4)?,
        has_screenshot: row.get::<_, i32>(5)? == 1,
        created_at: row.get(6)?,
        expires_at: row.get(7)?,
    })
}

impl CacheDb {
    /// Insert or replace the entry for `cache_key`.
    pub async fn put_entry(
        &self,
        cache_key: &str,
        result: &AnalysisResult,
        ttl: Duration,
    ) -> Result<(), Error> {
        let ttl = chrono::Duration::from_std(ttl).map_err(|e| Error::CacheWrite(e.to_string()))?;
        let now = Utc::now();
        let entry = PersistedEntry {
            key_hash: url_hash(cache_key),
            cache_key: cache_key.to_string(),
            url: result.url.clone(),
            title: result.title.clone(),
            text: result.text.clone(),
            has_screenshot: result.has_screenshot,
            created_at: now.to_rfc3339(),
            expires_at: (now + ttl).to_rfc3339(),
        };

        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO result_entries (
                        key_hash, cache_key, url, title, text, has_screenshot,
                        created_at, expires_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    ON CONFLICT(key_hash) DO UPDATE SET
                        cache_key = excluded.cache_key,
                        url = excluded.url,
                        title = excluded.title,
                        text = excluded.text,
                        has_screenshot = excluded.has_screenshot,
                        created_at = excluded.created_at,
                        expires_at = excluded.expires_at",
                    params![
                        entry.key_hash,
                        entry.cache_key,
                        entry.url,
                        entry.title,
                        entry.text,
                        entry.has_screenshot as i32,
                        entry.created_at,
                        entry.expires_at,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Get an unexpired entry by cache key.
    pub async fn get_entry(&self, cache_key: &str) -> Result<Option<PersistedEntry>, Error> {
        let key_hash = url_hash(cache_key);
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<Option<PersistedEntry>, Error> {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM result_entries WHERE key_hash = ?1 AND expires_at > ?2"
                ))?;

                match stmt.query_row(params![key_hash, now], from_row) {
                    Ok(entry) => Ok(Some(entry)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Delete the entry for `cache_key`. Returns whether a row was removed.
    pub async fn delete_entry(&self, cache_key: &str) -> Result<bool, Error> {
        let key_hash = url_hash(cache_key);
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let deleted = conn
                    .execute("DELETE FROM result_entries WHERE key_hash = ?1", params![key_hash])?;
                Ok(deleted > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Newest unexpired entries, most recent first.
    pub async fn recent_entries(&self, limit: usize) -> Result<Vec<PersistedEntry>, Error> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<Vec<PersistedEntry>, Error> {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM result_entries
                     WHERE expires_at > ?1
                     ORDER BY created_at DESC
                     LIMIT ?2"
                ))?;
                let rows = stmt.query_map(params![now, limit], from_row)?;
                rows.collect::<Result<Vec<_>, _>>().map_err(Error::from)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete expired entries and return them so callers can drop companions.
    pub async fn purge_expired_entries(&self) -> Result<Vec<PersistedEntry>, Error> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<Vec<PersistedEntry>, Error> {
                let tx = conn.transaction()?;
                let expired = {
                    let mut stmt = tx.prepare(&format!(
                        "SELECT {COLUMNS} FROM result_entries WHERE expires_at <= ?1"
                    ))?;
                    let rows = stmt.query_map(params![now], from_row)?;
                    rows.collect::<Result<Vec<_>, _>>()?
                };
                tx.execute("DELETE FROM result_entries WHERE expires_at <= ?1", params![now])?;
                tx.commit()?;
                Ok(expired)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete every entry. Returns the number of rows removed.
    pub async fn clear_entries(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let deleted = conn.execute("DELETE FROM result_entries", [])?;
                Ok(deleted as u64)
            })
            .await
            .map_err(Error::from)
    }

    pub async fn count_entries(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM result_entries", [], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Whether an unexpired row for `url` still relies on its companion file.
    ///
    /// Cache keys differ per content mode but the companion is keyed by URL,
    /// so one file can back several rows.
    pub async fn has_live_screenshot(&self, url: &str) -> Result<bool, Error> {
        let url = url.to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let live: bool = conn.query_row(
                    "SELECT EXISTS(
                        SELECT 1 FROM result_entries
                        WHERE url = ?1 AND has_screenshot = 1 AND expires_at > ?2
                    )",
                    params![url, now],
                    |row| row.get(0),
                )?;
                Ok(live)
            })
            .await
            .map_err(Error::from)
    }

    #[cfg(test)]
    async fn expire_entry(&self, cache_key: &str) {
        let key_hash = url_hash(cache_key);
        let past = (Utc::now() - chrono::Duration::hours(1)).to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE result_entries SET expires_at = ?1 WHERE key_hash = ?2",
                    params![past, key_hash],
                )
            })
            .await
            .unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(url: &str, text: &str) -> AnalysisResult {
        AnalysisResult::new(url, Some("Title".into()), text, None)
    }

    const DAY: Duration = Duration::from_secs(86_400);

    #[tokio::test]
    async fn test_put_and_get() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let page = result("https://example.com/", "body");
        db.put_entry("https://example.com/", &page, DAY).await.unwrap();

        let entry = db.get_entry("https://example.com/").await.unwrap().unwrap();
        assert_eq!(entry.url, "https://example.com/");
        assert_eq!(entry.text, "body");
        assert_eq!(entry.title.as_deref(), Some("Title"));
        assert!(!entry.has_screenshot);
        assert_eq!(entry.key_hash, url_hash("https://example.com/"));
    }

    #[tokio::test]
    async fn test_get_missing() {
        let db = CacheDb::open_in_memory().await.unwrap();
        assert!(db.get_entry("https://nothing.test/").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_replaces() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.put_entry("k", &result("https://a.test/", "one"), DAY).await.unwrap();
        db.put_entry("k", &result("https://a.test/", "two"), DAY).await.unwrap();

        assert_eq!(db.count_entries().await.unwrap(), 1);
        assert_eq!(db.get_entry("k").await.unwrap().unwrap().text, "two");
    }

    #[tokio::test]
    async fn test_expired_entry_hidden_and_purged() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.put_entry("old", &result("https://old.test/", "x"), DAY).await.unwrap();
        db.put_entry("new", &result("https://new.test/", "y"), DAY).await.unwrap();
        db.expire_entry("old").await;

        assert!(db.get_entry("old").await.unwrap().is_none());

        let purged = db.purge_expired_entries().await.unwrap();
        assert_eq!(purged.len(), 1);
        assert_eq!(purged[0].url, "https://old.test/");
        assert_eq!(db.count_entries().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_recent_entries_newest_first() {
        let db = CacheDb::open_in_memory().await.unwrap();
        for i in 0..3 {
            let page = result(&format!("https://{i}.test/"), "t");
            db.put_entry(&format!("k{i}"), &page, DAY).await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let recent = db.recent_entries(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].cache_key, "k2");
        assert_eq!(recent[1].cache_key, "k1");
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.put_entry("a", &result("https://a.test/", "t"), DAY).await.unwrap();
        db.put_entry("b", &result("https://b.test/", "t"), DAY).await.unwrap();

        assert!(db.delete_entry("a").await.unwrap());
        assert!(!db.delete_entry("a").await.unwrap());
        assert_eq!(db.clear_entries().await.unwrap(), 1);
        assert_eq!(db.count_entries().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_live_screenshot_shared_across_keys() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let jpg = Some(Bytes::from_static(b"jpg"));
        let shot = AnalysisResult::new("https://s.test/", None, "", jpg.clone());
        let both = AnalysisResult::new("https://s.test/", None, "words", jpg);
        db.put_entry("https://s.test/_screenshot_only", &shot, DAY).await.unwrap();
        db.put_entry("https://s.test/", &both, DAY).await.unwrap();
        let plain = result("https://plain.test/", "t");
        db.put_entry("https://plain.test/", &plain, DAY).await.unwrap();

        db.expire_entry("https://s.test/_screenshot_only").await;
        assert!(db.has_live_screenshot("https://s.test/").await.unwrap());

        db.expire_entry("https://s.test/").await;
        assert!(!db.has_live_screenshot("https://s.test/").await.unwrap());
        assert!(!db.has_live_screenshot("https://plain.test/").await.unwrap());
    }

    #[test]
    fn test_into_result_reattaches_screenshot() {
        let entry = PersistedEntry {
            key_hash: "h".into(),
            cache_key: "k".into(),
            url: "https://a.test/".into(),
            title: None,
            text: "t".into(),
            has_screenshot: true,
            created_at: Utc::now().to_rfc3339(),
            expires_at: Utc::now().to_rfc3339(),
        };
        let missing = entry.clone().into_result(None);
        assert!(!missing.has_screenshot);

        let present = entry.into_result(Some(Bytes::from_static(b"img")));
        assert!(present.has_screenshot);
    }
}

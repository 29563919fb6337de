//! Durable dedup store: the append-only record of every offer ever seen.

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use flatwatch_core::{Offer, StoredOffer};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "flatwatch-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt scraped_at value {value:?}: {source}")]
    Timestamp {
        value: String,
        source: chrono::ParseError,
    },
}

/// SQLite-backed offer history. Rows are append-only and `url` is unique;
/// the store is the sole arbiter of whether a listing has been seen before.
#[derive(Debug, Clone)]
pub struct OfferStore {
    pool: SqlitePool,
}

impl OfferStore {
    /// Open (or create) the single local database file.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Ok(Self { pool })
    }

    /// In-memory store for tests. Capped at one connection so every query
    /// sees the same database.
    pub async fn connect_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Idempotent schema setup; safe to call on every startup.
    pub async fn init(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS offers (
                id INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                url TEXT NOT NULL UNIQUE,
                scraped_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Return exactly the candidates with no existing row for their `url`.
    pub async fn filter_new(&self, candidates: &[Offer]) -> Result<Vec<Offer>, StoreError> {
        let mut missing = Vec::new();
        for offer in candidates {
            let seen = sqlx::query("SELECT 1 FROM offers WHERE url = ?1")
                .bind(&offer.url)
                .fetch_optional(&self.pool)
                .await?
                .is_some();
            if !seen {
                missing.push(offer.clone());
            }
        }
        debug!(
            candidates = candidates.len(),
            new = missing.len(),
            "filtered offers against history"
        );
        Ok(missing)
    }

    /// Append one row per offer in a single transaction. The batch shares
    /// one `scraped_at` timestamp taken here, at persist time. Any failure
    /// rolls the whole batch back; previously committed rows are untouched.
    pub async fn persist(&self, offers: &[Offer]) -> Result<usize, StoreError> {
        if offers.is_empty() {
            return Ok(0);
        }

        let scraped_at = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;
        for offer in offers {
            sqlx::query("INSERT INTO offers (title, url, scraped_at) VALUES (?1, ?2, ?3)")
                .bind(&offer.title)
                .bind(&offer.url)
                .bind(&scraped_at)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(offers.len())
    }

    /// Novelty check and append as one critical section: candidates are
    /// filtered and inserted inside a single transaction, so nothing can
    /// slip between "unseen" and "recorded". Returns the offers that were
    /// new; any failure rolls the whole batch back.
    pub async fn filter_and_persist(&self, candidates: &[Offer]) -> Result<Vec<Offer>, StoreError> {
        let scraped_at = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;
        let mut new_offers = Vec::new();

        for offer in candidates {
            let seen = sqlx::query("SELECT 1 FROM offers WHERE url = ?1")
                .bind(&offer.url)
                .fetch_optional(&mut *tx)
                .await?
                .is_some();
            if seen {
                continue;
            }
            sqlx::query("INSERT INTO offers (title, url, scraped_at) VALUES (?1, ?2, ?3)")
                .bind(&offer.title)
                .bind(&offer.url)
                .bind(&scraped_at)
                .execute(&mut *tx)
                .await?;
            new_offers.push(offer.clone());
        }

        tx.commit().await?;
        debug!(
            candidates = candidates.len(),
            new = new_offers.len(),
            "recorded new offers"
        );
        Ok(new_offers)
    }

    /// Every persisted offer, oldest first.
    pub async fn all(&self) -> Result<Vec<StoredOffer>, StoreError> {
        let rows = sqlx::query("SELECT id, title, url, scraped_at FROM offers ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| {
                let raw: String = row.get("scraped_at");
                let scraped_at = DateTime::parse_from_rfc3339(&raw)
                    .map_err(|source| StoreError::Timestamp {
                        value: raw.clone(),
                        source,
                    })?
                    .with_timezone(&Utc);
                Ok(StoredOffer {
                    id: row.get("id"),
                    title: row.get("title"),
                    url: row.get("url"),
                    scraped_at,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> OfferStore {
        let store = OfferStore::connect_in_memory().await.expect("connect");
        store.init().await.expect("init");
        store
    }

    #[tokio::test]
    async fn init_is_idempotent() {
        let store = store().await;
        store.init().await.expect("second init");
        store
            .persist(&[Offer::new("Flat", "https://x/1")])
            .await
            .expect("persist");
        store.init().await.expect("init after data");
        assert_eq!(store.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn filter_new_returns_only_unseen_urls() {
        let store = store().await;
        store
            .persist(&[Offer::new("Flat 1", "https://x/1")])
            .await
            .unwrap();

        let candidates = vec![
            Offer::new("Flat 1 again", "https://x/1"),
            Offer::new("Flat 2", "https://x/2"),
        ];
        let new = store.filter_new(&candidates).await.unwrap();
        assert_eq!(new.len(), 1);
        assert_eq!(new[0].url, "https://x/2");
    }

    #[tokio::test]
    async fn persisted_rows_carry_a_persist_time_timestamp() {
        let store = store().await;
        let before = Utc::now();
        store
            .persist(&[
                Offer::new("Flat 1", "https://x/1"),
                Offer::new("Flat 2", "https://x/2"),
            ])
            .await
            .unwrap();
        let after = Utc::now();

        let rows = store.all().await.unwrap();
        assert_eq!(rows.len(), 2);
        for row in &rows {
            assert!(row.scraped_at >= before && row.scraped_at <= after);
        }
        // One timestamp per batch.
        assert_eq!(rows[0].scraped_at, rows[1].scraped_at);
    }

    #[tokio::test]
    async fn duplicate_url_in_batch_rolls_back_the_whole_batch() {
        let store = store().await;
        store
            .persist(&[Offer::new("Flat 1", "https://x/1")])
            .await
            .unwrap();

        // Second row collides with committed history; neither row of this
        // batch may become visible.
        let result = store
            .persist(&[
                Offer::new("Flat 2", "https://x/2"),
                Offer::new("Flat 1 again", "https://x/1"),
            ])
            .await;
        assert!(matches!(result, Err(StoreError::Database(_))));

        let rows = store.all().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].url, "https://x/1");
    }

    #[tokio::test]
    async fn no_two_rows_ever_share_a_url() {
        let store = store().await;
        for _ in 0..3 {
            let candidates = vec![
                Offer::new("Flat 1", "https://x/1"),
                Offer::new("Flat 2", "https://x/2"),
            ];
            let new = store.filter_new(&candidates).await.unwrap();
            store.persist(&new).await.unwrap();
        }

        let rows = store.all().await.unwrap();
        assert_eq!(rows.len(), 2);
        let mut urls: Vec<_> = rows.iter().map(|r| r.url.as_str()).collect();
        urls.dedup();
        assert_eq!(urls.len(), 2);
    }

    #[tokio::test]
    async fn filter_and_persist_records_only_unseen_urls_in_one_pass() {
        let store = store().await;
        store
            .persist(&[Offer::new("Flat 1", "https://x/1")])
            .await
            .unwrap();

        let new = store
            .filter_and_persist(&[
                Offer::new("Flat 1 again", "https://x/1"),
                Offer::new("Flat 2", "https://x/2"),
            ])
            .await
            .unwrap();
        assert_eq!(new.len(), 1);
        assert_eq!(new[0].url, "https://x/2");
        assert_eq!(store.all().await.unwrap().len(), 2);

        // Replaying the same candidates records nothing further.
        let replay = store
            .filter_and_persist(&[
                Offer::new("Flat 1", "https://x/1"),
                Offer::new("Flat 2", "https://x/2"),
            ])
            .await
            .unwrap();
        assert!(replay.is_empty());
        assert_eq!(store.all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn store_survives_reopen_on_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("offers.sqlite");

        {
            let store = OfferStore::connect(&path).await.unwrap();
            store.init().await.unwrap();
            store
                .persist(&[Offer::new("Flat 1", "https://x/1")])
                .await
                .unwrap();
        }

        let store = OfferStore::connect(&path).await.unwrap();
        store.init().await.unwrap();
        let new = store
            .filter_new(&[Offer::new("Flat 1", "https://x/1")])
            .await
            .unwrap();
        assert!(new.is_empty());
    }
}

//! Ingestion pipeline orchestration and the retry-forever cycle driver.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use flatwatch_adapters::{HttpClientConfig, HttpFetcher, SourceRegistry};
use flatwatch_core::{CycleSummary, Offer};
use flatwatch_notify::Notifier;
use flatwatch_storage::{OfferStore, StoreError};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "flatwatch-sync";

pub const DEFAULT_INTERVAL_SECS: u64 = 600;

/// The stock query set: Gdańsk Wrzeszcz rentals, 3+ rooms, one query per
/// supported portal.
pub fn default_queries() -> Vec<String> {
    [
        "https://www.olx.pl/nieruchomosci/mieszkania/wynajem/gdansk/?search%5Bfilter_enum_rooms%5D%5B0%5D=three&search%5Bfilter_enum_rooms%5D%5B1%5D=four&search%5Bdistrict_id%5D=99",
        "https://www.otodom.pl/pl/oferty/wynajem/mieszkanie/gdansk/wrzeszcz?distanceRadius=0&page=1&limit=36&market=ALL&locations=%5Bdistricts_6-30%5D&roomsNumber=%5BTHREE%2CFOUR%2CFIVE%2CSIX%5D&viewType=listing&lang=pl",
        "https://ogloszenia.trojmiasto.pl/nieruchomosci-mam-do-wynajecia/mieszkanie/gdansk/wrzeszcz/ri,3_.html",
        "https://gratka.pl/nieruchomosci/mieszkania/wynajem?liczba-pokoi:min=3&lokalizacja[0]=117179&lokalizacja[1]=33771825&lokalizacja[2]=33771827",
        "https://www.morizon.pl/do-wynajecia/mieszkania/gdansk/wrzeszcz/?ps%5Bnumber_of_rooms_from%5D=3",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_path: PathBuf,
    pub queries: Vec<String>,
    pub interval: Duration,
    pub user_agent: String,
    pub http_timeout: Duration,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let queries = std::env::var("FLATWATCH_QUERIES")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .ok()
            .filter(|qs| !qs.is_empty())
            .unwrap_or_else(default_queries);

        Self {
            database_path: std::env::var("FLATWATCH_DB")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("offers.sqlite")),
            queries,
            interval: Duration::from_secs(
                std::env::var("FLATWATCH_INTERVAL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_INTERVAL_SECS),
            ),
            user_agent: std::env::var("FLATWATCH_USER_AGENT")
                .unwrap_or_else(|_| "flatwatch/0.1".to_string()),
            http_timeout: Duration::from_secs(
                std::env::var("FLATWATCH_HTTP_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(20),
            ),
        }
    }
}

/// One fetch→merge→filter→persist→notify pass over all configured queries.
///
/// Per-source and per-notification failures are contained here; only a
/// [`StoreError`] aborts a cycle, and even that is caught by the driver.
pub struct IngestionPipeline {
    registry: SourceRegistry,
    http: HttpFetcher,
    store: OfferStore,
    notifier: Box<dyn Notifier>,
    queries: Vec<String>,
}

impl IngestionPipeline {
    pub fn new(
        registry: SourceRegistry,
        http: HttpFetcher,
        store: OfferStore,
        notifier: Box<dyn Notifier>,
        queries: Vec<String>,
    ) -> Self {
        Self {
            registry,
            http,
            store,
            notifier,
            queries,
        }
    }

    /// Wire up the production pipeline: portal registry, shared HTTP client,
    /// on-disk store with schema init.
    pub async fn from_config(config: &SyncConfig, notifier: Box<dyn Notifier>) -> Result<Self> {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: config.http_timeout,
            user_agent: Some(config.user_agent.clone()),
            ..Default::default()
        })
        .context("building http fetcher")?;
        let store = OfferStore::connect(&config.database_path)
            .await
            .with_context(|| format!("opening {}", config.database_path.display()))?;
        store.init().await.context("initializing offer store")?;

        Ok(Self::new(
            SourceRegistry::production(),
            http,
            store,
            notifier,
            config.queries.clone(),
        ))
    }

    pub async fn run_once(&self) -> Result<CycleSummary, StoreError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("cycle", %run_id);
        self.run_cycle(run_id).instrument(span).await
    }

    async fn run_cycle(&self, run_id: Uuid) -> Result<CycleSummary, StoreError> {
        let started_at = Utc::now();

        // Fetching: all sources in flight at once, each isolated so one
        // failure never discards another source's gathered results.
        let fetches = self
            .queries
            .iter()
            .map(|query| async move { (query, self.registry.gather(&self.http, query).await) });
        let results = futures::future::join_all(fetches).await;

        // Merging: set semantics over url.
        let mut merged: HashSet<Offer> = HashSet::new();
        let mut sources_ok = 0usize;
        let mut sources_failed = 0usize;
        for (query, result) in results {
            match result {
                Ok(offers) => {
                    sources_ok += 1;
                    merged.extend(offers);
                }
                Err(err) => {
                    sources_failed += 1;
                    warn!(query = %query, error = %err, "source skipped this cycle");
                }
            }
        }

        // Filtering and persisting run as one store transaction; a store
        // fault aborts the cycle here, before any notification goes out.
        let candidates: Vec<Offer> = merged.into_iter().collect();
        let new_offers = self.store.filter_and_persist(&candidates).await?;

        // Notifying: persist has committed, so a failed send is at worst a
        // missed alert for this cycle, never a repeat row.
        for offer in &new_offers {
            if let Err(err) = self.notifier.notify(offer).await {
                warn!(url = %offer.url, error = %err, "notification failed");
            }
        }

        let summary = CycleSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            sources_ok,
            sources_failed,
            new_offers: new_offers.len(),
        };
        info!(
            sources_ok = summary.sources_ok,
            sources_failed = summary.sources_failed,
            "New offers: {}",
            summary.new_offers
        );
        Ok(summary)
    }
}

/// Runs the pipeline forever on a fixed cadence. The interval is measured
/// from the end of one cycle to the start of the next. A failed cycle is
/// logged and the loop continues; nothing here terminates the process.
pub struct CycleDriver {
    pipeline: IngestionPipeline,
    interval: Duration,
}

impl CycleDriver {
    pub fn new(pipeline: IngestionPipeline, interval: Duration) -> Self {
        Self { pipeline, interval }
    }

    pub async fn run(&self) {
        loop {
            if let Err(err) = self.pipeline.run_once().await {
                error!(error = %err, "cycle failed; retrying next interval");
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}

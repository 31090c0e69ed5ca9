//! The operations behind every HTTP endpoint and CLI command.
//!
//! Store calls and HTML parsing run on the blocking pool: the store trait is
//! synchronous and parsed documents are not `Send`.

use std::sync::Arc;
use std::time::Instant;

use pluck::extract::text::truncate_chars;
use pluck::instrument::sandbox;
use pluck::store::MappingStore;
use pluck::url_gate::{domain_of, path_of, validate_bare_domain};
use pluck::{
    best_mapping_for, classify, extract_catalog, ExtractionContext, ExtractionOutcome, FieldName,
    PluckResult, ProductRecord, Selectors, SiteMapping, UpsertOutcome, VoteDirection,
};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::error::ServiceResult;
use crate::events::{EventBus, PluckEvent};
use crate::fetcher::{FetchedPage, HttpFetcher, PageFetcher};
use crate::sqlite_store::SqliteMappingStore;

/// Extraction result as returned to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractResponse {
    #[serde(flatten)]
    pub outcome: ExtractionOutcome,
    /// The site mapping consulted for this page, if any. Clients vote on it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapping_id: Option<Uuid>,
    /// One record per catalog row when the mapping carries a row selector.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub catalog: Vec<ProductRecord>,
}

/// A sandbox-ready page.
#[derive(Debug, Clone)]
pub struct SandboxPage {
    pub url: Url,
    pub html: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingSubmission {
    pub domain: String,
    #[serde(default)]
    pub path_pattern: Option<String>,
    pub selectors: Selectors,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingWrite {
    pub mapping: SiteMapping,
    pub status: UpsertOutcome,
}

pub struct PluckService {
    config: ServerConfig,
    store: Arc<dyn MappingStore>,
    fetcher: Arc<dyn PageFetcher>,
    events: EventBus,
}

impl PluckService {
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn MappingStore>,
        fetcher: Arc<dyn PageFetcher>,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            store,
            fetcher,
            events,
        }
    }

    /// Production wiring: SQLite store at the configured path and the HTTP
    /// fetcher.
    pub fn open(config: ServerConfig, events: EventBus) -> ServiceResult<Self> {
        let store = SqliteMappingStore::open(&config.db_path)?;
        let fetcher = HttpFetcher::new(config.fetch_timeout)?;
        Ok(Self::new(config, Arc::new(store), Arc::new(fetcher), events))
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Gate, fetch and extract one URL.
    pub async fn extract(&self, raw_url: &str) -> ServiceResult<ExtractResponse> {
        let started = Instant::now();
        let page = self.fetch_gated(raw_url).await?;
        let page_url = page.final_url;
        let domain = domain_of(&page_url).unwrap_or_default();

        let lookup_domain = domain.clone();
        let mappings = self
            .with_store(move |store| store.lookup(&lookup_domain))
            .await?;
        let best = best_mapping_for(&mappings, &path_of(&page_url)).cloned();
        let mapping_id = best.as_ref().map(|m| m.id);
        let ctx = ExtractionContext::new(domain.clone()).with_mapping(best);

        let body = page.body;
        let url = page_url.clone();
        let (mut outcome, catalog) = tokio::task::spawn_blocking(move || {
            let outcome = pluck::extract(&body, &url, &ctx);
            let catalog = match &ctx.site_mapping {
                Some(m) if m.selectors.contains_key(&FieldName::Row) => {
                    extract_catalog(&body, &url, m)
                }
                _ => Vec::new(),
            };
            (outcome, catalog)
        })
        .await?;

        if let Some(excerpt) = outcome.html_excerpt.as_mut() {
            let cut = truncate_chars(excerpt, self.config.excerpt_limit).len();
            excerpt.truncate(cut);
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let source = outcome.source();
        let confidence = outcome.product.as_ref().map_or(0.0, |p| p.confidence);
        tracing::info!(
            url = %page_url,
            %source,
            confidence,
            suggest_teaching = outcome.suggest_teaching,
            elapsed_ms,
            "extraction finished"
        );
        self.events.emit(PluckEvent::ExtractionCompleted {
            domain,
            url: page_url.to_string(),
            source: source.to_string(),
            confidence,
            suggest_teaching: outcome.suggest_teaching,
            elapsed_ms,
        });

        Ok(ExtractResponse {
            outcome,
            mapping_id,
            catalog,
        })
    }

    /// Gate and fetch a page, then rewrite it for the teaching sandbox.
    pub async fn sandbox(&self, raw_url: &str) -> ServiceResult<SandboxPage> {
        let page = self.fetch_gated(raw_url).await?;
        let html = sandbox::prepare(&page.body, &page.final_url);
        Ok(SandboxPage {
            url: page.final_url,
            html,
        })
    }

    /// Persist a teaching submission on behalf of `actor`.
    pub async fn submit_mapping(
        &self,
        actor: &str,
        submission: MappingSubmission,
    ) -> ServiceResult<MappingWrite> {
        let actor = actor.to_string();
        let MappingSubmission {
            domain,
            path_pattern,
            selectors,
        } = submission;
        let pattern = path_pattern.unwrap_or_default();

        let created_by = actor.clone();
        let (mapping, status) = self
            .with_store(move |store| store.upsert(&domain, &pattern, selectors, &created_by))
            .await?;

        self.events.emit(PluckEvent::MappingSaved {
            domain: mapping.domain.clone(),
            mapping_id: mapping.id,
            path_pattern: mapping.path_pattern.clone(),
            status: status_str(status).to_string(),
            created_by: actor,
        });
        Ok(MappingWrite { mapping, status })
    }

    /// Mappings for a bare domain, best first.
    pub async fn list_mappings(&self, domain: &str) -> ServiceResult<Vec<SiteMapping>> {
        let domain = validate_bare_domain(domain)?;
        self.with_store(move |store| store.lookup(&domain)).await
    }

    pub async fn vote(&self, id: Uuid, direction: VoteDirection) -> ServiceResult<SiteMapping> {
        let mapping = self
            .with_store(move |store| store.vote(id, direction))
            .await?;
        tracing::info!(%id, ?direction, confidence = mapping.confidence, "vote recorded");
        self.events.emit(PluckEvent::MappingVoted {
            domain: mapping.domain.clone(),
            mapping_id: id,
            vote: match direction {
                VoteDirection::Up => "up".into(),
                VoteDirection::Down => "down".into(),
            },
            confidence: mapping.confidence,
            upvotes: mapping.upvotes,
            downvotes: mapping.downvotes,
        });
        Ok(mapping)
    }

    async fn fetch_gated(&self, raw_url: &str) -> ServiceResult<FetchedPage> {
        let url = match classify(raw_url).into_result() {
            Ok(url) => url,
            Err(e) => {
                self.events.emit(PluckEvent::ExtractionFailed {
                    domain: None,
                    url: raw_url.to_string(),
                    reason: e.to_string(),
                });
                return Err(e.into());
            }
        };

        match self.fetcher.fetch(&url).await {
            Ok(page) => Ok(page),
            Err(e) => {
                self.events.emit(PluckEvent::ExtractionFailed {
                    domain: domain_of(&url),
                    url: url.to_string(),
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn with_store<T, F>(&self, f: F) -> ServiceResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn MappingStore) -> PluckResult<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let result = tokio::task::spawn_blocking(move || f(store.as_ref())).await?;
        Ok(result?)
    }
}

fn status_str(status: UpsertOutcome) -> &'static str {
    match status {
        UpsertOutcome::Created => "created",
        UpsertOutcome::Updated => "updated",
    }
}

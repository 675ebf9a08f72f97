//! Service operation facade
//!
//! The function contracts consumed by the transport adapters (stdio serve
//! loop, CLI). Every read pins the head version at entry and goes through
//! the version-keyed caches; mutations run the indexing pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use sdl_core::config::{PolicyConfig, SdlConfig};
use sdl_core::features::cache::{Invalidate, VersionedCache};
use sdl_core::features::delta::{DeltaEngine, DeltaPack};
use sdl_core::features::indexing::{IndexOptions, IndexPipeline, IndexStats};
use sdl_core::features::parsing::AdapterRegistry;
use sdl_core::features::policy::{
    self, Decision, PolicyCtx, PolicyDecision, PolicyRule, RequestType,
};
use sdl_core::features::slicing::{SliceEngine, SliceInput, SliceResult};
use sdl_core::features::watcher::{FileWatcher, WatchConfig, WatchSink, WatcherHealth};
use sdl_core::shared::models::SymbolCard;
use sdl_core::CancelToken;
use sdl_storage::{Repository, SqliteLedgerStore, SymbolHit};

use crate::artifact::{self, LedgerArtifact};
use crate::error::{Result, ServiceError};
use crate::skeleton::{self, Skeleton};
use crate::window::{self, CodeWindow};

// ═══════════════════════════════════════════════════════════════════════════
// Request / response shapes
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRepoRequest {
    pub repo_id: String,
    pub root_path: String,
    #[serde(default)]
    pub ignore: Vec<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub max_file_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoStatus {
    pub repo_id: String,
    pub head_version: Option<i64>,
    pub file_count: u64,
    pub symbol_count: u64,
    pub edge_count: u64,
    pub last_indexed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watcher_health: Option<WatcherHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshOutcome {
    pub version_id: Option<i64>,
    pub stats: IndexStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CardResponse {
    NotModified { not_modified: bool, etag: String },
    Card(Box<SymbolCard>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SliceRefreshResponse {
    NotModified {
        not_modified: bool,
        lease_expires_at: DateTime<Utc>,
    },
    Delta(Box<DeltaPack>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowRequest {
    pub repo_id: String,
    pub symbol_id: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub expected_lines: Option<u32>,
    #[serde(default)]
    pub expected_tokens: Option<u32>,
    #[serde(default)]
    pub identifiers_to_find: Vec<String>,
    /// Slice context asserted by the caller
    #[serde(default)]
    pub slice_symbol_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowResponse {
    pub decision: Decision,
    pub audit_hash: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub denied_reasons: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downgrade_target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_best_action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<CodeWindow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skeleton: Option<Skeleton>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkeletonRequest {
    pub repo_id: String,
    #[serde(default)]
    pub symbol_id: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
}

/// Partial policy update; unset fields keep their current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyPatch {
    pub max_window_lines: Option<u32>,
    pub max_window_tokens: Option<u32>,
    pub require_identifiers: Option<bool>,
    pub allow_break_glass: Option<bool>,
    pub default_deny_raw: Option<bool>,
    pub slice_max_cards: Option<u32>,
    pub slice_max_tokens: Option<u32>,
}

impl PolicyPatch {
    fn apply(&self, base: &PolicyConfig) -> PolicyConfig {
        PolicyConfig {
            max_window_lines: self.max_window_lines.unwrap_or(base.max_window_lines),
            max_window_tokens: self.max_window_tokens.unwrap_or(base.max_window_tokens),
            require_identifiers: self.require_identifiers.unwrap_or(base.require_identifiers),
            allow_break_glass: self.allow_break_glass.unwrap_or(base.allow_break_glass),
            default_deny_raw: self.default_deny_raw.unwrap_or(base.default_deny_raw),
            slice_max_cards: self.slice_max_cards.unwrap_or(base.slice_max_cards),
            slice_max_tokens: self.slice_max_tokens.unwrap_or(base.slice_max_tokens),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Service
// ═══════════════════════════════════════════════════════════════════════════

pub struct SdlService {
    config: SdlConfig,
    store: Arc<SqliteLedgerStore>,
    registry: Arc<AdapterRegistry>,
    pipeline: Arc<IndexPipeline>,
    slices: SliceEngine,
    deltas: DeltaEngine,
    slice_cache: Arc<VersionedCache<SliceResult>>,
    card_cache: Arc<VersionedCache<SymbolCard>>,
    rules: Vec<Box<dyn PolicyRule>>,
    policy_overrides: Mutex<HashMap<String, PolicyConfig>>,
    watchers: Mutex<HashMap<String, FileWatcher>>,
}

impl SdlService {
    /// Open (or create) the ledger at the configured path and register the
    /// configured repos.
    pub fn new(config: SdlConfig) -> Result<Self> {
        let store = Arc::new(SqliteLedgerStore::open(config.db_path())?);
        Self::with_store(config, store)
    }

    /// Build on an existing store (tests use the in-memory variant).
    pub fn with_store(config: SdlConfig, store: Arc<SqliteLedgerStore>) -> Result<Self> {
        let registry = Arc::new(AdapterRegistry::with_defaults());
        let slice_cache: Arc<VersionedCache<SliceResult>> =
            Arc::new(VersionedCache::from_config(&config.cache));
        let card_cache: Arc<VersionedCache<SymbolCard>> =
            Arc::new(VersionedCache::from_config(&config.cache));

        let invalidators: Vec<Arc<dyn Invalidate>> =
            vec![slice_cache.clone(), card_cache.clone()];
        let pipeline = Arc::new(IndexPipeline::new(
            store.clone(),
            registry.clone(),
            invalidators,
            config.indexing.effective_workers(),
        )?);

        let service = Self {
            slices: SliceEngine::new(store.clone()),
            deltas: DeltaEngine::new(store.clone()),
            rules: policy::default_rules(),
            policy_overrides: Mutex::new(HashMap::new()),
            watchers: Mutex::new(HashMap::new()),
            store,
            registry,
            pipeline,
            slice_cache,
            card_cache,
            config,
        };
        service.bootstrap()?;
        Ok(service)
    }

    /// Register every repo named in the configuration file.
    fn bootstrap(&self) -> Result<()> {
        for repo in &self.config.repos {
            self.register_repo(RegisterRepoRequest {
                repo_id: repo.repo_id.clone(),
                root_path: repo.root_path.to_string_lossy().to_string(),
                ignore: repo.ignore.clone(),
                languages: repo.languages.clone(),
                max_file_bytes: repo.max_file_bytes,
            })?;
        }
        Ok(())
    }

    pub fn store(&self) -> &Arc<SqliteLedgerStore> {
        &self.store
    }

    pub fn config(&self) -> &SdlConfig {
        &self.config
    }

    fn repo(&self, repo_id: &str) -> Result<Repository> {
        self.store
            .get_repo(repo_id)
            .map_err(|_| ServiceError::UnknownRepo(repo_id.to_string()))
    }

    fn head(&self, repo_id: &str) -> Result<i64> {
        self.repo(repo_id)?;
        self.store
            .head_version(repo_id)?
            .ok_or_else(|| ServiceError::NotIndexed(repo_id.to_string()))
    }

    fn effective_policy(&self, repo_id: &str) -> PolicyConfig {
        self.policy_overrides
            .lock()
            .get(repo_id)
            .cloned()
            .unwrap_or_else(|| self.config.policy.clone())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // repo.*
    // ═══════════════════════════════════════════════════════════════════════

    pub fn register_repo(&self, request: RegisterRepoRequest) -> Result<()> {
        if request.repo_id.is_empty() {
            return Err(ServiceError::InvalidQuery("repo_id must not be empty".into()));
        }
        if !std::path::Path::new(&request.root_path).is_absolute() {
            return Err(ServiceError::InvalidQuery(format!(
                "root_path must be absolute: {}",
                request.root_path
            )));
        }
        let mut repo = Repository::new(request.repo_id.clone(), request.root_path);
        repo.ignore = request.ignore;
        repo.languages = request.languages;
        repo.max_file_bytes = request.max_file_bytes;
        self.store.register_repo(&repo)?;
        info!(repo_id = %request.repo_id, "repository registered");
        Ok(())
    }

    pub fn repo_status(&self, repo_id: &str) -> Result<RepoStatus> {
        let repo = self.repo(repo_id)?;
        let head = self.store.head_version(repo_id)?;
        let counts = match head {
            Some(v) => self.store.counts(repo_id, v)?,
            None => Default::default(),
        };
        Ok(RepoStatus {
            repo_id: repo.repo_id,
            head_version: head,
            file_count: counts.file_count,
            symbol_count: counts.symbol_count,
            edge_count: counts.edge_count,
            last_indexed_at: self.store.last_indexed_at(repo_id)?,
            watcher_health: self.watchers.lock().get(repo_id).map(|w| w.health()),
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // index.*
    // ═══════════════════════════════════════════════════════════════════════

    pub fn index_refresh(
        &self,
        repo_id: &str,
        full: bool,
        reason: Option<String>,
    ) -> Result<RefreshOutcome> {
        self.repo(repo_id)?;
        let options = IndexOptions {
            full,
            reason,
            cancel: CancelToken::new(),
        };
        let outcome = self.pipeline.run(repo_id, &options)?;
        Ok(RefreshOutcome {
            version_id: outcome.version,
            stats: outcome.stats,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // symbol.*
    // ═══════════════════════════════════════════════════════════════════════

    pub fn symbol_search(
        &self,
        repo_id: &str,
        query: &str,
        limit: Option<usize>,
    ) -> Result<Vec<SymbolHit>> {
        if query.is_empty() {
            return Err(ServiceError::InvalidQuery("query must not be empty".into()));
        }
        let version = self.head(repo_id)?;
        Ok(self
            .store
            .search_symbols(repo_id, version, query, limit.unwrap_or(20))?)
    }

    pub fn symbol_get_card(
        &self,
        repo_id: &str,
        symbol_id: &str,
        if_none_match: Option<&str>,
    ) -> Result<CardResponse> {
        let version = self.head(repo_id)?;
        let key = format!("card:{symbol_id}");

        let card = match self.card_cache.get(repo_id, &key, version) {
            Some(card) => (*card).clone(),
            None => {
                let symbol = self
                    .store
                    .get_symbol(repo_id, version, symbol_id)?
                    .ok_or_else(|| ServiceError::UnknownSymbol(symbol_id.to_string()))?;
                let card = SymbolCard::from_symbol(&symbol);
                self.card_cache.set(repo_id, &key, version, card.clone());
                card
            }
        };

        if if_none_match == Some(card.etag.as_str()) {
            return Ok(CardResponse::NotModified {
                not_modified: true,
                etag: card.etag,
            });
        }
        Ok(CardResponse::Card(Box::new(card)))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // slice.*
    // ═══════════════════════════════════════════════════════════════════════

    pub fn slice_build(&self, input: &SliceInput) -> Result<SliceResult> {
        let version = self.head(&input.repo_id)?;
        let config = self.effective_policy(&input.repo_id);

        // budget gate runs through the same rule pipeline as code access
        let ctx = PolicyCtx {
            repo_id: input.repo_id.clone(),
            request_type: RequestType::GraphSlice,
            symbol_id: None,
            reason: input.task_text.clone(),
            identifiers_to_find: Vec::new(),
            slice_symbol_ids: Vec::new(),
            budget_max_cards: Some(input.budget.max_cards as u32),
            budget_max_tokens: Some(input.budget.max_estimated_tokens),
            window_lines: None,
            window_tokens: None,
        };
        let verdict = policy::evaluate(&self.rules, &config, &ctx);
        if verdict.decision == Decision::Deny {
            return Err(ServiceError::BudgetExceeded(
                verdict
                    .denied_reasons
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "slice budget over policy caps".into()),
            ));
        }

        let fingerprint = sdl_core::features::slicing::fingerprint_input(input);
        let key = format!("slice:{fingerprint}");
        if let Some(cached) = self.slice_cache.get(&input.repo_id, &key, version) {
            return Ok((*cached).clone());
        }

        let result = self.slices.build(input, version)?;
        self.slice_cache
            .set(&input.repo_id, &key, version, result.clone());
        Ok(result)
    }

    pub fn slice_refresh(
        &self,
        slice_handle: &str,
        known_version: i64,
    ) -> Result<SliceRefreshResponse> {
        let record = self.slices.handles.get(slice_handle).ok_or_else(|| {
            ServiceError::StaleVersion(format!("slice handle unknown or expired: {slice_handle}"))
        })?;
        let head = self.head(&record.repo_id)?;

        if head == record.version && head == known_version {
            let lease = self
                .slices
                .handles
                .refresh_lease(slice_handle)
                .ok_or_else(|| {
                    ServiceError::StaleVersion(format!("lease expired: {slice_handle}"))
                })?;
            return Ok(SliceRefreshResponse::NotModified {
                not_modified: true,
                lease_expires_at: lease,
            });
        }

        let from = record.version.min(known_version).min(head);
        let config = self.effective_policy(&record.repo_id);
        let delta = self.deltas.get(
            &record.repo_id,
            from,
            head,
            config.slice_max_cards as usize,
        )?;
        Ok(SliceRefreshResponse::Delta(Box::new(delta)))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // delta.*
    // ═══════════════════════════════════════════════════════════════════════

    pub fn delta_get(&self, repo_id: &str, from_version: i64, to_version: i64) -> Result<DeltaPack> {
        self.repo(repo_id)?;
        let config = self.effective_policy(repo_id);
        Ok(self
            .deltas
            .get(repo_id, from_version, to_version, config.slice_max_cards as usize)?)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // code.*
    // ═══════════════════════════════════════════════════════════════════════

    pub fn code_need_window(&self, request: &WindowRequest) -> Result<WindowResponse> {
        let repo = self.repo(&request.repo_id)?;
        let version = self.head(&request.repo_id)?;
        let symbol = self
            .store
            .get_symbol(&request.repo_id, version, &request.symbol_id)?
            .ok_or_else(|| ServiceError::UnknownSymbol(request.symbol_id.clone()))?;

        let config = self.effective_policy(&request.repo_id);
        let ctx = PolicyCtx {
            repo_id: request.repo_id.clone(),
            request_type: RequestType::CodeWindow,
            symbol_id: Some(request.symbol_id.clone()),
            reason: request.reason.clone(),
            identifiers_to_find: request.identifiers_to_find.clone(),
            slice_symbol_ids: request.slice_symbol_ids.clone(),
            budget_max_cards: None,
            budget_max_tokens: None,
            window_lines: request.expected_lines,
            window_tokens: request.expected_tokens,
        };
        let verdict: PolicyDecision = policy::evaluate(&self.rules, &config, &ctx);

        let mut response = WindowResponse {
            decision: verdict.decision,
            audit_hash: verdict.audit_hash,
            denied_reasons: verdict.denied_reasons,
            downgrade_target: verdict.downgrade_target,
            next_best_action: verdict.next_best_action.map(|a| a.as_str().to_string()),
            content: None,
            skeleton: None,
        };

        match verdict.decision {
            Decision::Approve => {
                let cap = request
                    .expected_lines
                    .unwrap_or(config.max_window_lines)
                    .min(config.max_window_lines);
                response.content = Some(window::extract_window(&repo, &symbol, cap)?);
            }
            Decision::DowngradeToHotpath => {
                response.content = Some(window::extract_hotpath(
                    &repo,
                    &symbol,
                    &request.identifiers_to_find,
                    config.max_window_lines,
                )?);
            }
            Decision::DowngradeToSkeleton => {
                let file_symbols =
                    self.store
                        .symbols_by_file(&request.repo_id, version, &symbol.file_path)?;
                response.skeleton = Some(skeleton::render_symbol(&symbol, &file_symbols));
            }
            Decision::Deny => {}
        }
        Ok(response)
    }

    pub fn code_get_skeleton(&self, request: &SkeletonRequest) -> Result<Skeleton> {
        let version = self.head(&request.repo_id)?;
        match (&request.symbol_id, &request.file) {
            (Some(symbol_id), _) => {
                let symbol = self
                    .store
                    .get_symbol(&request.repo_id, version, symbol_id)?
                    .ok_or_else(|| ServiceError::UnknownSymbol(symbol_id.clone()))?;
                let file_symbols =
                    self.store
                        .symbols_by_file(&request.repo_id, version, &symbol.file_path)?;
                Ok(skeleton::render_symbol(&symbol, &file_symbols))
            }
            (None, Some(file)) => {
                let symbols = self.store.symbols_by_file(&request.repo_id, version, file)?;
                if symbols.is_empty() {
                    return Err(ServiceError::InvalidQuery(format!(
                        "no symbols recorded for file {file}"
                    )));
                }
                Ok(skeleton::render_file(file, &symbols))
            }
            (None, None) => Err(ServiceError::InvalidQuery(
                "skeleton request needs symbol_id or file".into(),
            )),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // policy.*
    // ═══════════════════════════════════════════════════════════════════════

    pub fn policy_get(&self, repo_id: &str) -> Result<PolicyConfig> {
        self.repo(repo_id)?;
        Ok(self.effective_policy(repo_id))
    }

    pub fn policy_set(&self, repo_id: &str, patch: &PolicyPatch) -> Result<PolicyConfig> {
        self.repo(repo_id)?;
        let updated = patch.apply(&self.effective_policy(repo_id));
        self.policy_overrides
            .lock()
            .insert(repo_id.to_string(), updated.clone());
        info!(repo_id, "policy updated");
        Ok(updated)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // sync artifact
    // ═══════════════════════════════════════════════════════════════════════

    pub fn export_repo(&self, repo_id: &str) -> Result<LedgerArtifact> {
        artifact::export(&self.store, repo_id)
    }

    pub fn import_artifact(&self, pack: &LedgerArtifact) -> Result<()> {
        artifact::import(&self.store, pack)
    }

    pub fn status_fingerprint(&self, repo_id: &str) -> Result<String> {
        artifact::status_fingerprint(&self.store, repo_id)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // watcher
    // ═══════════════════════════════════════════════════════════════════════

    pub fn watch_start(&self, repo_id: &str) -> Result<()> {
        let repo = self.repo(repo_id)?;
        let mut watchers = self.watchers.lock();
        if watchers.contains_key(repo_id) {
            return Ok(());
        }

        let mut config = WatchConfig::new(repo.root_path.clone());
        config.debounce =
            std::time::Duration::from_millis(self.config.indexing.debounce_ms.max(50));
        config.ignore_patterns = repo.ignore.clone();
        config.extensions = self
            .registry
            .allowed_extensions(&repo.languages)
            .into_iter()
            .map(String::from)
            .collect();

        let sink = Arc::new(Mutex::new(IndexSink {
            repo_id: repo_id.to_string(),
            pipeline: self.pipeline.clone(),
        }));
        let mut watcher = FileWatcher::new(config, sink)?;
        watcher.start()?;
        watchers.insert(repo_id.to_string(), watcher);
        info!(repo_id, "watcher started");
        Ok(())
    }

    pub fn watch_stop(&self, repo_id: &str) -> Result<()> {
        if let Some(mut watcher) = self.watchers.lock().remove(repo_id) {
            watcher.stop()?;
            info!(repo_id, "watcher stopped");
        }
        Ok(())
    }
}

/// Watch batches turn into incremental index passes.
struct IndexSink {
    repo_id: String,
    pipeline: Arc<IndexPipeline>,
}

impl WatchSink for IndexSink {
    fn on_batch(&mut self, paths: Vec<std::path::PathBuf>) {
        let options = IndexOptions {
            full: false,
            reason: Some(format!("watcher: {} changed paths", paths.len())),
            cancel: CancelToken::new(),
        };
        match self.pipeline.run(&self.repo_id, &options) {
            Ok(outcome) => {
                if let Some(version) = outcome.version {
                    info!(repo_id = %self.repo_id, version, "watch-triggered index pass");
                }
            }
            Err(err) => warn!(repo_id = %self.repo_id, %err, "watch-triggered pass failed"),
        }
    }

    fn on_error(&mut self, message: String) {
        warn!(repo_id = %self.repo_id, message, "watcher error");
    }
}

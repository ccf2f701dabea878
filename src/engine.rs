//! 顶层协调器：源数据变化 → 脏标记 → 刷新 → 立方体查询

use std::sync::Arc;

use tracing::debug;

use crate::common::{OlapError, Result, SourceRowId};
use crate::config::EngineConfig;
use crate::cube::{Cube, CubeQuery};
use crate::dirty::{DirtyFlag, DirtyFlagTracker, SourceEntity};
use crate::expression::{ExpressionProvider, SqlExpressionProvider};
use crate::metadata::MetadataProvider;
use crate::refresh::{ManualRefresh, RefreshOrchestrator, RefreshReport};
use crate::store::{transactional, MemoryStore, RowFetcher, SummaryStore};

pub struct SummaryEngine<S> {
    metadata:    Arc<dyn MetadataProvider>,
    expressions: Box<dyn ExpressionProvider>,
    config:      EngineConfig,
    store:       S,
}

impl<S: SummaryStore + RowFetcher> SummaryEngine<S> {
    pub fn new(metadata: Arc<dyn MetadataProvider>, store: S, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { metadata, expressions: Box::new(SqlExpressionProvider), config, store })
    }

    pub fn with_expressions(mut self, expressions: impl ExpressionProvider + 'static) -> Self {
        self.expressions = Box::new(expressions); self
    }

    pub fn metadata(&self) -> &dyn MetadataProvider { self.metadata.as_ref() }
    pub fn config(&self) -> &EngineConfig { &self.config }
    pub fn store(&self) -> &S { &self.store }
    pub fn store_mut(&mut self) -> &mut S { &mut self.store }

    // ── 源数据变化 ────────────────────────────────────────────────────────────

    /// 新建：每个汇总类一个新数据标记；早于最新键的实体另标记其分区
    pub fn record_creation(&mut self, entity: &SourceEntity) -> Result<Vec<DirtyFlag>> {
        let tracker = DirtyFlagTracker::new(self.metadata.as_ref());
        let mut flags = tracker.generate_for_entity_creation(entity)?;
        flags.extend(tracker.generate_for_backdated_creation(&self.store, entity)?);
        self.mark(flags)
    }

    pub fn record_modification(
        &mut self,
        entity:   &SourceEntity,
        changed:  &[String],
        original: Option<&SourceEntity>,
    ) -> Result<Vec<DirtyFlag>> {
        let tracker = DirtyFlagTracker::new(self.metadata.as_ref());
        let flags = tracker.generate_for_entity_modification(entity, changed, original)?;
        self.mark(flags)
    }

    pub fn record_deletion(&mut self, entity: &SourceEntity) -> Result<Vec<DirtyFlag>> {
        let tracker = DirtyFlagTracker::new(self.metadata.as_ref());
        let flags = tracker.generate_for_entity_deletion(entity)?;
        self.mark(flags)
    }

    fn mark(&mut self, flags: Vec<DirtyFlag>) -> Result<Vec<DirtyFlag>> {
        if flags.is_empty() {
            return Ok(flags);
        }
        let tracker = DirtyFlagTracker::new(self.metadata.as_ref());
        transactional(&mut self.store, |s| tracker.mark(s, flags.clone()))?;
        debug!(flags = flags.len(), "dirty flags recorded");
        Ok(flags)
    }

    // ── 刷新 ──────────────────────────────────────────────────────────────────

    fn orchestrator(&mut self) -> RefreshOrchestrator<'_> {
        RefreshOrchestrator::new(
            &mut self.store,
            self.metadata.as_ref(),
            self.expressions.as_ref(),
            self.config.refresh.clone(),
        )
    }

    /// 增量刷新：新数据 + 全部脏分区
    pub fn refresh_dirty(&mut self, class: &str) -> Result<RefreshReport> {
        self.orchestrator().refresh(class)
    }

    /// 手动区间刷新
    pub fn refresh(&mut self, class: &str, request: &ManualRefresh) -> Result<RefreshReport> {
        self.orchestrator().manual_refresh(class, request)
    }

    // ── 查询 ──────────────────────────────────────────────────────────────────

    pub fn query(&self, query: &CubeQuery) -> Result<Cube> {
        let meta = self.metadata.summary(&query.class)?;
        query.validate(meta)?;
        let rows = self.store.fetch_rows(query)?;
        Cube::build(query, meta, rows, &self.config.cube)
    }
}

// ── 进程内引擎 ────────────────────────────────────────────────────────────────

impl SummaryEngine<MemoryStore> {
    pub fn in_memory(metadata: Arc<dyn MetadataProvider>, config: EngineConfig) -> Result<Self> {
        let store = MemoryStore::new(Arc::clone(&metadata));
        Self::new(metadata, store, config)
    }

    /// 写入源行并记录脏标记
    pub fn insert(&mut self, entity: SourceEntity) -> Result<SourceRowId> {
        let id = self.store.insert_source(&entity);
        self.record_creation(&entity)?;
        Ok(id)
    }

    /// 覆盖 `changes` 中的属性
    pub fn update(&mut self, id: SourceRowId, changes: SourceEntity) -> Result<()> {
        let original = self.store.update_source(id, &changes)?;
        let current = self.store.source_row(&changes.class, id)
            .ok_or_else(|| OlapError::invalid(format!("no {} row with id {id}", changes.class)))?;
        let changed: Vec<String> = changes.values.keys().cloned().collect();
        self.record_modification(&current, &changed, Some(&original))?;
        Ok(())
    }

    pub fn delete(&mut self, class: &str, id: SourceRowId) -> Result<()> {
        let entity = self.store.delete_source(class, id)?;
        self.record_deletion(&entity)?;
        Ok(())
    }
}

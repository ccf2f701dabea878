//! 增量刷新
//!
//! ```text
//!   新数据标记 ──convert_new_to_dirty──► 最低层脏分区
//!                                           │
//!        ┌──────────────────────────────────┘
//!        ▼
//!   dirty_partitions(limit) ─► group_contiguous ─► refresh_range（每段一个事务）
//!        ▲                                              │
//!        └─────────── 上层分区标记（按需）◄──────────────┘
//! ```
//!
//! 每段区间在一个事务内完成：删旧汇总行、删该段脏标记、重算、标记上层。
//! 失败即整体回滚，脏标记保留，下次刷新重试。

use tracing::{debug, info, warn};

use crate::common::{OlapError, Result};
use crate::config::RefreshConfig;
use crate::dirty::{DirtyFlag, DirtyFlagTracker};
use crate::expression::{ExpressionProvider, Phase};
use crate::metadata::{MetadataProvider, SummaryMetadata};
use crate::partition::{Partition, PartitionRange};
use crate::statement::{ColumnBinding, RollupStatement, Statement};
use crate::store::{transactional, SummaryStore};
use crate::value::Value;

mod manual;

pub use manual::{ranges_for_manual_refresh, ManualRefresh};

/// 汇总行中分区键列的名字
pub const PARTITION_KEY_COLUMN: &str = "partition_key";

/// 编排器所处阶段；任何出口（含出错）都回到 `Idle`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    ConvertingNewToDirty,
    SelectingDirty,
    RecomputingRange,
    PropagatingUpward,
}

/// 一次刷新做了什么
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub class:        String,
    /// 已重算区间的签名，按执行顺序
    pub ranges:       Vec<String>,
    /// 断点续刷时跳过的批次签名
    pub skipped:      Vec<String>,
    /// 新标记的上层分区数
    pub marked_upper: usize,
    /// 最新键是否已追上源数据
    pub caught_up:    bool,
}

impl RefreshReport {
    fn new(class: &str) -> Self {
        Self { class: class.into(), ..Self::default() }
    }
}

/// 重算完 `partition` 后是否需要标记其上层分区。
///
/// 上层分区只在"已完整"时才值得汇总：若 `partition` 在已处理范围内，
/// 上层分区须整体不晚于最新键；否则只有补完上层的最后一个分区才触发标记。
pub fn is_necessary_to_mark_upper_partition_as_dirty(partition: &Partition, latest: Option<&Value>) -> bool {
    let Some(parent) = partition.containing() else { return false };
    match latest {
        Some(latest) if partition.lower_bound() <= *latest => {
            latest.successor().is_some_and(|next| parent.upper_bound() <= next)
        }
        _ => partition.upper_bound() == parent.upper_bound(),
    }
}

pub struct RefreshOrchestrator<'a> {
    store:       &'a mut dyn SummaryStore,
    metadata:    &'a dyn MetadataProvider,
    expressions: &'a dyn ExpressionProvider,
    config:      RefreshConfig,
    state:       RefreshState,
}

impl<'a> RefreshOrchestrator<'a> {
    pub fn new(
        store:       &'a mut dyn SummaryStore,
        metadata:    &'a dyn MetadataProvider,
        expressions: &'a dyn ExpressionProvider,
        config:      RefreshConfig,
    ) -> Self {
        Self { store, metadata, expressions, config, state: RefreshState::Idle }
    }

    pub fn state(&self) -> RefreshState { self.state }

    fn transition(&mut self, next: RefreshState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "refresh state");
            self.state = next;
        }
    }

    fn tracker(&self) -> DirtyFlagTracker<'a> {
        DirtyFlagTracker::new(self.metadata)
    }

    // ── 增量刷新 ──────────────────────────────────────────────────────────────

    /// 把新数据标记转成脏分区，再反复重算脏分区直到没有剩余
    pub fn refresh(&mut self, class: &str) -> Result<RefreshReport> {
        self.metadata.summary(class)?;
        let result = self.refresh_dirty_loop(class);
        self.transition(RefreshState::Idle);
        result
    }

    fn refresh_dirty_loop(&mut self, class: &str) -> Result<RefreshReport> {
        let mut report = RefreshReport::new(class);
        self.convert_new(class)?;

        loop {
            let marked = self.refresh_one(class, &mut report)?;
            if marked == 0 {
                break;
            }
        }
        report.caught_up = self.caught_up(class)?;
        info!(class, ranges = report.ranges.len(), marked_upper = report.marked_upper, "refresh finished");
        Ok(report)
    }

    /// 取至多 `dirty_limit` 个脏分区并重算；返回本轮处理的分区数
    fn refresh_one(&mut self, class: &str, report: &mut RefreshReport) -> Result<usize> {
        self.transition(RefreshState::SelectingDirty);
        let partitions = self.tracker().dirty_partitions(&*self.store, class, self.config.dirty_limit)?;
        if partitions.is_empty() {
            return Ok(0);
        }
        let count = partitions.len();
        let latest = self.store.latest_key(class)?;
        for range in PartitionRange::group_contiguous(partitions) {
            report.marked_upper += self.recompute_range(class, &range, latest.as_ref())?;
            report.ranges.push(range.signature());
        }
        Ok(count)
    }

    /// 新数据标记 → `(latest, max]` 上的最低层脏分区，同时推进最新键。
    /// 返回被标记的区间。
    pub fn convert_new_to_dirty(&mut self, class: &str) -> Result<Option<PartitionRange>> {
        let result = self.convert_new(class);
        self.transition(RefreshState::Idle);
        result
    }

    fn convert_new(&mut self, class: &str) -> Result<Option<PartitionRange>> {
        let tracker = self.tracker();
        if !tracker.has_new_flags(&*self.store, class)? {
            return Ok(None);
        }
        self.transition(RefreshState::ConvertingNewToDirty);
        let meta = self.metadata.summary(class)?;
        let latest = self.store.latest_key(class)?;
        let extent = self.store.source_extent(class)?;

        let range = match &extent {
            Some((min, max)) => {
                let start = match &latest {
                    Some(l) => l.successor().filter(|s| s <= max),
                    None    => Some(min.clone()),
                };
                match start {
                    Some(start) => Some(lowest_range(meta, &start, max)?),
                    None => None,
                }
            }
            None => None,
        };

        transactional(&mut *self.store, |s| {
            if let Some(range) = &range {
                let flags = range.iter().map(|p| DirtyFlag::for_partition(class, &p)).collect();
                tracker.mark(s, flags)?;
            }
            if let Some((_, max)) = &extent {
                if latest.as_ref().map_or(true, |l| l < max) {
                    s.execute(&Statement::SetLatestKey { class: class.into(), key: max.clone() })?;
                }
            }
            tracker.remove_new_flags(s, class)
        })?;

        match &range {
            Some(r) => info!(class, range = %r, partitions = r.len(), "new records converted to dirty partitions"),
            None    => debug!(class, "new-records flag cleared, nothing beyond latest key"),
        }
        Ok(range)
    }

    /// 在一个事务内重算一段同层区间，返回新标记的上层分区数
    pub fn refresh_range(&mut self, class: &str, range: &PartitionRange, latest: Option<&Value>) -> Result<usize> {
        let result = self.recompute_range(class, range, latest);
        self.transition(RefreshState::Idle);
        result
    }

    fn recompute_range(&mut self, class: &str, range: &PartitionRange, latest: Option<&Value>) -> Result<usize> {
        let meta = self.metadata.summary(class)?;
        let rollup = self.rollup_statement(meta, range)?;
        let upper = upper_partition_flags(class, range, latest);
        let marked = upper.len();

        self.transition(RefreshState::RecomputingRange);
        self.store.begin()?;
        let mut applied = self.recompute(class, range, &rollup);
        if applied.is_ok() {
            self.transition(RefreshState::PropagatingUpward);
            applied = self.tracker().mark(&mut *self.store, upper).map(|_| ());
        }

        match applied {
            Ok(()) => {
                self.store.commit()?;
                info!(class, range = %range.signature(), marked_upper = marked, "range refreshed");
                Ok(marked)
            }
            Err(e) => {
                if let Err(rollback) = self.store.rollback() {
                    warn!(error = %rollback, "rollback failed");
                }
                warn!(class, range = %range.signature(), error = %e, "range refresh rolled back");
                Err(e)
            }
        }
    }

    /// 删旧汇总行、删该段脏标记、重算
    fn recompute(&mut self, class: &str, range: &PartitionRange, rollup: &Statement) -> Result<()> {
        self.store.execute(&Statement::DeleteSummaryRows { class: class.into(), range: range.clone() })?;
        self.tracker().remove_dirty_flags(&mut *self.store, class, range)?;
        self.store.execute(rollup)?;
        Ok(())
    }

    fn rollup_statement(&self, meta: &SummaryMetadata, range: &PartitionRange) -> Result<Statement> {
        let scheme = &meta.partition.scheme;
        let level = range.level();
        let (phase, source_level) = if level == scheme.lowest_level() {
            (Phase::SourceToSummary, None)
        } else {
            let child = scheme.child_level(level).ok_or_else(|| {
                OlapError::PartitionNotFound(format!("{}: no level below {level}", meta.class))
            })?;
            (Phase::SummaryToSummary, Some(child))
        };

        let partition_key = ColumnBinding::new(
            PARTITION_KEY_COLUMN,
            self.expressions.partition_key_expression(meta, level, phase)?,
        );
        let dimensions = meta.dimensions.iter()
            .map(|d| Ok(ColumnBinding::new(&d.name, self.expressions.dimension_expression(meta, d, phase)?)))
            .collect::<Result<Vec<_>>>()?;
        let measures = meta.measures.iter()
            .map(|m| Ok(ColumnBinding::new(&m.name, self.expressions.measure_expression(meta, m, phase)?)))
            .collect::<Result<Vec<_>>>()?;

        let rollup = RollupStatement {
            class: meta.class.clone(),
            range: range.clone(),
            source_level,
            partition_key,
            dimensions,
            measures,
        };
        Ok(match phase {
            Phase::SourceToSummary  => Statement::RollUpSourceToSummary(rollup),
            Phase::SummaryToSummary => Statement::RollUpSummaryToSummary(rollup),
        })
    }

    fn caught_up(&self, class: &str) -> Result<bool> {
        Ok(match (self.store.latest_key(class)?, self.store.source_extent(class)?) {
            (_, None) => true,
            (Some(latest), Some((_, max))) => latest >= max,
            (None, Some(_)) => false,
        })
    }
}

/// 区间内需要标记的上层分区，去重并保持出现顺序
fn upper_partition_flags(class: &str, range: &PartitionRange, latest: Option<&Value>) -> Vec<DirtyFlag> {
    let mut flags: Vec<DirtyFlag> = Vec::new();
    for partition in range {
        if !is_necessary_to_mark_upper_partition_as_dirty(&partition, latest) {
            continue;
        }
        if let Some(parent) = partition.containing() {
            let flag = DirtyFlag::for_partition(class, &parent);
            if !flags.contains(&flag) {
                flags.push(flag);
            }
        }
    }
    flags
}

/// `[start, end]` 源键区间对应的最低层分区区间
fn lowest_range(meta: &SummaryMetadata, start: &Value, end: &Value) -> Result<PartitionRange> {
    let scheme = &meta.partition.scheme;
    PartitionRange::new(
        Partition::create_lowest_partition_from_source_value(scheme, start)?,
        Partition::create_lowest_partition_from_source_value(scheme, end)?,
    )
}

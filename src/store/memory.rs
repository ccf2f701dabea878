//! 进程内参考存储
//!
//! 同时实现 [`SummaryStore`] 与 [`RowFetcher`]：
//! - 源表、汇总表、脏标记、最新键都放在一个 [`StoreState`] 里
//! - 事务 = 开始时保存一份状态副本，回滚时整体换回
//! - 汇总语句中的表达式文本只用于展示，计算按列绑定名对照元数据完成
//! - 可整体写入 / 读出快照文件（见 `snapshot` 模块）

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::common::{OlapError, PartitionKey, PartitionLevel, Result, SourceRowId};
use crate::cube::{CubeQuery, GroupingField};
use crate::dirty::{DirtyFlag, SourceEntity};
use crate::metadata::{AggregateFunction, MeasureMetadata, MetadataProvider, SummaryMetadata};
use crate::partition::{covering_ranges, Partition, PartitionRange};
use crate::statement::{RollupStatement, Statement, StatementKind};
use crate::value::Value;

use super::{snapshot, ResultRow, RowFetcher, SummaryStore, GROUPING_COLUMN};

/// 汇总表的一行：某层某分区内一组维度值的度量
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub level:      PartitionLevel,
    pub key:        PartitionKey,
    pub dimensions: BTreeMap<String, Value>,
    pub measures:   BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct StoreState {
    /// 源类 → 行 ID → 属性
    pub sources:     BTreeMap<String, BTreeMap<SourceRowId, BTreeMap<String, Value>>>,
    pub next_row_id: SourceRowId,
    /// 汇总类 → 行
    pub summaries:   BTreeMap<String, Vec<SummaryRow>>,
    pub dirty_flags: BTreeSet<DirtyFlag>,
    pub latest_keys: BTreeMap<String, Value>,
}

pub struct MemoryStore {
    metadata: Arc<dyn MetadataProvider>,
    state:    StoreState,
    /// 事务开始时的状态
    saved:    Option<StoreState>,
    fail_on:  Option<StatementKind>,
    history:  Vec<Statement>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("state", &self.state)
            .field("saved", &self.saved)
            .field("fail_on", &self.fail_on)
            .field("history", &self.history)
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    pub fn new(metadata: Arc<dyn MetadataProvider>) -> Self {
        Self { metadata, state: StoreState::default(), saved: None, fail_on: None, history: vec![] }
    }

    /// 从快照文件恢复
    pub fn open(metadata: Arc<dyn MetadataProvider>, path: impl AsRef<Path>) -> Result<Self> {
        let mut store = Self::new(metadata);
        store.load_snapshot(path)?;
        Ok(store)
    }

    /// 之后执行到该类语句时返回 `StatementFailed`；用于演练回滚
    pub fn fail_on(&mut self, kind: Option<StatementKind>) {
        self.fail_on = kind;
    }

    /// 已尝试执行的语句（含失败与被回滚的）
    pub fn history(&self) -> &[Statement] { &self.history }

    pub fn clear_history(&mut self) { self.history.clear(); }

    // ── 源数据 ────────────────────────────────────────────────────────────────

    pub fn insert_source(&mut self, entity: &SourceEntity) -> SourceRowId {
        let id = self.state.next_row_id;
        self.state.next_row_id += 1;
        self.state.sources.entry(entity.class.clone()).or_default().insert(id, entity.values.clone());
        id
    }

    /// 覆盖给出的属性，返回修改前的实体
    pub fn update_source(&mut self, id: SourceRowId, entity: &SourceEntity) -> Result<SourceEntity> {
        let row = self.state.sources.get_mut(&entity.class)
            .and_then(|rows| rows.get_mut(&id))
            .ok_or_else(|| OlapError::invalid(format!("no {} row with id {id}", entity.class)))?;
        let original = SourceEntity { class: entity.class.clone(), values: row.clone() };
        row.extend(entity.values.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(original)
    }

    pub fn delete_source(&mut self, class: &str, id: SourceRowId) -> Result<SourceEntity> {
        let values = self.state.sources.get_mut(class)
            .and_then(|rows| rows.remove(&id))
            .ok_or_else(|| OlapError::invalid(format!("no {class} row with id {id}")))?;
        Ok(SourceEntity { class: class.into(), values })
    }

    pub fn source_row(&self, class: &str, id: SourceRowId) -> Option<SourceEntity> {
        let values = self.state.sources.get(class)?.get(&id)?.clone();
        Some(SourceEntity { class: class.into(), values })
    }

    pub fn source_len(&self, class: &str) -> usize {
        self.state.sources.get(class).map_or(0, BTreeMap::len)
    }

    pub fn summary_rows(&self, class: &str) -> &[SummaryRow] {
        self.state.summaries.get(class).map(Vec::as_slice).unwrap_or(&[])
    }

    // ── 快照 ──────────────────────────────────────────────────────────────────

    pub fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        if self.in_transaction() {
            return Err(OlapError::Transaction("cannot snapshot inside a transaction".into()));
        }
        let bytes = snapshot::encode(&self.state)?;
        std::fs::write(path.as_ref(), &bytes)?;
        info!(path = %path.as_ref().display(), bytes = bytes.len(), "snapshot saved");
        Ok(())
    }

    pub fn load_snapshot(&mut self, path: impl AsRef<Path>) -> Result<()> {
        if self.in_transaction() {
            return Err(OlapError::Transaction("cannot load a snapshot inside a transaction".into()));
        }
        let bytes = std::fs::read(path.as_ref())?;
        self.state = snapshot::decode(&bytes)?;
        info!(path = %path.as_ref().display(), bytes = bytes.len(), "snapshot loaded");
        Ok(())
    }

    // ── 语句执行 ──────────────────────────────────────────────────────────────

    fn apply(&mut self, statement: &Statement) -> Result<u64> {
        match statement {
            Statement::DeleteSummaryRows { class, range } => {
                let Some(rows) = self.state.summaries.get_mut(class) else { return Ok(0) };
                let before = rows.len();
                rows.retain(|r| !in_range(range, r.level, r.key));
                Ok((before - rows.len()) as u64)
            }
            Statement::RollUpSourceToSummary(rollup) => {
                let rows = self.roll_up_source(rollup)?;
                self.append_summary_rows(&rollup.class, rows)
            }
            Statement::RollUpSummaryToSummary(rollup) => {
                let rows = self.roll_up_summary(rollup)?;
                self.append_summary_rows(&rollup.class, rows)
            }
            Statement::InsertDirtyFlags(flags) => {
                Ok(flags.iter().filter(|f| self.state.dirty_flags.insert((*f).clone())).count() as u64)
            }
            Statement::DeleteDirtyFlags { class, range } => {
                let before = self.state.dirty_flags.len();
                self.state.dirty_flags.retain(|f| match (f.level, f.key) {
                    (Some(level), Some(key)) => f.class != *class || !in_range(range, level, key),
                    _ => true,
                });
                Ok((before - self.state.dirty_flags.len()) as u64)
            }
            Statement::DeleteNewFlags { class } => {
                let before = self.state.dirty_flags.len();
                self.state.dirty_flags.retain(|f| f.class != *class || !f.is_new());
                Ok((before - self.state.dirty_flags.len()) as u64)
            }
            Statement::SetLatestKey { class, key } => {
                self.state.latest_keys.insert(class.clone(), key.clone());
                Ok(1)
            }
        }
    }

    fn append_summary_rows(&mut self, class: &str, rows: Vec<SummaryRow>) -> Result<u64> {
        let n = rows.len() as u64;
        self.state.summaries.entry(class.into()).or_default().extend(rows);
        Ok(n)
    }

    fn roll_up_source(&self, rollup: &RollupStatement) -> Result<Vec<SummaryRow>> {
        let meta = self.metadata.summary(&rollup.class)?;
        let (dimensions, measures) = resolve_bindings(meta, rollup)?;
        let (lower, upper) = (rollup.range.lower_bound(), rollup.range.upper_bound());
        let property = &meta.partition.source_property;

        let mut groups: BTreeMap<(PartitionKey, Vec<Value>), Vec<Accumulator>> = BTreeMap::new();
        let rows = self.state.sources.get(&meta.source_class).into_iter().flat_map(BTreeMap::values);
        for row in rows {
            let Some(value) = row.get(property).filter(|v| !v.is_null()) else { continue };
            if *value < lower || *value >= upper {
                continue;
            }
            let key = Partition::from_source_value(&meta.partition.scheme, rollup.range.level(), value)?.key();
            let dims = dimensions.iter().map(|d| meta.dimensions[*d].source_value(row)).collect();
            let accs = groups.entry((key, dims))
                .or_insert_with(|| measures.iter().map(|m| Accumulator::new(m.function)).collect());
            for (acc, m) in accs.iter_mut().zip(&measures) {
                match &m.source_property {
                    Some(p) => acc.update(row.get(p).unwrap_or(&Value::Null)),
                    None    => acc.count_row(),
                }
            }
        }
        Ok(finish_groups(meta, rollup.range.level(), &dimensions, &measures, groups))
    }

    fn roll_up_summary(&self, rollup: &RollupStatement) -> Result<Vec<SummaryRow>> {
        let meta = self.metadata.summary(&rollup.class)?;
        let child = rollup.source_level.ok_or_else(|| {
            OlapError::invalid("summary-to-summary rollup needs a source level")
        })?;
        let (dimensions, measures) = resolve_bindings(meta, rollup)?;
        let level = rollup.range.level();

        let mut groups: BTreeMap<(PartitionKey, Vec<Value>), Vec<Accumulator>> = BTreeMap::new();
        for row in self.summary_rows(&rollup.class).iter().filter(|r| r.level == child) {
            let partition = Partition::new(meta.partition.scheme.clone(), child, row.key)?;
            let Some(parent) = partition.containing_at(level) else { continue };
            if !in_range(&rollup.range, level, parent.key()) {
                continue;
            }
            let dims = dimensions.iter()
                .map(|d| row.dimensions.get(&meta.dimensions[*d].name).cloned().unwrap_or(Value::Null))
                .collect();
            let accs = groups.entry((parent.key(), dims))
                .or_insert_with(|| measures.iter().map(|m| Accumulator::new(m.function.summary_function())).collect());
            for (acc, m) in accs.iter_mut().zip(&measures) {
                acc.update(row.measures.get(&m.name).unwrap_or(&Value::Null));
            }
        }
        Ok(finish_groups(meta, level, &dimensions, &measures, groups))
    }
}

fn in_range(range: &PartitionRange, level: PartitionLevel, key: PartitionKey) -> bool {
    level == range.level() && range.start().key() <= key && key <= range.end().key()
}

/// 列绑定名 → 元数据中的维度下标 / 度量
fn resolve_bindings<'m>(
    meta:    &'m SummaryMetadata,
    rollup:  &RollupStatement,
) -> Result<(Vec<usize>, Vec<&'m MeasureMetadata>)> {
    let dimensions = rollup.dimensions.iter()
        .map(|b| meta.dimension_index(&b.name)
            .ok_or_else(|| OlapError::metadata(format!("{}: unknown dimension column '{}'", meta.class, b.name))))
        .collect::<Result<Vec<_>>>()?;
    let measures = rollup.measures.iter()
        .map(|b| meta.measure(&b.name)
            .ok_or_else(|| OlapError::metadata(format!("{}: unknown measure column '{}'", meta.class, b.name))))
        .collect::<Result<Vec<_>>>()?;
    Ok((dimensions, measures))
}

fn finish_groups(
    meta:       &SummaryMetadata,
    level:      PartitionLevel,
    dimensions: &[usize],
    measures:   &[&MeasureMetadata],
    groups:     BTreeMap<(PartitionKey, Vec<Value>), Vec<Accumulator>>,
) -> Vec<SummaryRow> {
    groups.into_iter()
        .map(|((key, dims), accs)| SummaryRow {
            level,
            key,
            dimensions: dimensions.iter()
                .map(|d| meta.dimensions[*d].name.clone())
                .zip(dims)
                .collect(),
            measures: measures.iter()
                .map(|m| m.name.clone())
                .zip(accs.into_iter().map(Accumulator::finish))
                .collect(),
        })
        .collect()
}

// ── 聚合 ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Accumulator {
    function: AggregateFunction,
    value:    Option<Value>,
    count:    i64,
}

impl Accumulator {
    fn new(function: AggregateFunction) -> Self {
        Self { function, value: None, count: 0 }
    }

    fn count_row(&mut self) { self.count += 1; }

    /// 空值不参与聚合
    fn update(&mut self, v: &Value) {
        if v.is_null() {
            return;
        }
        match self.function {
            AggregateFunction::Count => self.count += 1,
            AggregateFunction::Sum => {
                self.value = Some(match self.value.take() {
                    Some(acc) => add(&acc, v),
                    None      => v.clone(),
                });
            }
            AggregateFunction::Min => {
                if self.value.as_ref().map_or(true, |acc| v < acc) {
                    self.value = Some(v.clone());
                }
            }
            AggregateFunction::Max => {
                if self.value.as_ref().map_or(true, |acc| v > acc) {
                    self.value = Some(v.clone());
                }
            }
        }
    }

    fn finish(self) -> Value {
        match self.function {
            AggregateFunction::Count => Value::Int64(self.count),
            _ => self.value.unwrap_or(Value::Null),
        }
    }
}

/// 整数溢出时退化为浮点
fn add(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Int64(x), Value::Int64(y)) => x.checked_add(*y)
            .map(Value::Int64)
            .unwrap_or(Value::Float64(*x as f64 + *y as f64)),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => Value::Float64(x + y),
            _ => a.clone(),
        },
    }
}

// ── SummaryStore ──────────────────────────────────────────────────────────────

impl SummaryStore for MemoryStore {
    fn begin(&mut self) -> Result<()> {
        if self.saved.is_some() {
            return Err(OlapError::Transaction("transaction already open".into()));
        }
        self.saved = Some(self.state.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.saved.take()
            .map(|_| ())
            .ok_or_else(|| OlapError::Transaction("commit without an open transaction".into()))
    }

    fn rollback(&mut self) -> Result<()> {
        let saved = self.saved.take()
            .ok_or_else(|| OlapError::Transaction("rollback without an open transaction".into()))?;
        self.state = saved;
        Ok(())
    }

    fn in_transaction(&self) -> bool { self.saved.is_some() }

    fn execute(&mut self, statement: &Statement) -> Result<u64> {
        self.history.push(statement.clone());
        if self.fail_on == Some(statement.kind()) {
            return Err(OlapError::StatementFailed(statement.to_string()));
        }
        let affected = self.apply(statement)?;
        debug!(statement = %statement, affected, "executed");
        Ok(affected)
    }

    fn dirty_flags(&self, class: &str) -> Result<Vec<DirtyFlag>> {
        Ok(self.state.dirty_flags.iter().filter(|f| f.class == class).cloned().collect())
    }

    fn latest_key(&self, class: &str) -> Result<Option<Value>> {
        Ok(self.state.latest_keys.get(class).cloned())
    }

    fn source_extent(&self, class: &str) -> Result<Option<(Value, Value)>> {
        let meta = self.metadata.summary(class)?;
        let property = &meta.partition.source_property;
        let values = self.state.sources.get(&meta.source_class)
            .into_iter()
            .flat_map(BTreeMap::values)
            .filter_map(|row| row.get(property).filter(|v| !v.is_null()));

        let mut extent: Option<(Value, Value)> = None;
        for v in values {
            extent = Some(match extent {
                None => (v.clone(), v.clone()),
                Some((lo, hi)) => (lo.min(v.clone()), hi.max(v.clone())),
            });
        }
        Ok(extent)
    }
}

// ── RowFetcher ────────────────────────────────────────────────────────────────

impl RowFetcher for MemoryStore {
    /// 取截至最新键的汇总行（每层只取覆盖区间），按全部分组集合（CUBE）聚合，
    /// 明细行在前，小计行带 `__grouping` 位串
    fn fetch_rows(&self, query: &CubeQuery) -> Result<Vec<ResultRow>> {
        let meta = self.metadata.summary(&query.class)?;
        let Some(latest) = self.state.latest_keys.get(&query.class) else {
            return Ok(vec![]);
        };
        let point = Partition::create_lowest_partition_from_source_value(&meta.partition.scheme, latest)?;
        let cover = covering_ranges(&point);

        let rows: Vec<&SummaryRow> = self.summary_rows(&query.class).iter()
            .filter(|r| cover.iter().any(|c| c.contains(r.level, r.key)))
            .filter(|r| query.filter.as_ref().map_or(true, |f| f.matches(&|name| r.dimensions.get(name))))
            .collect();

        let dimensions = query.grouping_dimensions();
        let measures: Vec<&MeasureMetadata> = query.measures.iter()
            .map(|m| meta.measure(m).ok_or_else(|| OlapError::invalid(format!("unknown measure '{m}'"))))
            .collect::<Result<_>>()?;

        let mut out = Vec::new();
        for mask in 0u32..(1u32 << dimensions.len()) {
            let grouped: Vec<&str> = dimensions.iter().enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, d)| *d)
                .collect();
            let kept: Vec<&str> = dimensions.iter().copied().filter(|d| !grouped.contains(d)).collect();

            // 空值排在最后
            let mut groups: BTreeMap<Vec<(bool, Value)>, Vec<Accumulator>> = BTreeMap::new();
            for row in &rows {
                let key = kept.iter()
                    .map(|d| {
                        let v = row.dimensions.get(*d).cloned().unwrap_or(Value::Null);
                        (v.is_null(), v)
                    })
                    .collect();
                let accs = groups.entry(key)
                    .or_insert_with(|| measures.iter().map(|m| Accumulator::new(m.function.summary_function())).collect());
                for (acc, m) in accs.iter_mut().zip(&measures) {
                    acc.update(row.measures.get(&m.name).unwrap_or(&Value::Null));
                }
            }

            let bits = GroupingField::encode(&grouped, &dimensions);
            for (key, accs) in groups {
                let mut result = ResultRow::new();
                for (d, (_, v)) in kept.iter().zip(key) {
                    result.insert((*d).to_string(), v);
                }
                for (m, acc) in measures.iter().zip(accs) {
                    result.insert(m.name.clone(), acc.finish());
                }
                result.insert(GROUPING_COLUMN.to_string(), Value::Str(bits.clone()));
                out.push(result);
            }
        }
        debug!(class = %query.class, summary_rows = rows.len(), result_rows = out.len(), "cube rows fetched");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::metadata::{DimensionMetadata, MetadataRegistry, PartitionMetadata};
    use crate::partition::PartitionScheme;
    use crate::statement::ColumnBinding;

    fn registry() -> Arc<MetadataRegistry> {
        let meta = SummaryMetadata::new(
            "sales", "order",
            PartitionMetadata::new("created", PartitionScheme::full_calendar()),
        )
        .with_dimension(DimensionMetadata::new("country", "country"))
        .with_measure(MeasureMetadata::sum("amount", "amount"))
        .with_measure(MeasureMetadata::count("orders"));
        Arc::new(MetadataRegistry::new().with(meta).unwrap())
    }

    fn order(day: u32, country: &str, amount: i64) -> SourceEntity {
        SourceEntity::new("order")
            .with("created", NaiveDate::from_ymd_opt(2024, 3, day).unwrap())
            .with("country", country)
            .with("amount", amount)
    }

    fn day_range(store: &MemoryStore, from: u32, to: u32) -> PartitionRange {
        let scheme = &store.metadata.summary("sales").unwrap().partition.scheme;
        let p = |d| Partition::create_lowest_partition_from_source_value(
            scheme, &Value::Date(NaiveDate::from_ymd_opt(2024, 3, d).unwrap()),
        ).unwrap();
        PartitionRange::new(p(from), p(to)).unwrap()
    }

    fn rollup(range: PartitionRange) -> Statement {
        Statement::RollUpSourceToSummary(RollupStatement {
            class:         "sales".into(),
            range,
            source_level:  None,
            partition_key: ColumnBinding::new("partition_key", "created".into()),
            dimensions:    vec![ColumnBinding::new("country", "country".into())],
            measures:      vec![
                ColumnBinding::new("amount", "SUM(amount)".into()),
                ColumnBinding::new("orders", "COUNT(*)".into()),
            ],
        })
    }

    #[test]
    fn source_rollup_groups_by_partition_and_dimension() {
        let mut store = MemoryStore::new(registry());
        store.insert_source(&order(1, "NL", 10));
        store.insert_source(&order(1, "NL", 5));
        store.insert_source(&order(1, "DE", 7));
        store.insert_source(&order(2, "NL", 1));
        store.insert_source(&order(9, "NL", 100));

        let n = store.execute(&rollup(day_range(&store, 1, 2))).unwrap();
        assert_eq!(n, 3);
        let nl = store.summary_rows("sales").iter()
            .find(|r| r.dimensions["country"] == Value::from("NL") && r.measures["orders"] == Value::Int64(2))
            .unwrap();
        assert_eq!(nl.measures["amount"], Value::Int64(15));
    }

    #[test]
    fn rollback_restores_state_and_nested_begin_fails() {
        let mut store = MemoryStore::new(registry());
        store.insert_source(&order(1, "NL", 10));
        store.begin().unwrap();
        assert!(matches!(store.begin(), Err(OlapError::Transaction(_))));
        store.execute(&rollup(day_range(&store, 1, 1))).unwrap();
        assert_eq!(store.summary_rows("sales").len(), 1);
        store.rollback().unwrap();
        assert!(store.summary_rows("sales").is_empty());
        assert!(matches!(store.commit(), Err(OlapError::Transaction(_))));
    }

    #[test]
    fn injected_failure_names_the_statement() {
        let mut store = MemoryStore::new(registry());
        store.fail_on(Some(StatementKind::DeleteNewFlags));
        let err = store.execute(&Statement::DeleteNewFlags { class: "sales".into() }).unwrap_err();
        assert!(matches!(err, OlapError::StatementFailed(_)));
        assert_eq!(store.history().len(), 1);
    }

    #[test]
    fn source_extent_ignores_null_partition_values() {
        let mut store = MemoryStore::new(registry());
        assert_eq!(store.source_extent("sales").unwrap(), None);
        store.insert_source(&order(4, "NL", 1));
        store.insert_source(&order(2, "NL", 1));
        store.insert_source(&SourceEntity::new("order").with("amount", 3i64));
        let (lo, hi) = store.source_extent("sales").unwrap().unwrap();
        assert_eq!(lo, Value::Date(NaiveDate::from_ymd_opt(2024, 3, 2).unwrap()));
        assert_eq!(hi, Value::Date(NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()));
    }

    #[test]
    fn update_and_delete_return_the_previous_row() {
        let mut store = MemoryStore::new(registry());
        let id = store.insert_source(&order(4, "NL", 1));
        let before = store.update_source(id, &SourceEntity::new("order").with("amount", 9i64)).unwrap();
        assert_eq!(before.get("amount"), Some(&Value::Int64(1)));
        let gone = store.delete_source("order", id).unwrap();
        assert_eq!(gone.get("amount"), Some(&Value::Int64(9)));
        assert_eq!(store.source_len("order"), 0);
        assert!(store.delete_source("order", id).is_err());
    }
}

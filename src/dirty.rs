//! 脏标记
//!
//! 记录哪些汇总分区需要重算。两种标记：
//! - **分区标记** `{class, level, key}` — 该分区已过期
//! - **新数据标记** `{class, None, None}` — 源表有新行，尚未确定范围
//!
//! 标记在源数据增/改/删时生成，也在重算某分区后向上传播生成；
//! 分区重算完成（同一事务内）即删除。

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::common::{PartitionKey, PartitionLevel, Result, SummaryClass};
use crate::metadata::{MetadataProvider, SummaryMetadata};
use crate::partition::{Partition, PartitionRange};
use crate::statement::Statement;
use crate::store::SummaryStore;
use crate::value::Value;

// ── DirtyFlag ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DirtyFlag {
    pub class: SummaryClass,
    pub level: Option<PartitionLevel>,
    pub key:   Option<PartitionKey>,
}

impl DirtyFlag {
    /// "整个类有新数据"
    pub fn new_records(class: &str) -> Self {
        Self { class: class.into(), level: None, key: None }
    }

    pub fn for_partition(class: &str, partition: &Partition) -> Self {
        Self { class: class.into(), level: Some(partition.level()), key: Some(partition.key()) }
    }

    pub fn is_new(&self) -> bool { self.level.is_none() && self.key.is_none() }

    /// 还原为分区；新数据标记返回 None
    pub fn partition(&self, metadata: &SummaryMetadata) -> Option<Result<Partition>> {
        match (self.level, self.key) {
            (Some(level), Some(key)) => Some(Partition::new(metadata.partition.scheme.clone(), level, key)),
            _ => None,
        }
    }
}

// ── 源实体 ────────────────────────────────────────────────────────────────────

/// 发生变化的源实体：类名 + 属性值
#[derive(Debug, Clone, PartialEq)]
pub struct SourceEntity {
    pub class:  String,
    pub values: BTreeMap<String, Value>,
}

impl SourceEntity {
    pub fn new(class: &str) -> Self {
        Self { class: class.into(), values: BTreeMap::new() }
    }

    pub fn with(mut self, property: &str, value: impl Into<Value>) -> Self {
        self.values.insert(property.into(), value.into()); self
    }

    pub fn get(&self, property: &str) -> Option<&Value> { self.values.get(property) }
}

// ── DirtyFlagTracker ──────────────────────────────────────────────────────────

pub struct DirtyFlagTracker<'a> {
    metadata: &'a dyn MetadataProvider,
}

impl<'a> DirtyFlagTracker<'a> {
    pub fn new(metadata: &'a dyn MetadataProvider) -> Self { Self { metadata } }

    /// 新建源实体：每个受影响的汇总类一个"新数据"标记
    pub fn generate_for_entity_creation(&self, entity: &SourceEntity) -> Result<Vec<DirtyFlag>> {
        let flags: Vec<_> = self.metadata
            .summaries_for_source(&entity.class, None)
            .into_iter()
            .map(|m| DirtyFlag::new_records(&m.class))
            .collect();
        debug!(source = %entity.class, flags = flags.len(), "dirty flags for creation");
        Ok(flags)
    }

    /// 新建实体的分区值不晚于已汇总的最新键时，"新数据"标记不会再覆盖它，
    /// 需直接标记其最低层分区
    pub fn generate_for_backdated_creation(
        &self,
        store:  &dyn SummaryStore,
        entity: &SourceEntity,
    ) -> Result<Vec<DirtyFlag>> {
        let mut flags = Vec::new();
        for meta in self.metadata.summaries_for_source(&entity.class, None) {
            let Some(latest) = store.latest_key(&meta.class)? else { continue };
            let backdated = entity.get(&meta.partition.source_property)
                .is_some_and(|v| !v.is_null() && *v <= latest);
            if !backdated {
                continue;
            }
            if let Some(flag) = Self::partition_flag(meta, entity)? {
                flags.push(flag);
            }
        }
        if !flags.is_empty() {
            debug!(source = %entity.class, flags = flags.len(), "backdated creation");
        }
        Ok(flags)
    }

    /// 修改源实体：受变化属性影响的汇总类，标记实体所在最低层分区。
    /// 若分区属性本身被改且给出了原值，旧分区也标记。
    pub fn generate_for_entity_modification(
        &self,
        entity:   &SourceEntity,
        changed:  &[String],
        original: Option<&SourceEntity>,
    ) -> Result<Vec<DirtyFlag>> {
        let mut flags = Vec::new();
        for meta in self.metadata.summaries_for_source(&entity.class, Some(changed)) {
            if let Some(flag) = Self::partition_flag(meta, entity)? {
                flags.push(flag);
            }
            let partition_changed = changed.iter().any(|c| *c == meta.partition.source_property);
            if let (true, Some(original)) = (partition_changed, original) {
                if let Some(flag) = Self::partition_flag(meta, original)? {
                    if !flags.contains(&flag) {
                        flags.push(flag);
                    }
                }
            }
        }
        debug!(source = %entity.class, flags = flags.len(), "dirty flags for modification");
        Ok(flags)
    }

    /// 删除源实体：该源类的全部汇总类，标记实体所在最低层分区
    pub fn generate_for_entity_deletion(&self, entity: &SourceEntity) -> Result<Vec<DirtyFlag>> {
        let mut flags = Vec::new();
        for meta in self.metadata.summaries_for_source(&entity.class, None) {
            if let Some(flag) = Self::partition_flag(meta, entity)? {
                flags.push(flag);
            }
        }
        debug!(source = %entity.class, flags = flags.len(), "dirty flags for deletion");
        Ok(flags)
    }

    fn partition_flag(meta: &SummaryMetadata, entity: &SourceEntity) -> Result<Option<DirtyFlag>> {
        let value = match entity.get(&meta.partition.source_property) {
            Some(v) if !v.is_null() => v,
            _ => {
                warn!(
                    summary = %meta.class,
                    property = %meta.partition.source_property,
                    "source entity has no partition value, nothing to mark",
                );
                return Ok(None);
            }
        };
        let partition = Partition::create_lowest_partition_from_source_value(&meta.partition.scheme, value)?;
        Ok(Some(DirtyFlag::for_partition(&meta.class, &partition)))
    }

    // ── 存储侧 ────────────────────────────────────────────────────────────────

    /// 待重算分区：最低层优先，同层按键升序，至多 `limit` 个
    pub fn dirty_partitions(
        &self,
        store: &dyn SummaryStore,
        class: &str,
        limit: usize,
    ) -> Result<Vec<Partition>> {
        let meta = self.metadata.summary(class)?;
        let mut flags: Vec<DirtyFlag> = store.dirty_flags(class)?
            .into_iter()
            .filter(|f| !f.is_new())
            .collect();
        flags.sort_by_key(|f| (f.level, f.key));
        flags.dedup();

        flags.iter()
            .take(limit)
            .filter_map(|f| f.partition(meta))
            .collect()
    }

    pub fn has_new_flags(&self, store: &dyn SummaryStore, class: &str) -> Result<bool> {
        Ok(store.dirty_flags(class)?.iter().any(DirtyFlag::is_new))
    }

    pub fn mark(&self, store: &mut dyn SummaryStore, flags: Vec<DirtyFlag>) -> Result<u64> {
        if flags.is_empty() {
            return Ok(0);
        }
        store.execute(&Statement::InsertDirtyFlags(flags))
    }

    pub fn remove_dirty_flags(&self, store: &mut dyn SummaryStore, class: &str, range: &PartitionRange) -> Result<u64> {
        store.execute(&Statement::DeleteDirtyFlags { class: class.into(), range: range.clone() })
    }

    pub fn remove_new_flags(&self, store: &mut dyn SummaryStore, class: &str) -> Result<u64> {
        store.execute(&Statement::DeleteNewFlags { class: class.into() })
    }
}

impl std::fmt::Display for DirtyFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.level, self.key) {
            (Some(level), Some(key)) => write!(f, "{}@{}#{}", self.class, level, key),
            _ => write!(f, "{}@new", self.class),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::metadata::{DimensionMetadata, MeasureMetadata, MetadataRegistry, PartitionMetadata};
    use crate::partition::{CalendarLevel, PartitionScheme};

    fn registry() -> MetadataRegistry {
        let orders = SummaryMetadata::new(
            "order_summary", "order",
            PartitionMetadata::new("created", PartitionScheme::full_calendar()),
        )
        .with_dimension(DimensionMetadata::new("country", "country"))
        .with_measure(MeasureMetadata::sum("amount", "amount"));
        let by_id = SummaryMetadata::new(
            "order_by_id", "order",
            PartitionMetadata::new("id", PartitionScheme::integer(vec![4, 8]).unwrap()),
        )
        .with_measure(MeasureMetadata::count("count"));
        MetadataRegistry::new().with(orders).unwrap().with(by_id).unwrap()
    }

    fn order(id: i64, day: u32) -> SourceEntity {
        SourceEntity::new("order")
            .with("id", id)
            .with("created", NaiveDate::from_ymd_opt(2024, 3, day).unwrap())
            .with("country", "NL")
            .with("amount", 10i64)
    }

    #[test]
    fn creation_emits_one_new_flag_per_summary() {
        let registry = registry();
        let tracker = DirtyFlagTracker::new(&registry);
        let flags = tracker.generate_for_entity_creation(&order(1, 5)).unwrap();
        assert_eq!(flags.len(), 2);
        assert!(flags.iter().all(DirtyFlag::is_new));
    }

    #[test]
    fn modification_marks_lowest_partition_of_affected_summaries() {
        let registry = registry();
        let tracker = DirtyFlagTracker::new(&registry);
        let flags = tracker
            .generate_for_entity_modification(&order(17, 5), &["amount".to_string()], None)
            .unwrap();
        // 只有 order_summary 依赖 amount
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].class, "order_summary");
        assert_eq!(flags[0].level, Some(CalendarLevel::Day.level()));
    }

    #[test]
    fn moving_partition_value_marks_old_and_new_partitions() {
        let registry = registry();
        let tracker = DirtyFlagTracker::new(&registry);
        let flags = tracker
            .generate_for_entity_modification(&order(1, 9), &["created".to_string()], Some(&order(1, 2)))
            .unwrap();
        assert_eq!(flags.len(), 2);
        assert_ne!(flags[0].key, flags[1].key);
    }

    #[test]
    fn deletion_marks_every_summary_of_the_source() {
        let registry = registry();
        let tracker = DirtyFlagTracker::new(&registry);
        let flags = tracker.generate_for_entity_deletion(&order(300, 5)).unwrap();
        assert_eq!(flags.len(), 2);
        let by_id = flags.iter().find(|f| f.class == "order_by_id").unwrap();
        assert_eq!((by_id.level, by_id.key), (Some(4), Some(300 >> 4)));
    }

    #[test]
    fn entity_without_partition_value_marks_nothing() {
        let registry = registry();
        let tracker = DirtyFlagTracker::new(&registry);
        let entity = SourceEntity::new("order").with("amount", 3i64);
        assert!(tracker.generate_for_entity_deletion(&entity).unwrap().is_empty());
    }
}

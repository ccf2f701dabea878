//! 汇总类元数据与注册表
//!
//! 描述一张汇总表：来自哪个源类、有哪些维度/度量、按哪个属性分区。
//! 元数据由外部（实体反射层）声明，本模块只负责校验与查询。

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::common::{OlapError, Result};
use crate::partition::{CalendarLevel, PartitionScheme};
use crate::value::Value;

// ── 度量 ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateFunction {
    Sum,
    Count,
    Min,
    Max,
}

impl AggregateFunction {
    /// 汇总 → 汇总阶段的再聚合函数：计数的再聚合是求和
    pub fn summary_function(self) -> Self {
        match self {
            Self::Count => Self::Sum,
            other       => other,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Sum   => "SUM",
            Self::Count => "COUNT",
            Self::Min   => "MIN",
            Self::Max   => "MAX",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MeasureMetadata {
    pub name:            String,
    pub label:           String,
    pub function:        AggregateFunction,
    /// `None` 仅允许用于 COUNT(*)
    pub source_property: Option<String>,
}

impl MeasureMetadata {
    pub fn new(name: &str, function: AggregateFunction, source_property: Option<&str>) -> Self {
        Self {
            name:            name.into(),
            label:           name.into(),
            function,
            source_property: source_property.map(Into::into),
        }
    }

    pub fn sum(name: &str, property: &str) -> Self { Self::new(name, AggregateFunction::Sum, Some(property)) }
    pub fn count(name: &str) -> Self { Self::new(name, AggregateFunction::Count, None) }
    pub fn min(name: &str, property: &str) -> Self { Self::new(name, AggregateFunction::Min, Some(property)) }
    pub fn max(name: &str, property: &str) -> Self { Self::new(name, AggregateFunction::Max, Some(property)) }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.into(); self
    }
}

// ── 维度 ──────────────────────────────────────────────────────────────────────

/// 序列成员：全序、可逐一枚举的成员空间（插值依据）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceKind {
    Integer { step: i64 },
    Calendar(CalendarLevel),
}

impl SequenceKind {
    /// 规范化成员（日历截断到桶起始）；类型不符返回 None
    pub fn normalize(&self, value: &Value) -> Option<Value> {
        match (self, value) {
            (Self::Integer { .. }, Value::Int64(_)) => Some(value.clone()),
            (Self::Calendar(level), Value::Date(d)) => Some(Value::Date(level.truncate(*d))),
            _ => None,
        }
    }

    pub fn successor(&self, value: &Value) -> Option<Value> {
        match (self, value) {
            (Self::Integer { step }, Value::Int64(v)) => v.checked_add(*step).map(Value::Int64),
            (Self::Calendar(level), Value::Date(d))   => level.step(*d).map(Value::Date),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberOrdering {
    Natural,
    Sequence(SequenceKind),
}

#[derive(Debug, Clone)]
pub struct DimensionMetadata {
    pub name:            String,
    pub label:           String,
    pub source_property: String,
    pub ordering:        MemberOrdering,
    /// 成员为 NULL 时的显示值
    pub null_label:      Option<String>,
    /// 原始成员 → 业务成员的映射（未命中则原样使用）
    pub member_map:      BTreeMap<Value, Value>,
}

impl DimensionMetadata {
    pub fn new(name: &str, source_property: &str) -> Self {
        Self {
            name:            name.into(),
            label:           name.into(),
            source_property: source_property.into(),
            ordering:        MemberOrdering::Natural,
            null_label:      None,
            member_map:      BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.into(); self
    }
    pub fn sequence(mut self, kind: SequenceKind) -> Self {
        self.ordering = MemberOrdering::Sequence(kind); self
    }
    pub fn with_null_label(mut self, label: &str) -> Self {
        self.null_label = Some(label.into()); self
    }
    pub fn map_member(mut self, raw: impl Into<Value>, member: impl Into<Value>) -> Self {
        self.member_map.insert(raw.into(), member.into()); self
    }

    pub fn sequence_kind(&self) -> Option<SequenceKind> {
        match self.ordering {
            MemberOrdering::Sequence(kind) => Some(kind),
            MemberOrdering::Natural        => None,
        }
    }

    /// 从源行取维度值；日历序列维度截断到其粒度
    pub fn source_value(&self, row: &BTreeMap<String, Value>) -> Value {
        let raw = row.get(&self.source_property).cloned().unwrap_or(Value::Null);
        match self.sequence_kind() {
            Some(kind @ SequenceKind::Calendar(_)) => kind.normalize(&raw).unwrap_or(raw),
            _ => raw,
        }
    }

    /// 业务成员：经 member_map 变换
    pub fn member_for(&self, raw: &Value) -> Value {
        self.member_map.get(raw).cloned().unwrap_or_else(|| raw.clone())
    }
}

// ── 分区 ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PartitionMetadata {
    /// 源类上决定分区的属性
    pub source_property: String,
    pub scheme:          Arc<PartitionScheme>,
}

impl PartitionMetadata {
    pub fn new(source_property: &str, scheme: PartitionScheme) -> Self {
        Self { source_property: source_property.into(), scheme: Arc::new(scheme) }
    }
}

// ── SummaryMetadata ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SummaryMetadata {
    pub class:        String,
    pub source_class: String,
    pub dimensions:   Vec<DimensionMetadata>,
    pub measures:     Vec<MeasureMetadata>,
    pub partition:    PartitionMetadata,
}

impl SummaryMetadata {
    pub fn new(class: &str, source_class: &str, partition: PartitionMetadata) -> Self {
        Self {
            class:        class.into(),
            source_class: source_class.into(),
            dimensions:   vec![],
            measures:     vec![],
            partition,
        }
    }

    pub fn with_dimension(mut self, dimension: DimensionMetadata) -> Self {
        self.dimensions.push(dimension); self
    }
    pub fn with_measure(mut self, measure: MeasureMetadata) -> Self {
        self.measures.push(measure); self
    }

    pub fn dimension(&self, name: &str) -> Option<&DimensionMetadata> {
        self.dimensions.iter().find(|d| d.name == name)
    }

    pub fn measure(&self, name: &str) -> Option<&MeasureMetadata> {
        self.measures.iter().find(|m| m.name == name)
    }

    pub fn dimension_index(&self, name: &str) -> Option<usize> {
        self.dimensions.iter().position(|d| d.name == name)
    }

    pub fn measure_index(&self, name: &str) -> Option<usize> {
        self.measures.iter().position(|m| m.name == name)
    }

    /// 汇总依赖的全部源属性
    pub fn source_properties(&self) -> BTreeSet<&str> {
        let mut props: BTreeSet<&str> = BTreeSet::new();
        props.insert(&self.partition.source_property);
        props.extend(self.dimensions.iter().map(|d| d.source_property.as_str()));
        props.extend(self.measures.iter().filter_map(|m| m.source_property.as_deref()));
        props
    }

    /// 源实体的这些属性变化是否影响本汇总
    pub fn is_affected_by(&self, changed: &[String]) -> bool {
        let props = self.source_properties();
        changed.iter().any(|c| props.contains(c.as_str()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.class.is_empty() || self.source_class.is_empty() {
            return Err(OlapError::metadata("summary and source class names must not be empty"));
        }
        if self.measures.is_empty() {
            return Err(OlapError::metadata(format!("{}: at least one measure is required", self.class)));
        }

        let mut names = BTreeSet::new();
        for name in self.dimensions.iter().map(|d| &d.name).chain(self.measures.iter().map(|m| &m.name)) {
            if name.is_empty() || name.starts_with('@') || name.starts_with("__") {
                return Err(OlapError::metadata(format!("{}: reserved or empty name '{name}'", self.class)));
            }
            if !names.insert(name.as_str()) {
                return Err(OlapError::metadata(format!("{}: duplicate name '{name}'", self.class)));
            }
        }

        for m in &self.measures {
            if m.source_property.is_none() && m.function != AggregateFunction::Count {
                return Err(OlapError::metadata(format!(
                    "{}: measure '{}' ({}) needs a source property", self.class, m.name, m.function.name(),
                )));
            }
        }

        if self.partition.source_property.is_empty() {
            return Err(OlapError::metadata(format!("{}: partition needs a source property", self.class)));
        }
        if self.partition.scheme.levels().is_empty() {
            return Err(OlapError::metadata(format!("{}: partition scheme has no levels", self.class)));
        }

        for d in &self.dimensions {
            if d.source_property.is_empty() {
                return Err(OlapError::metadata(format!(
                    "{}: dimension '{}' needs a source property", self.class, d.name,
                )));
            }
            match d.ordering {
                MemberOrdering::Sequence(SequenceKind::Integer { step }) if step <= 0 => {
                    return Err(OlapError::metadata(format!(
                        "{}: dimension '{}' has a non-positive sequence step", self.class, d.name,
                    )));
                }
                MemberOrdering::Sequence(SequenceKind::Calendar(level)) => {
                    // 整数分区属性与非日期映射键都不是日期
                    let integer_key = d.source_property == self.partition.source_property
                        && !self.partition.scheme.is_calendar();
                    let non_date = d.member_map.keys().any(|k| !matches!(k, Value::Date(_) | Value::Null));
                    if integer_key || non_date {
                        return Err(OlapError::metadata(format!(
                            "{}: calendar sequence ({}) on non-date dimension '{}'",
                            self.class, level.name(), d.name,
                        )));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

// ── MetadataProvider ──────────────────────────────────────────────────────────

/// 外部元数据提供者
pub trait MetadataProvider {
    fn summary(&self, class: &str) -> Result<&SummaryMetadata>;

    /// 源类（及其变化的属性）影响到的汇总类；`changed == None` 表示全部
    fn summaries_for_source(&self, source_class: &str, changed: Option<&[String]>) -> Vec<&SummaryMetadata>;
}

/// 进程内注册表
#[derive(Debug, Default)]
pub struct MetadataRegistry {
    classes: BTreeMap<String, SummaryMetadata>,
}

impl MetadataRegistry {
    pub fn new() -> Self { Self::default() }

    pub fn register(&mut self, metadata: SummaryMetadata) -> Result<()> {
        metadata.validate()?;
        if self.classes.contains_key(&metadata.class) {
            return Err(OlapError::metadata(format!("summary class '{}' registered twice", metadata.class)));
        }
        self.classes.insert(metadata.class.clone(), metadata);
        Ok(())
    }

    pub fn with(mut self, metadata: SummaryMetadata) -> Result<Self> {
        self.register(metadata)?;
        Ok(self)
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }
}

impl MetadataProvider for MetadataRegistry {
    fn summary(&self, class: &str) -> Result<&SummaryMetadata> {
        self.classes.get(class).ok_or_else(|| OlapError::UnknownSummaryClass(class.into()))
    }

    fn summaries_for_source(&self, source_class: &str, changed: Option<&[String]>) -> Vec<&SummaryMetadata> {
        self.classes.values()
            .filter(|m| m.source_class == source_class)
            .filter(|m| changed.map_or(true, |c| m.is_affected_by(c)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders() -> SummaryMetadata {
        SummaryMetadata::new(
            "order_summary", "order",
            PartitionMetadata::new("created", PartitionScheme::full_calendar()),
        )
        .with_dimension(DimensionMetadata::new("country", "country"))
        .with_measure(MeasureMetadata::sum("amount", "amount"))
        .with_measure(MeasureMetadata::count("count"))
    }

    #[test]
    fn registry_looks_up_by_class_and_source() {
        let registry = MetadataRegistry::new().with(orders()).unwrap();
        assert!(registry.summary("order_summary").is_ok());
        assert!(matches!(registry.summary("nope"), Err(OlapError::UnknownSummaryClass(_))));
        assert_eq!(registry.summaries_for_source("order", None).len(), 1);
        assert!(registry.summaries_for_source("customer", None).is_empty());
    }

    #[test]
    fn only_relevant_property_changes_affect_a_summary() {
        let registry = MetadataRegistry::new().with(orders()).unwrap();
        let changed = vec!["note".to_string()];
        assert!(registry.summaries_for_source("order", Some(&changed)).is_empty());
        let changed = vec!["note".to_string(), "amount".to_string()];
        assert_eq!(registry.summaries_for_source("order", Some(&changed)).len(), 1);
        let changed = vec!["created".to_string()];
        assert_eq!(registry.summaries_for_source("order", Some(&changed)).len(), 1);
    }

    #[test]
    fn misconfigured_declarations_are_rejected() {
        let dup = orders().with_dimension(DimensionMetadata::new("amount", "x"));
        assert!(matches!(dup.validate(), Err(OlapError::Metadata(_))));

        let no_property = orders().with_measure(MeasureMetadata::new("total", AggregateFunction::Sum, None));
        assert!(matches!(no_property.validate(), Err(OlapError::Metadata(_))));

        let reserved = orders().with_dimension(DimensionMetadata::new("@values", "x"));
        assert!(matches!(reserved.validate(), Err(OlapError::Metadata(_))));

        let bad_step = orders()
            .with_dimension(DimensionMetadata::new("n", "n").sequence(SequenceKind::Integer { step: 0 }));
        assert!(matches!(bad_step.validate(), Err(OlapError::Metadata(_))));

        let mut registry = MetadataRegistry::new();
        registry.register(orders()).unwrap();
        assert!(matches!(registry.register(orders()), Err(OlapError::Metadata(_))));
    }

    #[test]
    fn empty_partition_scheme_is_rejected() {
        assert!(matches!(PartitionScheme::integer(vec![]), Err(OlapError::Metadata(_))));
        assert!(matches!(PartitionScheme::calendar(vec![]), Err(OlapError::Metadata(_))));

        let mut no_key = orders();
        no_key.partition.source_property.clear();
        assert!(matches!(MetadataRegistry::new().with(no_key), Err(OlapError::Metadata(_))));
    }

    #[test]
    fn calendar_sequence_on_non_date_dimension_is_rejected() {
        let by_id = SummaryMetadata::new(
            "by_id", "order",
            PartitionMetadata::new("id", PartitionScheme::integer(vec![8]).unwrap()),
        )
        .with_dimension(DimensionMetadata::new("bucket", "id")
            .sequence(SequenceKind::Calendar(CalendarLevel::Month)))
        .with_measure(MeasureMetadata::count("count"));
        assert!(matches!(MetadataRegistry::new().with(by_id), Err(OlapError::Metadata(_))));

        let mapped = orders().with_dimension(DimensionMetadata::new("month", "created")
            .sequence(SequenceKind::Calendar(CalendarLevel::Month))
            .map_member("jan", "January"));
        assert!(matches!(mapped.validate(), Err(OlapError::Metadata(_))));

        let dated = orders().with_dimension(DimensionMetadata::new("month", "created")
            .sequence(SequenceKind::Calendar(CalendarLevel::Month)));
        assert!(dated.validate().is_ok());
    }

    #[test]
    fn dimension_without_source_property_is_rejected() {
        let blank = orders().with_dimension(DimensionMetadata::new("region", ""));
        assert!(matches!(MetadataRegistry::new().with(blank), Err(OlapError::Metadata(_))));
    }

    #[test]
    fn calendar_dimension_truncates_source_values() {
        use chrono::NaiveDate;
        let dim = DimensionMetadata::new("month", "created")
            .sequence(SequenceKind::Calendar(CalendarLevel::Month));
        let mut row = BTreeMap::new();
        row.insert("created".to_string(), Value::Date(NaiveDate::from_ymd_opt(2024, 5, 17).unwrap()));
        assert_eq!(dim.source_value(&row), Value::Date(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()));
    }
}

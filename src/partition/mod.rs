//! 分区模型
//!
//! 汇总表的键空间按多级、全序的方案分桶：
//!
//! ```text
//!   Year      ┌────────────────────── 2024 ──────────────────────┐
//!   Quarter   ┌──── Q1 ────┐┌──── Q2 ────┐ ...
//!   Month     ┌Jan┐┌Feb┐┌Mar┐ ...
//!   Day       ││││││││││││││ ...
//! ```
//!
//! - 同一层的分区无缝、无重叠地平铺键空间
//! - 每一层的分区恰好平铺其上一层的某个分区（`containing()` 唯一）
//! - 层级编号随粒度变粗而增大，最低层即编号最小的一层
//!
//! 两种方案：
//! - **Integer**  — 第 `bits` 层的键为 `value >> bits`，适合自增 ID / 时间戳
//! - **Calendar** — 日 → 月 → 季 → 年，源值为日期

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};

use crate::common::{OlapError, PartitionKey, PartitionLevel, Result};
use crate::value::Value;

mod cover;
mod range;

pub use cover::{covering_ranges, LevelRange};
pub use range::{PartitionIter, PartitionRange};

// ── 日历层级 ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CalendarLevel {
    Day,
    Month,
    Quarter,
    Year,
}

impl CalendarLevel {
    pub const ALL: [CalendarLevel; 4] = [Self::Day, Self::Month, Self::Quarter, Self::Year];

    pub fn level(self) -> PartitionLevel {
        match self {
            Self::Day     => 1,
            Self::Month   => 2,
            Self::Quarter => 3,
            Self::Year    => 4,
        }
    }

    pub fn from_level(level: PartitionLevel) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.level() == level)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Day     => "day",
            Self::Month   => "month",
            Self::Quarter => "quarter",
            Self::Year    => "year",
        }
    }

    /// 日期所在桶的键；同层相邻桶的键恰好相差 1
    pub fn key_of(self, date: NaiveDate) -> PartitionKey {
        match self {
            Self::Day     => date.num_days_from_ce() as i64,
            Self::Month   => date.year() as i64 * 12 + date.month0() as i64,
            Self::Quarter => date.year() as i64 * 4 + (date.month0() / 3) as i64,
            Self::Year    => date.year() as i64,
        }
    }

    /// 桶的起始日期；超出 chrono 日期范围时返回 None
    pub fn start_of(self, key: PartitionKey) -> Option<NaiveDate> {
        match self {
            Self::Day => i32::try_from(key).ok().and_then(NaiveDate::from_num_days_from_ce_opt),
            Self::Month => {
                let year = i32::try_from(key.div_euclid(12)).ok()?;
                NaiveDate::from_ymd_opt(year, key.rem_euclid(12) as u32 + 1, 1)
            }
            Self::Quarter => {
                let year = i32::try_from(key.div_euclid(4)).ok()?;
                NaiveDate::from_ymd_opt(year, key.rem_euclid(4) as u32 * 3 + 1, 1)
            }
            Self::Year => NaiveDate::from_ymd_opt(i32::try_from(key).ok()?, 1, 1),
        }
    }

    /// 截断到所在桶的起始日期
    pub fn truncate(self, date: NaiveDate) -> NaiveDate {
        self.start_of(self.key_of(date)).unwrap_or(date)
    }

    /// 下一个桶的起始日期
    pub fn step(self, date: NaiveDate) -> Option<NaiveDate> {
        self.start_of(self.key_of(date) + 1)
    }
}

// ── 分区方案 ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum SchemeKind {
    /// 位宽列表，严格递增
    Integer(Vec<u32>),
    Calendar(Vec<CalendarLevel>),
}

/// 一个汇总类的分区方案（构造时校验，之后不可变）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionScheme {
    kind: SchemeKind,
}

impl PartitionScheme {
    /// 整数位宽方案，例如 `[8, 16, 24]`：256 / 65536 / 16M 为一桶
    pub fn integer(levels: Vec<u32>) -> Result<Self> {
        if levels.is_empty() {
            return Err(OlapError::metadata("integer partition scheme needs at least one level"));
        }
        if levels.iter().any(|&b| b == 0 || b > 62) {
            return Err(OlapError::metadata("integer partition bit widths must be within 1..=62"));
        }
        if levels.windows(2).any(|w| w[0] >= w[1]) {
            return Err(OlapError::metadata("integer partition levels must be strictly ascending"));
        }
        Ok(Self { kind: SchemeKind::Integer(levels) })
    }

    pub fn calendar(levels: Vec<CalendarLevel>) -> Result<Self> {
        if levels.is_empty() {
            return Err(OlapError::metadata("calendar partition scheme needs at least one level"));
        }
        if levels.windows(2).any(|w| w[0] >= w[1]) {
            return Err(OlapError::metadata("calendar partition levels must be strictly ascending"));
        }
        Ok(Self { kind: SchemeKind::Calendar(levels) })
    }

    /// 日 → 月 → 季 → 年
    pub fn full_calendar() -> Self {
        Self { kind: SchemeKind::Calendar(CalendarLevel::ALL.to_vec()) }
    }

    pub fn is_calendar(&self) -> bool { matches!(self.kind, SchemeKind::Calendar(_)) }

    /// 自低向高的层级编号
    pub fn levels(&self) -> Vec<PartitionLevel> {
        match &self.kind {
            SchemeKind::Integer(bits)    => bits.clone(),
            SchemeKind::Calendar(levels) => levels.iter().map(|c| c.level()).collect(),
        }
    }

    pub fn lowest_level(&self) -> PartitionLevel {
        match &self.kind {
            SchemeKind::Integer(bits)    => bits[0],
            SchemeKind::Calendar(levels) => levels[0].level(),
        }
    }

    pub fn highest_level(&self) -> PartitionLevel {
        self.levels().last().copied().unwrap_or_else(|| self.lowest_level())
    }

    pub fn has_level(&self, level: PartitionLevel) -> bool {
        self.levels().contains(&level)
    }

    pub fn parent_level(&self, level: PartitionLevel) -> Option<PartitionLevel> {
        let levels = self.levels();
        let pos = levels.iter().position(|&l| l == level)?;
        levels.get(pos + 1).copied()
    }

    pub fn child_level(&self, level: PartitionLevel) -> Option<PartitionLevel> {
        let levels = self.levels();
        let pos = levels.iter().position(|&l| l == level)?;
        pos.checked_sub(1).map(|p| levels[p])
    }

    pub fn calendar_level(&self, level: PartitionLevel) -> Option<CalendarLevel> {
        match &self.kind {
            SchemeKind::Calendar(_) => CalendarLevel::from_level(level),
            SchemeKind::Integer(_)  => None,
        }
    }

    pub fn level_name(&self, level: PartitionLevel) -> String {
        match self.calendar_level(level) {
            Some(c) => c.name().to_string(),
            None    => format!("bits{level}"),
        }
    }

    fn key_for(&self, level: PartitionLevel, value: &Value) -> Result<PartitionKey> {
        match &self.kind {
            SchemeKind::Integer(_) => {
                let v = value.as_i64().ok_or_else(|| OlapError::invalid(format!(
                    "integer partition needs an int64 source value, got {}", value.type_name(),
                )))?;
                Ok(v >> level)
            }
            SchemeKind::Calendar(_) => {
                let d = value.as_date().ok_or_else(|| OlapError::invalid(format!(
                    "calendar partition needs a date source value, got {}", value.type_name(),
                )))?;
                let cl = CalendarLevel::from_level(level)
                    .ok_or_else(|| OlapError::PartitionNotFound(format!("calendar level {level}")))?;
                Ok(cl.key_of(d))
            }
        }
    }

    fn key_valid(&self, level: PartitionLevel, key: PartitionKey) -> bool {
        match &self.kind {
            SchemeKind::Integer(_)  => key >= (i64::MIN >> level) && key <= (i64::MAX >> level),
            SchemeKind::Calendar(_) => CalendarLevel::from_level(level)
                .and_then(|c| c.start_of(key))
                .is_some(),
        }
    }

    fn lower_bound(&self, level: PartitionLevel, key: PartitionKey) -> Value {
        match &self.kind {
            SchemeKind::Integer(_)  => Value::Int64(key << level),
            SchemeKind::Calendar(_) => CalendarLevel::from_level(level)
                .and_then(|c| c.start_of(key))
                .map(Value::Date)
                .unwrap_or(Value::Date(NaiveDate::MAX)),
        }
    }

    /// 独占上界 = 下一个桶的下界；键空间尽头饱和到最大值
    fn upper_bound(&self, level: PartitionLevel, key: PartitionKey) -> Value {
        match key.checked_add(1) {
            Some(next) if self.key_valid(level, next) => self.lower_bound(level, next),
            _ => match &self.kind {
                SchemeKind::Integer(_)  => Value::Int64(i64::MAX),
                SchemeKind::Calendar(_) => Value::Date(NaiveDate::MAX),
            },
        }
    }

    fn containing_key(
        &self,
        level:  PartitionLevel,
        key:    PartitionKey,
        parent: PartitionLevel,
    ) -> Option<PartitionKey> {
        match &self.kind {
            SchemeKind::Integer(_) => Some(key >> (parent - level)),
            SchemeKind::Calendar(_) => {
                let child = CalendarLevel::from_level(level)?;
                let upper = CalendarLevel::from_level(parent)?;
                Some(upper.key_of(child.start_of(key)?))
            }
        }
    }
}

// ── Partition ─────────────────────────────────────────────────────────────────

/// 某一层级上的一个分区（不可变值类型）
#[derive(Clone)]
pub struct Partition {
    scheme: Arc<PartitionScheme>,
    level:  PartitionLevel,
    key:    PartitionKey,
}

impl Partition {
    pub fn new(scheme: Arc<PartitionScheme>, level: PartitionLevel, key: PartitionKey) -> Result<Self> {
        if !scheme.has_level(level) {
            return Err(OlapError::PartitionNotFound(format!("level {level} is not part of the scheme")));
        }
        if !scheme.key_valid(level, key) {
            return Err(OlapError::PartitionNotFound(format!("key {key} out of range at level {level}")));
        }
        Ok(Self { scheme, level, key })
    }

    /// 源数据键值所在的最低层分区
    pub fn create_lowest_partition_from_source_value(
        scheme: &Arc<PartitionScheme>,
        value:  &Value,
    ) -> Result<Self> {
        Self::from_source_value(scheme, scheme.lowest_level(), value)
    }

    /// 源数据键值在指定层级上所在的分区
    pub fn from_source_value(
        scheme: &Arc<PartitionScheme>,
        level:  PartitionLevel,
        value:  &Value,
    ) -> Result<Self> {
        if !scheme.has_level(level) {
            return Err(OlapError::PartitionNotFound(format!("level {level} is not part of the scheme")));
        }
        let key = scheme.key_for(level, value)?;
        Self::new(Arc::clone(scheme), level, key)
    }

    pub fn scheme(&self) -> &Arc<PartitionScheme> { &self.scheme }
    pub fn level(&self) -> PartitionLevel { self.level }
    pub fn key(&self) -> PartitionKey { self.key }

    /// 闭下界
    pub fn lower_bound(&self) -> Value { self.scheme.lower_bound(self.level, self.key) }
    /// 开上界
    pub fn upper_bound(&self) -> Value { self.scheme.upper_bound(self.level, self.key) }

    pub fn is_lowest_level(&self) -> bool { self.level == self.scheme.lowest_level() }

    pub fn next(&self) -> Option<Self> {
        self.sibling(self.key.checked_add(1)?)
    }

    pub fn previous(&self) -> Option<Self> {
        self.sibling(self.key.checked_sub(1)?)
    }

    fn sibling(&self, key: PartitionKey) -> Option<Self> {
        self.scheme.key_valid(self.level, key).then(|| Self {
            scheme: Arc::clone(&self.scheme),
            level:  self.level,
            key,
        })
    }

    /// 上一层中包含本分区的唯一分区；最高层返回 None
    pub fn containing(&self) -> Option<Self> {
        let parent = self.scheme.parent_level(self.level)?;
        let key = self.scheme.containing_key(self.level, self.key, parent)?;
        Some(Self { scheme: Arc::clone(&self.scheme), level: parent, key })
    }

    /// 逐层上溯到指定层级
    pub fn containing_at(&self, level: PartitionLevel) -> Option<Self> {
        let mut current = self.clone();
        while current.level < level {
            current = current.containing()?;
        }
        (current.level == level).then_some(current)
    }

    /// 同层比较；跨层比较是调用方错误
    pub fn compare(&self, other: &Self) -> Result<Ordering> {
        if self.level != other.level {
            return Err(OlapError::invalid(format!(
                "cannot compare partitions of level {} and {}", self.level, other.level,
            )));
        }
        Ok(self.key.cmp(&other.key))
    }

    pub fn contains_value(&self, value: &Value) -> bool {
        self.lower_bound() <= *value && *value < self.upper_bound()
    }
}

impl PartialEq for Partition {
    fn eq(&self, other: &Self) -> bool { self.level == other.level && self.key == other.key }
}

impl Eq for Partition {}

impl Hash for Partition {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.level.hash(state);
        self.key.hash(state);
    }
}

impl PartialOrd for Partition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        (self.level == other.level).then(|| self.key.cmp(&other.key))
    }
}

impl fmt::Debug for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f, "Partition({}#{} [{}, {}))",
            self.scheme.level_name(self.level), self.key, self.lower_bound(), self.upper_bound(),
        )
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scheme.level_name(self.level), self.lower_bound())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> Value {
        Value::Date(NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    fn calendar() -> Arc<PartitionScheme> { Arc::new(PartitionScheme::full_calendar()) }

    #[test]
    fn lowest_calendar_partition_is_a_day() {
        let scheme = calendar();
        let p = Partition::create_lowest_partition_from_source_value(&scheme, &date(2024, 3, 15)).unwrap();
        assert_eq!(p.level(), CalendarLevel::Day.level());
        assert_eq!(p.lower_bound(), date(2024, 3, 15));
        assert_eq!(p.upper_bound(), date(2024, 3, 16));
        assert!(p.is_lowest_level());
    }

    #[test]
    fn calendar_navigation_crosses_year_boundary() {
        let scheme = calendar();
        let dec31 = Partition::create_lowest_partition_from_source_value(&scheme, &date(2023, 12, 31)).unwrap();
        let jan1 = dec31.next().unwrap();
        assert_eq!(jan1.lower_bound(), date(2024, 1, 1));
        assert_eq!(jan1.previous().unwrap(), dec31);

        let month = dec31.containing().unwrap();
        assert_eq!(month.lower_bound(), date(2023, 12, 1));
        assert_eq!(month.upper_bound(), date(2024, 1, 1));
        assert_eq!(month.next().unwrap().lower_bound(), date(2024, 1, 1));

        let quarter = month.containing().unwrap();
        assert_eq!(quarter.lower_bound(), date(2023, 10, 1));
        let year = quarter.containing().unwrap();
        assert_eq!(year.key(), 2023);
        assert!(year.containing().is_none());
    }

    #[test]
    fn sparse_calendar_levels_skip_quarters() {
        let scheme = Arc::new(PartitionScheme::calendar(vec![CalendarLevel::Day, CalendarLevel::Year]).unwrap());
        let day = Partition::create_lowest_partition_from_source_value(&scheme, &date(2024, 6, 30)).unwrap();
        let year = day.containing().unwrap();
        assert_eq!(year.level(), CalendarLevel::Year.level());
        assert_eq!(year.lower_bound(), date(2024, 1, 1));
    }

    #[test]
    fn integer_partitions_shift_by_bit_width() {
        let scheme = Arc::new(PartitionScheme::integer(vec![4, 8]).unwrap());
        let p = Partition::create_lowest_partition_from_source_value(&scheme, &Value::Int64(37)).unwrap();
        assert_eq!(p.key(), 2);
        assert_eq!(p.lower_bound(), Value::Int64(32));
        assert_eq!(p.upper_bound(), Value::Int64(48));

        let parent = p.containing().unwrap();
        assert_eq!(parent.level(), 8);
        assert_eq!(parent.key(), 0);
        assert_eq!(parent.upper_bound(), Value::Int64(256));
    }

    #[test]
    fn negative_integer_keys_floor() {
        let scheme = Arc::new(PartitionScheme::integer(vec![4]).unwrap());
        let p = Partition::create_lowest_partition_from_source_value(&scheme, &Value::Int64(-1)).unwrap();
        assert_eq!(p.key(), -1);
        assert_eq!(p.lower_bound(), Value::Int64(-16));
        assert_eq!(p.upper_bound(), Value::Int64(0));
    }

    #[test]
    fn comparing_across_levels_is_rejected() {
        let scheme = calendar();
        let day = Partition::create_lowest_partition_from_source_value(&scheme, &date(2024, 1, 1)).unwrap();
        let month = day.containing().unwrap();
        assert!(matches!(day.compare(&month), Err(OlapError::InvalidArgument(_))));
        assert_eq!(day.partial_cmp(&month), None);
        assert_eq!(day.compare(&day.next().unwrap()).unwrap(), Ordering::Less);
    }

    #[test]
    fn wrong_source_type_is_rejected() {
        let scheme = calendar();
        let err = Partition::create_lowest_partition_from_source_value(&scheme, &Value::Int64(5));
        assert!(matches!(err, Err(OlapError::InvalidArgument(_))));
    }

    #[test]
    fn invalid_schemes_are_metadata_errors() {
        assert!(matches!(PartitionScheme::integer(vec![]), Err(OlapError::Metadata(_))));
        assert!(matches!(PartitionScheme::integer(vec![8, 8]), Err(OlapError::Metadata(_))));
        assert!(matches!(
            PartitionScheme::calendar(vec![CalendarLevel::Month, CalendarLevel::Day]),
            Err(OlapError::Metadata(_)),
        ));
    }

    #[test]
    fn containing_at_walks_several_levels() {
        let scheme = calendar();
        let day = Partition::create_lowest_partition_from_source_value(&scheme, &date(2024, 8, 9)).unwrap();
        let year = day.containing_at(CalendarLevel::Year.level()).unwrap();
        assert_eq!(year.key(), 2024);
        assert!(day.containing_at(99).is_none());
    }
}

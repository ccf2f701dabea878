//! 同层分区的闭区间

use std::fmt;

use crate::common::{OlapError, PartitionLevel, Result};
use crate::value::Value;

use super::Partition;

/// `[start, end]` 闭区间；两端同层且 `start <= end`
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PartitionRange {
    start: Partition,
    end:   Partition,
}

impl PartitionRange {
    pub fn new(start: Partition, end: Partition) -> Result<Self> {
        if start.level() != end.level() {
            return Err(OlapError::invalid(format!(
                "partition range ends have different levels: {} vs {}", start.level(), end.level(),
            )));
        }
        if start.key() > end.key() {
            return Err(OlapError::invalid(format!("partition range is reversed: {start} > {end}")));
        }
        Ok(Self { start, end })
    }

    pub fn single(partition: Partition) -> Self {
        Self { start: partition.clone(), end: partition }
    }

    pub fn start(&self) -> &Partition { &self.start }
    pub fn end(&self) -> &Partition { &self.end }
    pub fn level(&self) -> PartitionLevel { self.start.level() }

    /// 区间覆盖的源键下界（闭）
    pub fn lower_bound(&self) -> Value { self.start.lower_bound() }
    /// 区间覆盖的源键上界（开）
    pub fn upper_bound(&self) -> Value { self.end.upper_bound() }

    /// 同层相邻分区的键连续，因此个数即键差 + 1
    pub fn len(&self) -> u64 { (self.end.key() - self.start.key()) as u64 + 1 }

    pub fn is_empty(&self) -> bool { false }

    pub fn contains(&self, partition: &Partition) -> bool {
        partition.level() == self.level()
            && partition.key() >= self.start.key()
            && partition.key() <= self.end.key()
    }

    pub fn iter(&self) -> PartitionIter {
        PartitionIter { next: Some(self.start.clone()), end: self.end.key() }
    }

    /// 切分为连续的子区间，每段至多 `size` 个分区
    pub fn batch(&self, size: usize) -> Result<Vec<PartitionRange>> {
        if size == 0 {
            return Err(OlapError::invalid("batch size must be at least 1"));
        }
        let mut batches = Vec::new();
        let mut iter = self.iter();
        while let Some(first) = iter.next() {
            let mut last = first.clone();
            for _ in 1..size {
                match iter.next() {
                    Some(p) => last = p,
                    None    => break,
                }
            }
            batches.push(Self { start: first, end: last });
        }
        Ok(batches)
    }

    /// 两端各上提一层；任一端无上层分区时返回 None
    pub fn containing_range(&self) -> Option<PartitionRange> {
        let start = self.start.containing()?;
        let end   = self.end.containing()?;
        Some(Self { start, end })
    }

    /// 区间签名，可作为手动刷新的断点（resume id）
    pub fn signature(&self) -> String {
        format!("{}:{}:{}", self.level(), self.start.key(), self.end.key())
    }

    /// 将已排序（层级、键升序）的分区折叠为尽量少的连续区间
    pub fn group_contiguous(partitions: Vec<Partition>) -> Vec<PartitionRange> {
        let mut ranges: Vec<PartitionRange> = Vec::new();
        for p in partitions {
            if let Some(last) = ranges.last_mut() {
                if last.level() == p.level() && last.end.key().checked_add(1) == Some(p.key()) {
                    last.end = p;
                    continue;
                }
                if last.contains(&p) {
                    continue;
                }
            }
            ranges.push(Self::single(p));
        }
        ranges
    }
}

impl fmt::Debug for PartitionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PartitionRange({:?} ..= {:?})", self.start, self.end)
    }
}

impl fmt::Display for PartitionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

impl<'a> IntoIterator for &'a PartitionRange {
    type Item = Partition;
    type IntoIter = PartitionIter;

    fn into_iter(self) -> PartitionIter { self.iter() }
}

// ── 迭代器 ────────────────────────────────────────────────────────────────────

/// 通过反复 `next()` 从 start 走到 end（含）
pub struct PartitionIter {
    next: Option<Partition>,
    end:  i64,
}

impl Iterator for PartitionIter {
    type Item = Partition;

    fn next(&mut self) -> Option<Partition> {
        let current = self.next.take()?;
        if current.key() > self.end {
            return None;
        }
        if current.key() < self.end {
            self.next = current.next();
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveDate;

    use super::*;
    use crate::partition::{CalendarLevel, PartitionScheme};

    fn day(y: i32, m: u32, d: u32) -> Partition {
        let scheme = Arc::new(PartitionScheme::full_calendar());
        let v = Value::Date(NaiveDate::from_ymd_opt(y, m, d).unwrap());
        Partition::create_lowest_partition_from_source_value(&scheme, &v).unwrap()
    }

    #[test]
    fn iterates_every_partition_inclusive() {
        let range = PartitionRange::new(day(2024, 2, 27), day(2024, 3, 2)).unwrap();
        let days: Vec<_> = range.iter().map(|p| p.lower_bound().to_string()).collect();
        assert_eq!(days, ["2024-02-27", "2024-02-28", "2024-02-29", "2024-03-01", "2024-03-02"]);
        assert_eq!(range.len(), 5);
    }

    #[test]
    fn rejects_mismatched_levels_and_reversed_ends() {
        let d = day(2024, 1, 10);
        let m = d.containing().unwrap();
        assert!(matches!(PartitionRange::new(d.clone(), m), Err(OlapError::InvalidArgument(_))));
        assert!(matches!(
            PartitionRange::new(day(2024, 1, 11), d),
            Err(OlapError::InvalidArgument(_)),
        ));
    }

    #[test]
    fn batches_are_contiguous_and_bounded() {
        let range = PartitionRange::new(day(2024, 1, 1), day(2024, 1, 10)).unwrap();
        let batches = range.batch(4).unwrap();
        let sizes: Vec<_> = batches.iter().map(PartitionRange::len).collect();
        assert_eq!(sizes, [4, 4, 2]);
        assert_eq!(batches[1].signature(), format!("1:{}:{}", day(2024, 1, 5).key(), day(2024, 1, 8).key()));
        assert!(range.batch(0).is_err());
    }

    #[test]
    fn widest_integer_range_fits_its_length() {
        let scheme = Arc::new(PartitionScheme::integer(vec![1]).unwrap());
        let lowest = |v: i64| Partition::create_lowest_partition_from_source_value(&scheme, &Value::Int64(v)).unwrap();
        let range = PartitionRange::new(lowest(i64::MIN), lowest(i64::MAX)).unwrap();
        assert_eq!(range.len(), 1u64 << 63);
        assert!(Partition::new(Arc::clone(&scheme), 1, i64::MIN).is_err());
    }

    #[test]
    fn containing_range_lifts_both_ends() {
        let range = PartitionRange::new(day(2024, 1, 30), day(2024, 4, 2)).unwrap();
        let months = range.containing_range().unwrap();
        assert_eq!(months.level(), CalendarLevel::Month.level());
        assert_eq!(months.len(), 4);
        let years = months.containing_range().unwrap().containing_range().unwrap();
        assert_eq!(years.len(), 1);
        assert!(years.containing_range().is_none());
    }

    #[test]
    fn groups_sorted_partitions_into_runs() {
        let parts = vec![
            day(2024, 1, 1), day(2024, 1, 2), day(2024, 1, 2), day(2024, 1, 5),
            day(2024, 1, 5).containing().unwrap(),
        ];
        let ranges = PartitionRange::group_contiguous(parts);
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[0].len(), 2);
        assert_eq!(ranges[1].len(), 1);
        assert_eq!(ranges[2].level(), CalendarLevel::Month.level());
    }
}

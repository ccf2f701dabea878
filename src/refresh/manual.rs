//! 手动（区间）刷新
//!
//! 给定源键区间，自最低层起逐层上提，得到需要重算的各层区间；
//! 每层区间再切成批次，每批一个事务。批次签名可作为断点续刷的 resume id。

use tracing::{debug, info, warn};

use crate::common::{OlapError, Result};
use crate::partition::PartitionRange;
use crate::statement::Statement;
use crate::value::Value;

use super::{lowest_range, RefreshOrchestrator, RefreshReport, RefreshState};

/// 手动刷新请求；未给出的字段取默认值
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManualRefresh {
    /// 起点；默认最新键的后继，没有最新键时取源数据最小值
    pub start:      Option<Value>,
    /// 终点（含）；默认源数据最大值
    pub end:        Option<Value>,
    pub batch_size: Option<usize>,
    pub resume_id:  Option<String>,
}

impl ManualRefresh {
    pub fn new() -> Self { Self::default() }

    pub fn from(mut self, start: impl Into<Value>) -> Self {
        self.start = Some(start.into()); self
    }
    pub fn to(mut self, end: impl Into<Value>) -> Self {
        self.end = Some(end.into()); self
    }
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size); self
    }
    pub fn resume_from(mut self, id: &str) -> Self {
        self.resume_id = Some(id.into()); self
    }
}

/// 从最低层区间出发逐层上提：上提后的末端若超出原区间上界则退回一个分区，
/// 退回后为空即停止。例如日 `[03-01, 03-31]` 得到 日、`[三月]`、`[Q1]`。
pub fn ranges_for_manual_refresh(range: &PartitionRange) -> Result<Vec<PartitionRange>> {
    let mut out = vec![range.clone()];
    let mut current = range.clone();
    loop {
        let (Some(start), Some(end)) = (current.start().containing(), current.end().containing()) else {
            break;
        };
        let end = if end.upper_bound() == current.upper_bound() {
            end
        } else {
            match end.previous() {
                Some(p) => p,
                None    => break,
            }
        };
        if end.key() < start.key() {
            break;
        }
        current = PartitionRange::new(start, end)?;
        out.push(current.clone());
    }
    Ok(out)
}

impl RefreshOrchestrator<'_> {
    pub fn manual_refresh(&mut self, class: &str, request: &ManualRefresh) -> Result<RefreshReport> {
        self.metadata.summary(class)?;
        let result = self.run_manual(class, request);
        self.transition(RefreshState::Idle);
        result
    }

    fn run_manual(&mut self, class: &str, request: &ManualRefresh) -> Result<RefreshReport> {
        let meta = self.metadata.summary(class)?;
        let mut report = RefreshReport::new(class);
        let latest = self.store.latest_key(class)?;
        let extent = self.store.source_extent(class)?;

        let start = request.start.clone()
            .or_else(|| latest.as_ref().and_then(Value::successor))
            .or_else(|| extent.as_ref().map(|(min, _)| min.clone()));
        let Some(start) = start else {
            info!(class, "no source data, nothing to refresh");
            report.caught_up = true;
            return Ok(report);
        };
        let end = request.end.clone()
            .or_else(|| extent.as_ref().map(|(_, max)| max.clone()))
            .unwrap_or_else(|| start.clone())
            .max(start.clone());

        let batch_size = request.batch_size.unwrap_or(self.config.batch_size);
        let mut batches = Vec::new();
        for range in ranges_for_manual_refresh(&lowest_range(meta, &start, &end)?)? {
            batches.extend(range.batch(batch_size)?);
        }

        if let Some(id) = &request.resume_id {
            let position = batches.iter().position(|b| b.signature() == *id)
                .ok_or_else(|| OlapError::invalid(format!("resume id '{id}' matches no batch of this refresh")))?;
            report.skipped = batches.drain(..position).map(|b| b.signature()).collect();
            debug!(class, resume_id = %id, skipped = report.skipped.len(), "resuming manual refresh");
        }

        let refreshed_to = match &latest {
            Some(l) if *l > end => l.clone(),
            _ => end.clone(),
        };
        for batch in &batches {
            report.marked_upper += self.recompute_range(class, batch, Some(&refreshed_to))?;
            report.ranges.push(batch.signature());
        }

        // 最新键不越过源数据最大值
        let new_latest = match &extent {
            Some((_, max)) => match &latest {
                Some(l) if *l > *max => l.clone(),
                _ => refreshed_to.min(max.clone()),
            },
            None => match latest {
                Some(l) => l,
                None => refreshed_to,
            },
        };

        // 只有追上源数据才推进最新键并清除新数据标记
        report.caught_up = extent.as_ref().map_or(true, |(_, max)| new_latest >= *max);
        let tracker = self.tracker();
        self.store.begin()?;
        let applied = self.store
            .execute(&Statement::SetLatestKey { class: class.into(), key: new_latest.clone() })
            .and_then(|_| tracker.remove_new_flags(&mut *self.store, class));
        match applied {
            Ok(_) if report.caught_up => self.store.commit()?,
            Ok(_) => {
                self.store.rollback()?;
                info!(class, latest = %new_latest, "manual refresh behind source data, latest key unchanged");
            }
            Err(e) => {
                if let Err(rollback) = self.store.rollback() {
                    warn!(error = %rollback, "rollback failed");
                }
                return Err(e);
            }
        }
        info!(class, batches = report.ranges.len(), caught_up = report.caught_up, "manual refresh finished");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveDate;

    use super::*;
    use crate::partition::{CalendarLevel, Partition, PartitionScheme};

    fn days(from: (i32, u32, u32), to: (i32, u32, u32)) -> PartitionRange {
        let scheme = Arc::new(PartitionScheme::full_calendar());
        let p = |(y, m, d): (i32, u32, u32)| Partition::create_lowest_partition_from_source_value(
            &scheme, &Value::Date(NaiveDate::from_ymd_opt(y, m, d).unwrap()),
        ).unwrap();
        PartitionRange::new(p(from), p(to)).unwrap()
    }

    fn levels(ranges: &[PartitionRange]) -> Vec<(u32, u64)> {
        ranges.iter().map(|r| (r.level(), r.len())).collect()
    }

    #[test]
    fn partial_month_stays_at_day_level() {
        let ranges = ranges_for_manual_refresh(&days((2024, 3, 1), (2024, 3, 3))).unwrap();
        assert_eq!(levels(&ranges), [(CalendarLevel::Day.level(), 3)]);
    }

    #[test]
    fn full_month_lifts_to_quarter() {
        let ranges = ranges_for_manual_refresh(&days((2024, 3, 1), (2024, 3, 31))).unwrap();
        assert_eq!(levels(&ranges), [
            (CalendarLevel::Day.level(), 31),
            (CalendarLevel::Month.level(), 1),
            (CalendarLevel::Quarter.level(), 1),
        ]);
    }

    #[test]
    fn trailing_partial_parent_is_dropped() {
        let ranges = ranges_for_manual_refresh(&days((2024, 1, 15), (2024, 7, 10))).unwrap();
        assert_eq!(levels(&ranges), [
            (CalendarLevel::Day.level(), 178),
            (CalendarLevel::Month.level(), 6),
            (CalendarLevel::Quarter.level(), 2),
        ]);
    }

    #[test]
    fn builder_sets_every_field() {
        let r = ManualRefresh::new().from(1i64).to(9i64).batch_size(3).resume_from("8:0:0");
        assert_eq!(r.start, Some(Value::Int64(1)));
        assert_eq!(r.end, Some(Value::Int64(9)));
        assert_eq!(r.batch_size, Some(3));
        assert_eq!(r.resume_id.as_deref(), Some("8:0:0"));
    }
}

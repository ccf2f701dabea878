//! "截至某点"的覆盖谓词
//!
//! 回答"给我截至 X 的全部数据"时，不必为每个叶子分区各取一行：
//! 自下而上逐层走，每层只贡献一段区间，得到覆盖 `(-inf, point]` 的
//! 最小不相交区间并集。例如截至 2024-03-15：
//!
//! ```text
//!   year    (-inf, 2024-01-01)        ← 2023 及以前的年度行
//!   month   [2024-01-01, 2024-03-01)  ← 一月、二月
//!   day     [2024-03-01, 2024-03-16)  ← 三月 1–15 日
//! ```

use crate::common::{PartitionKey, PartitionLevel};
use crate::value::Value;

use super::Partition;

/// 某一层上的一段汇总行：键在 `[start_key, end_key]`，
/// 对应源键 `[lower, upper)`；`start_key == None` 表示无下界
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelRange {
    pub level:     PartitionLevel,
    pub start_key: Option<PartitionKey>,
    pub end_key:   PartitionKey,
    pub lower:     Option<Value>,
    pub upper:     Value,
}

impl LevelRange {
    pub fn contains(&self, level: PartitionLevel, key: PartitionKey) -> bool {
        level == self.level
            && key <= self.end_key
            && self.start_key.map_or(true, |s| key >= s)
    }
}

/// 覆盖 `(-inf, point]` 的各层区间，自低层向高层排列
pub fn covering_ranges(point: &Partition) -> Vec<LevelRange> {
    let mut out = Vec::new();
    let mut current = point.clone();

    loop {
        let Some(parent) = current.containing() else {
            // 最高层：截至 current 的全部分区
            out.push(LevelRange {
                level:     current.level(),
                start_key: None,
                end_key:   current.key(),
                lower:     None,
                upper:     current.upper_bound(),
            });
            break;
        };

        if current.upper_bound() == parent.upper_bound() {
            // current 恰好补完 parent，本层无需单独贡献
            current = parent;
            continue;
        }

        let first_child = Partition::from_source_value(
            current.scheme(), current.level(), &parent.lower_bound(),
        )
        .map(|p| p.key())
        .unwrap_or(current.key());

        out.push(LevelRange {
            level:     current.level(),
            start_key: Some(first_child),
            end_key:   current.key(),
            lower:     Some(parent.lower_bound()),
            upper:     current.upper_bound(),
        });

        match parent.previous() {
            Some(p) => current = p,
            None    => break,
        }
    }
    out
}

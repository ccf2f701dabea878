//! 序列维度的插值补齐
//!
//! 对全序、可枚举的成员（日期、步长整数），在观测到的最小与最大成员之间
//! 生成稠密序列，缺失成员用占位维度（标签 `"-"`，`is_null = true`）补上。
//! NULL 成员不参与插值，保留在序列末尾。
//! 归一化后落在同一序列位置的多个原始成员全部保留，按原始值排序。

use std::collections::BTreeMap;

use tracing::debug;

use crate::common::{OlapError, Result};
use crate::metadata::SequenceKind;

use super::dimension::{Dimension, DimensionFactory};

pub fn fill_gaps(
    name:    &str,
    members: Vec<Dimension>,
    kind:    SequenceKind,
    factory: &mut DimensionFactory<'_>,
    limit:   usize,
) -> Result<Vec<Dimension>> {
    let mut nulls = Vec::new();
    let mut present: BTreeMap<_, Vec<Dimension>> = BTreeMap::new();
    for m in members {
        if m.raw_member.is_null() {
            nulls.push(m);
            continue;
        }
        let key = kind.normalize(&m.raw_member).ok_or_else(|| OlapError::metadata(format!(
            "dimension '{name}': member {} is not a sequence member", m.raw_member,
        )))?;
        let bucket = present.entry(key).or_default();
        if !bucket.contains(&m) {
            bucket.push(m);
        }
    }

    let (Some(first), Some(last)) = (present.keys().next().cloned(), present.keys().next_back().cloned()) else {
        return Ok(nulls);
    };

    let mut synthesized = 0usize;
    let mut cursor = first;
    while cursor < last {
        cursor = kind.successor(&cursor).ok_or_else(|| OlapError::metadata(format!(
            "dimension '{name}': sequence has no successor after {cursor}",
        )))?;
        if cursor >= last || present.contains_key(&cursor) {
            continue;
        }
        synthesized += 1;
        if synthesized > limit {
            return Err(OlapError::InterpolationOverflow { limit });
        }
        let placeholder = factory.placeholder(name, cursor.clone());
        present.insert(cursor.clone(), vec![placeholder]);
    }
    if synthesized > 0 {
        debug!(dimension = name, synthesized, "sequence gaps filled");
    }

    let mut out: Vec<Dimension> = present.into_values()
        .flat_map(|mut bucket| {
            bucket.sort_by(|a, b| a.raw_member.cmp(&b.raw_member));
            bucket
        })
        .collect();
    out.extend(nulls);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::metadata::{DimensionMetadata, MeasureMetadata, PartitionMetadata, SummaryMetadata};
    use crate::partition::{CalendarLevel, PartitionScheme};
    use crate::value::Value;

    fn meta() -> SummaryMetadata {
        SummaryMetadata::new("s", "src", PartitionMetadata::new("created", PartitionScheme::full_calendar()))
            .with_dimension(DimensionMetadata::new("month", "created")
                .sequence(SequenceKind::Calendar(CalendarLevel::Month)))
            .with_dimension(DimensionMetadata::new("n", "n").sequence(SequenceKind::Integer { step: 1 }))
            .with_measure(MeasureMetadata::count("c"))
    }

    fn month(m: u32) -> Value {
        Value::Date(NaiveDate::from_ymd_opt(2024, m, 1).unwrap())
    }

    fn members(f: &mut DimensionFactory<'_>, name: &str, values: &[Value]) -> Vec<Dimension> {
        values.iter().map(|v| f.create(name, v.clone()).unwrap()).collect()
    }

    #[test]
    fn dense_sequence_is_unchanged() {
        let meta = meta();
        let mut f = DimensionFactory::new(&meta);
        let dense = members(&mut f, "month", &[month(1), month(2), month(3)]);
        let filled = fill_gaps("month", dense.clone(), SequenceKind::Calendar(CalendarLevel::Month), &mut f, 10).unwrap();
        assert_eq!(filled, dense);
        assert!(filled.iter().all(|d| !d.is_null));
    }

    #[test]
    fn one_missing_month_gets_one_placeholder() {
        let meta = meta();
        let mut f = DimensionFactory::new(&meta);
        let sparse = members(&mut f, "month", &[month(1), month(3)]);
        let filled = fill_gaps("month", sparse, SequenceKind::Calendar(CalendarLevel::Month), &mut f, 10).unwrap();
        assert_eq!(filled.len(), 3);
        let synthetic: Vec<_> = filled.iter().filter(|d| d.is_null).collect();
        assert_eq!(synthetic.len(), 1);
        assert_eq!(synthetic[0].raw_member, month(2));
        assert_eq!(synthetic[0].label, "-");
        assert_eq!(filled[1], *synthetic[0]);
    }

    #[test]
    fn nulls_stay_last_and_order_is_restored() {
        let meta = meta();
        let mut f = DimensionFactory::new(&meta);
        let input = members(&mut f, "n", &[Value::Int64(4), Value::Null, Value::Int64(1)]);
        let filled = fill_gaps("n", input, SequenceKind::Integer { step: 1 }, &mut f, 10).unwrap();
        let raw: Vec<_> = filled.iter().map(|d| d.raw_member.clone()).collect();
        assert_eq!(raw, [Value::Int64(1), Value::Int64(2), Value::Int64(3), Value::Int64(4), Value::Null]);
    }

    #[test]
    fn raw_members_sharing_a_month_are_all_kept() {
        let meta = meta();
        let mut f = DimensionFactory::new(&meta);
        let day = |m, d| Value::Date(NaiveDate::from_ymd_opt(2024, m, d).unwrap());
        let input = members(&mut f, "month", &[day(1, 20), day(3, 2), day(1, 5)]);
        let filled = fill_gaps("month", input, SequenceKind::Calendar(CalendarLevel::Month), &mut f, 10).unwrap();
        let raw: Vec<_> = filled.iter().map(|d| d.raw_member.clone()).collect();
        assert_eq!(raw, [day(1, 5), day(1, 20), month(2), day(3, 2)]);
        assert_eq!(filled.iter().filter(|d| d.is_null).count(), 1);
    }

    #[test]
    fn filling_beyond_the_limit_overflows() {
        let meta = meta();
        let mut f = DimensionFactory::new(&meta);
        let input = members(&mut f, "n", &[Value::Int64(0), Value::Int64(100)]);
        let err = fill_gaps("n", input, SequenceKind::Integer { step: 1 }, &mut f, 10);
        assert!(matches!(err, Err(OlapError::InterpolationOverflow { limit: 10 })));
    }

    #[test]
    fn non_sequence_member_is_a_metadata_error() {
        let meta = meta();
        let mut f = DimensionFactory::new(&meta);
        let input = members(&mut f, "n", &[Value::from("x")]);
        assert!(matches!(
            fill_gaps("n", input, SequenceKind::Integer { step: 1 }, &mut f, 10),
            Err(OlapError::Metadata(_)),
        ));
    }
}

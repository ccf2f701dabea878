//! 度量与展开后的"标准表"
//!
//! 一行查询结果带多个度量；展开（unpivot）后每行只带一个度量，
//! 度量名作为 `@values` 维度的成员插入到查询指定的位置：
//!
//! ```text
//!   country product | sum count          country product @values | value
//!   NL      A       | 10  2       →      NL      A       sum     | 10
//!                                        NL      A       count   | 2
//! ```

use crate::common::{OlapError, Result};
use crate::value::Value;

use super::dimension::{Dimension, DimensionFactory, VALUES_DIMENSION};

// ── Measure ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Measure {
    pub name:  String,
    pub label: String,
    pub value: Value,
}

impl Measure {
    pub fn new(name: &str, label: &str, value: Value) -> Self {
        Self { name: name.into(), label: label.into(), value }
    }
}

/// 按查询顺序排列的度量集合
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Measures(Vec<Measure>);

impl Measures {
    pub fn new() -> Self { Self::default() }

    pub fn single(measure: Measure) -> Self { Self(vec![measure]) }

    pub fn push(&mut self, measure: Measure) { self.0.push(measure); }

    pub fn get(&self, name: &str) -> Option<&Measure> {
        self.0.iter().find(|m| m.name == name)
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.get(name).map(|m| &m.value)
    }

    /// 只保留一个度量
    pub fn only(&self, name: &str) -> Self {
        Self(self.0.iter().filter(|m| m.name == name).cloned().collect())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Measure> { self.0.iter() }
    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl<'a> IntoIterator for &'a Measures {
    type Item = &'a Measure;
    type IntoIter = std::slice::Iter<'a, Measure>;

    fn into_iter(self) -> Self::IntoIter { self.0.iter() }
}

// ── NormalTable ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalRow {
    /// 与表的列一一对应，含 `@values`
    pub dimensions: Vec<Dimension>,
    pub measure:    Measure,
}

#[derive(Debug, Clone, Default)]
pub struct NormalTable {
    columns: Vec<String>,
    rows:    Vec<NormalRow>,
}

impl NormalTable {
    /// 展开明细行。`dimensions` 为分组维度（查询顺序，不含 `@values`），
    /// 每行的维度必须与之对应。
    pub fn unpivot<'r, I>(
        dimensions:      &[String],
        values_position: usize,
        rows:            I,
        factory:         &mut DimensionFactory<'_>,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = (&'r [Dimension], &'r Measures)>,
    {
        let at = values_position.min(dimensions.len());
        let mut columns = dimensions.to_vec();
        columns.insert(at, VALUES_DIMENSION.to_string());

        let mut out = Vec::new();
        for (dims, measures) in rows {
            if dims.len() != dimensions.len() {
                return Err(OlapError::invalid(format!(
                    "row has {} dimensions, table expects {}", dims.len(), dimensions.len(),
                )));
            }
            for measure in measures {
                let mut row_dims = dims.to_vec();
                row_dims.insert(at, factory.values_member(&measure.name)?);
                out.push(NormalRow { dimensions: row_dims, measure: measure.clone() });
            }
        }
        Ok(Self { columns, rows: out })
    }

    /// 按各列成员在轴上的位次稳定排序，使相同前缀的行相邻
    pub fn order_by_axes(&mut self, axes: &[(String, Vec<Dimension>)]) {
        let ranks: Vec<Option<&Vec<Dimension>>> = self.columns.iter()
            .map(|c| axes.iter().find(|(name, _)| name == c).map(|(_, members)| members))
            .collect();
        self.rows.sort_by_cached_key(|row| {
            row.dimensions.iter().zip(&ranks)
                .map(|(d, axis)| {
                    axis.and_then(|members| members.iter().position(|m| m == d))
                        .unwrap_or(usize::MAX)
                })
                .collect::<Vec<_>>()
        });
    }

    pub fn columns(&self) -> &[String] { &self.columns }
    pub fn rows(&self) -> &[NormalRow] { &self.rows }
    pub fn len(&self) -> usize { self.rows.len() }
    pub fn is_empty(&self) -> bool { self.rows.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{DimensionMetadata, MeasureMetadata, PartitionMetadata, SummaryMetadata};
    use crate::partition::PartitionScheme;

    fn meta() -> SummaryMetadata {
        SummaryMetadata::new("sales", "order", PartitionMetadata::new("created", PartitionScheme::full_calendar()))
            .with_dimension(DimensionMetadata::new("country", "country"))
            .with_measure(MeasureMetadata::sum("sum", "amount"))
            .with_measure(MeasureMetadata::count("count"))
    }

    fn measures(sum: i64, count: i64) -> Measures {
        let mut m = Measures::new();
        m.push(Measure::new("sum", "sum", Value::Int64(sum)));
        m.push(Measure::new("count", "count", Value::Int64(count)));
        m
    }

    #[test]
    fn unpivot_emits_one_row_per_measure() {
        let meta = meta();
        let mut f = DimensionFactory::new(&meta);
        let nl = vec![f.create("country", Value::from("NL")).unwrap()];
        let m = measures(10, 2);
        let dims = vec!["country".to_string()];

        let table = NormalTable::unpivot(&dims, 1, [(nl.as_slice(), &m)], &mut f).unwrap();
        assert_eq!(table.columns(), ["country", VALUES_DIMENSION]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[1].dimensions[1].member, Value::from("count"));
        assert_eq!(table.rows()[1].measure.value, Value::Int64(2));

        let table = NormalTable::unpivot(&dims, 0, [(nl.as_slice(), &m)], &mut f).unwrap();
        assert_eq!(table.columns(), [VALUES_DIMENSION, "country"]);
        assert!(table.rows()[0].dimensions[0].is_values());
    }

    #[test]
    fn values_first_tables_are_regrouped_by_measure() {
        let meta = meta();
        let mut f = DimensionFactory::new(&meta);
        let nl = vec![f.create("country", Value::from("NL")).unwrap()];
        let de = vec![f.create("country", Value::from("DE")).unwrap()];
        let (a, b) = (measures(10, 2), measures(5, 1));
        let dims = vec!["country".to_string()];

        let mut table = NormalTable::unpivot(
            &dims, 0, [(nl.as_slice(), &a), (de.as_slice(), &b)], &mut f,
        ).unwrap();
        let axes = vec![
            ("country".to_string(), vec![nl[0].clone(), de[0].clone()]),
            (VALUES_DIMENSION.to_string(), vec![f.values_member("sum").unwrap(), f.values_member("count").unwrap()]),
        ];
        table.order_by_axes(&axes);
        let order: Vec<_> = table.rows().iter()
            .map(|r| format!("{}/{}", r.dimensions[0].member, r.dimensions[1].member))
            .collect();
        assert_eq!(order, ["sum/NL", "sum/DE", "count/NL", "count/DE"]);
    }

    #[test]
    fn measures_lookup_and_projection() {
        let m = measures(3, 1);
        assert_eq!(m.value("sum"), Some(&Value::Int64(3)));
        assert_eq!(m.only("count").len(), 1);
        assert!(m.get("avg").is_none());
    }
}

//! 分组位串解码
//!
//! CUBE / ROLLUP 结果的每一行带一个位串，逐位对应查询维度（不含 `@values`）：
//! `1` 表示该维度在此行被汇总掉（列值为 NULL 占位），`0` 表示列值为真实成员。

use crate::common::{OlapError, Result};

use super::dimension::VALUES_DIMENSION;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupingField {
    grouping:     Vec<String>,
    non_grouping: Vec<String>,
}

impl GroupingField {
    pub fn decode<S: AsRef<str>>(bits: &str, dimensions: &[S]) -> Result<Self> {
        let dims: Vec<&str> = dimensions.iter()
            .map(AsRef::as_ref)
            .filter(|d| *d != VALUES_DIMENSION)
            .collect();
        if bits.chars().count() != dims.len() {
            return Err(OlapError::invalid(format!(
                "grouping bitstring '{bits}' has {} bits, expected {}", bits.chars().count(), dims.len(),
            )));
        }

        let mut out = Self { grouping: vec![], non_grouping: vec![] };
        for (bit, dim) in bits.chars().zip(dims) {
            match bit {
                '1' => out.grouping.push(dim.into()),
                '0' => out.non_grouping.push(dim.into()),
                other => return Err(OlapError::invalid(format!("invalid grouping bit '{other}' in '{bits}'"))),
            }
        }
        Ok(out)
    }

    /// 所有维度都有真实值的明细行
    pub fn detail<S: AsRef<str>>(dimensions: &[S]) -> Self {
        Self {
            grouping:     vec![],
            non_grouping: dimensions.iter()
                .map(AsRef::as_ref)
                .filter(|d| *d != VALUES_DIMENSION)
                .map(Into::into)
                .collect(),
        }
    }

    pub fn encode<S: AsRef<str>>(grouped: &[&str], dimensions: &[S]) -> String {
        dimensions.iter()
            .map(AsRef::as_ref)
            .filter(|d| *d != VALUES_DIMENSION)
            .map(|d| if grouped.contains(&d) { '1' } else { '0' })
            .collect()
    }

    pub fn grouping_fields(&self) -> &[String] { &self.grouping }
    pub fn non_grouping_fields(&self) -> &[String] { &self.non_grouping }

    pub fn is_grouping(&self, dimension: &str) -> bool {
        self.grouping.iter().any(|d| d == dimension)
    }

    pub fn is_detail(&self) -> bool { self.grouping.is_empty() }
}

//! 立方体查询描述

use std::collections::BTreeSet;

use crate::common::{OlapError, Result};
use crate::metadata::SummaryMetadata;

use super::coordinates::Filter;
use super::dimension::VALUES_DIMENSION;

/// 分组位串按 u16 计数，超过该维度数的 CUBE 没有意义
pub const MAX_GROUPING_DIMENSIONS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CubeOrdering {
    /// 层级有序：结果按维度从左到右排序，序列维度插值补齐
    #[default]
    Tiered,
    Unordered,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CubeQuery {
    pub class:      String,
    /// 查询维度，可含 `@values` 标记其在表中的位置
    pub dimensions: Vec<String>,
    pub measures:   Vec<String>,
    pub filter:     Option<Filter>,
    pub ordering:   CubeOrdering,
}

impl CubeQuery {
    pub fn new(class: &str) -> Self {
        Self {
            class:      class.into(),
            dimensions: vec![],
            measures:   vec![],
            filter:     None,
            ordering:   CubeOrdering::default(),
        }
    }

    pub fn with_dimension(mut self, name: &str) -> Self {
        self.dimensions.push(name.into()); self
    }
    pub fn with_measure(mut self, name: &str) -> Self {
        self.measures.push(name.into()); self
    }
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter); self
    }
    pub fn with_ordering(mut self, ordering: CubeOrdering) -> Self {
        self.ordering = ordering; self
    }

    /// 参与分组的维度（不含 `@values`），即位串的逐位含义
    pub fn grouping_dimensions(&self) -> Vec<&str> {
        self.dimensions.iter()
            .map(String::as_str)
            .filter(|d| *d != VALUES_DIMENSION)
            .collect()
    }

    /// `@values` 在展开表中的列位置；未指定时放在最后
    pub fn values_position(&self) -> usize {
        let dims = self.grouping_dimensions().len();
        self.dimensions.iter()
            .position(|d| d == VALUES_DIMENSION)
            .unwrap_or(dims)
    }

    pub fn validate(&self, metadata: &SummaryMetadata) -> Result<()> {
        if self.class != metadata.class {
            return Err(OlapError::invalid(format!(
                "query for '{}' evaluated against '{}'", self.class, metadata.class,
            )));
        }
        if self.measures.is_empty() {
            return Err(OlapError::invalid("cube query needs at least one measure"));
        }

        let mut seen = BTreeSet::new();
        for d in &self.dimensions {
            if !seen.insert(d.as_str()) {
                return Err(OlapError::invalid(format!("dimension '{d}' queried twice")));
            }
            if d != VALUES_DIMENSION && metadata.dimension(d).is_none() {
                return Err(OlapError::invalid(format!("unknown dimension '{d}' in {}", self.class)));
            }
        }
        if self.grouping_dimensions().len() > MAX_GROUPING_DIMENSIONS {
            return Err(OlapError::invalid(format!(
                "at most {MAX_GROUPING_DIMENSIONS} dimensions can be grouped",
            )));
        }

        let mut seen = BTreeSet::new();
        for m in &self.measures {
            if !seen.insert(m.as_str()) {
                return Err(OlapError::invalid(format!("measure '{m}' queried twice")));
            }
            if metadata.measure(m).is_none() {
                return Err(OlapError::invalid(format!("unknown measure '{m}' in {}", self.class)));
            }
        }

        if let Some(filter) = &self.filter {
            for d in filter.dimensions() {
                if metadata.dimension(d).is_none() {
                    return Err(OlapError::invalid(format!("filter on unknown dimension '{d}'")));
                }
            }
        }
        Ok(())
    }
}

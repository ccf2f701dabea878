//! 维度 / 度量收集器
//!
//! 逐行扫描结果集，按维度名维护去重、有序的成员序列。
//! 新成员的位置取决于前一个兄弟维度（查询顺序上的前一维）：
//!
//! - 前一维的成员自上次插入后变了（外层进入新分组）：已有成员只移动游标，
//!   新成员插到序列最前
//! - 否则：新成员插在游标（上一次见到的成员）之后

use crate::common::{OlapError, Result};

use super::dimension::{Dimension, DimensionKey};

struct Axis {
    name:    String,
    members: Vec<Dimension>,
    cursor:  Option<usize>,
    /// 上一次插入时的前一维成员；外层 None 表示尚未插入过
    context: Option<Option<DimensionKey>>,
}

pub struct DimensionCollector {
    axes: Vec<Axis>,
}

impl DimensionCollector {
    pub fn new<S: AsRef<str>>(dimensions: &[S]) -> Self {
        let axes = dimensions.iter()
            .map(|d| Axis { name: d.as_ref().into(), members: vec![], cursor: None, context: None })
            .collect();
        Self { axes }
    }

    pub fn add_dimension(&mut self, dimension: Dimension, preceding: Option<&Dimension>) -> Result<()> {
        let axis = self.axes.iter_mut()
            .find(|a| a.name == dimension.name)
            .ok_or_else(|| OlapError::invalid(format!("dimension '{}' is not collected", dimension.name)))?;

        let context = preceding.map(Dimension::key);
        let context_changed = axis.context.as_ref() != Some(&context);
        if context_changed {
            axis.context = Some(context);
        }

        match axis.members.iter().position(|m| *m == dimension) {
            Some(i) => axis.cursor = Some(i),
            None if context_changed => {
                axis.members.insert(0, dimension);
                axis.cursor = Some(0);
            }
            None => {
                let at = axis.cursor.map_or(0, |c| c + 1);
                axis.members.insert(at, dimension);
                axis.cursor = Some(at);
            }
        }
        Ok(())
    }

    pub fn members(&self, name: &str) -> Option<&[Dimension]> {
        self.axes.iter().find(|a| a.name == name).map(|a| a.members.as_slice())
    }

    pub fn replace_members(&mut self, name: &str, members: Vec<Dimension>) -> Result<()> {
        let axis = self.axes.iter_mut()
            .find(|a| a.name == name)
            .ok_or_else(|| OlapError::invalid(format!("dimension '{name}' is not collected")))?;
        axis.members = members;
        axis.cursor = None;
        axis.context = None;
        Ok(())
    }

    /// (维度名, 有序成员)，按查询顺序
    pub fn into_axes(self) -> Vec<(String, Vec<Dimension>)> {
        self.axes.into_iter().map(|a| (a.name, a.members)).collect()
    }
}

/// 度量按首次出现的顺序收集
#[derive(Debug, Default)]
pub struct MeasureCollector {
    measures: Vec<(String, String)>,
}

impl MeasureCollector {
    pub fn new() -> Self { Self::default() }

    pub fn add(&mut self, name: &str, label: &str) {
        if !self.measures.iter().any(|(n, _)| n == name) {
            self.measures.push((name.into(), label.into()));
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.measures.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn label(&self, name: &str) -> Option<&str> {
        self.measures.iter().find(|(n, _)| n == name).map(|(_, l)| l.as_str())
    }

    pub fn len(&self) -> usize { self.measures.len() }
    pub fn is_empty(&self) -> bool { self.measures.is_empty() }
}

//! 立方体单元与导航
//!
//! 单元 = 无序坐标（固定了哪些维度的哪个成员）+ 度量。
//! 所有导航操作都不修改立方体，只返回新的单元视图；
//! 没有对应结果行的组合返回空单元（`is_null() == true`）。

use std::fmt;

use crate::common::{OlapError, Result};
use crate::value::Value;

use super::coordinates::{Coordinates, CoordinatesKind, Filter};
use super::dimension::Dimension;
use super::result::Cube;
use super::table::Measures;
use super::tree::ChildSelector;

#[derive(Clone)]
pub struct CubeCell<'c> {
    cube:   &'c Cube,
    /// 按查询维度顺序
    tuple:  Vec<Dimension>,
    data:   Option<usize>,
    filter: Option<Filter>,
}

impl<'c> CubeCell<'c> {
    pub(crate) fn new(cube: &'c Cube, tuple: Vec<Dimension>, data: Option<usize>, filter: Option<Filter>) -> Self {
        Self { cube, tuple, data, filter }
    }

    pub fn tuple(&self) -> &[Dimension] { &self.tuple }

    pub fn coordinates(&self) -> Coordinates {
        Coordinates::from_distinct(CoordinatesKind::Unordered, self.tuple.clone())
            .with_filter(self.filter.clone())
    }

    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.tuple.iter().find(|d| d.name == name)
    }

    pub fn member(&self, name: &str) -> Option<&Value> {
        self.dimension(name).map(|d| &d.member)
    }

    pub fn measures(&self) -> &'c Measures {
        match self.data.and_then(|i| self.cube.cell_data(i)) {
            Some(data) => &data.measures,
            None       => self.cube.empty_measures(),
        }
    }

    pub fn measure(&self, name: &str) -> Option<&'c Value> {
        self.measures().value(name)
    }

    /// 没有结果行支撑的合成单元
    pub fn is_null(&self) -> bool { self.data.is_none() }

    pub fn filter(&self) -> Option<&Filter> { self.filter.as_ref() }

    fn position(&self, dimension: &str) -> Result<usize> {
        self.cube.position(dimension)
            .ok_or_else(|| OlapError::invalid(format!("'{dimension}' is not a cube dimension")))
    }

    fn with_tuple(&self, tuple: Vec<Dimension>) -> Self {
        self.cube.cell_for(tuple, self.filter.clone())
    }

    fn admits(&self, tuple: &[Dimension]) -> bool {
        match &self.filter {
            Some(f) => f.matches(&|name| tuple.iter().find(|d| d.name == name).map(|d| &d.raw_member)),
            None    => true,
        }
    }

    // ── 导航 ──────────────────────────────────────────────────────────────────

    /// 去掉 `dimension` 的祖先单元；本就未固定该维度时返回自身
    pub fn roll_up(&self, dimension: &str) -> Result<Self> {
        self.position(dimension)?;
        if self.dimension(dimension).is_none() {
            return Ok(self.clone());
        }
        let tuple = self.tuple.iter().filter(|d| d.name != dimension).cloned().collect();
        Ok(self.with_tuple(tuple))
    }

    /// 沿一个尚未固定的维度下钻，按成员顺序返回全部子单元（含空单元）。
    /// 选择子：维度名；正数 = 从最后一个已固定维度向后数；负数 = 从末尾倒数。
    pub fn drill_down(&self, selector: impl Into<ChildSelector>) -> Result<Vec<Self>> {
        let dims = self.cube.dimensions().len();
        let target = match selector.into() {
            ChildSelector::Name(name) => self.position(&name)?,
            ChildSelector::Offset(0) => return Err(OlapError::invalid("drill-down offset must not be zero")),
            ChildSelector::Offset(n) if n > 0 => {
                let base = self.tuple.iter()
                    .filter_map(|d| self.cube.position(&d.name))
                    .max()
                    .map_or(0, |p| p + 1);
                base + n as usize - 1
            }
            ChildSelector::Offset(n) => dims.checked_sub(n.unsigned_abs() as usize)
                .ok_or_else(|| OlapError::invalid(format!("drill-down offset {n} out of range")))?,
        };
        if target >= dims {
            return Err(OlapError::invalid(format!("no dimension at position {target}")));
        }
        let name = &self.cube.dimensions()[target];
        if self.dimension(name).is_some() {
            return Err(OlapError::invalid(format!("dimension '{name}' is already fixed in this cell")));
        }
        Ok(self.children_along(target))
    }

    fn children_along(&self, position: usize) -> Vec<Self> {
        self.cube.axis(position).iter()
            .filter_map(|member| {
                let mut tuple = self.tuple.clone();
                tuple.push(member.clone());
                self.admits(&tuple).then(|| self.with_tuple(tuple))
            })
            .collect()
    }

    /// 将 `dimension` 固定为 `member`（已固定则替换）；成员未知或被过滤掉时为 None
    pub fn slice(&self, dimension: &str, member: &Value) -> Result<Option<Self>> {
        let position = self.position(dimension)?;
        let Some(found) = self.cube.axis(position).iter()
            .find(|d| d.member == *member || d.raw_member == *member)
        else {
            return Ok(None);
        };
        let mut tuple: Vec<Dimension> = self.tuple.iter().filter(|d| d.name != dimension).cloned().collect();
        tuple.push(found.clone());
        Ok(self.admits(&tuple).then(|| self.with_tuple(tuple)))
    }

    /// 后代查找：`dimension` 已固定时仅当成员相同才返回自身
    pub fn find(&self, dimension: &str, member: &Value) -> Result<Option<Self>> {
        self.position(dimension)?;
        match self.dimension(dimension) {
            Some(d) if d.member == *member || d.raw_member == *member => Ok(Some(self.clone())),
            Some(_) => Ok(None),
            None    => self.slice(dimension, member),
        }
    }

    /// 附加过滤谓词；不重新查询，只约束后续下钻 / 切片
    pub fn dice(&self, filter: Filter) -> Self {
        let filter = match &self.filter {
            Some(existing) => existing.clone().and(filter),
            None           => filter,
        };
        Self { filter: Some(filter), ..self.clone() }
    }

    /// 先序遍历：自身，然后沿下一个未固定维度逐层下钻
    pub fn traverse(&self) -> Vec<Self> {
        let mut out = vec![self.clone()];
        let next = self.tuple.iter()
            .filter_map(|d| self.cube.position(&d.name))
            .max()
            .map_or(0, |p| p + 1);
        if next < self.cube.dimensions().len() {
            for child in self.children_along(next) {
                out.extend(child.traverse());
            }
        }
        out
    }
}

impl PartialEq for CubeCell<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.cube, other.cube)
            && self.data == other.data
            && self.filter == other.filter
            && self.tuple.len() == other.tuple.len()
            && self.tuple.iter().zip(&other.tuple).all(|(a, b)| a == b)
    }
}

impl fmt::Debug for CubeCell<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CubeCell{}", self.coordinates())?;
        if self.is_null() {
            write!(f, " null")?;
        }
        Ok(())
    }
}

//! 坐标与过滤谓词
//!
//! - **Tuple**     — 有序的 维度名 → 成员 映射（树路径）
//! - **Unordered** — 无序映射（立方体单元）
//!
//! 两者都可附带一个过滤谓词 [`Filter`]。

use std::collections::BTreeSet;
use std::fmt;

use crate::common::{OlapError, Result};
use crate::value::Value;

use super::dimension::{Dimension, DimensionKey};

// ── Filter ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    In { dimension: String, members: Vec<Value> },
    /// 闭区间
    Between { dimension: String, low: Value, high: Value },
    Not(Box<Filter>),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn equals(dimension: &str, member: impl Into<Value>) -> Self {
        Self::In { dimension: dimension.into(), members: vec![member.into()] }
    }

    pub fn in_members(dimension: &str, members: Vec<Value>) -> Self {
        Self::In { dimension: dimension.into(), members }
    }

    pub fn between(dimension: &str, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Self::Between { dimension: dimension.into(), low: low.into(), high: high.into() }
    }

    pub fn negate(self) -> Self { Self::Not(Box::new(self)) }

    pub fn and(self, other: Filter) -> Self {
        match self {
            Self::And(mut parts) => { parts.push(other); Self::And(parts) }
            first => Self::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Filter) -> Self {
        match self {
            Self::Or(mut parts) => { parts.push(other); Self::Or(parts) }
            first => Self::Or(vec![first, other]),
        }
    }

    /// 三值求值：谓词涉及的维度不在 `lookup` 中时为 None（未约束）
    pub fn evaluate<'v>(&self, lookup: &dyn Fn(&str) -> Option<&'v Value>) -> Option<bool> {
        match self {
            Self::In { dimension, members } => lookup(dimension.as_str()).map(|v| members.contains(v)),
            Self::Between { dimension, low, high } => lookup(dimension.as_str()).map(|v| low <= v && v <= high),
            Self::Not(inner) => inner.evaluate(lookup).map(|b| !b),
            Self::And(parts) => {
                let mut result = Some(true);
                for p in parts {
                    match p.evaluate(lookup) {
                        Some(false) => return Some(false),
                        None        => result = None,
                        Some(true)  => {}
                    }
                }
                result
            }
            Self::Or(parts) => {
                let mut result = Some(false);
                for p in parts {
                    match p.evaluate(lookup) {
                        Some(true)  => return Some(true),
                        None        => result = None,
                        Some(false) => {}
                    }
                }
                result
            }
        }
    }

    /// 未被明确否定即视为匹配
    pub fn matches<'v>(&self, lookup: &dyn Fn(&str) -> Option<&'v Value>) -> bool {
        self.evaluate(lookup) != Some(false)
    }

    pub fn dimensions(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect_dimensions(&mut out);
        out
    }

    fn collect_dimensions<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Self::In { dimension, .. } | Self::Between { dimension, .. } => {
                out.insert(dimension.as_str());
            }
            Self::Not(inner) => inner.collect_dimensions(out),
            Self::And(parts) | Self::Or(parts) => {
                for p in parts {
                    p.collect_dimensions(out);
                }
            }
        }
    }
}

// ── Coordinates ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatesKind {
    Tuple,
    Unordered,
}

#[derive(Debug, Clone)]
pub struct Coordinates {
    kind:       CoordinatesKind,
    dimensions: Vec<Dimension>,
    filter:     Option<Filter>,
}

impl Coordinates {
    pub fn new(kind: CoordinatesKind) -> Self {
        Self { kind, dimensions: vec![], filter: None }
    }

    pub fn from_dimensions(kind: CoordinatesKind, dimensions: Vec<Dimension>) -> Result<Self> {
        let mut out = Self::new(kind);
        for d in dimensions {
            out.push(d)?;
        }
        Ok(out)
    }

    /// 调用方已保证维度名互不相同（树路径、立方体单元）
    pub(crate) fn from_distinct(kind: CoordinatesKind, dimensions: Vec<Dimension>) -> Self {
        Self { kind, dimensions, filter: None }
    }

    /// 追加一个维度；维度名重复是调用方错误
    pub fn push(&mut self, dimension: Dimension) -> Result<()> {
        if self.get(&dimension.name).is_some() {
            return Err(OlapError::invalid(format!("dimension '{}' already in coordinates", dimension.name)));
        }
        self.dimensions.push(dimension);
        Ok(())
    }

    pub fn with_filter(mut self, filter: Option<Filter>) -> Self {
        self.filter = filter; self
    }

    pub fn kind(&self) -> CoordinatesKind { self.kind }
    pub fn dimensions(&self) -> &[Dimension] { &self.dimensions }
    pub fn filter(&self) -> Option<&Filter> { self.filter.as_ref() }
    pub fn len(&self) -> usize { self.dimensions.len() }
    pub fn is_empty(&self) -> bool { self.dimensions.is_empty() }

    pub fn get(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|d| d.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.dimensions.iter().map(|d| d.name.as_str()).collect()
    }

    /// 按维度名排序的身份键，与顺序无关
    pub fn signature(&self) -> Vec<DimensionKey> {
        let mut keys: Vec<_> = self.dimensions.iter().map(Dimension::key).collect();
        keys.sort();
        keys
    }
}

impl PartialEq for Coordinates {
    fn eq(&self, other: &Self) -> bool {
        if self.kind != other.kind || self.filter != other.filter {
            return false;
        }
        match self.kind {
            CoordinatesKind::Tuple => {
                self.dimensions.len() == other.dimensions.len()
                    && self.dimensions.iter().zip(&other.dimensions).all(|(a, b)| a.key() == b.key())
            }
            CoordinatesKind::Unordered => self.signature() == other.signature(),
        }
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.dimensions.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", d.name, d.display_member)?;
        }
        write!(f, ")")
    }
}

//! 维度成员与请求级工厂

use std::collections::HashMap;
use std::fmt;

use crate::common::{OlapError, Result};
use crate::metadata::SummaryMetadata;
use crate::value::Value;

/// 表示"度量本身"的合成维度，成员为度量名
pub const VALUES_DIMENSION: &str = "@values";
/// 插值占位成员的标签
pub const PLACEHOLDER_LABEL: &str = "-";

/// 去重身份：(维度名, 原始成员)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DimensionKey {
    pub name: String,
    pub raw:  Value,
}

#[derive(Debug, Clone)]
pub struct Dimension {
    pub name:           String,
    pub label:          String,
    /// 业务成员（经 member_map 变换）
    pub member:         Value,
    /// 查询返回的原始成员
    pub raw_member:     Value,
    /// 显示用成员；成员为 NULL 时换成 null 标签
    pub display_member: Value,
    /// 插值合成，非查询结果
    pub is_null:        bool,
}

impl Dimension {
    pub fn new(name: &str, label: &str, member: Value) -> Self {
        Self {
            name:           name.into(),
            label:          label.into(),
            raw_member:     member.clone(),
            display_member: member.clone(),
            member,
            is_null:        false,
        }
    }

    pub fn key(&self) -> DimensionKey {
        DimensionKey { name: self.name.clone(), raw: self.raw_member.clone() }
    }

    pub fn is_values(&self) -> bool { self.name == VALUES_DIMENSION }
}

impl PartialEq for Dimension {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.raw_member == other.raw_member
    }
}

impl Eq for Dimension {}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.display_member)
    }
}

// ── DimensionFactory ──────────────────────────────────────────────────────────

/// 单次查询内按 (名, 原始成员) 去重的工厂；查询结束即丢弃
pub struct DimensionFactory<'m> {
    metadata: &'m SummaryMetadata,
    cache:    HashMap<DimensionKey, Dimension>,
}

impl<'m> DimensionFactory<'m> {
    pub fn new(metadata: &'m SummaryMetadata) -> Self {
        Self { metadata, cache: HashMap::new() }
    }

    pub fn create(&mut self, name: &str, raw: Value) -> Result<Dimension> {
        let key = DimensionKey { name: name.into(), raw };
        if let Some(d) = self.cache.get(&key) {
            return Ok(d.clone());
        }
        let meta = self.metadata.dimension(name)
            .ok_or_else(|| OlapError::metadata(format!("{}: no dimension '{name}'", self.metadata.class)))?;

        let member = meta.member_for(&key.raw);
        let display_member = match (&member, &meta.null_label) {
            (Value::Null, Some(label)) => Value::Str(label.clone()),
            _ => member.clone(),
        };
        let dimension = Dimension {
            name:           name.into(),
            label:          meta.label.clone(),
            member,
            raw_member:     key.raw.clone(),
            display_member,
            is_null:        false,
        };
        self.cache.insert(key, dimension.clone());
        Ok(dimension)
    }

    /// `@values` 维度成员：度量名为成员，度量标签为显示值
    pub fn values_member(&mut self, measure: &str) -> Result<Dimension> {
        let key = DimensionKey { name: VALUES_DIMENSION.into(), raw: Value::from(measure) };
        if let Some(d) = self.cache.get(&key) {
            return Ok(d.clone());
        }
        let meta = self.metadata.measure(measure)
            .ok_or_else(|| OlapError::metadata(format!("{}: no measure '{measure}'", self.metadata.class)))?;
        let dimension = Dimension {
            name:           VALUES_DIMENSION.into(),
            label:          "Values".into(),
            member:         key.raw.clone(),
            raw_member:     key.raw.clone(),
            display_member: Value::Str(meta.label.clone()),
            is_null:        false,
        };
        self.cache.insert(key, dimension.clone());
        Ok(dimension)
    }

    /// 插值占位成员
    pub fn placeholder(&mut self, name: &str, raw: Value) -> Dimension {
        let key = DimensionKey { name: name.into(), raw };
        if let Some(d) = self.cache.get(&key) {
            return d.clone();
        }
        let dimension = Dimension {
            name:           name.into(),
            label:          PLACEHOLDER_LABEL.into(),
            member:         key.raw.clone(),
            raw_member:     key.raw.clone(),
            display_member: key.raw.clone(),
            is_null:        true,
        };
        self.cache.insert(key, dimension.clone());
        dimension
    }

    pub fn len(&self) -> usize { self.cache.len() }
    pub fn is_empty(&self) -> bool { self.cache.is_empty() }
}

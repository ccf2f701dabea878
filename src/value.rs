//! 运行时值类型
//!
//! 维度成员、度量值、分区源键共用同一个 [`Value`]。与 SQL 不同，
//! `Value` 之间有全序（浮点按 `total_cmp`），因此可直接作为
//! `BTreeMap` / `HashMap` 的键，用于维度去重与排序。

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use chrono::{Datelike, NaiveDate};

/// 列值（运行时表示）
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    /// 日期（按天）
    Date(NaiveDate),
    Str(String),
}

impl Value {
    fn tag(&self) -> u8 {
        match self {
            Self::Null       => 0,
            Self::Bool(_)    => 1,
            Self::Int64(_)   => 2,
            Self::Float64(_) => 3,
            Self::Date(_)    => 4,
            Self::Str(_)     => 5,
        }
    }

    pub fn is_null(&self) -> bool { matches!(self, Self::Null) }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// 数值视图：整数也可按浮点参与聚合
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int64(v)   => Some(*v as f64),
            Self::Float64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self { Self::Date(d) => Some(*d), _ => None }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self { Self::Str(s) => Some(s), _ => None }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null       => "null",
            Self::Bool(_)    => "bool",
            Self::Int64(_)   => "int64",
            Self::Float64(_) => "float64",
            Self::Date(_)    => "date",
            Self::Str(_)     => "string",
        }
    }

    /// 源键空间中的下一个值（整数 +1，日期 +1 天）；其它类型没有后继
    pub fn successor(&self) -> Option<Value> {
        match self {
            Self::Int64(v) => v.checked_add(1).map(Self::Int64),
            Self::Date(d)  => d.succ_opt().map(Self::Date),
            _ => None,
        }
    }

    /// 将值序列化为可比较的字节串（快照与签名使用）
    pub fn to_sort_key(&self) -> Vec<u8> {
        let mut out = vec![self.tag()];
        match self {
            Self::Null       => {}
            Self::Bool(b)    => out.push(*b as u8),
            // 翻转符号位，使大端字节序与数值序一致
            Self::Int64(v)   => out.extend_from_slice(&((*v as u64) ^ (1 << 63)).to_be_bytes()),
            Self::Float64(v) => {
                let bits = v.to_bits();
                let ordered = if bits >> 63 == 1 { !bits } else { bits ^ (1 << 63) };
                out.extend_from_slice(&ordered.to_be_bytes());
            }
            Self::Date(d)    => {
                let days = d.num_days_from_ce() as u32 ^ (1 << 31);
                out.extend_from_slice(&days.to_be_bytes());
            }
            Self::Str(s)     => out.extend_from_slice(s.as_bytes()),
        }
        out
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool { self.cmp(other) == Ordering::Equal }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null)             => Ordering::Equal,
            (Self::Bool(a), Self::Bool(b))       => a.cmp(b),
            (Self::Int64(a), Self::Int64(b))     => a.cmp(b),
            (Self::Float64(a), Self::Float64(b)) => a.total_cmp(b),
            (Self::Date(a), Self::Date(b))       => a.cmp(b),
            (Self::Str(a), Self::Str(b))         => a.cmp(b),
            _ => self.tag().cmp(&other.tag()),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.tag().hash(state);
        match self {
            Self::Null       => {}
            Self::Bool(b)    => b.hash(state),
            Self::Int64(v)   => v.hash(state),
            Self::Float64(v) => v.to_bits().hash(state),
            Self::Date(d)    => d.hash(state),
            Self::Str(s)     => s.hash(state),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null       => write!(f, "NULL"),
            Self::Bool(v)    => write!(f, "{v}"),
            Self::Int64(v)   => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Date(d)    => write!(f, "{}", d.format("%Y-%m-%d")),
            Self::Str(s)     => write!(f, "{s}"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self { Self::Int64(v) }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self { Self::Float64(v) }
}
impl From<bool> for Value {
    fn from(v: bool) -> Self { Self::Bool(v) }
}
impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self { Self::Date(v) }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self { Self::Str(v.into()) }
}
impl From<String> for Value {
    fn from(v: String) -> Self { Self::Str(v) }
}

//! 分解后的语句
//!
//! 刷新引擎不生成 SQL 方言：它把每一步描述为一个 [`Statement`]，
//! 连同表达式提供者给出的不透明表达式文本，交给外部执行者。

use std::fmt;

use crate::common::PartitionLevel;
use crate::dirty::DirtyFlag;
use crate::partition::PartitionRange;
use crate::value::Value;

/// 结果列 ← 表达式
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnBinding {
    pub name:       String,
    pub expression: String,
}

impl ColumnBinding {
    pub fn new(name: &str, expression: String) -> Self {
        Self { name: name.into(), expression }
    }
}

/// 一次汇总计算：将 `source_level`（None = 源表）的行聚合进 `range`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollupStatement {
    pub class:         String,
    pub range:         PartitionRange,
    pub source_level:  Option<PartitionLevel>,
    pub partition_key: ColumnBinding,
    pub dimensions:    Vec<ColumnBinding>,
    pub measures:      Vec<ColumnBinding>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    DeleteSummaryRows,
    RollUpSourceToSummary,
    RollUpSummaryToSummary,
    InsertDirtyFlags,
    DeleteDirtyFlags,
    DeleteNewFlags,
    SetLatestKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// 删除区间内既有的汇总行
    DeleteSummaryRows { class: String, range: PartitionRange },
    RollUpSourceToSummary(RollupStatement),
    RollUpSummaryToSummary(RollupStatement),
    InsertDirtyFlags(Vec<DirtyFlag>),
    DeleteDirtyFlags { class: String, range: PartitionRange },
    DeleteNewFlags { class: String },
    /// 持久化"最新已处理源键"
    SetLatestKey { class: String, key: Value },
}

impl Statement {
    pub fn kind(&self) -> StatementKind {
        match self {
            Self::DeleteSummaryRows { .. }  => StatementKind::DeleteSummaryRows,
            Self::RollUpSourceToSummary(_)  => StatementKind::RollUpSourceToSummary,
            Self::RollUpSummaryToSummary(_) => StatementKind::RollUpSummaryToSummary,
            Self::InsertDirtyFlags(_)       => StatementKind::InsertDirtyFlags,
            Self::DeleteDirtyFlags { .. }   => StatementKind::DeleteDirtyFlags,
            Self::DeleteNewFlags { .. }     => StatementKind::DeleteNewFlags,
            Self::SetLatestKey { .. }       => StatementKind::SetLatestKey,
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeleteSummaryRows { class, range } => write!(f, "DELETE {class} {range}"),
            Self::RollUpSourceToSummary(r) | Self::RollUpSummaryToSummary(r) => {
                let from = r.source_level.map_or("source".to_string(), |l| format!("level {l}"));
                write!(f, "ROLLUP {} {} FROM {from} KEY {}", r.class, r.range, r.partition_key.expression)?;
                for c in r.dimensions.iter().chain(&r.measures) {
                    write!(f, ", {} AS {}", c.expression, c.name)?;
                }
                Ok(())
            }
            Self::InsertDirtyFlags(flags) => write!(f, "MARK {} dirty flag(s)", flags.len()),
            Self::DeleteDirtyFlags { class, range } => write!(f, "UNMARK {class} {range}"),
            Self::DeleteNewFlags { class } => write!(f, "UNMARK {class} new"),
            Self::SetLatestKey { class, key } => write!(f, "SET LATEST {class} = {key}"),
        }
    }
}

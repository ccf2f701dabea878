//! 聚合表达式提供者
//!
//! 给定维度/度量与阶段（源 → 汇总 / 汇总 → 汇总），返回嵌入汇总语句
//! 的表达式文本。对刷新引擎而言表达式完全不透明。

use crate::common::{PartitionLevel, Result};
use crate::metadata::{AggregateFunction, DimensionMetadata, MeasureMetadata, SequenceKind, SummaryMetadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    SourceToSummary,
    SummaryToSummary,
}

pub trait ExpressionProvider {
    fn dimension_expression(
        &self,
        summary:   &SummaryMetadata,
        dimension: &DimensionMetadata,
        phase:     Phase,
    ) -> Result<String>;

    fn measure_expression(
        &self,
        summary: &SummaryMetadata,
        measure: &MeasureMetadata,
        phase:   Phase,
    ) -> Result<String>;

    /// 目标层级分区键的表达式
    fn partition_key_expression(
        &self,
        summary: &SummaryMetadata,
        level:   PartitionLevel,
        phase:   Phase,
    ) -> Result<String>;
}

/// 方言中立的 SQL 片段
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlExpressionProvider;

impl SqlExpressionProvider {
    fn truncate(level: &str, column: &str) -> String {
        format!("DATE_TRUNC('{level}', {column})")
    }
}

impl ExpressionProvider for SqlExpressionProvider {
    fn dimension_expression(
        &self,
        _summary:  &SummaryMetadata,
        dimension: &DimensionMetadata,
        phase:     Phase,
    ) -> Result<String> {
        Ok(match (phase, dimension.sequence_kind()) {
            (Phase::SourceToSummary, Some(SequenceKind::Calendar(level))) =>
                Self::truncate(level.name(), &dimension.source_property),
            (Phase::SourceToSummary, _) => dimension.source_property.clone(),
            (Phase::SummaryToSummary, _) => dimension.name.clone(),
        })
    }

    fn measure_expression(
        &self,
        _summary: &SummaryMetadata,
        measure:  &MeasureMetadata,
        phase:    Phase,
    ) -> Result<String> {
        Ok(match phase {
            Phase::SourceToSummary => match (&measure.function, &measure.source_property) {
                (AggregateFunction::Count, None) => "COUNT(*)".to_string(),
                (f, Some(p)) => format!("{}({p})", f.name()),
                (f, None)    => format!("{}(*)", f.name()),
            },
            Phase::SummaryToSummary => {
                format!("{}({})", measure.function.summary_function().name(), measure.name)
            }
        })
    }

    fn partition_key_expression(
        &self,
        summary: &SummaryMetadata,
        level:   PartitionLevel,
        phase:   Phase,
    ) -> Result<String> {
        let scheme = &summary.partition.scheme;
        let column = match phase {
            Phase::SourceToSummary  => summary.partition.source_property.clone(),
            Phase::SummaryToSummary => "partition_key".to_string(),
        };
        Ok(match (scheme.calendar_level(level), phase) {
            (Some(cl), _) => Self::truncate(cl.name(), &column),
            (None, Phase::SourceToSummary) => format!("({column} >> {level})"),
            (None, Phase::SummaryToSummary) => {
                let child = scheme.child_level(level).unwrap_or(level);
                format!("({column} >> {})", level - child)
            }
        })
    }
}

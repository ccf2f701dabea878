//! 全局基础类型与错误定义

use thiserror::Error;

// ── ID 类型别名 ───────────────────────────────────────────────────────────────

/// 汇总类（summary class）名称，即一张汇总表的逻辑标识
pub type SummaryClass = String;
/// 分区层级：数值越大粒度越粗
pub type PartitionLevel = u32;
/// 同层分区内的全序键
pub type PartitionKey = i64;
/// 源数据行 ID（参考实现 `MemoryStore` 使用）
pub type SourceRowId = u64;

// ── 错误 ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum OlapError {
    /// 调用方错误：分组位串格式错误、分区层级不一致等，永不重试
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// 维度/度量/分区声明配置错误，立即暴露
    #[error("metadata error: {0}")]
    Metadata(String),
    #[error("unknown summary class: {0}")]
    UnknownSummaryClass(String),
    #[error("partition not found: {0}")]
    PartitionNotFound(String),
    /// 节点合成（含插值）超过上限
    #[error("interpolation overflow: more than {limit} nodes")]
    InterpolationOverflow { limit: usize },
    /// 单次立方体查询返回的行数超过上限
    #[error("query result overflow: {rows} rows exceed limit {limit}")]
    QueryResultOverflow { limit: usize, rows: usize },
    #[error("transaction error: {0}")]
    Transaction(String),
    #[error("statement failed: {0}")]
    StatementFailed(String),
    #[error("snapshot error: {0}")]
    Snapshot(String),
    #[error("checksum mismatch")]
    ChecksumMismatch,
    #[error("compression error: {0}")]
    Compression(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl OlapError {
    pub fn invalid(msg: impl Into<String>) -> Self { Self::InvalidArgument(msg.into()) }
    pub fn metadata(msg: impl Into<String>) -> Self { Self::Metadata(msg.into()) }
}

pub type Result<T> = std::result::Result<T, OlapError>;

//! # olap-summary-engine
//!
//! OLAP 汇总引擎，两部分：
//! - **增量汇总**：多级分区（日/月/季/年 或 整数位宽）+ 脏标记，
//!   源数据变化只重算受影响的分区，每段区间一个事务
//! - **立方体**：把汇总查询的扁平结果（含 CUBE 小计行）组装成
//!   可 rollUp / drillDown / slice / dice 的单元与层级树
//!
//! ## 整体架构
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     SummaryEngine                         │
//! │   record_*() ──► DirtyFlagTracker ──► InsertDirtyFlags    │
//! │                                                           │
//! │   refresh*() ──► RefreshOrchestrator                      │
//! │                   ├─ convert_new_to_dirty                 │
//! │                   ├─ refresh_range   (Statement × N)      │
//! │                   └─ manual_refresh  (batch / resume id)  │
//! │                          │                                │
//! │                          ▼                                │
//! │                 SummaryStore  ◄── ExpressionProvider      │
//! │                 (MemoryStore + 快照文件)                   │
//! │                          │                                │
//! │   query() ──► RowFetcher ─┘                               │
//! │                 │  扁平行 + __grouping                     │
//! │                 ▼                                         │
//! │               Cube                                        │
//! │   ┌────────────────────────────────────────────────┐      │
//! │   │  GroupingField → DimensionCollector → 插值      │      │
//! │   │  cells: 元组 → 度量   (CubeCell 导航)           │      │
//! │   │  NormalTable → Tree   (TreeNode 导航)           │      │
//! │   └────────────────────────────────────────────────┘      │
//! └──────────────────────────────────────────────────────────┘
//! ```

// ── 基础 ──────────────────────────────────────────────────────────────────────
pub mod common;
pub mod config;
pub mod value;

// ── 汇总（增量刷新）───────────────────────────────────────────────────────────
pub mod partition;
pub mod metadata;
pub mod expression;
pub mod statement;
pub mod dirty;
pub mod store;
pub mod refresh;

// ── 立方体 ────────────────────────────────────────────────────────────────────
pub mod cube;

pub mod engine;

pub use common::{OlapError, Result};
pub use engine::SummaryEngine;
pub use value::Value;

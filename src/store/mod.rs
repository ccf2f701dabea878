//! 语句执行与取数的外部协作者
//!
//! - [`SummaryStore`] — 执行分解后的语句，读取脏标记 / 最新键 / 源数据范围，
//!   事务由外部管理（begin / commit / rollback）
//! - [`RowFetcher`]   — 按立方体查询返回扁平行，可带 `__grouping` 位串列
//!
//! [`MemoryStore`] 是两者的进程内参考实现。

use std::collections::BTreeMap;

use tracing::warn;

use crate::common::Result;
use crate::cube::CubeQuery;
use crate::dirty::DirtyFlag;
use crate::statement::Statement;
use crate::value::Value;

mod memory;
mod snapshot;

pub use memory::{MemoryStore, SummaryRow};

/// 分组位串所在的结果列
pub const GROUPING_COLUMN: &str = "__grouping";

/// 一行扁平查询结果：列名 → 值
pub type ResultRow = BTreeMap<String, Value>;

pub trait SummaryStore {
    fn begin(&mut self) -> Result<()>;
    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self) -> Result<()>;
    fn in_transaction(&self) -> bool;

    /// 执行一条语句，返回受影响行数
    fn execute(&mut self, statement: &Statement) -> Result<u64>;

    fn dirty_flags(&self, class: &str) -> Result<Vec<DirtyFlag>>;

    /// 已汇总到的最新源键
    fn latest_key(&self, class: &str) -> Result<Option<Value>>;

    /// 汇总类的源数据在分区属性上的 `(min, max)`；无源数据时 None
    fn source_extent(&self, class: &str) -> Result<Option<(Value, Value)>>;
}

pub trait RowFetcher {
    fn fetch_rows(&self, query: &CubeQuery) -> Result<Vec<ResultRow>>;
}

/// 在一个事务中运行 `f`：成功提交，失败回滚并返回原错误
pub fn transactional<S, T, F>(store: &mut S, f: F) -> Result<T>
where
    S: SummaryStore + ?Sized,
    F: FnOnce(&mut S) -> Result<T>,
{
    store.begin()?;
    match f(store) {
        Ok(value) => {
            store.commit()?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = store.rollback() {
                warn!(error = %rollback, "rollback failed");
            }
            Err(e)
        }
    }
}

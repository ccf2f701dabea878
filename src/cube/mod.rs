//! 立方体：把汇总查询的扁平结果组装成可导航的多维结构
//!
//! - [`result::Cube`]  — 组装入口，持有单元索引与树
//! - [`cell::CubeCell`] — 单元视图（rollUp / drillDown / slice / dice / find）
//! - [`tree::Tree`]     — 按查询维度顺序展开的层级视图

pub mod cell;
pub mod collector;
pub mod coordinates;
pub mod dimension;
pub mod gap_fill;
pub mod grouping;
pub mod query;
pub mod result;
pub mod table;
pub mod tree;

pub use cell::CubeCell;
pub use collector::{DimensionCollector, MeasureCollector};
pub use coordinates::{Coordinates, CoordinatesKind, Filter};
pub use dimension::{Dimension, DimensionFactory, DimensionKey, PLACEHOLDER_LABEL, VALUES_DIMENSION};
pub use gap_fill::fill_gaps;
pub use grouping::GroupingField;
pub use query::{CubeOrdering, CubeQuery, MAX_GROUPING_DIMENSIONS};
pub use result::{CellData, Cube};
pub use table::{Measure, Measures, NormalRow, NormalTable};
pub use tree::{ChildSelector, NodeId, NormalTableToTreeTransformer, Tree, TreeNode};

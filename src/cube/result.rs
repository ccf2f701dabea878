//! 立方体组装
//!
//! 扁平结果行 → 分组解码 → 维度收集（序列维度插值）→ 单元索引 + 树：
//!
//! ```text
//!   rows ──► GroupingField ──► DimensionCollector ──► gap filler
//!     │                                                   │
//!     ├──► cells: tuple → measures（含 CUBE 小计行）        │
//!     └──► 明细行 ──► NormalTable ──► Tree ──► interpolate ◄┘
//! ```

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::common::{OlapError, Result};
use crate::config::CubeConfig;
use crate::metadata::SummaryMetadata;
use crate::store::{ResultRow, GROUPING_COLUMN};
use crate::value::Value;

use super::cell::CubeCell;
use super::collector::{DimensionCollector, MeasureCollector};
use super::coordinates::Filter;
use super::dimension::{Dimension, DimensionFactory, DimensionKey, VALUES_DIMENSION};
use super::gap_fill::fill_gaps;
use super::grouping::GroupingField;
use super::query::{CubeOrdering, CubeQuery};
use super::table::{Measure, Measures, NormalTable};
use super::tree::{NormalTableToTreeTransformer, Tree, TreeNode};

/// 一个有数据的单元：元组按查询维度顺序排列
#[derive(Debug, Clone)]
pub struct CellData {
    pub tuple:    Vec<Dimension>,
    pub measures: Measures,
}

#[derive(Debug)]
pub struct Cube {
    query:       CubeQuery,
    /// 分组维度（查询顺序，不含 `@values`）
    dimensions:  Vec<String>,
    measures:    Vec<String>,
    axes:        Vec<(String, Vec<Dimension>)>,
    cells:       Vec<CellData>,
    index:       HashMap<Vec<DimensionKey>, usize>,
    tree:        Tree,
    nodes_limit: usize,
    empty:       Measures,
}

impl Cube {
    pub fn build(
        query:    &CubeQuery,
        metadata: &SummaryMetadata,
        rows:     Vec<ResultRow>,
        config:   &CubeConfig,
    ) -> Result<Self> {
        if rows.len() > config.query_result_limit {
            return Err(OlapError::QueryResultOverflow { limit: config.query_result_limit, rows: rows.len() });
        }
        query.validate(metadata)?;

        let dimensions: Vec<String> = query.grouping_dimensions().into_iter().map(Into::into).collect();
        let mut factory = DimensionFactory::new(metadata);
        let mut collector = DimensionCollector::new(&dimensions);
        let mut measure_collector = MeasureCollector::new();
        for name in &query.measures {
            if let Some(m) = metadata.measure(name) {
                measure_collector.add(&m.name, &m.label);
            }
        }

        let mut cells: Vec<CellData> = Vec::with_capacity(rows.len());
        let mut index = HashMap::with_capacity(rows.len());
        let mut detail = Vec::new();

        for row in &rows {
            let grouping = match row.get(GROUPING_COLUMN) {
                Some(Value::Str(bits)) => GroupingField::decode(bits, &dimensions)?,
                None | Some(Value::Null) => GroupingField::detail(&dimensions),
                Some(other) => return Err(OlapError::invalid(format!(
                    "grouping column must be a bitstring, got {}", other.type_name(),
                ))),
            };

            let mut tuple = Vec::with_capacity(dimensions.len());
            for name in &dimensions {
                if grouping.is_grouping(name) {
                    continue;
                }
                let raw = row.get(name).cloned().unwrap_or(Value::Null);
                let dimension = factory.create(name, raw)?;
                collector.add_dimension(dimension.clone(), tuple.last())?;
                tuple.push(dimension);
            }

            let mut measures = Measures::new();
            for name in measure_collector.names() {
                let value = row.get(name).cloned().unwrap_or(Value::Null);
                let label = measure_collector.label(name).unwrap_or(name);
                measures.push(Measure::new(name, label, value));
            }

            let key: Vec<DimensionKey> = tuple.iter().map(Dimension::key).collect();
            if index.contains_key(&key) {
                warn!(class = %query.class, "duplicate cube row ignored");
                continue;
            }
            index.insert(key, cells.len());
            if grouping.is_detail() {
                detail.push(cells.len());
            }
            cells.push(CellData { tuple, measures });
        }

        // ── 序列维度插值 ──────────────────────────────────────────────────────
        let tiered = query.ordering == CubeOrdering::Tiered;
        let mut sequences = Vec::new();
        if tiered {
            for name in &dimensions {
                let Some(kind) = metadata.dimension(name).and_then(|d| d.sequence_kind()) else { continue };
                let members = collector.members(name).map(<[Dimension]>::to_vec).unwrap_or_default();
                let filled = fill_gaps(name, members, kind, &mut factory, config.filling_nodes_limit)?;
                collector.replace_members(name, filled)?;
                sequences.push(name.clone());
            }
        }
        let axes = collector.into_axes();

        // ── 树 ────────────────────────────────────────────────────────────────
        let mut table = NormalTable::unpivot(
            &dimensions,
            query.values_position(),
            detail.iter().map(|&i| (cells[i].tuple.as_slice(), &cells[i].measures)),
            &mut factory,
        )?;
        let mut ordering = axes.clone();
        let values_axis = measure_collector.names().into_iter()
            .map(|m| factory.values_member(m))
            .collect::<Result<Vec<_>>>()?;
        ordering.push((VALUES_DIMENSION.to_string(), values_axis));
        table.order_by_axes(&ordering);

        let mut tree = NormalTableToTreeTransformer::transform(&table, config.nodes_limit)?;
        for name in &sequences {
            if let Some((_, members)) = axes.iter().find(|(n, _)| n == name) {
                tree.interpolate(name, members)?;
            }
        }

        let mut cube = Self {
            query: query.clone(),
            dimensions,
            measures: measure_collector.names().into_iter().map(Into::into).collect(),
            axes,
            cells,
            index,
            tree,
            nodes_limit: config.nodes_limit,
            empty: Measures::new(),
        };
        cube.attach_subtotals();
        debug!(
            class = %cube.query.class,
            rows = rows.len(),
            cells = cube.cells.len(),
            nodes = cube.tree.len(),
            "cube assembled",
        );
        Ok(cube)
    }

    /// 内部节点的度量取自对应的 CUBE 小计行
    fn attach_subtotals(&mut self) {
        let mut updates = Vec::new();
        for node in self.tree.root().traverse() {
            if node.is_null() || !node.measures().is_empty() {
                continue;
            }
            let path = node.path();
            let mut values = None;
            let mut tuple = Vec::new();
            for d in path.dimensions() {
                if d.is_values() {
                    values = d.member.as_str().map(str::to_string);
                } else {
                    tuple.push(d.clone());
                }
            }
            if let Some(i) = self.lookup(&tuple) {
                let measures = &self.cells[i].measures;
                let measures = match &values {
                    Some(name) => measures.only(name),
                    None       => measures.clone(),
                };
                updates.push((node.id(), measures));
            }
        }
        for (id, measures) in updates {
            self.tree.set_measures(id, measures);
        }
    }

    // ── 查询 ──────────────────────────────────────────────────────────────────

    pub fn query(&self) -> &CubeQuery { &self.query }
    pub fn dimensions(&self) -> &[String] { &self.dimensions }
    pub fn measures(&self) -> &[String] { &self.measures }

    /// 某维度的有序成员（含插值占位）
    pub fn members(&self, dimension: &str) -> Option<&[Dimension]> {
        self.axes.iter().find(|(n, _)| n == dimension).map(|(_, m)| m.as_slice())
    }

    pub fn tree(&self) -> TreeNode<'_> { self.tree.root() }

    /// 有数据的单元数（含小计）
    pub fn len(&self) -> usize { self.cells.len() }
    pub fn is_empty(&self) -> bool { self.cells.is_empty() }

    /// 顶点单元：所有维度都被汇总掉
    pub fn result(&self) -> CubeCell<'_> {
        self.cell_for(vec![], None)
    }

    /// 恰好固定 `dimensions` 的全部单元（成员笛卡尔积，缺数据的为空单元）
    pub fn cubes_by_dimensionality(&self, dimensions: &[&str]) -> Result<Vec<CubeCell<'_>>> {
        let mut positions = Vec::with_capacity(dimensions.len());
        for d in dimensions {
            let p = self.position(d)
                .ok_or_else(|| OlapError::invalid(format!("'{d}' is not a cube dimension")))?;
            if positions.contains(&p) {
                return Err(OlapError::invalid(format!("dimension '{d}' listed twice")));
            }
            positions.push(p);
        }
        positions.sort_unstable();

        let axes: Vec<&[Dimension]> = positions.iter()
            .map(|&p| self.axes[p].1.as_slice())
            .collect();
        let total = axes.iter().try_fold(1usize, |acc, a| acc.checked_mul(a.len()));
        match total {
            Some(n) if n <= self.nodes_limit => {}
            _ => return Err(OlapError::InterpolationOverflow { limit: self.nodes_limit }),
        }

        let mut tuples: Vec<Vec<Dimension>> = vec![vec![]];
        for axis in axes {
            tuples = tuples.into_iter()
                .flat_map(|t| axis.iter().map(move |m| {
                    let mut next = t.clone();
                    next.push(m.clone());
                    next
                }))
                .collect();
        }
        Ok(tuples.into_iter().map(|t| self.cell_for(t, None)).collect())
    }

    // ── 单元支撑 ──────────────────────────────────────────────────────────────

    pub(crate) fn position(&self, dimension: &str) -> Option<usize> {
        self.dimensions.iter().position(|d| d == dimension)
    }

    pub(crate) fn axis(&self, position: usize) -> &[Dimension] {
        self.axes.get(position).map(|(_, m)| m.as_slice()).unwrap_or(&[])
    }

    pub(crate) fn lookup(&self, tuple: &[Dimension]) -> Option<usize> {
        let key: Vec<DimensionKey> = tuple.iter().map(Dimension::key).collect();
        self.index.get(&key).copied()
    }

    pub(crate) fn cell_data(&self, index: usize) -> Option<&CellData> { self.cells.get(index) }

    pub(crate) fn empty_measures(&self) -> &Measures { &self.empty }

    /// 元组按查询顺序规范化后定位单元
    pub(crate) fn cell_for(&self, mut tuple: Vec<Dimension>, filter: Option<Filter>) -> CubeCell<'_> {
        tuple.sort_by_key(|d| self.position(&d.name).unwrap_or(usize::MAX));
        let data = self.lookup(&tuple);
        CubeCell::new(self, tuple, data, filter)
    }
}

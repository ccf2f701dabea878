//! 立方体树
//!
//! 每层对应标准表的一列（查询维度 + `@values`），叶子带一个度量。
//! 节点存放在 arena（`Vec`）中，父子关系用下标表示：
//!
//! ```text
//!   root
//!   ├── country=NL
//!   │   ├── product=A ── @values=sum (10)
//!   │   └── product=B ── @values=sum (7)
//!   └── country=DE
//!       └── product=A ── @values=sum (4)
//! ```

use tracing::debug;

use crate::common::{OlapError, Result};
use crate::value::Value;

use super::coordinates::{Coordinates, CoordinatesKind};
use super::dimension::Dimension;
use super::table::{Measures, NormalRow, NormalTable};

pub type NodeId = usize;

const ROOT: NodeId = 0;

#[derive(Debug, Clone)]
pub struct TreeNodeData {
    /// 根节点为 None
    pub dimension: Option<Dimension>,
    pub measures:  Measures,
    /// 插值 / 补齐合成的节点
    pub is_null:   bool,
    parent:        Option<NodeId>,
    children:      Vec<NodeId>,
    depth:         usize,
}

#[derive(Debug)]
pub struct Tree {
    /// 第 i 层（depth = i + 1）的列名
    levels:      Vec<String>,
    nodes:       Vec<TreeNodeData>,
    nodes_limit: usize,
}

impl Tree {
    pub fn new(levels: Vec<String>, nodes_limit: usize) -> Self {
        let root = TreeNodeData {
            dimension: None,
            measures:  Measures::new(),
            is_null:   false,
            parent:    None,
            children:  vec![],
            depth:     0,
        };
        Self { levels, nodes: vec![root], nodes_limit }
    }

    pub fn root(&self) -> TreeNode<'_> { TreeNode { tree: self, id: ROOT } }

    pub fn node(&self, id: NodeId) -> Option<TreeNode<'_>> {
        (id < self.nodes.len()).then_some(TreeNode { tree: self, id })
    }

    pub fn levels(&self) -> &[String] { &self.levels }

    /// 不含根节点
    pub fn len(&self) -> usize { self.nodes.len() - 1 }
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    fn add_child(
        &mut self,
        parent:    NodeId,
        dimension: Dimension,
        measures:  Measures,
        is_null:   bool,
    ) -> Result<NodeId> {
        if self.len() >= self.nodes_limit {
            return Err(OlapError::InterpolationOverflow { limit: self.nodes_limit });
        }
        let id = self.nodes.len();
        let depth = self.nodes[parent].depth + 1;
        self.nodes.push(TreeNodeData {
            dimension: Some(dimension),
            measures,
            is_null,
            parent: Some(parent),
            children: vec![],
            depth,
        });
        self.nodes[parent].children.push(id);
        Ok(id)
    }

    pub(crate) fn set_measures(&mut self, id: NodeId, measures: Measures) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.measures = measures;
        }
    }

    /// 将 `level` 层的子节点补齐为 `axis` 的稠密序列，缺失成员以空节点补上。
    /// 只补齐已有子节点的真实父节点。
    pub fn interpolate(&mut self, level: &str, axis: &[Dimension]) -> Result<usize> {
        let depth = self.levels.iter()
            .position(|l| l == level)
            .map(|p| p + 1)
            .ok_or_else(|| OlapError::invalid(format!("tree has no level '{level}'")))?;

        let parents: Vec<NodeId> = (0..self.nodes.len())
            .filter(|&id| {
                let n = &self.nodes[id];
                n.depth == depth - 1 && !n.is_null && !n.children.is_empty()
            })
            .collect();

        // 先算出全部缺失成员，超限时树保持原样
        let missing: Vec<(NodeId, Vec<&Dimension>)> = parents.into_iter()
            .map(|parent| {
                let children = &self.nodes[parent].children;
                let absent = axis.iter()
                    .filter(|member| !children.iter().any(|&c| self.nodes[c].dimension.as_ref() == Some(*member)))
                    .collect();
                (parent, absent)
            })
            .collect();
        let created: usize = missing.iter().map(|(_, absent)| absent.len()).sum();
        if self.len() + created > self.nodes_limit {
            return Err(OlapError::InterpolationOverflow { limit: self.nodes_limit });
        }

        for (parent, absent) in missing {
            let existing = std::mem::take(&mut self.nodes[parent].children);
            let mut synthesized = Vec::with_capacity(absent.len());
            for member in absent {
                let id = self.add_child(parent, member.clone(), Measures::new(), true)?;
                synthesized.push(id);
            }
            let mut ordered = Vec::with_capacity(axis.len().max(existing.len()));
            for member in axis {
                let hit = existing.iter().chain(&synthesized).copied().find(|&c| {
                    self.nodes[c].dimension.as_ref() == Some(member)
                });
                if let Some(c) = hit {
                    if !ordered.contains(&c) {
                        ordered.push(c);
                    }
                }
            }
            for c in existing {
                if !ordered.contains(&c) {
                    ordered.push(c);
                }
            }
            self.nodes[parent].children = ordered;
        }
        if created > 0 {
            debug!(level, created, "tree interpolated");
        }
        Ok(created)
    }
}

// ── NormalTableToTreeTransformer ──────────────────────────────────────────────

/// 单遍扫描已排序的标准表，沿 `current_path` 复用公共前缀
pub struct NormalTableToTreeTransformer {
    tree:         Tree,
    current_path: Vec<Option<NodeId>>,
}

impl NormalTableToTreeTransformer {
    pub fn new(columns: &[String], nodes_limit: usize) -> Self {
        Self {
            tree:         Tree::new(columns.to_vec(), nodes_limit),
            current_path: vec![None; columns.len()],
        }
    }

    pub fn transform(table: &NormalTable, nodes_limit: usize) -> Result<Tree> {
        let mut t = Self::new(table.columns(), nodes_limit);
        for row in table.rows() {
            t.add_row(row)?;
        }
        Ok(t.tree)
    }

    pub fn add_row(&mut self, row: &NormalRow) -> Result<()> {
        let width = self.current_path.len();
        if row.dimensions.len() != width {
            return Err(OlapError::invalid(format!(
                "row has {} columns, tree has {width} levels", row.dimensions.len(),
            )));
        }

        let mut parent = ROOT;
        let mut diverged = false;
        for (depth, dim) in row.dimensions.iter().enumerate() {
            if !diverged {
                if let Some(id) = self.current_path[depth] {
                    if self.tree.nodes[id].dimension.as_ref() == Some(dim) {
                        parent = id;
                        continue;
                    }
                }
            }
            diverged = true;
            let measures = if depth + 1 == width {
                Measures::single(row.measure.clone())
            } else {
                Measures::new()
            };
            let id = self.tree.add_child(parent, dim.clone(), measures, false)?;
            self.current_path[depth] = Some(id);
            parent = id;
        }
        if !diverged {
            debug!(measure = %row.measure.name, "duplicate row ignored");
        }
        Ok(())
    }

    pub fn finish(self) -> Tree { self.tree }
}

// ── TreeNode ──────────────────────────────────────────────────────────────────

/// `get_children` 的选择子
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildSelector {
    /// 指定维度所在层的后代
    Name(String),
    /// 正数：向下 n 层；负数：从最底层倒数
    Offset(i32),
}

impl From<&str> for ChildSelector {
    fn from(name: &str) -> Self { Self::Name(name.into()) }
}

impl From<i32> for ChildSelector {
    fn from(offset: i32) -> Self { Self::Offset(offset) }
}

#[derive(Clone, Copy)]
pub struct TreeNode<'t> {
    tree: &'t Tree,
    id:   NodeId,
}

impl<'t> TreeNode<'t> {
    fn data(&self) -> &'t TreeNodeData { &self.tree.nodes[self.id] }

    fn at(&self, id: NodeId) -> Self { Self { tree: self.tree, id } }

    pub fn id(&self) -> NodeId { self.id }
    pub fn dimension(&self) -> Option<&'t Dimension> { self.data().dimension.as_ref() }
    pub fn name(&self) -> Option<&'t str> { self.dimension().map(|d| d.name.as_str()) }
    pub fn member(&self) -> Option<&'t Value> { self.dimension().map(|d| &d.member) }
    pub fn measures(&self) -> &'t Measures { &self.data().measures }
    pub fn is_null(&self) -> bool { self.data().is_null }
    pub fn depth(&self) -> usize { self.data().depth }
    pub fn is_root(&self) -> bool { self.id == ROOT }
    pub fn is_leaf(&self) -> bool { self.data().children.is_empty() }

    pub fn parent(&self) -> Option<Self> { self.data().parent.map(|p| self.at(p)) }

    pub fn children(&self) -> Vec<Self> {
        self.data().children.iter().map(|&c| self.at(c)).collect()
    }

    /// 按成员查找直接子节点（业务成员或原始成员均可）
    pub fn child(&self, member: &Value) -> Option<Self> {
        self.data().children.iter()
            .map(|&c| self.at(c))
            .find(|c| c.dimension().is_some_and(|d| d.member == *member || d.raw_member == *member))
    }

    pub fn get_children(&self, selector: impl Into<ChildSelector>) -> Result<Vec<Self>> {
        let levels = self.tree.levels.len();
        let target = match selector.into() {
            ChildSelector::Name(name) => self.tree.levels.iter()
                .position(|l| *l == name)
                .map(|p| p + 1)
                .ok_or_else(|| OlapError::invalid(format!("no dimension '{name}' in tree")))?,
            ChildSelector::Offset(0) => return Err(OlapError::invalid("child offset must not be zero")),
            ChildSelector::Offset(n) if n > 0 => self.depth() + n as usize,
            ChildSelector::Offset(n) => {
                let back = n.unsigned_abs() as usize;
                (levels + 1).checked_sub(back)
                    .ok_or_else(|| OlapError::invalid(format!("offset {n} is above the root")))?
            }
        };
        if target <= self.depth() || target > levels {
            return Err(OlapError::invalid(format!(
                "level {target} is not below node depth {}", self.depth(),
            )));
        }

        let mut out = Vec::new();
        self.collect_at(target, &mut out);
        Ok(out)
    }

    fn collect_at(&self, depth: usize, out: &mut Vec<Self>) {
        if self.depth() == depth {
            out.push(*self);
            return;
        }
        for c in self.children() {
            c.collect_at(depth, out);
        }
    }

    /// 深度优先查找任意深度上 `dimension == member` 的第一个后代
    pub fn find(&self, dimension: &str, member: &Value) -> Option<Self> {
        for c in self.children() {
            if c.name() == Some(dimension) && c.member().is_some_and(|m| m == member) {
                return Some(c);
            }
            if let Some(found) = c.find(dimension, member) {
                return Some(found);
            }
        }
        None
    }

    /// 先序遍历（含自身）
    pub fn traverse(&self) -> Vec<Self> {
        let mut out = vec![*self];
        for c in self.children() {
            out.extend(c.traverse());
        }
        out
    }

    fn path_dimensions(&self) -> Vec<Dimension> {
        let mut dims = Vec::with_capacity(self.depth());
        let mut current = Some(*self);
        while let Some(node) = current {
            if let Some(d) = node.dimension() {
                dims.push(d.clone());
            }
            current = node.parent();
        }
        dims.reverse();
        dims
    }

    /// 自根到本节点的有序坐标
    pub fn path(&self) -> Coordinates {
        Coordinates::from_distinct(CoordinatesKind::Tuple, self.path_dimensions())
    }

    /// 展平为标准表行：每个真实叶子一行（完整路径 + 度量）
    pub fn flatten(&self) -> Vec<NormalRow> {
        let levels = self.tree.levels.len();
        self.traverse()
            .into_iter()
            .filter(|n| n.depth() == levels && !n.is_null())
            .filter_map(|n| {
                n.measures().iter().next().map(|m| NormalRow {
                    dimensions: n.path_dimensions(),
                    measure:    m.clone(),
                })
            })
            .collect()
    }
}

impl std::fmt::Debug for TreeNode<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.dimension() {
            Some(d) => write!(f, "TreeNode({d}{})", if self.is_null() { ", null" } else { "" }),
            None    => write!(f, "TreeNode(root)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cube::dimension::VALUES_DIMENSION;
    use crate::cube::table::Measure;

    fn dim(name: &str, member: impl Into<Value>) -> Dimension {
        Dimension::new(name, name, member.into())
    }

    fn row(country: &str, product: &str, sum: i64) -> NormalRow {
        NormalRow {
            dimensions: vec![dim("country", country), dim("product", product), dim(VALUES_DIMENSION, "sum")],
            measure:    Measure::new("sum", "sum", Value::Int64(sum)),
        }
    }

    fn columns() -> Vec<String> {
        vec!["country".into(), "product".into(), VALUES_DIMENSION.into()]
    }

    fn build(rows: &[NormalRow], limit: usize) -> Result<Tree> {
        let mut t = NormalTableToTreeTransformer::new(&columns(), limit);
        for r in rows {
            t.add_row(r)?;
        }
        Ok(t.finish())
    }

    fn sample() -> Vec<NormalRow> {
        vec![row("NL", "A", 10), row("NL", "B", 7), row("DE", "A", 4)]
    }

    #[test]
    fn shared_prefixes_reuse_nodes() {
        let tree = build(&sample(), 100).unwrap();
        // NL, NL/A, NL/A/sum, NL/B, NL/B/sum, DE, DE/A, DE/A/sum
        assert_eq!(tree.len(), 8);
        let root = tree.root();
        let countries: Vec<_> = root.children().iter().map(|c| c.member().unwrap().to_string()).collect();
        assert_eq!(countries, ["NL", "DE"]);
        assert_eq!(root.child(&Value::from("NL")).unwrap().children().len(), 2);
    }

    #[test]
    fn flatten_round_trips_rows() {
        let rows = sample();
        let tree = build(&rows, 100).unwrap();
        assert_eq!(tree.root().flatten(), rows);
    }

    #[test]
    fn node_limit_trips_on_second_node() {
        let rows = vec![row("NL", "A", 1), row("DE", "B", 2)];
        let err = build(&rows, 1);
        assert!(matches!(err, Err(OlapError::InterpolationOverflow { limit: 1 })));
    }

    #[test]
    fn get_children_by_name_and_offset() {
        let tree = build(&sample(), 100).unwrap();
        let root = tree.root();
        assert_eq!(root.get_children("product").unwrap().len(), 3);
        assert_eq!(root.get_children(1).unwrap().len(), 2);
        assert_eq!(root.get_children(-1).unwrap().len(), 3);
        let nl = root.child(&Value::from("NL")).unwrap();
        assert_eq!(nl.get_children(-2).unwrap().len(), 2);
        assert!(nl.get_children("country").is_err());
        assert!(root.get_children(0).is_err());
        assert!(root.get_children(4).is_err());
    }

    #[test]
    fn find_and_path() {
        let tree = build(&sample(), 100).unwrap();
        let de_a = tree.root().child(&Value::from("DE")).unwrap().find("product", &Value::from("A")).unwrap();
        assert_eq!(de_a.path().to_string(), "(country=DE, product=A)");
        let leaf = de_a.children()[0];
        assert_eq!(leaf.measures().value("sum"), Some(&Value::Int64(4)));
        assert_eq!(tree.root().traverse().len(), 9);
    }

    #[test]
    fn interpolation_inserts_null_nodes_in_axis_order() {
        let rows = vec![row("NL", "A", 1), row("NL", "C", 3)];
        let mut tree = build(&rows, 100).unwrap();
        let axis = vec![dim("product", "A"), dim("product", "B"), dim("product", "C")];
        assert_eq!(tree.interpolate("product", &axis).unwrap(), 1);

        let nl = tree.root().child(&Value::from("NL")).unwrap();
        let products: Vec<_> = nl.children().iter().map(|c| (c.member().unwrap().to_string(), c.is_null())).collect();
        assert_eq!(products, [("A".into(), false), ("B".into(), true), ("C".into(), false)]);
        // 空节点不出现在展平结果中
        assert_eq!(tree.root().flatten(), rows);
    }

    #[test]
    fn interpolation_respects_node_limit() {
        let rows = vec![row("NL", "A", 1), row("NL", "C", 3)];
        let mut tree = build(&rows, 5).unwrap();
        let axis = vec![dim("product", "A"), dim("product", "B"), dim("product", "C")];
        assert!(matches!(tree.interpolate("product", &axis), Err(OlapError::InterpolationOverflow { .. })));
    }

    #[test]
    fn failed_interpolation_leaves_the_tree_intact() {
        let rows = sample();
        let mut tree = build(&rows, 8).unwrap();
        let axis = vec![dim("product", "A"), dim("product", "B")];
        assert!(matches!(tree.interpolate("product", &axis), Err(OlapError::InterpolationOverflow { limit: 8 })));

        assert_eq!(tree.len(), 8);
        let de = tree.root().child(&Value::from("DE")).unwrap();
        assert_eq!(de.children().len(), 1);
        assert!(de.children().iter().all(|c| !c.is_null()));
        assert_eq!(tree.root().flatten(), rows);
    }
}

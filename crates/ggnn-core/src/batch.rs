//! Ragged batching: many graphs folded into one shared node index space.
//!
//! Nodes of all graphs are laid out in a single sequence, with a parallel
//! segment-id array recording which graph each node came from. Edges are
//! stored per [`EdgeType`] in COO form using batch-global node indices, so a
//! single scatter over the whole batch aggregates messages for every graph
//! at once:
//!
//! ```text
//! graph 0: n0 n1 n2      graph 1: n0
//! batch:   0  1  2  3
//! segment: 0  0  0  1
//! ```

use crate::error::{Result, ShapeError};
use crate::graph::{EdgeType, Graph, GraphLabels, Label, TaskLabel};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Edges of one type in COO layout (batch-global node indices).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeList {
    pub sources: Vec<u32>,
    pub targets: Vec<u32>,
    /// Edge positions; 0 where the input edge had none.
    pub positions: Vec<u32>,
}

impl EdgeList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an edge.
    pub fn push(&mut self, source: u32, target: u32, position: u32) {
        self.sources.push(source);
        self.targets.push(target);
        self.positions.push(position);
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Iterate over `(source, target, position)` triples.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32, u32)> + '_ {
        self.sources
            .iter()
            .zip(&self.targets)
            .zip(&self.positions)
            .map(|((&s, &t), &p)| (s, t, p))
    }

    fn check_lengths(&self) -> Result<()> {
        for (what, got) in [
            ("edge targets", self.targets.len()),
            ("edge positions", self.positions.len()),
        ] {
            if got != self.sources.len() {
                return Err(ShapeError::LengthMismatch {
                    what,
                    expected: self.sources.len(),
                    got,
                });
            }
        }
        Ok(())
    }
}

/// Whether a label column has one row per graph or one per node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelLevel {
    Graph,
    Node,
}

/// Flattened label values for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelData {
    /// One class index per row.
    Classes(Vec<u32>),
    /// Row-major `rows x width` regression targets.
    Values { values: Vec<f32>, width: usize },
}

impl LabelData {
    /// Number of label rows.
    pub fn rows(&self) -> usize {
        match self {
            LabelData::Classes(c) => c.len(),
            LabelData::Values { values, width } => {
                if *width == 0 {
                    0
                } else {
                    values.len() / width
                }
            }
        }
    }
}

/// All labels of one task, aligned with batch order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelColumn {
    pub level: LabelLevel,
    pub data: LabelData,
}

/// Labels of every task present in a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchLabels {
    columns: BTreeMap<String, LabelColumn>,
}

impl BatchLabels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a task column. Row counts are checked when the column
    /// is attached to a batch.
    pub fn insert(&mut self, task: impl Into<String>, column: LabelColumn) {
        self.columns.insert(task.into(), column);
    }

    pub fn get(&self, task: &str) -> Option<&LabelColumn> {
        self.columns.get(task)
    }

    /// Like [`get`](Self::get) but fails with [`ShapeError::MissingLabels`].
    pub fn require(&self, task: &str) -> Result<&LabelColumn> {
        self.get(task).ok_or_else(|| ShapeError::MissingLabels {
            task: task.to_string(),
            graph: None,
        })
    }

    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    fn validate(&self, num_graphs: usize, num_nodes: usize) -> Result<()> {
        for (task, column) in &self.columns {
            let expected = match column.level {
                LabelLevel::Graph => num_graphs,
                LabelLevel::Node => num_nodes,
            };
            if let LabelData::Values { values, width } = &column.data {
                if *width == 0 || values.len() % width != 0 {
                    return Err(ShapeError::LabelMismatch {
                        task: task.clone(),
                        reason: format!("{} values do not divide into rows of width {width}", values.len()),
                    });
                }
            }
            let rows = column.data.rows();
            if rows != expected {
                return Err(ShapeError::LabelMismatch {
                    task: task.clone(),
                    reason: format!("{rows} label rows, expected {expected}"),
                });
            }
        }
        Ok(())
    }
}

/// A batch of graphs flattened into shared index space.
///
/// Deserialized batches go through [`GraphBatch::from_parts`], so a stored
/// batch is held to the same checks as a freshly assembled one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawGraphBatch")]
pub struct GraphBatch {
    vocab_ids: Vec<u32>,
    selectors: Vec<bool>,
    segment_ids: Vec<u32>,
    node_counts: Vec<usize>,
    edges: [EdgeList; EdgeType::COUNT],
    labels: BatchLabels,
}

/// Serialized form of [`GraphBatch`], validated on the way in.
#[derive(Deserialize)]
struct RawGraphBatch {
    vocab_ids: Vec<u32>,
    selectors: Vec<bool>,
    segment_ids: Vec<u32>,
    node_counts: Vec<usize>,
    edges: [EdgeList; EdgeType::COUNT],
    labels: BatchLabels,
}

impl TryFrom<RawGraphBatch> for GraphBatch {
    type Error = ShapeError;

    fn try_from(raw: RawGraphBatch) -> Result<Self> {
        let batch = GraphBatch::from_parts(
            raw.vocab_ids,
            raw.selectors,
            raw.segment_ids,
            raw.node_counts.len(),
            EdgeType::ALL.into_iter().zip(raw.edges),
            raw.labels,
        )?;
        if let Some((graph, (&expected, &got))) = batch
            .node_counts
            .iter()
            .zip(&raw.node_counts)
            .enumerate()
            .find(|(_, (expected, got))| expected != got)
        {
            return Err(ShapeError::NodeCountMismatch { graph, expected, got });
        }
        Ok(batch)
    }
}

impl GraphBatch {
    /// Build a batch from already flattened arrays.
    ///
    /// Segment ids need not be sorted, but every graph in `0..num_graphs`
    /// must own at least one node and every edge must index a batch node.
    pub fn from_parts(
        vocab_ids: Vec<u32>,
        selectors: Vec<bool>,
        segment_ids: Vec<u32>,
        num_graphs: usize,
        edges: impl IntoIterator<Item = (EdgeType, EdgeList)>,
        labels: BatchLabels,
    ) -> Result<Self> {
        let num_nodes = vocab_ids.len();
        for (what, got) in [("segment ids", segment_ids.len()), ("selectors", selectors.len())] {
            if got != num_nodes {
                return Err(ShapeError::LengthMismatch {
                    what,
                    expected: num_nodes,
                    got,
                });
            }
        }

        let mut node_counts = vec![0usize; num_graphs];
        for (node, &segment) in segment_ids.iter().enumerate() {
            match node_counts.get_mut(segment as usize) {
                Some(count) => *count += 1,
                None => {
                    return Err(ShapeError::SegmentOutOfRange {
                        node,
                        segment,
                        num_graphs,
                    })
                }
            }
        }

        // Lists of a repeated edge type are appended, so edge indices count
        // from the start of the merged list.
        let mut table: [EdgeList; EdgeType::COUNT] = Default::default();
        for (edge_type, list) in edges {
            list.check_lengths()?;
            let offset = table[edge_type.index()].len();
            for (edge, (source, target, _)) in list.iter().enumerate() {
                for node in [source, target] {
                    if node as usize >= num_nodes {
                        return Err(ShapeError::EdgeOutOfRange {
                            graph: None,
                            edge_type,
                            edge: offset + edge,
                            node,
                            num_nodes,
                        });
                    }
                }
            }
            let slot = &mut table[edge_type.index()];
            slot.sources.extend_from_slice(&list.sources);
            slot.targets.extend_from_slice(&list.targets);
            slot.positions.extend_from_slice(&list.positions);
        }

        if let Some(graph) = node_counts.iter().position(|&c| c == 0) {
            return Err(ShapeError::EmptyGraph { graph });
        }
        labels.validate(num_graphs, num_nodes)?;

        Ok(Self {
            vocab_ids,
            selectors,
            segment_ids,
            node_counts,
            edges: table,
            labels,
        })
    }

    pub fn num_graphs(&self) -> usize {
        self.node_counts.len()
    }

    pub fn num_nodes(&self) -> usize {
        self.vocab_ids.len()
    }

    /// Total edges over all types.
    pub fn num_edges(&self) -> usize {
        self.edges.iter().map(EdgeList::len).sum()
    }

    pub fn vocab_ids(&self) -> &[u32] {
        &self.vocab_ids
    }

    pub fn selectors(&self) -> &[bool] {
        &self.selectors
    }

    /// Graph index of every batch node.
    pub fn segment_ids(&self) -> &[u32] {
        &self.segment_ids
    }

    /// Node count of every graph.
    pub fn node_counts(&self) -> &[usize] {
        &self.node_counts
    }

    pub fn edges(&self, edge_type: EdgeType) -> &EdgeList {
        &self.edges[edge_type.index()]
    }

    pub fn labels(&self) -> &BatchLabels {
        &self.labels
    }

    /// Replace the labels, checking row counts against this batch.
    pub fn with_labels(mut self, labels: BatchLabels) -> Result<Self> {
        labels.validate(self.num_graphs(), self.num_nodes())?;
        self.labels = labels;
        Ok(self)
    }
}

/// Packs graphs and their labels into a [`GraphBatch`].
///
/// Assembly is a pure transform: all inputs are validated before any
/// flattened array is built.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchAssembler;

impl BatchAssembler {
    pub fn new() -> Self {
        Self
    }

    /// Assemble graphs with aligned per-graph label records.
    pub fn assemble(&self, graphs: &[Graph], labels: &[GraphLabels]) -> Result<GraphBatch> {
        if labels.len() != graphs.len() {
            return Err(ShapeError::LabelCountMismatch {
                graphs: graphs.len(),
                labels: labels.len(),
            });
        }
        Self::validate_graphs(graphs)?;
        let columns = Self::collect_labels(graphs, labels)?;
        Ok(Self::flatten(graphs, columns))
    }

    /// Assemble graphs for inference, without labels.
    pub fn assemble_unlabeled(&self, graphs: &[Graph]) -> Result<GraphBatch> {
        Self::validate_graphs(graphs)?;
        Ok(Self::flatten(graphs, BatchLabels::new()))
    }

    fn validate_graphs(graphs: &[Graph]) -> Result<()> {
        for (g, graph) in graphs.iter().enumerate() {
            let num_nodes = graph.num_nodes();
            for (edge, e) in graph.edges.iter().enumerate() {
                for node in [e.source, e.target] {
                    if node as usize >= num_nodes {
                        return Err(ShapeError::EdgeOutOfRange {
                            graph: Some(g),
                            edge_type: e.edge_type,
                            edge,
                            node,
                            num_nodes,
                        });
                    }
                }
            }
        }
        if let Some(graph) = graphs.iter().position(|g| g.nodes.is_empty()) {
            return Err(ShapeError::EmptyGraph { graph });
        }
        Ok(())
    }

    fn collect_labels(graphs: &[Graph], labels: &[GraphLabels]) -> Result<BatchLabels> {
        let tasks: BTreeSet<&String> = labels.iter().flat_map(|l| l.keys()).collect();
        let mut out = BatchLabels::new();

        for task in tasks {
            let mut builder = ColumnBuilder::new(task);
            for (g, (graph, record)) in graphs.iter().zip(labels).enumerate() {
                let label = record.get(task).ok_or_else(|| ShapeError::MissingLabels {
                    task: task.clone(),
                    graph: Some(g),
                })?;
                match label {
                    TaskLabel::Graph(l) => {
                        builder.set_level(LabelLevel::Graph, g)?;
                        builder.push(l, g)?;
                    }
                    TaskLabel::Nodes(ls) => {
                        builder.set_level(LabelLevel::Node, g)?;
                        if ls.len() != graph.num_nodes() {
                            return Err(ShapeError::LabelMismatch {
                                task: task.clone(),
                                reason: format!(
                                    "graph {g} has {} nodes but {} node labels",
                                    graph.num_nodes(),
                                    ls.len()
                                ),
                            });
                        }
                        for l in ls {
                            builder.push(l, g)?;
                        }
                    }
                }
            }
            out.insert(task.clone(), builder.finish());
        }
        Ok(out)
    }

    fn flatten(graphs: &[Graph], labels: BatchLabels) -> GraphBatch {
        let total: usize = graphs.iter().map(Graph::num_nodes).sum();
        let mut vocab_ids = Vec::with_capacity(total);
        let mut selectors = Vec::with_capacity(total);
        let mut segment_ids = Vec::with_capacity(total);
        let mut node_counts = Vec::with_capacity(graphs.len());
        let mut edges: [EdgeList; EdgeType::COUNT] = Default::default();

        let mut offset = 0u32;
        for (g, graph) in graphs.iter().enumerate() {
            for node in &graph.nodes {
                vocab_ids.push(node.vocab_id);
                selectors.push(node.selected);
                segment_ids.push(g as u32);
            }
            for e in &graph.edges {
                edges[e.edge_type.index()].push(
                    e.source + offset,
                    e.target + offset,
                    e.position.unwrap_or(0),
                );
            }
            node_counts.push(graph.num_nodes());
            offset += graph.num_nodes() as u32;
        }

        GraphBatch {
            vocab_ids,
            selectors,
            segment_ids,
            node_counts,
            edges,
            labels,
        }
    }
}

/// Accumulates one task's labels, enforcing a single level, kind and width.
struct ColumnBuilder<'a> {
    task: &'a str,
    level: Option<LabelLevel>,
    classes: Vec<u32>,
    values: Vec<f32>,
    kind: Option<(&'static str, usize)>,
}

impl<'a> ColumnBuilder<'a> {
    fn new(task: &'a str) -> Self {
        Self {
            task,
            level: None,
            classes: Vec::new(),
            values: Vec::new(),
            kind: None,
        }
    }

    fn mismatch(&self, reason: String) -> ShapeError {
        ShapeError::LabelMismatch {
            task: self.task.to_string(),
            reason,
        }
    }

    fn set_level(&mut self, level: LabelLevel, graph: usize) -> Result<()> {
        match self.level {
            Some(existing) if existing != level => Err(self.mismatch(format!(
                "graph {graph} gives {level:?}-level labels, earlier graphs gave {existing:?}-level"
            ))),
            _ => {
                self.level = Some(level);
                Ok(())
            }
        }
    }

    fn push(&mut self, label: &Label, graph: usize) -> Result<()> {
        let kind = (label.kind(), label.width());
        match self.kind {
            Some(existing) if existing != kind => {
                return Err(self.mismatch(format!(
                    "graph {graph} gives a {} label of width {}, expected {} of width {}",
                    kind.0, kind.1, existing.0, existing.1
                )))
            }
            None if kind.1 == 0 => return Err(self.mismatch("empty value label".to_string())),
            _ => self.kind = Some(kind),
        }
        match label {
            Label::Class(c) => self.classes.push(*c),
            Label::Values(v) => self.values.extend_from_slice(v),
        }
        Ok(())
    }

    fn finish(self) -> LabelColumn {
        let data = match self.kind {
            Some(("values", width)) => LabelData::Values {
                values: self.values,
                width,
            },
            _ => LabelData::Classes(self.classes),
        };
        LabelColumn {
            level: self.level.unwrap_or(LabelLevel::Graph),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, Node};

    fn chain(n: u32, edge_type: EdgeType) -> Graph {
        let mut g = Graph::new();
        for i in 0..n {
            g.add_node(Node::new(i));
        }
        for i in 1..n {
            g.add_edge(Edge::new(i - 1, i, edge_type));
        }
        g
    }

    fn class_label(task: &str, c: u32) -> GraphLabels {
        GraphLabels::from([(task.to_string(), TaskLabel::Graph(Label::Class(c)))])
    }

    #[test]
    fn offsets_edges_by_preceding_node_counts() {
        let graphs = vec![chain(3, EdgeType::Control), chain(2, EdgeType::Data)];
        let batch = BatchAssembler::new().assemble_unlabeled(&graphs).unwrap();

        assert_eq!(batch.num_graphs(), 2);
        assert_eq!(batch.num_nodes(), 5);
        assert_eq!(batch.segment_ids(), &[0, 0, 0, 1, 1]);
        assert_eq!(batch.node_counts(), &[3, 2]);
        assert_eq!(batch.edges(EdgeType::Control).sources, vec![0, 1]);
        assert_eq!(batch.edges(EdgeType::Data).sources, vec![3]);
        assert_eq!(batch.edges(EdgeType::Data).targets, vec![4]);
        assert!(batch.edges(EdgeType::Call).is_empty());
    }

    #[test]
    fn rejects_label_count_mismatch() {
        let graphs = vec![chain(2, EdgeType::Control), chain(1, EdgeType::Control)];
        let labels = vec![class_label("main", 0)];
        let err = BatchAssembler::new().assemble(&graphs, &labels).unwrap_err();
        assert_eq!(err, ShapeError::LabelCountMismatch { graphs: 2, labels: 1 });
    }

    #[test]
    fn rejects_out_of_range_edge_with_context() {
        let mut g = chain(2, EdgeType::Control);
        g.add_edge(Edge::new(0, 9, EdgeType::Call));
        let err = BatchAssembler::new()
            .assemble_unlabeled(&[chain(1, EdgeType::Data), g])
            .unwrap_err();
        assert_eq!(
            err,
            ShapeError::EdgeOutOfRange {
                graph: Some(1),
                edge_type: EdgeType::Call,
                edge: 1,
                node: 9,
                num_nodes: 2,
            }
        );
    }

    #[test]
    fn rejects_empty_graph() {
        let err = BatchAssembler::new()
            .assemble_unlabeled(&[chain(1, EdgeType::Data), Graph::new()])
            .unwrap_err();
        assert_eq!(err, ShapeError::EmptyGraph { graph: 1 });
    }

    #[test]
    fn collects_graph_and_node_labels() {
        let graphs = vec![chain(2, EdgeType::Control), chain(1, EdgeType::Control)];
        let mut a = class_label("main", 1);
        a.insert(
            "reach".into(),
            TaskLabel::Nodes(vec![Label::Values(vec![1.0]), Label::Values(vec![0.0])]),
        );
        let mut b = class_label("main", 0);
        b.insert("reach".into(), TaskLabel::Nodes(vec![Label::Values(vec![0.5])]));

        let batch = BatchAssembler::new().assemble(&graphs, &[a, b]).unwrap();
        let main = batch.labels().get("main").unwrap();
        assert_eq!(main.level, LabelLevel::Graph);
        assert_eq!(main.data, LabelData::Classes(vec![1, 0]));

        let reach = batch.labels().require("reach").unwrap();
        assert_eq!(reach.level, LabelLevel::Node);
        assert_eq!(
            reach.data,
            LabelData::Values {
                values: vec![1.0, 0.0, 0.5],
                width: 1
            }
        );
    }

    #[test]
    fn rejects_task_missing_on_one_graph() {
        let graphs = vec![chain(1, EdgeType::Control), chain(1, EdgeType::Control)];
        let labels = vec![class_label("main", 0), GraphLabels::new()];
        let err = BatchAssembler::new().assemble(&graphs, &labels).unwrap_err();
        assert_eq!(
            err,
            ShapeError::MissingLabels {
                task: "main".into(),
                graph: Some(1)
            }
        );
    }

    #[test]
    fn rejects_mixed_label_kinds() {
        let graphs = vec![chain(1, EdgeType::Control), chain(1, EdgeType::Control)];
        let labels = vec![
            class_label("main", 0),
            GraphLabels::from([("main".to_string(), TaskLabel::Graph(Label::Values(vec![1.0])))]),
        ];
        let err = BatchAssembler::new().assemble(&graphs, &labels).unwrap_err();
        assert!(matches!(err, ShapeError::LabelMismatch { .. }));
    }

    #[test]
    fn rejects_wrong_node_label_count() {
        let graphs = vec![chain(3, EdgeType::Control)];
        let labels = vec![GraphLabels::from([(
            "main".to_string(),
            TaskLabel::Nodes(vec![Label::Class(0), Label::Class(1)]),
        )])];
        let err = BatchAssembler::new().assemble(&graphs, &labels).unwrap_err();
        assert!(matches!(err, ShapeError::LabelMismatch { .. }));
    }

    #[test]
    fn from_parts_accepts_unsorted_segments() {
        let mut control = EdgeList::new();
        control.push(2, 0, 0);
        let batch = GraphBatch::from_parts(
            vec![5, 6, 7],
            vec![false; 3],
            vec![1, 0, 1],
            2,
            [(EdgeType::Control, control)],
            BatchLabels::new(),
        )
        .unwrap();
        assert_eq!(batch.node_counts(), &[1, 2]);
        assert_eq!(batch.num_edges(), 1);
    }

    #[test]
    fn from_parts_rejects_edge_past_last_node() {
        let mut control = EdgeList::new();
        control.push(0, 5, 0);
        let err = GraphBatch::from_parts(
            vec![1, 2, 3, 4],
            vec![false; 4],
            vec![0, 0, 0, 1],
            2,
            [(EdgeType::Control, control)],
            BatchLabels::new(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ShapeError::EdgeOutOfRange {
                graph: None,
                edge_type: EdgeType::Control,
                edge: 0,
                node: 5,
                num_nodes: 4,
            }
        );
    }

    #[test]
    fn repeated_edge_type_reports_merged_edge_index() {
        let mut first = EdgeList::new();
        first.push(0, 1, 0);
        first.push(1, 2, 0);
        let mut second = EdgeList::new();
        second.push(2, 7, 0);
        let err = GraphBatch::from_parts(
            vec![1, 2, 3],
            vec![false; 3],
            vec![0; 3],
            1,
            [(EdgeType::Control, first), (EdgeType::Control, second)],
            BatchLabels::new(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ShapeError::EdgeOutOfRange {
                graph: None,
                edge_type: EdgeType::Control,
                edge: 2,
                node: 7,
                num_nodes: 3,
            }
        );
    }

    #[test]
    fn deserialized_batch_is_validated() {
        let graphs = vec![chain(2, EdgeType::Control), chain(2, EdgeType::Data)];
        let batch = BatchAssembler::new().assemble_unlabeled(&graphs).unwrap();
        let json = serde_json::to_string(&batch).unwrap();
        assert_eq!(serde_json::from_str::<GraphBatch>(&json).unwrap(), batch);

        let mut corrupt: serde_json::Value = serde_json::from_str(&json).unwrap();
        corrupt["edges"][0]["targets"][0] = serde_json::json!(5);
        let err = serde_json::from_value::<GraphBatch>(corrupt).unwrap_err();
        assert!(err.to_string().contains("references node 5"), "{err}");

        let mut miscounted: serde_json::Value = serde_json::from_str(&json).unwrap();
        miscounted["node_counts"] = serde_json::json!([3, 1]);
        let err = serde_json::from_value::<GraphBatch>(miscounted).unwrap_err();
        assert!(err.to_string().contains("graph 0 should hold 2 nodes"), "{err}");
    }

    #[test]
    fn from_parts_checks_label_rows() {
        let mut labels = BatchLabels::new();
        labels.insert(
            "main",
            LabelColumn {
                level: LabelLevel::Node,
                data: LabelData::Classes(vec![0]),
            },
        );
        let err = GraphBatch::from_parts(vec![1, 2], vec![false; 2], vec![0, 0], 1, Vec::new(), labels)
            .unwrap_err();
        assert!(matches!(err, ShapeError::LabelMismatch { .. }));
    }
}

//! Property-based tests for ragged batch assembly.
//!
//! For any list of well-formed graphs the assembler must:
//! - preserve node and edge counts
//! - keep segment ids non-decreasing and aligned with node counts
//! - rebase every edge into its own graph's node range
//! - reject any edge that escapes its graph

use ggnn_core::{BatchAssembler, Edge, EdgeType, Graph, Node, ShapeError};
use proptest::prelude::*;

fn arb_edge_type() -> impl Strategy<Value = EdgeType> {
    prop_oneof![Just(EdgeType::Control), Just(EdgeType::Data), Just(EdgeType::Call)]
}

/// A graph with 1..8 nodes and up to 12 in-range edges.
fn arb_graph() -> impl Strategy<Value = Graph> {
    (1usize..8).prop_flat_map(|n| {
        let nodes = prop::collection::vec(0u32..50, n);
        let edges = prop::collection::vec(
            (0..n as u32, 0..n as u32, arb_edge_type(), prop::option::of(0u32..4)),
            0..12,
        );
        (nodes, edges).prop_map(|(ids, edges)| {
            let nodes = ids.into_iter().map(Node::new).collect();
            let edges = edges
                .into_iter()
                .map(|(s, t, ty, pos)| Edge {
                    source: s,
                    target: t,
                    edge_type: ty,
                    position: pos,
                })
                .collect();
            Graph::from_parts(nodes, edges)
        })
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn counts_are_preserved(graphs in prop::collection::vec(arb_graph(), 1..6)) {
        let batch = BatchAssembler::new().assemble_unlabeled(&graphs).unwrap();

        let nodes: usize = graphs.iter().map(Graph::num_nodes).sum();
        let edges: usize = graphs.iter().map(Graph::num_edges).sum();
        prop_assert_eq!(batch.num_graphs(), graphs.len());
        prop_assert_eq!(batch.num_nodes(), nodes);
        prop_assert_eq!(batch.num_edges(), edges);
        for ty in EdgeType::ALL {
            let expected: usize = graphs.iter().map(|g| g.num_edges_of(ty)).sum();
            prop_assert_eq!(batch.edges(ty).len(), expected);
        }
    }

    #[test]
    fn segments_are_contiguous_and_sorted(graphs in prop::collection::vec(arb_graph(), 1..6)) {
        let batch = BatchAssembler::new().assemble_unlabeled(&graphs).unwrap();
        let segments = batch.segment_ids();

        prop_assert!(segments.windows(2).all(|w| w[0] <= w[1]));
        for (g, graph) in graphs.iter().enumerate() {
            let owned = segments.iter().filter(|&&s| s as usize == g).count();
            prop_assert_eq!(owned, graph.num_nodes());
            prop_assert_eq!(batch.node_counts()[g], graph.num_nodes());
        }
    }

    #[test]
    fn edges_stay_inside_their_graph(graphs in prop::collection::vec(arb_graph(), 1..6)) {
        let batch = BatchAssembler::new().assemble_unlabeled(&graphs).unwrap();
        let segments = batch.segment_ids();

        for ty in EdgeType::ALL {
            for (s, t, _) in batch.edges(ty).iter() {
                prop_assert!((s as usize) < batch.num_nodes());
                prop_assert!((t as usize) < batch.num_nodes());
                prop_assert_eq!(segments[s as usize], segments[t as usize]);
            }
        }
    }

    #[test]
    fn escaping_edge_is_rejected(
        graphs in prop::collection::vec(arb_graph(), 1..6),
        pick in any::<prop::sample::Index>(),
        overshoot in 0u32..5,
    ) {
        let mut graphs = graphs;
        let g = pick.index(graphs.len());
        let n = graphs[g].num_nodes() as u32;
        let bad = graphs[g].num_edges();
        graphs[g].add_edge(Edge::new(0, n + overshoot, EdgeType::Data));

        let err = BatchAssembler::new().assemble_unlabeled(&graphs).unwrap_err();
        prop_assert_eq!(
            err,
            ShapeError::EdgeOutOfRange {
                graph: Some(g),
                edge_type: EdgeType::Data,
                edge: bad,
                node: n + overshoot,
                num_nodes: n as usize,
            }
        );
    }
}

#[test]
fn graph_without_edges_is_valid() {
    let mut g = Graph::new();
    g.add_node(Node::new(0));
    let batch = BatchAssembler::new().assemble_unlabeled(&[g]).unwrap();
    for ty in EdgeType::ALL {
        assert!(batch.edges(ty).is_empty());
    }
}

use proptest::prelude::*;

use texture_node_graph::{
    GpuBackend, GraphError, NodeGraph, NodeId, TextureNode, ValidatingBackend, generate_program,
};

/// Random DAG: edges only run from lower to higher node index.
fn dag() -> impl Strategy<Value = (Vec<TextureNode>, Vec<(usize, usize, usize, usize)>)> {
    (1usize..10).prop_flat_map(|n| {
        let kinds = prop::collection::vec(prop::sample::select(TextureNode::ALL.to_vec()), n);
        let edges = prop::collection::vec((0..n, 0..n, 0usize..3, 0usize..3), 0..(n * 2));
        (kinds, edges)
    })
}

fn build(kinds: &[TextureNode], edges: &[(usize, usize, usize, usize)]) -> NodeGraph<TextureNode> {
    let mut g = NodeGraph::new();
    let ids: Vec<NodeId> = kinds.iter().map(|k| g.create(*k)).collect();
    for &(a, b, out, input) in edges {
        if a >= b {
            continue;
        }
        // Out-of-range sockets and occupied inputs are rejected; skip them.
        let _ = g.connect(ids[a], out, ids[b], input);
    }
    g
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn order_respects_every_connection((kinds, edges) in dag()) {
        let mut g = build(&kinds, &edges);
        let order = g.evaluation_order().unwrap().to_vec();

        prop_assert_eq!(order.len(), kinds.len());
        let mut position = vec![usize::MAX; kinds.len()];
        for (i, id) in order.iter().enumerate() {
            prop_assert_eq!(position[id.index()], usize::MAX, "node listed twice");
            position[id.index()] = i;
        }
        for c in g.connections() {
            prop_assert!(position[c.source.index()] < position[c.destination.index()]);
        }
    }

    #[test]
    fn every_generated_program_validates((kinds, edges) in dag()) {
        let mut g = build(&kinds, &edges);
        let program = generate_program(&mut g).unwrap();
        let mut backend = ValidatingBackend::new();
        if let Err(e) = backend.compile_program(&program.source) {
            panic!("{e:#}\n{}", program.source);
        }
    }
}

#[test]
fn back_edge_reports_the_cycle() {
    let mut g = NodeGraph::new();
    let a = g.create(TextureNode::Mix);
    let b = g.create(TextureNode::Blend);
    let c = g.create(TextureNode::Mix);
    let free = g.create(TextureNode::Color);
    g.connect(a, 0, b, 0).unwrap();
    g.connect(b, 0, c, 0).unwrap();
    g.connect(c, 0, a, 1).unwrap();
    g.connect(free, 0, c, 1).unwrap();

    let Err(GraphError::CycleDetected(stuck)) = g.evaluation_order().map(|o| o.to_vec()) else {
        panic!("expected a cycle");
    };
    assert_eq!(stuck, vec![a, b, c]);
}

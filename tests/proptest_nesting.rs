//! Property-based tests over arbitrary trees of nested units of work.
//!
//! Each tree node is one `transaction` call. A node may fail after running
//! its children, and a parent may either swallow or propagate a child's
//! failure. The engine calls recorded for the run must match the calls a
//! straightforward model of scoping predicts.
#![allow(missing_docs)]
mod common;

use common::{Event, RecordingEngine};
use proptest::prelude::*;
use signet_docenv::{EngineError, Environment};

#[derive(Debug, Clone)]
struct Node {
    fail: bool,
    /// Whether the parent swallows this node's failure.
    caught: bool,
    children: Vec<Node>,
}

#[derive(Debug, PartialEq, Eq)]
enum Failure {
    Node,
    Engine(EngineError),
}

impl From<EngineError> for Failure {
    fn from(err: EngineError) -> Self {
        Self::Engine(err)
    }
}

/// Strategy for trees up to 4 levels deep with at most 4 children per node.
fn arb_tree() -> impl Strategy<Value = Node> {
    let leaf = (any::<bool>(), any::<bool>()).prop_map(|(fail, caught)| Node {
        fail,
        caught,
        children: vec![],
    });
    leaf.prop_recursive(4, 32, 4, |inner| {
        (any::<bool>(), any::<bool>(), prop::collection::vec(inner, 0..4))
            .prop_map(|(fail, caught, children)| Node { fail, caught, children })
    })
}

fn run(env: &Environment<RecordingEngine>, node: &Node) -> Result<(), Failure> {
    env.transaction(|_| {
        for child in &node.children {
            let res = run(env, child);
            if res.is_err() && !child.caught {
                return res;
            }
        }
        if node.fail { Err(Failure::Node) } else { Ok(()) }
    })
}

fn model(node: &Node, parent: Option<u64>, next: &mut u64, events: &mut Vec<Event>) -> bool {
    let txn = *next;
    *next += 1;
    events.push(Event::Begin { txn, parent });

    for child in &node.children {
        if !model(child, Some(txn), next, events) && !child.caught {
            events.push(Event::Abort(txn));
            return false;
        }
    }
    events.push(if node.fail { Event::Abort(txn) } else { Event::Commit(txn) });
    !node.fail
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Engine calls follow the scoping model, and no transaction stays
    /// current afterwards.
    #[test]
    fn nesting_matches_model(tree in arb_tree()) {
        let engine = RecordingEngine::new();
        let env = engine.opened();

        let res = run(&env, &tree);

        // the environment handle takes native handle 1
        let mut expected = vec![];
        let ok = model(&tree, None, &mut 2, &mut expected);

        prop_assert_eq!(res.is_ok(), ok);
        prop_assert_eq!(engine.txn_events(), expected);
        prop_assert!(env.current_transaction().is_none());
    }

    /// Every begun transaction is finished exactly once, children before
    /// parents.
    #[test]
    fn every_transaction_finishes_once(tree in arb_tree()) {
        let engine = RecordingEngine::new();
        let env = engine.opened();
        let _ = run(&env, &tree);

        let mut open: Vec<u64> = vec![];
        for event in engine.txn_events() {
            match event {
                Event::Begin { txn, parent } => {
                    prop_assert_eq!(parent, open.last().copied());
                    open.push(txn);
                }
                Event::Commit(txn) | Event::Abort(txn) => {
                    prop_assert_eq!(open.pop(), Some(txn));
                }
                _ => {}
            }
        }
        prop_assert!(open.is_empty());
    }
}

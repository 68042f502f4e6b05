//! Property tests for the pure pieces: graph construction, variable
//! expansion and socket-path derivation.

use std::collections::HashSet;

use proptest::prelude::*;

use dagrun::dag::{env, ExecutionGraph, Step};

/// Strategy for an acyclic step list: step `i` may only depend on steps
/// with a smaller index.
fn acyclic_steps(max_steps: usize) -> impl Strategy<Value = Vec<Step>> {
    (1..=max_steps).prop_flat_map(|n| {
        proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..n), n).prop_map(
            move |raw_deps| {
                raw_deps
                    .into_iter()
                    .enumerate()
                    .map(|(i, potential)| {
                        let mut step = Step::new(format!("step_{i}"), "true");
                        let mut deps = HashSet::new();
                        for d in potential {
                            if i > 0 {
                                deps.insert(d % i);
                            }
                        }
                        step.depends = deps.into_iter().map(|d| format!("step_{d}")).collect();
                        step
                    })
                    .collect()
            },
        )
    })
}

proptest! {
    #[test]
    fn forward_only_dependencies_always_construct(steps in acyclic_steps(12)) {
        let count = steps.len();
        let graph = ExecutionGraph::new(steps).expect("acyclic input must be accepted");
        prop_assert_eq!(graph.nodes().len(), count);
        prop_assert!(!graph.is_finished() || count == 0);
    }

    #[test]
    fn expansion_is_identity_without_dollar_signs(input in "[a-zA-Z0-9 ./_-]{0,64}") {
        let vars = std::collections::HashMap::new();
        prop_assert_eq!(env::expand(&input, &vars, &[]), input);
    }

    #[test]
    fn expansion_never_panics(input in ".{0,128}", value in "[a-z]{0,16}") {
        let mut vars = std::collections::HashMap::new();
        vars.insert("X".to_string(), value);
        let params = vec!["p1".to_string(), "p2".to_string()];
        let _ = env::expand(&input, &vars, &params);
    }

    #[test]
    fn socket_paths_fit_the_sun_path_budget(name in ".{1,200}") {
        let path = dagrun::sock::socket_path(&name);
        let stem = path.file_stem().unwrap().to_string_lossy().into_owned();
        prop_assert!(stem.len() <= 50, "stem too long: {}", stem);
        prop_assert_eq!(path.clone(), dagrun::sock::socket_path(&name));
    }
}

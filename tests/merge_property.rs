//! Property: collector spec merging is idempotent for every variant mix.

use proptest::prelude::*;

use periscope::collect::merge_collect_specs;
use periscope::core::spec::types::{
    ClusterInfoCollect, ClusterResourcesCollect, Collect, DataCollect, LogsCollect, SecretCollect,
};

fn namespace_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(
        prop::sample::select(vec![
            "a".to_string(),
            "b".to_string(),
            "demo".to_string(),
            "kube-system".to_string(),
        ]),
        0..3,
    )
}

fn collect_strategy() -> impl Strategy<Value = Collect> {
    prop_oneof![
        Just(Collect::ClusterInfo(ClusterInfoCollect::default())),
        namespace_strategy().prop_map(|namespaces| {
            Collect::ClusterResources(ClusterResourcesCollect {
                namespaces,
                ..ClusterResourcesCollect::default()
            })
        }),
        (
            prop::sample::select(vec!["demo".to_string(), "prod".to_string()]),
            prop::sample::select(vec!["app=web".to_string(), "app=api".to_string()]),
        )
            .prop_map(|(namespace, selector)| {
                Collect::Logs(LogsCollect {
                    namespace: Some(namespace),
                    selector: vec![selector],
                    ..LogsCollect::default()
                })
            }),
        prop::sample::select(vec!["alpha".to_string(), "beta".to_string()]).prop_map(|name| {
            Collect::Data(DataCollect {
                name: format!("{name}.txt"),
                data: name,
                ..DataCollect::default()
            })
        }),
        prop::sample::select(vec!["db".to_string(), "api".to_string()]).prop_map(|name| {
            Collect::Secret(SecretCollect {
                name,
                namespace: Some("demo".to_string()),
                ..SecretCollect::default()
            })
        }),
    ]
}

proptest! {
    /// merge(merge(xs)) == merge(xs)
    #[test]
    fn merge_is_idempotent(specs in prop::collection::vec(collect_strategy(), 0..12)) {
        let once = merge_collect_specs(&specs);
        let twice = merge_collect_specs(&once);
        prop_assert_eq!(once, twice);
    }

    /// Merging always yields the forced collectors exactly once.
    #[test]
    fn merge_forces_cluster_info_and_resources(specs in prop::collection::vec(collect_strategy(), 0..12)) {
        let merged = merge_collect_specs(&specs);
        let info_count = merged.iter().filter(|c| matches!(c, Collect::ClusterInfo(_))).count();
        prop_assert_eq!(info_count, 1);
        let has_resources = merged.iter().any(|c| matches!(c, Collect::ClusterResources(_)));
        prop_assert!(has_resources);
        prop_assert!(matches!(merged[0], Collect::ClusterResources(_)));
    }

    /// No two surviving clusterResources entries cover the same namespace set.
    #[test]
    fn merged_cluster_resources_have_distinct_namespace_sets(
        specs in prop::collection::vec(collect_strategy(), 0..12)
    ) {
        let merged = merge_collect_specs(&specs);
        let mut sets = std::collections::HashSet::new();
        for spec in &merged {
            if let Collect::ClusterResources(cr) = spec {
                let set: std::collections::BTreeSet<_> = cr.namespaces.iter().cloned().collect();
                prop_assert!(sets.insert(set), "duplicate namespace coverage survived merge");
            }
        }
    }
}

//! Change-driven test selection and prioritization.

use super::graph::TargetGraph;
use super::map::DynamicDependencyMap;
use super::source::{ChangeDependencyList, SourceDependency};
use crate::policy::TestPrioritizationPolicy;
use crate::target::{BuildTargetId, ProductionTargetId, TestTarget, TestTargetId};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Selected test targets and the production targets that caused each selection.
type Selection = BTreeMap<TestTargetId, BTreeSet<ProductionTargetId>>;

/// Selects the test targets affected by a resolved change list.
pub struct TestSelectorAndPrioritizer {
    graph: TargetGraph,
}

impl TestSelectorAndPrioritizer {
    pub fn new(graph: TargetGraph) -> Self {
        Self { graph }
    }

    /// Selects and orders the test targets to run for the given changes.
    ///
    /// Test targets not returned are the discarded set.
    pub fn select_test_targets<'a>(
        &self,
        map: &'a DynamicDependencyMap,
        changes: &ChangeDependencyList,
        prioritization: TestPrioritizationPolicy,
    ) -> Vec<&'a TestTarget> {
        let mut selection = Selection::new();
        for dependency in changes.created() {
            select_created(map, dependency, &mut selection);
        }
        for dependency in changes.updated() {
            select_updated(dependency, &mut selection);
        }
        for dependency in changes.deleted() {
            select_covering(dependency, &BTreeSet::new(), &mut selection);
        }

        let ordered = self.prioritize(map, selection, prioritization);
        debug!(selected = ordered.len(), ?prioritization, "selected test targets");
        ordered
    }

    fn prioritize<'a>(
        &self,
        map: &'a DynamicDependencyMap,
        selection: Selection,
        prioritization: TestPrioritizationPolicy,
    ) -> Vec<&'a TestTarget> {
        let mut ranked: Vec<(&TestTarget, Option<usize>)> = selection
            .into_iter()
            .filter_map(|(id, dependers)| {
                let test = map.test_targets().by_id(id)?;
                let distance = match prioritization {
                    TestPrioritizationPolicy::None => None,
                    TestPrioritizationPolicy::DependencyLocality => dependers
                        .iter()
                        .filter_map(|depender| map.production_targets().by_id(*depender))
                        .filter_map(|production| self.graph.distance(test.name(), production.name()))
                        .min(),
                };
                Some((test, distance))
            })
            .collect();

        // Stable sort keeps declaration order among equal and unknown distances.
        ranked.sort_by_key(|(_, distance)| distance.unwrap_or(usize::MAX));
        ranked.into_iter().map(|(test, _)| test).collect()
    }
}

impl Default for TestSelectorAndPrioritizer {
    fn default() -> Self {
        Self::new(TargetGraph::new())
    }
}

fn production_parents(dependency: &SourceDependency) -> BTreeSet<ProductionTargetId> {
    dependency
        .parent_targets()
        .iter()
        .filter_map(|id| match id {
            BuildTargetId::Production(production) => Some(*production),
            BuildTargetId::Test(_) => None,
        })
        .collect()
}

fn select_parent_tests(dependency: &SourceDependency, selection: &mut Selection) {
    for test in dependency.parent_test_targets() {
        selection.entry(test).or_default();
    }
}

fn select_covering(
    dependency: &SourceDependency,
    dependers: &BTreeSet<ProductionTargetId>,
    selection: &mut Selection,
) {
    for test in dependency.covering_test_targets() {
        selection
            .entry(*test)
            .or_default()
            .extend(dependers.iter().copied());
    }
}

fn select_created(map: &DynamicDependencyMap, dependency: &SourceDependency, selection: &mut Selection) {
    select_parent_tests(dependency, selection);
    for production_id in production_parents(dependency) {
        let Some(production) = map.production_targets().by_id(production_id) else {
            continue;
        };
        for test in map.covering_test_targets_for_production_target(production) {
            selection.entry(test.id()).or_default().insert(production_id);
        }
    }
}

fn select_updated(dependency: &SourceDependency, selection: &mut Selection) {
    if dependency.num_parent_targets() == 0 {
        select_covering(dependency, &BTreeSet::new(), selection);
        return;
    }
    select_parent_tests(dependency, selection);
    if dependency.num_covering_test_targets() > 0 {
        select_covering(dependency, &production_parents(dependency), selection);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::dependency::{ChangeList, SourceCoveringTestsList};
    use crate::normalize::RepoPath;
    use crate::target::descriptor::{BuildTargetDescriptor, ProductionTargetDescriptor, TestTargetDescriptor};

    fn path(p: &str) -> RepoPath {
        RepoPath::new(p).unwrap()
    }

    fn production(name: &str, sources: &[&str]) -> ProductionTargetDescriptor {
        BuildTargetDescriptor::new(name)
            .with_sources(sources.iter().map(|s| path(s)))
            .into()
    }

    fn test(name: &str, sources: &[&str]) -> TestTargetDescriptor {
        BuildTargetDescriptor::new(name)
            .with_sources(sources.iter().map(|s| path(s)))
            .into()
    }

    /// Core: core.cpp, Render: render.cpp, plus tests with their own sources.
    /// Core.Tests covers core.cpp, Render.Tests covers render.cpp and core.cpp.
    fn fixture() -> DynamicDependencyMap {
        let mut map = DynamicDependencyMap::new(
            vec![
                production("Core", &["core.cpp", "core_new.cpp"]),
                production("Render", &["render.cpp"]),
            ],
            vec![
                test("Render.Tests", &["render_test.cpp"]),
                test("Core.Tests", &["core_test.cpp"]),
                test("Idle.Tests", &["idle_test.cpp"]),
            ],
        )
        .unwrap();
        let mut coverage = SourceCoveringTestsList::new();
        coverage.insert(path("core.cpp"), ["Core.Tests", "Render.Tests"]);
        coverage.insert(path("render.cpp"), ["Render.Tests"]);
        coverage.insert(path("orphan.cpp"), ["Idle.Tests"]);
        map.replace_source_coverage(&coverage).unwrap();
        map
    }

    fn select(
        selector: &TestSelectorAndPrioritizer,
        map: &mut DynamicDependencyMap,
        change_list: ChangeList,
        prioritization: TestPrioritizationPolicy,
    ) -> Vec<String> {
        let resolved = map.apply_and_resolve_change_list(&change_list).unwrap();
        selector
            .select_test_targets(map, &resolved, prioritization)
            .iter()
            .map(|t| t.name().to_string())
            .collect()
    }

    #[test]
    fn updated_covered_source_selects_covering_tests_in_declaration_order() {
        let mut map = fixture();
        let names = select(
            &TestSelectorAndPrioritizer::default(),
            &mut map,
            ChangeList::from_strs(&[], &["core.cpp"], &[]).unwrap(),
            TestPrioritizationPolicy::None,
        );
        assert_eq!(names, vec!["Render.Tests", "Core.Tests"]);
    }

    #[test]
    fn updated_uncovered_production_source_selects_nothing() {
        let mut map = fixture();
        let mut coverage = SourceCoveringTestsList::new();
        coverage.insert_uncovered(path("render.cpp"));
        map.replace_source_coverage(&coverage).unwrap();

        let names = select(
            &TestSelectorAndPrioritizer::default(),
            &mut map,
            ChangeList::from_strs(&[], &["render.cpp"], &[]).unwrap(),
            TestPrioritizationPolicy::None,
        );
        assert!(names.is_empty());
    }

    #[test]
    fn updated_test_source_selects_its_target() {
        let mut map = fixture();
        let names = select(
            &TestSelectorAndPrioritizer::default(),
            &mut map,
            ChangeList::from_strs(&[], &["idle_test.cpp"], &[]).unwrap(),
            TestPrioritizationPolicy::None,
        );
        assert_eq!(names, vec!["Idle.Tests"]);
    }

    #[test]
    fn created_production_source_selects_tests_covering_the_target() {
        let mut map = fixture();
        let names = select(
            &TestSelectorAndPrioritizer::default(),
            &mut map,
            ChangeList::from_strs(&["core_new.cpp"], &[], &[]).unwrap(),
            TestPrioritizationPolicy::None,
        );
        assert_eq!(names, vec!["Render.Tests", "Core.Tests"]);
    }

    #[test]
    fn deleted_and_updated_orphans_select_covering_tests() {
        let mut map = fixture();
        let names = select(
            &TestSelectorAndPrioritizer::default(),
            &mut map,
            ChangeList::from_strs(&[], &[], &["orphan.cpp"]).unwrap(),
            TestPrioritizationPolicy::None,
        );
        assert_eq!(names, vec!["Idle.Tests"]);
    }

    #[test]
    fn unknown_source_selects_nothing() {
        let mut map = fixture();
        let names = select(
            &TestSelectorAndPrioritizer::default(),
            &mut map,
            ChangeList::from_strs(&[], &["README.md"], &[]).unwrap(),
            TestPrioritizationPolicy::None,
        );
        assert!(names.is_empty());
    }

    #[test]
    fn selection_is_deduplicated() {
        let mut map = fixture();
        let names = select(
            &TestSelectorAndPrioritizer::default(),
            &mut map,
            ChangeList::from_strs(&[], &["core.cpp", "render.cpp"], &[]).unwrap(),
            TestPrioritizationPolicy::None,
        );
        assert_eq!(names, vec!["Render.Tests", "Core.Tests"]);
    }

    #[test]
    fn dependency_locality_orders_closest_first() {
        let graph = TargetGraph::from_edges([
            ("Core.Tests", "Core"),
            ("Render.Tests", "Render"),
            ("Render", "Core"),
        ])
        .unwrap();
        let selector = TestSelectorAndPrioritizer::new(graph);
        let mut map = fixture();
        let names = select(
            &selector,
            &mut map,
            ChangeList::from_strs(&[], &["core.cpp"], &[]).unwrap(),
            TestPrioritizationPolicy::DependencyLocality,
        );
        assert_eq!(names, vec!["Core.Tests", "Render.Tests"]);
    }

    #[test]
    fn dependency_locality_without_graph_is_declaration_order() {
        let mut map = fixture();
        let names = select(
            &TestSelectorAndPrioritizer::default(),
            &mut map,
            ChangeList::from_strs(&[], &["core.cpp"], &[]).unwrap(),
            TestPrioritizationPolicy::DependencyLocality,
        );
        assert_eq!(names, vec!["Render.Tests", "Core.Tests"]);
    }
}

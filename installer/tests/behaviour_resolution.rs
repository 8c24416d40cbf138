//! Behaviour tests for concurrent latest-release resolution.

use km_installer::resolver::{
    RepositoryId, RepositoryRef, RepositorySet, Resolution, resolve,
};
use km_installer::test_utils::StubReleaseIndex;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

#[derive(Default)]
struct ResolutionWorld {
    index: StubReleaseIndex,
    repositories: RepositorySet,
    resolution: Option<Resolution>,
    resolved: Option<RepositorySet>,
}

#[fixture]
fn world() -> ResolutionWorld {
    ResolutionWorld::default()
}

fn parse_id(full_name: &str) -> RepositoryId {
    let (owner, name) = full_name
        .split_once('/')
        .unwrap_or_else(|| panic!("repository must be owner/name, got {full_name}"));
    RepositoryId::new(owner, name)
}

fn request(world: &mut ResolutionWorld, id: &RepositoryId) {
    world.repositories.insert(RepositoryRef {
        id: id.clone(),
        pinned_version: None,
    });
}

#[given("the release index publishes \"{repository}\" at \"{tag}\"")]
fn given_published(world: &mut ResolutionWorld, repository: String, tag: String) {
    let id = parse_id(&repository);
    world.index = std::mem::take(&mut world.index).with_release(&id.owner, &id.name, &tag, &[]);
    request(world, &id);
}

#[given("the release index fails for \"{repository}\" with \"{reason}\"")]
fn given_failing(world: &mut ResolutionWorld, repository: String, reason: String) {
    let id = parse_id(&repository);
    world.index = std::mem::take(&mut world.index).with_failure(&id.owner, &id.name, &reason);
    request(world, &id);
}

#[given("no repositories are requested")]
fn given_nothing_requested(world: &mut ResolutionWorld) {
    world.repositories = RepositorySet::new();
}

#[when("the repositories are resolved")]
fn when_resolved(world: &mut ResolutionWorld) {
    let resolution = resolve(&world.repositories, &world.index);
    world.resolved = Some(resolution.apply_to(&world.repositories));
    world.resolution = Some(resolution);
}

#[then("\"{repository}\" resolves to \"{tag}\"")]
fn then_resolves_to(world: &mut ResolutionWorld, repository: String, tag: String) {
    let id = parse_id(&repository);
    let resolved = world.resolved.as_ref().expect("resolved set");
    let entry = resolved
        .get(&id)
        .unwrap_or_else(|| panic!("{repository} missing from resolved set"));
    assert_eq!(entry.pinned_version.as_deref(), Some(tag.as_str()));
}

#[then("\"{repository}\" is left out of the resolved set")]
fn then_left_out(world: &mut ResolutionWorld, repository: String) {
    let id = parse_id(&repository);
    let resolved = world.resolved.as_ref().expect("resolved set");
    assert!(resolved.get(&id).is_none(), "{repository} should be dropped");
    let resolution = world.resolution.as_ref().expect("resolution");
    assert!(
        matches!(resolution.outcome(&id), Some(Err(_))),
        "{repository} should record its failure"
    );
}

#[then("{count} lookups were made")]
fn then_lookups_made(world: &mut ResolutionWorld, count: usize) {
    assert_eq!(world.index.query_count(), count);
    let resolution = world.resolution.as_ref().expect("resolution");
    assert_eq!(resolution.tasks_launched(), count);
}

#[then("{count} repository failed to resolve")]
fn then_failures(world: &mut ResolutionWorld, count: usize) {
    let resolution = world.resolution.as_ref().expect("resolution");
    assert_eq!(resolution.failures().len(), count);
}

#[then("the resolved set is empty")]
fn then_resolved_empty(world: &mut ResolutionWorld) {
    let resolved = world.resolved.as_ref().expect("resolved set");
    assert!(resolved.is_empty());
}

#[then("the release index was never queried")]
fn then_never_queried(world: &mut ResolutionWorld) {
    assert_eq!(world.index.query_count(), 0);
    let resolution = world.resolution.as_ref().expect("resolution");
    assert_eq!(resolution.tasks_launched(), 0);
}

#[scenario(
    path = "tests/features/release_resolution.feature",
    name = "Latest tags are attached to every repository"
)]
fn scenario_latest_tags(world: ResolutionWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/release_resolution.feature",
    name = "A failing lookup drops only that repository"
)]
fn scenario_partial_failure(world: ResolutionWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/release_resolution.feature",
    name = "Every lookup fails"
)]
fn scenario_all_fail(world: ResolutionWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/release_resolution.feature",
    name = "Nothing to resolve"
)]
fn scenario_nothing_to_resolve(world: ResolutionWorld) {
    let _ = world;
}

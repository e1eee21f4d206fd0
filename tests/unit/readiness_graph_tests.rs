use crate::support::config::{stack_from_yaml, test_stack};
use launchpad::config::stack::{Tier, Variant};
use launchpad::error::StructuralError;
use launchpad::readiness::{DependencyGraph, ProfileResolver};

#[test]
fn profiles_nest_and_pull_in_dependencies() {
    let resolver = ProfileResolver::new(&test_stack());

    let names = |profile: &str| -> Vec<String> {
        resolver
            .resolve(profile)
            .expect("profile resolves")
            .into_iter()
            .map(|service| service.name)
            .collect()
    };

    assert_eq!(names("minimal"), vec!["postgres", "project-service"]);

    let core = names("core");
    assert_eq!(
        core,
        vec![
            "postgres",
            "neo4j",
            "weaviate",
            "project-service",
            "backend",
            "frontend"
        ]
    );

    let full = names("full");
    assert_eq!(full.len(), 9);
    for service in &core {
        assert!(full.contains(service), "full is missing {service}");
    }
}

#[test]
fn unknown_profile_is_structural() {
    let resolver = ProfileResolver::new(&test_stack());
    let err = resolver.resolve("turbo").expect_err("turbo is not declared");
    assert_eq!(
        err,
        StructuralError::UnknownProfile {
            profile: "turbo".to_string()
        }
    );
}

#[test]
fn full_profile_covers_every_declared_service() {
    let resolver = ProfileResolver::new(&test_stack());
    let plan = resolver
        .plan("full", Variant::Release)
        .expect("full resolves");
    assert_eq!(plan.len(), 9);
}

#[test]
fn application_waves_follow_intra_tier_dependencies() {
    let resolver = ProfileResolver::new(&test_stack());
    let plan = resolver.plan("full", Variant::Dev).expect("full resolves");

    let infra = plan.waves(Tier::Infrastructure);
    assert_eq!(infra.len(), 1, "infrastructure has no internal dependencies");
    assert_eq!(infra[0].len(), 4);

    let apps: Vec<Vec<&str>> = plan
        .waves(Tier::Application)
        .into_iter()
        .map(|wave| wave.into_iter().map(|service| service.name()).collect())
        .collect();
    assert_eq!(
        apps,
        vec![
            vec!["project-service", "backend", "document-parser"],
            vec!["reporting-service", "frontend"],
        ]
    );
    assert!(plan
        .services
        .iter()
        .all(|service| service.variant == Variant::Dev));
}

#[test]
fn dependency_cycle_names_only_the_services_in_the_cycle() {
    let stack = stack_from_yaml(
        r#"
api_version: v1
services:
  - name: db
    tier: infrastructure
    image: postgres
  - name: api
    tier: application
    image: api
    depends_on: [db, worker]
  - name: worker
    tier: application
    image: worker
    depends_on: [api]
  - name: ui
    tier: application
    image: ui
    depends_on: [api]
profiles:
  - name: everything
    services: [ui]
"#,
    );
    let resolver = ProfileResolver::new(&stack);

    match resolver.resolve("everything") {
        Err(StructuralError::CyclicDependency { services }) => {
            assert_eq!(services, vec!["api".to_string(), "worker".to_string()]);
        }
        other => panic!("expected a cycle, got {other:?}"),
    }
}

#[test]
fn undeclared_dependency_names_the_dependent() {
    let stack = stack_from_yaml(
        r#"
api_version: v1
services:
  - name: api
    tier: application
    image: api
    depends_on: [cache]
profiles:
  - name: only-api
    services: [api]
"#,
    );
    let graph = DependencyGraph::build(&stack);
    let err = graph.full_order().expect_err("cache is undeclared");
    assert_eq!(
        err,
        StructuralError::MissingDependency {
            service: "api".to_string(),
            dependency: "cache".to_string()
        }
    );
}

use launchpad::config::stack::{
    PortProtocol, ReadinessCheck, StackConfig, StackConfigError, Tier, Variant,
};
use std::time::Duration;

fn invalid(yaml: &str) -> Vec<String> {
    match StackConfig::from_reader(yaml.as_bytes()) {
        Err(StackConfigError::Invalid(err)) => err.messages().to_vec(),
        Err(other) => panic!("expected validation errors, got {other}"),
        Ok(_) => panic!("expected validation errors, got a valid stack"),
    }
}

#[test]
fn builtin_stack_declares_the_platform() {
    let stack = StackConfig::builtin().expect("builtin stack is valid");

    assert_eq!(stack.services.len(), 9);
    assert_eq!(stack.defaults.default_profile, "core");
    assert_eq!(stack.defaults.build.max_attempts, 3);
    assert_eq!(stack.defaults.build.backoff, Duration::from_secs(5));

    let postgres = stack.service("postgres").expect("postgres declared");
    assert_eq!(postgres.tier, Tier::Infrastructure);
    assert_eq!(
        postgres.readiness.check,
        ReadinessCheck::Tcp {
            host: "localhost".to_string(),
            port: 5432
        }
    );

    let frontend = stack.service("frontend").expect("frontend declared");
    let build = frontend.build.as_ref().expect("frontend is built locally");
    assert_eq!(build.target_for(Variant::Release), Some("production"));
    assert_eq!(build.target_for(Variant::Dev), Some("development"));
    assert_eq!(frontend.image, "launchpad/frontend:local");
    assert_eq!(frontend.ports[0].protocol, PortProtocol::Http);
    assert_eq!(frontend.access_points(), vec!["http://localhost:3000"]);
}

#[test]
fn validation_collects_every_problem() {
    let messages = invalid(
        r#"
api_version: v2
defaults:
  probe_interval: soon
services:
  - name: db
    tier: storage
    image: postgres
  - name: api
    tier: application
    readiness: { type: http }
"#,
    );

    assert!(messages.iter().any(|m| m.contains("api_version `v2`")));
    assert!(messages.iter().any(|m| m.contains("defaults.probe_interval")));
    assert!(messages.iter().any(|m| m.contains("tier must be")));
    assert!(messages.iter().any(|m| m.contains("either `image` or `build`")));
}

#[test]
fn infrastructure_cannot_wait_on_applications() {
    let messages = invalid(
        r#"
api_version: v1
services:
  - name: db
    tier: infrastructure
    image: postgres
    depends_on: [api]
  - name: api
    tier: application
    image: api
"#,
    );
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("infrastructure service `db`"));
}

#[test]
fn duplicate_host_ports_are_rejected() {
    let messages = invalid(
        r#"
api_version: v1
services:
  - name: a
    tier: infrastructure
    image: a
    ports: ["8080:80"]
  - name: b
    tier: infrastructure
    image: b
    ports: ["8080:8080"]
"#,
    );
    assert!(messages.iter().any(|m| m.contains("host port 8080")));
}

#[test]
fn readiness_overrides_are_parsed() {
    let stack = StackConfig::from_reader(
        r#"
api_version: v1
services:
  - name: api
    tier: application
    image: api
    readiness:
      type: http
      url: http://localhost:9000/ready
      expect_status: [200, 204]
      timeout: 45s
      interval: 250ms
"#
        .as_bytes(),
    )
    .expect("valid stack");

    let api = stack.service("api").expect("declared");
    assert_eq!(api.readiness.timeout, Some(Duration::from_secs(45)));
    assert_eq!(api.readiness.interval, Some(Duration::from_millis(250)));
    assert!(api.readiness.check.accepts_status(204));
    assert!(!api.readiness.check.accepts_status(201));
}

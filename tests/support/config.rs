#![allow(dead_code)]

use launchpad::config::StackConfig;
use launchpad::orchestrator::Orchestrator;
use launchpad::status::StatusSink;
use std::sync::Arc;

use super::mocks::{MockRuntime, ScriptedHealthCheck};

/// The assessment platform stack with millisecond budgets so runs finish quickly.
pub const TEST_STACK: &str = r#"
api_version: v1
defaults:
  default_profile: core
  probe_interval: 10ms
  infrastructure_timeout: 150ms
  application_timeout: 100ms
  build:
    max_attempts: 3
    backoff: 5ms
services:
  - name: postgres
    tier: infrastructure
    image: postgres:15-alpine
    readiness: { type: tcp, port: 5432 }
    ports: ["5432:5432"]
  - name: neo4j
    tier: infrastructure
    image: neo4j:5.15-community
    readiness: { type: http, url: "http://localhost:7474" }
    ports:
      - { host: 7474, container: 7474, protocol: http }
  - name: weaviate
    tier: infrastructure
    image: semitechnologies/weaviate:1.24.1
    readiness: { type: http, url: "http://localhost:8080/v1/.well-known/ready" }
  - name: minio
    tier: infrastructure
    image: minio/minio:latest
    readiness: { type: http, url: "http://localhost:9000/minio/health/live" }
  - name: project-service
    tier: application
    depends_on: [postgres]
    build: { context: ./services/project-service, target: runtime, dev_target: dev }
    readiness: { type: http, url: "http://localhost:8002/health" }
    ports:
      - { host: 8002, container: 8002, protocol: http, path: /docs }
  - name: backend
    tier: application
    depends_on: [postgres, neo4j, weaviate]
    build: { context: ./backend, target: runtime, dev_target: dev }
    readiness: { type: http, url: "http://localhost:8000/health" }
    ports:
      - { host: 8000, container: 8000, protocol: http, path: /docs }
  - name: reporting-service
    tier: application
    depends_on: [postgres, minio, project-service]
    build: { context: ./services/reporting-service }
    readiness: { type: http, url: "http://localhost:8001/health" }
  - name: document-parser
    tier: application
    depends_on: [minio]
    build: { context: ./services/document-parser }
    readiness: { type: http, url: "http://localhost:8003/health" }
  - name: frontend
    tier: application
    depends_on: [backend, project-service]
    build: { context: ./frontend, target: production, dev_target: development }
    readiness: { type: http, url: "http://localhost:3000" }
    ports:
      - { host: 3000, container: 3000, protocol: http }
profiles:
  - name: minimal
    services: [project-service]
  - name: core
    extends: minimal
    services: [backend, frontend]
  - name: full
    extends: core
    services: [reporting-service, document-parser]
"#;

pub fn test_stack() -> StackConfig {
    stack_from_yaml(TEST_STACK)
}

pub fn stack_from_yaml(yaml: &str) -> StackConfig {
    StackConfig::from_reader(yaml.as_bytes()).expect("test stack parses")
}

/// Orchestrator wired to the mocks, an in-memory sink, and a throwaway working directory.
pub struct Harness {
    pub orchestrator: Orchestrator,
    pub runtime: MockRuntime,
    pub health: ScriptedHealthCheck,
    pub sink: StatusSink,
    pub workdir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_stack(test_stack())
    }

    pub fn with_stack(stack: StackConfig) -> Self {
        let runtime = MockRuntime::new();
        let health = ScriptedHealthCheck::new();
        let sink = StatusSink::in_memory();
        let workdir = tempfile::tempdir().expect("tempdir");
        let orchestrator = Orchestrator::new(
            &stack,
            Arc::new(runtime.clone()),
            Arc::new(health.clone()),
            sink.clone(),
            workdir.path(),
        );

        Self {
            orchestrator,
            runtime,
            health,
            sink,
            workdir,
        }
    }
}

mod common;

use pretty_assertions::assert_eq;
use serde_json::json;
use uuid::Uuid;

use common::Factory;
use serval_exec::error::AppError;
use serval_exec::models::{TypedValue, Variable, VariableScope, VariableType};
use serval_exec::repositories::{InMemoryStore, VariableStore};
use serval_exec::services::{ResolveContext, ScopeSnapshot, VariableResolver};

/// Which scopes bind `x` in a precedence scenario
#[derive(Clone, Copy)]
struct Layers {
    temporary: bool,
    personal: bool,
    environment: bool,
    global: bool,
}

async fn resolve_x(layers: Layers) -> Result<String, AppError> {
    let store = InMemoryStore::new();
    let factory = Factory::new(&store);
    let execution_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();
    let environment_id = Uuid::new_v4();

    if layers.temporary {
        store
            .set_temporary(execution_id, None, "x", TypedValue::text("temporary"))
            .await
            .unwrap();
    }
    if layers.personal {
        factory.personal(user_id, "x", "personal").await;
    }
    if layers.environment {
        factory.environment_var(environment_id, "x", "environment").await;
    }
    if layers.global {
        factory.global("x", "global").await;
    }

    let ctx = ResolveContext::new(execution_id)
        .with_user(user_id)
        .with_environment(Some(environment_id));
    let resolver = VariableResolver::default();
    let template = json!("{{x}}");
    let snapshot = ScopeSnapshot::load(&store, &ctx, &[&template], &resolver)
        .await
        .unwrap();

    resolver.resolve_str("{{x}}", &snapshot)
}

#[tokio::test]
async fn test_precedence_law() {
    let all = Layers {
        temporary: true,
        personal: true,
        environment: true,
        global: true,
    };

    assert_eq!(resolve_x(all).await.unwrap(), "temporary");
    assert_eq!(
        resolve_x(Layers {
            temporary: false,
            ..all
        })
        .await
        .unwrap(),
        "personal"
    );
    assert_eq!(
        resolve_x(Layers {
            temporary: false,
            personal: false,
            ..all
        })
        .await
        .unwrap(),
        "environment"
    );
    assert_eq!(
        resolve_x(Layers {
            temporary: false,
            personal: false,
            environment: false,
            global: true,
        })
        .await
        .unwrap(),
        "global"
    );
    assert!(matches!(
        resolve_x(Layers {
            temporary: false,
            personal: false,
            environment: false,
            global: false,
        })
        .await,
        Err(AppError::UnresolvedVariable(name)) if name == "x"
    ));
}

#[tokio::test]
async fn test_case_temporary_beats_execution_temporary() {
    let store = InMemoryStore::new();
    let execution_id = Uuid::new_v4();
    let case_id = Uuid::new_v4();

    store
        .set_temporary(execution_id, None, "token", TypedValue::text("shared"))
        .await
        .unwrap();
    store
        .set_temporary(execution_id, Some(case_id), "token", TypedValue::text("own"))
        .await
        .unwrap();

    let resolver = VariableResolver::default();
    let template = json!("{{token}}");

    let ctx = ResolveContext::new(execution_id).with_case(case_id);
    let snapshot = ScopeSnapshot::load(&store, &ctx, &[&template], &resolver)
        .await
        .unwrap();
    assert_eq!(resolver.resolve_str("{{token}}", &snapshot).unwrap(), "own");

    let other = ResolveContext::new(execution_id).with_case(Uuid::new_v4());
    let snapshot = ScopeSnapshot::load(&store, &other, &[&template], &resolver)
        .await
        .unwrap();
    assert_eq!(resolver.resolve_str("{{token}}", &snapshot).unwrap(), "shared");
}

#[test]
fn test_unresolved_and_default() {
    let resolver = VariableResolver::default();
    let snapshot = ScopeSnapshot::new();

    assert!(matches!(
        resolver.resolve_str("/users/{{id}}", &snapshot),
        Err(AppError::UnresolvedVariable(name)) if name == "id"
    ));
    assert_eq!(
        resolver.resolve_str("/users/{{id|42}}", &snapshot).unwrap(),
        "/users/42"
    );
}

#[test]
fn test_nested_references_expand() {
    let resolver = VariableResolver::default();
    let snapshot = ScopeSnapshot::new()
        .with(VariableScope::Global, "host", "api.test")
        .with(VariableScope::Environment, "base_url", "https://{{host}}/v1")
        .with(VariableScope::Personal, "users", "{{base_url}}/users");

    assert_eq!(
        resolver.resolve_str("{{users}}/7", &snapshot).unwrap(),
        "https://api.test/v1/users/7"
    );
}

#[test]
fn test_cycle_is_reported_with_chain() {
    let resolver = VariableResolver::default();
    let snapshot = ScopeSnapshot::new()
        .with(VariableScope::Global, "a", "{{b}}")
        .with(VariableScope::Global, "b", "{{a}}");

    match resolver.resolve_str("{{a}}", &snapshot) {
        Err(AppError::CircularReference(chain)) => assert!(chain.contains("a -> b -> a")),
        other => panic!("expected a circular reference, got {:?}", other),
    }
}

#[test]
fn test_nesting_beyond_max_depth_fails() {
    let resolver = VariableResolver::new(2);
    let snapshot = ScopeSnapshot::new()
        .with(VariableScope::Global, "a", "{{b}}")
        .with(VariableScope::Global, "b", "{{c}}")
        .with(VariableScope::Global, "c", "{{d}}")
        .with(VariableScope::Global, "d", "end");

    assert!(matches!(
        resolver.resolve_str("{{a}}", &snapshot),
        Err(AppError::CircularReference(_))
    ));
    assert_eq!(resolver.resolve_str("{{c}}", &snapshot).unwrap(), "end");
}

#[test]
fn test_resolution_is_idempotent() {
    let resolver = VariableResolver::default();
    let snapshot = ScopeSnapshot::new()
        .with(VariableScope::Global, "id", "7")
        .with(VariableScope::Global, "name", "alice");
    let template = json!({"path": "/users/{{id}}", "tags": ["{{name}}", "static"]});

    let once = resolver.resolve_value(&template, &snapshot).unwrap();
    let twice = resolver.resolve_value(&once, &snapshot).unwrap();

    assert_eq!(once, twice);
    assert_eq!(once, json!({"path": "/users/7", "tags": ["alice", "static"]}));
}

#[test]
fn test_sole_placeholder_keeps_binding_type() {
    let resolver = VariableResolver::default();
    let snapshot = ScopeSnapshot::new()
        .with_typed(
            VariableScope::Global,
            "limit",
            TypedValue::new("25", VariableType::Number),
        )
        .with_typed(
            VariableScope::Global,
            "active",
            TypedValue::new("true", VariableType::Boolean),
        );

    let body = json!({"limit": "{{limit}}", "active": "{{active}}", "label": "max {{limit}}"});
    assert_eq!(
        resolver.resolve_value(&body, &snapshot).unwrap(),
        json!({"limit": 25, "active": true, "label": "max 25"})
    );
}

#[tokio::test]
async fn test_snapshot_load_follows_nested_names() {
    let store = InMemoryStore::new();
    let factory = Factory::new(&store);
    let environment_id = Uuid::new_v4();

    factory
        .environment_var(environment_id, "base_url", "http://{{host}}:{{port}}")
        .await;
    factory.global("host", "localhost").await;
    factory
        .variable(Variable::global("port", "8080").with_type(VariableType::Number))
        .await;

    let ctx = ResolveContext::new(Uuid::new_v4()).with_environment(Some(environment_id));
    let resolver = VariableResolver::default();
    let template = json!("{{base_url}}/health");
    let snapshot = ScopeSnapshot::load(&store, &ctx, &[&template], &resolver)
        .await
        .unwrap();

    assert_eq!(snapshot.len(), 3);
    assert_eq!(
        resolver.resolve_str("{{base_url}}/health", &snapshot).unwrap(),
        "http://localhost:8080/health"
    );

    let report = resolver.validate(&template, &snapshot);
    assert!(report.is_valid());
    assert_eq!(
        report.resolved.get("base_url"),
        Some(&VariableScope::Environment)
    );
}

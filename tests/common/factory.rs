use serde_json::Value;
use uuid::Uuid;

use serval_exec::models::{
    ApiDefinition, AssertionRule, Environment, HttpMethod, TestCase, Variable,
};
use serval_exec::repositories::InMemoryStore;

/// Factory for creating test data in an in-memory store
pub struct Factory<'a> {
    store: &'a InMemoryStore,
}

impl<'a> Factory<'a> {
    pub fn new(store: &'a InMemoryStore) -> Self {
        Self { store }
    }

    pub async fn create_api(&self, method: HttpMethod, url: &str) -> ApiDefinition {
        let api = ApiDefinition::new(format!("{} {}", method.as_str(), url), method, url);
        self.store.put_api(api.clone()).await;
        api
    }

    pub async fn create_case(&self, api_id: Uuid, assertions: Vec<AssertionRule>) -> TestCase {
        let mut case = TestCase::new(api_id, format!("Case {}", Uuid::new_v4()));
        case.assertions = assertions;
        self.store.put_case(case.clone()).await;
        case
    }

    /// API plus one case asserting `expected_status`
    pub async fn create_api_case(
        &self,
        method: HttpMethod,
        url: &str,
        expected_status: u16,
    ) -> TestCase {
        let api = self.create_api(method, url).await;
        self.create_case(api.id, vec![status_is(expected_status)])
            .await
    }

    pub async fn create_environment(&self, base_url: &str) -> Environment {
        let environment = Environment::new("test", Some(base_url.to_string()));
        self.store.put_environment(environment.clone()).await;
        environment
    }

    pub async fn global(&self, name: &str, value: &str) {
        self.store
            .put_variable(Variable::global(name, value))
            .await
            .expect("Failed to store global variable");
    }

    pub async fn personal(&self, user_id: Uuid, name: &str, value: &str) {
        self.store
            .put_variable(Variable::personal(user_id, name, value))
            .await
            .expect("Failed to store personal variable");
    }

    pub async fn environment_var(&self, environment_id: Uuid, name: &str, value: &str) {
        self.store
            .put_variable(Variable::environment(environment_id, name, value))
            .await
            .expect("Failed to store environment variable");
    }

    pub async fn variable(&self, variable: Variable) {
        self.store
            .put_variable(variable)
            .await
            .expect("Failed to store variable");
    }
}

pub fn status_is(code: u16) -> AssertionRule {
    AssertionRule::new("status_code", "eq", Value::from(code))
}

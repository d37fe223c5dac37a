#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use envconfig::Envconfig;
use kube::{Client, api::Api};
use myollama_operator::config::OperatorConfig;
use myollama_operator::crd::MyOllama;
use tokio::task::JoinHandle;

// DNS-1123 safe numeric suffix for unique names
pub const DIGITS: [char; 10] =
    ['0', '1', '2', '3', '4', '5', '6', '7', '8', '9'];
pub fn uniq(prefix: &str) -> String {
    format!("{prefix}-{}", nanoid::nanoid!(6, &DIGITS))
}

/// Operator config for cluster tests: one namespace, no model health checks.
pub fn test_config(ns: &str) -> OperatorConfig {
    let env: HashMap<String, String> = [
        ("MYOLLAMA_WATCH_NAMESPACE", ns),
        ("MYOLLAMA_HEALTH_ENABLED", "false"),
        ("MYOLLAMA_REQUEUE_SECS", "2"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    OperatorConfig::init_from_hashmap(&env)
        .expect("test config")
        .normalized()
}

/// Poll `f` once a second until it yields Some or `secs` elapse.
pub async fn wait_for<T, F, Fut>(secs: u64, mut f: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for _ in 0..secs {
        if let Some(v) = f().await {
            return Some(v);
        }
        tokio::time::sleep(Duration::from_millis(1000)).await;
    }
    None
}

// RAII guard to ensure controller abort + cleanup of the MyOllama (children cascade)
pub struct ControllerGuard {
    ns: String,
    name: String,
    client: Client,
    ctrl: Option<JoinHandle<()>>,
}

impl ControllerGuard {
    pub fn new(ns: &str, name: &str, client: Client) -> Self {
        Self {
            ns: ns.to_string(),
            name: name.to_string(),
            client,
            ctrl: None,
        }
    }

    pub fn with_controller(mut self, ctrl: JoinHandle<()>) -> Self {
        self.ctrl = Some(ctrl);
        self
    }
}

impl Drop for ControllerGuard {
    fn drop(&mut self) {
        if let Some(h) = self.ctrl.take() {
            h.abort();
        }
        let api: Api<MyOllama> = Api::namespaced(self.client.clone(), &self.ns);
        let name = self.name.clone();
        tokio::spawn(async move {
            let _ = api.delete(&name, &Default::default()).await;
        });
    }
}

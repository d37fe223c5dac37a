use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "myollama.io",
    version = "v1",
    kind = "MyOllama",
    plural = "myollamas",
    shortname = "mo",
    namespaced,
    status = "MyOllamaStatus",
    printcolumn = r#"{"name":"Model","type":"string","jsonPath":".spec.model"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Hash","type":"string","jsonPath":".status.current_hash"}"#
)]
pub struct MyOllamaSpec {
    /// Model to pull and serve, e.g. "llama3" or "mistral:7b"
    pub model: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
pub struct MyOllamaStatus {
    pub phase: Option<String>,
    pub message: Option<String>,
    pub observed_generation: Option<i64>,
    /// Fingerprint of the generation currently targeted by the Service
    pub current_hash: Option<String>,
    /// Name of the ReplicaSet for the current generation
    pub workload: Option<String>,
    /// Name of the Service fronting the instance
    pub endpoint: Option<String>,
    /// Last health verdict; None until a check completed
    pub model_ready: Option<bool>,
    pub last_checked: Option<String>,
    pub last_updated: Option<String>,
    pub conditions: Option<Vec<Condition>>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: ConditionStatus,
    pub reason: Option<String>,
    pub message: Option<String>,
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum ConditionType {
    Available,
    Progressing,
    Degraded,
    ModelReady,
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn crd_is_namespaced_with_status_subresource() {
        let crd = MyOllama::crd();
        assert_eq!(crd.spec.group, "myollama.io");
        assert_eq!(crd.spec.names.kind, "MyOllama");
        assert_eq!(crd.spec.scope, "Namespaced");
        let v = &crd.spec.versions[0];
        assert_eq!(v.name, "v1");
        assert!(
            v.subresources
                .as_ref()
                .and_then(|s| s.status.as_ref())
                .is_some()
        );
    }

    #[test]
    fn condition_type_unknown_values_fall_back() {
        let c: Condition = serde_json::from_value(serde_json::json!({
            "type": "SomethingNew",
            "status": "True"
        }))
        .unwrap();
        assert_eq!(c.type_, ConditionType::Unknown);
        assert_eq!(c.status, ConditionStatus::True);
    }
}

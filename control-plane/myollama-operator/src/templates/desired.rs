use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{ReplicaSet, ReplicaSetSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, PodSpec, PodTemplateSpec, Service, ServicePort,
    ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use tracing::{error, trace};

use super::fingerprint::fingerprint;
use super::owner::{LinkError, OwnerIdentity, OwnerLinker};
use crate::crd::MyOllamaSpec;

pub const NAME_PREFIX: &str = "myollama";
pub const LABEL_REF: &str = "ollama-ref";
pub const LABEL_HASH: &str = "ollama-hash";
pub const OLLAMA_IMAGE: &str = "ollama/ollama:latest";
pub const OLLAMA_PORT: i32 = 11434;
pub const CONTAINER_NAME: &str = "ollama";

/// Startup script for the serving container. The model name arrives as `$1` so it is
/// never interpolated into shell source.
pub const STARTUP_SCRIPT: &str = r#"# Start Ollama in the background.
/bin/ollama serve &
pid=$!
# Give the server time to accept connections before pulling.
sleep 5
echo "Retrieving model $1..."
ollama pull "$1"
echo "Done!"
# Keep the container alive as long as the server runs.
wait $pid"#;

#[derive(thiserror::Error, Debug)]
pub enum BuildError {
    #[error("failed to link owner: {0}")]
    Link(#[from] LinkError),
}

/// Target objects for one generation of a MyOllama.
#[derive(Clone, Debug)]
pub struct DesiredState {
    pub fingerprint: String,
    pub workload: ReplicaSet,
    pub endpoint: Service,
}

#[derive(Debug)]
pub struct DesiredStateBuilder {
    linker: Box<dyn OwnerLinker + Send + Sync>,
}

pub fn workload_name(owner: &str, hash: &str) -> String {
    format!("{}-{}-{}", NAME_PREFIX, owner, hash)
}

pub fn endpoint_name(owner: &str) -> String {
    format!("{}-{}", NAME_PREFIX, owner)
}

/// In-cluster `host:port` of the Service for an owner.
pub fn endpoint_address(owner: &str, namespace: &str) -> String {
    format!("{}.{}.svc:{}", endpoint_name(owner), namespace, OLLAMA_PORT)
}

pub fn generation_labels(owner: &str, hash: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_REF.to_string(), owner.to_string()),
        (LABEL_HASH.to_string(), hash.to_string()),
    ])
}

/// Label selector matching every generation of an owner.
pub fn owner_selector(owner: &str) -> String {
    format!("{}={}", LABEL_REF, owner)
}

impl DesiredStateBuilder {
    pub fn new(linker: impl OwnerLinker + Send + Sync + 'static) -> Self {
        Self {
            linker: Box::new(linker),
        }
    }

    /// Build the ReplicaSet and Service for the current spec. Either both objects are
    /// returned linked to `owner`, or an error and nothing.
    pub fn build(
        &self,
        spec: &MyOllamaSpec,
        owner: &OwnerIdentity,
    ) -> Result<DesiredState, BuildError> {
        let hash = fingerprint(&spec.model);
        let labels = generation_labels(&owner.name, &hash);

        let mut workload = render_workload(spec, owner, &hash, &labels);
        let mut endpoint = render_endpoint(owner, &labels);

        for meta in [&mut workload.metadata, &mut endpoint.metadata] {
            if let Err(e) = self.linker.link_owner(meta, owner) {
                error!(name = %owner.name, ns = %owner.namespace, error = %e, "failed to set owner reference");
                return Err(e.into());
            }
        }
        trace!(name = %owner.name, %hash, "desired state built");

        Ok(DesiredState {
            fingerprint: hash,
            workload,
            endpoint,
        })
    }
}

fn object_meta(
    name: String,
    owner: &OwnerIdentity,
    labels: &BTreeMap<String, String>,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: Some(owner.namespace.clone()),
        labels: Some(labels.clone()),
        ..Default::default()
    }
}

fn render_workload(
    spec: &MyOllamaSpec,
    owner: &OwnerIdentity,
    hash: &str,
    labels: &BTreeMap<String, String>,
) -> ReplicaSet {
    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(OLLAMA_IMAGE.to_string()),
        ports: Some(vec![ContainerPort {
            container_port: OLLAMA_PORT,
            name: Some("http".to_string()),
            ..Default::default()
        }]),
        command: Some(vec!["/bin/bash".to_string(), "-c".to_string()]),
        args: Some(vec![
            STARTUP_SCRIPT.to_string(),
            "ollama-start".to_string(),
            spec.model.clone(),
        ]),
        ..Default::default()
    };

    ReplicaSet {
        metadata: object_meta(workload_name(&owner.name, hash), owner, labels),
        spec: Some(ReplicaSetSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: Some(PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels.clone()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    ..Default::default()
                }),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn render_endpoint(
    owner: &OwnerIdentity,
    labels: &BTreeMap<String, String>,
) -> Service {
    Service {
        metadata: object_meta(endpoint_name(&owner.name), owner, labels),
        spec: Some(ServiceSpec {
            selector: Some(labels.clone()),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: OLLAMA_PORT,
                target_port: Some(IntOrString::Int(OLLAMA_PORT)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::owner::ControllerOwnerLinker;

    fn owner() -> OwnerIdentity {
        OwnerIdentity {
            name: "demo".into(),
            namespace: "default".into(),
            uid: Some("0b9f6c1e".into()),
            api_version: "myollama.io/v1".into(),
            kind: "MyOllama".into(),
        }
    }

    fn spec(model: &str) -> MyOllamaSpec {
        MyOllamaSpec {
            model: model.into(),
        }
    }

    #[derive(Debug)]
    struct FailingLinker;

    impl OwnerLinker for FailingLinker {
        fn link_owner(
            &self,
            _child: &mut ObjectMeta,
            owner: &OwnerIdentity,
        ) -> Result<(), LinkError> {
            Err(LinkError::UnknownOwnerType {
                name: owner.name.clone(),
                api_version: String::new(),
                kind: String::new(),
            })
        }
    }

    /// Fails on the second object only, to check nothing half-linked escapes.
    #[derive(Debug, Default)]
    struct FailSecondLinker(std::sync::atomic::AtomicUsize);

    impl OwnerLinker for FailSecondLinker {
        fn link_owner(
            &self,
            child: &mut ObjectMeta,
            owner: &OwnerIdentity,
        ) -> Result<(), LinkError> {
            let n = self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if n == 0 {
                ControllerOwnerLinker.link_owner(child, owner)
            } else {
                Err(LinkError::MissingUid(owner.name.clone()))
            }
        }
    }

    #[test]
    fn builds_named_and_labelled_objects() {
        let b = DesiredStateBuilder::new(ControllerOwnerLinker);
        let ds = b.build(&spec("llama3"), &owner()).unwrap();
        let fp = fingerprint("llama3");
        assert_eq!(ds.fingerprint, fp);

        let rs = &ds.workload;
        assert_eq!(rs.metadata.name.as_deref(), Some(format!("myollama-demo-{fp}").as_str()));
        assert_eq!(rs.metadata.namespace.as_deref(), Some("default"));
        let labels = rs.metadata.labels.as_ref().unwrap();
        assert_eq!(labels.get(LABEL_REF).map(String::as_str), Some("demo"));
        assert_eq!(labels.get(LABEL_HASH), Some(&fp));

        let svc = &ds.endpoint;
        assert_eq!(svc.metadata.name.as_deref(), Some("myollama-demo"));
        assert_eq!(svc.metadata.labels.as_ref(), Some(labels));
    }

    #[test]
    fn endpoint_selects_workload_labels_on_fixed_port() {
        let ds = DesiredStateBuilder::new(ControllerOwnerLinker)
            .build(&spec("llama3"), &owner())
            .unwrap();
        let rs_spec = ds.workload.spec.as_ref().unwrap();
        let svc_spec = ds.endpoint.spec.as_ref().unwrap();
        assert_eq!(svc_spec.selector, rs_spec.selector.match_labels);
        let pod_labels = rs_spec
            .template
            .as_ref()
            .and_then(|t| t.metadata.as_ref())
            .and_then(|m| m.labels.clone());
        assert_eq!(svc_spec.selector, pod_labels);
        let ports = svc_spec.ports.as_ref().unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].port, OLLAMA_PORT);
        assert_eq!(ports[0].target_port, Some(IntOrString::Int(OLLAMA_PORT)));
    }

    #[test]
    fn pod_runs_startup_script_with_model() {
        let ds = DesiredStateBuilder::new(ControllerOwnerLinker)
            .build(&spec("mistral:7b"), &owner())
            .unwrap();
        let pod = ds
            .workload
            .spec
            .unwrap()
            .template
            .unwrap()
            .spec
            .unwrap();
        assert_eq!(pod.containers.len(), 1);
        let c = &pod.containers[0];
        assert_eq!(c.image.as_deref(), Some(OLLAMA_IMAGE));
        assert_eq!(c.ports.as_ref().unwrap()[0].container_port, OLLAMA_PORT);
        assert_eq!(
            c.command.as_deref(),
            Some(&["/bin/bash".to_string(), "-c".to_string()][..])
        );
        let args = c.args.as_ref().unwrap();
        assert_eq!(args[2], "mistral:7b");
        let script = &args[0];
        let serve = script.find("ollama serve &").unwrap();
        let sleep = script.find("sleep 5").unwrap();
        let pull = script.find("ollama pull \"$1\"").unwrap();
        let wait = script.find("wait $pid").unwrap();
        assert!(serve < sleep && sleep < pull && pull < wait);
    }

    #[test]
    fn objects_are_owned_by_controller() {
        let ds = DesiredStateBuilder::new(ControllerOwnerLinker)
            .build(&spec("llama3"), &owner())
            .unwrap();
        for refs in [
            ds.workload.metadata.owner_references,
            ds.endpoint.metadata.owner_references,
        ] {
            let refs = refs.unwrap();
            assert_eq!(refs.len(), 1);
            assert_eq!(refs[0].kind, "MyOllama");
            assert_eq!(refs[0].name, "demo");
            assert_eq!(refs[0].controller, Some(true));
        }
    }

    #[test]
    fn build_is_idempotent() {
        let b = DesiredStateBuilder::new(ControllerOwnerLinker);
        let a = b.build(&spec("llama3"), &owner()).unwrap();
        let c = b.build(&spec("llama3"), &owner()).unwrap();
        assert_eq!(
            serde_json::to_vec(&a.workload).unwrap(),
            serde_json::to_vec(&c.workload).unwrap()
        );
        assert_eq!(
            serde_json::to_vec(&a.endpoint).unwrap(),
            serde_json::to_vec(&c.endpoint).unwrap()
        );
    }

    #[test]
    fn model_change_renames_workload_but_not_endpoint() {
        let b = DesiredStateBuilder::new(ControllerOwnerLinker);
        let a = b.build(&spec("llama3"), &owner()).unwrap();
        let c = b.build(&spec("llama3.1"), &owner()).unwrap();
        assert_ne!(a.workload.metadata.name, c.workload.metadata.name);
        assert_eq!(a.endpoint.metadata.name, c.endpoint.metadata.name);
    }

    #[test]
    fn link_failure_returns_error() {
        let err = DesiredStateBuilder::new(FailingLinker)
            .build(&spec("llama3"), &owner())
            .unwrap_err();
        assert!(matches!(err, BuildError::Link(LinkError::UnknownOwnerType { .. })));

        let err = DesiredStateBuilder::new(FailSecondLinker::default())
            .build(&spec("llama3"), &owner())
            .unwrap_err();
        assert!(matches!(err, BuildError::Link(LinkError::MissingUid(_))));
    }

    #[test]
    fn helper_names() {
        assert_eq!(workload_name("demo", "abc"), "myollama-demo-abc");
        assert_eq!(endpoint_name("demo"), "myollama-demo");
        assert_eq!(endpoint_address("demo", "ml"), "myollama-demo.ml.svc:11434");
        assert_eq!(owner_selector("demo"), "ollama-ref=demo");
    }
}

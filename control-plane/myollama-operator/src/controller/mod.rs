pub mod events;
pub mod reconcile;
pub mod status;

use std::sync::Arc;

use futures_util::StreamExt;
use k8s_openapi::api::{apps::v1::ReplicaSet, core::v1::Service};
use kube::{
    Client,
    api::Api,
    runtime::{
        Controller,
        controller::Action,
        events::{Recorder, Reporter},
        watcher::Config,
    },
};
use tracing::{error, info, warn};

use crate::config::OperatorConfig;
use crate::crd::MyOllama;
use crate::health::{HealthError, ModelHealthClient};
use crate::templates::{BuildError, ControllerOwnerLinker, DesiredStateBuilder, LABEL_REF};

pub use reconcile::reconcile;

const REPORTER: &str = "myollama-operator";

#[derive(thiserror::Error, Debug)]
pub enum ReconcileErr {
    #[error("kube api error: {0}")]
    Kube(#[from] kube::Error),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub struct ControllerContext {
    pub client: Client,
    pub cfg: OperatorConfig,
    pub builder: DesiredStateBuilder,
    /// None when health checks are disabled
    pub health: Option<ModelHealthClient>,
    pub recorder: Recorder,
}

impl ControllerContext {
    pub fn new(client: Client, cfg: OperatorConfig) -> Result<Self, HealthError> {
        let health = if cfg.health.enabled {
            Some(ModelHealthClient::new(cfg.health.timeout())?)
        } else {
            None
        };
        let recorder = Recorder::new(
            client.clone(),
            Reporter {
                controller: REPORTER.into(),
                instance: std::env::var("HOSTNAME").ok(),
            },
        );
        Ok(Self {
            client,
            cfg,
            builder: DesiredStateBuilder::new(ControllerOwnerLinker),
            health,
            recorder,
        })
    }

    fn api<K>(&self) -> Api<K>
    where
        K: kube::Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>,
    {
        match self.cfg.watch_namespace.as_deref() {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }
}

pub async fn run_controller(client: Client, cfg: OperatorConfig) -> anyhow::Result<()> {
    let ctx = Arc::new(ControllerContext::new(client, cfg)?);
    let api: Api<MyOllama> = ctx.api();
    let rs_api: Api<ReplicaSet> = ctx.api();
    let svc_api: Api<Service> = ctx.api();
    // Only children carrying our owner label are worth watching.
    let child_cfg = Config::default().labels(LABEL_REF);

    info!(
        namespace = ctx.cfg.watch_namespace.as_deref().unwrap_or("*"),
        health = ctx.cfg.health.enabled,
        prune = ctx.cfg.prune_stale,
        "starting MyOllama controller"
    );

    Controller::new(api, Config::default())
        .owns(rs_api, child_cfg.clone())
        .owns(svc_api, child_cfg)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj_ref, action)) => {
                    info!(name = %obj_ref.name, ns = ?obj_ref.namespace, ?action, "reconciled")
                }
                Err(e) => error!(error = ?e, "reconcile error"),
            }
        })
        .await;

    Ok(())
}

fn error_policy(
    obj: Arc<MyOllama>,
    error: &ReconcileErr,
    ctx: Arc<ControllerContext>,
) -> Action {
    warn!(
        name = ?obj.metadata.name,
        ns = ?obj.metadata.namespace,
        error = %error,
        "reconcile failed; retrying"
    );
    Action::requeue(ctx.cfg.error_requeue())
}

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use serde_json::json;
use tracing::{debug, info, instrument, trace, warn};

use super::events::{
    REASON_GENERATION_CREATED, REASON_GENERATION_PRUNED, REASON_MODEL_NOT_READY,
    REASON_MODEL_READY, emit_event,
};
use super::status::{HealthObservation, Observation, reduce, should_patch_status};
use super::{ControllerContext, ReconcileErr};
use crate::crd::{MyOllama, MyOllamaStatus};
use crate::health::{ModelHealthClient, ModelVerdict};
use crate::templates::{
    DesiredState, LABEL_HASH, OwnerIdentity, endpoint_address, owner_selector,
};

#[instrument(skip_all, fields(ns = %obj.namespace().unwrap_or_else(|| "default".into()), name = %obj.name_any()))]
pub async fn reconcile(
    obj: Arc<MyOllama>,
    ctx: Arc<ControllerContext>,
) -> Result<Action, ReconcileErr> {
    // Children carry controller owner references; the garbage collector removes them.
    if obj.meta().deletion_timestamp.is_some() {
        info!("reconcile: deletion in progress; children are cascade-deleted");
        return Ok(Action::await_change());
    }

    let owner = OwnerIdentity::of(&*obj);
    let ns = owner.namespace.clone();
    let name = owner.name.clone();
    let desired = ctx.builder.build(&obj.spec, &owner)?;
    let hash = desired.fingerprint.clone();
    let workload_name = desired.workload.name_any();
    let endpoint_name = desired.endpoint.name_any();
    info!(%ns, %name, %hash, model = %obj.spec.model, "reconcile: desired state built");

    let rs_api: Api<ReplicaSet> = Api::namespaced(ctx.client.clone(), &ns);
    let svc_api: Api<Service> = Api::namespaced(ctx.client.clone(), &ns);
    let reference = obj.object_ref(&());

    let (current, created) =
        ensure_workload(&rs_api, &desired, &ctx.cfg.field_manager).await?;
    if created {
        emit_event(
            &ctx.recorder,
            &reference,
            EventType::Normal,
            REASON_GENERATION_CREATED,
            "Create",
            Some(format!("Created {} for model {}", workload_name, obj.spec.model)),
        )
        .await;
    }

    apply_endpoint(&svc_api, &desired, &ctx.cfg.field_manager).await?;

    let ready_replicas = current
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    debug!(%ns, %name, workload = %workload_name, ready_replicas, "reconcile: workload observed");

    if ready_replicas > 0 && ctx.cfg.prune_stale {
        let pruned = prune_stale(&rs_api, &owner, &hash).await?;
        if !pruned.is_empty() {
            emit_event(
                &ctx.recorder,
                &reference,
                EventType::Normal,
                REASON_GENERATION_PRUNED,
                "Delete",
                Some(format!("Deleted stale generations: {}", pruned.join(", "))),
            )
            .await;
        }
    }

    let now = Utc::now();
    let health = observe_health(&ctx, &obj, &hash, ready_replicas, now).await;

    let prev_status = obj.status.as_ref();
    let next_status = reduce(
        prev_status,
        &Observation {
            generation: obj.meta().generation,
            hash: &hash,
            workload: &workload_name,
            endpoint: &endpoint_name,
            ready_replicas,
            health,
        },
        &now.to_rfc3339(),
    );

    let prev_ready = prev_status.and_then(|s| s.model_ready);
    if next_status.model_ready.is_some() && next_status.model_ready != prev_ready {
        let (type_, reason) = if next_status.model_ready == Some(true) {
            (EventType::Normal, REASON_MODEL_READY)
        } else {
            (EventType::Warning, REASON_MODEL_NOT_READY)
        };
        // Not-ready before the first pod comes up is expected; stay quiet.
        if ready_replicas > 0 {
            emit_event(
                &ctx.recorder,
                &reference,
                type_,
                reason,
                "HealthCheck",
                next_status.message.clone(),
            )
            .await;
        }
    }

    let next_action = requeue_after(&ctx, &next_status);

    if should_patch_status(prev_status, &next_status) {
        trace!(%ns, %name, "reconcile: status changed; patching status");
        let api: Api<MyOllama> = Api::namespaced(ctx.client.clone(), &ns);
        let patch = json!({ "status": next_status });
        api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
    } else {
        trace!(%ns, %name, "reconcile: status unchanged; skipping patch");
    }

    Ok(next_action)
}

/// Create the ReplicaSet for the current generation unless it exists. Generations are
/// immutable, so an existing object with the same name is left untouched.
#[instrument(skip_all, fields(workload = %desired.workload.name_any()))]
async fn ensure_workload(
    api: &Api<ReplicaSet>,
    desired: &DesiredState,
    field_manager: &str,
) -> Result<(ReplicaSet, bool), ReconcileErr> {
    let rs_name = desired.workload.name_any();
    if let Some(existing) = api.get_opt(&rs_name).await? {
        trace!(%rs_name, "ensure_workload: generation already present");
        return Ok((existing, false));
    }
    let pp = PostParams {
        field_manager: Some(field_manager.to_string()),
        ..Default::default()
    };
    match api.create(&pp, &desired.workload).await {
        Ok(rs) => {
            info!(%rs_name, "ensure_workload: created new generation");
            Ok((rs, true))
        }
        // Lost a race with a concurrent create; the object is what we wanted.
        Err(kube::Error::Api(ae)) if ae.code == 409 => {
            debug!(%rs_name, "ensure_workload: already exists");
            Ok((api.get(&rs_name).await?, false))
        }
        Err(e) => Err(e.into()),
    }
}

/// Server-side apply the Service so it follows the current generation in place.
#[instrument(skip_all, fields(endpoint = %desired.endpoint.name_any()))]
async fn apply_endpoint(
    api: &Api<Service>,
    desired: &DesiredState,
    field_manager: &str,
) -> Result<(), ReconcileErr> {
    let svc_name = desired.endpoint.name_any();
    let svc_json = serde_json::to_value(&desired.endpoint)?;
    let pp = PatchParams::apply(field_manager).force();
    api.patch(&svc_name, &pp, &Patch::Apply(&svc_json)).await?;
    info!(%svc_name, "apply_endpoint: applied");
    Ok(())
}

/// Delete ReplicaSets of older generations owned by `owner`. Returns deleted names.
async fn prune_stale(
    api: &Api<ReplicaSet>,
    owner: &OwnerIdentity,
    current_hash: &str,
) -> Result<Vec<String>, ReconcileErr> {
    let lp = ListParams::default().labels(&owner_selector(&owner.name));
    let list = api.list(&lp).await?;
    let stale = stale_generations(&list.items, current_hash, owner.uid.as_deref());
    for rs_name in &stale {
        info!(ns = %owner.namespace, name = %owner.name, %rs_name, "prune_stale: deleting stale generation");
        match api.delete(rs_name, &DeleteParams::background()).await {
            Ok(_) => {}
            Err(kube::Error::Api(ae)) if ae.code == 404 => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(stale)
}

/// Names of ReplicaSets whose generation label differs from `current_hash`. When
/// `owner_uid` is set, only ReplicaSets controlled by that owner are considered.
pub fn stale_generations(
    items: &[ReplicaSet],
    current_hash: &str,
    owner_uid: Option<&str>,
) -> Vec<String> {
    items
        .iter()
        .filter(|rs| rs.meta().deletion_timestamp.is_none())
        .filter(|rs| match owner_uid {
            Some(uid) => rs
                .owner_references()
                .iter()
                .any(|r| r.uid == uid && r.controller == Some(true)),
            None => true,
        })
        .filter(|rs| {
            rs.labels()
                .get(LABEL_HASH)
                .is_some_and(|h| h != current_hash)
        })
        .map(|rs| rs.name_any())
        .collect()
}

/// Whether the model must be asked again. A previous "yes" for the same generation
/// stays valid for `interval`.
pub fn health_due(
    prev: Option<&MyOllamaStatus>,
    hash: &str,
    interval: Duration,
    now: DateTime<Utc>,
) -> bool {
    let Some(prev) = prev else { return true };
    if prev.model_ready != Some(true) || prev.current_hash.as_deref() != Some(hash) {
        return true;
    }
    let Some(last) = prev
        .last_checked
        .as_deref()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
    else {
        return true;
    };
    let age = now.signed_duration_since(last.with_timezone(&Utc));
    age.to_std().map(|a| a >= interval).unwrap_or(false)
}

async fn observe_health(
    ctx: &ControllerContext,
    obj: &MyOllama,
    hash: &str,
    ready_replicas: i32,
    now: DateTime<Utc>,
) -> HealthObservation {
    let Some(client) = ctx.health.as_ref() else {
        return HealthObservation::Disabled;
    };
    if ready_replicas == 0 {
        return HealthObservation::WorkloadNotReady;
    }
    if !health_due(obj.status.as_ref(), hash, ctx.cfg.health.interval(), now) {
        trace!("observe_health: recent affirmative answer; skipping check");
        return HealthObservation::StillReady;
    }

    let ns = obj.namespace().unwrap_or_else(|| "default".into());
    let address = ctx
        .cfg
        .health
        .address_override
        .clone()
        .unwrap_or_else(|| endpoint_address(&obj.name_any(), &ns));
    check_within(
        client,
        &address,
        &obj.spec.model,
        &ctx.cfg.health.prompt,
        ctx.cfg.health.reconcile_budget(),
    )
    .await
}

/// Ask the model once, giving up after `budget`. The health call runs inside the
/// reconcile of its object, so `budget` bounds how long that object's queue waits.
/// Expiry drops the in-flight request and is reported as a failed check.
pub async fn check_within(
    client: &ModelHealthClient,
    address: &str,
    model: &str,
    prompt: &str,
    budget: Duration,
) -> HealthObservation {
    match tokio::time::timeout(budget, client.ask_model(address, model, prompt)).await {
        Ok(Ok(verdict)) => {
            if verdict != ModelVerdict::Yes {
                warn!(%address, %verdict, "observe_health: model did not confirm readiness");
            }
            HealthObservation::Answered(verdict)
        }
        Ok(Err(e)) => {
            warn!(%address, error = %e, "observe_health: health check failed");
            HealthObservation::Failed(e.to_string())
        }
        Err(_) => {
            warn!(%address, ?budget, "observe_health: no answer within reconcile budget");
            HealthObservation::Failed(format!("no answer from {} within {:?}", address, budget))
        }
    }
}

fn requeue_after(ctx: &ControllerContext, status: &MyOllamaStatus) -> Action {
    let settled = match status.model_ready {
        Some(ready) => ready,
        None => status.phase.as_deref() == Some(super::status::PHASE_AVAILABLE),
    };
    if settled {
        Action::requeue(ctx.cfg.health.interval())
    } else {
        Action::requeue(ctx.cfg.requeue())
    }
}

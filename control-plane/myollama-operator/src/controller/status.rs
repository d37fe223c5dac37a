use serde_json::{Value as JsonValue, json};
use tracing::{debug, trace};

use crate::crd::{Condition, ConditionStatus, ConditionType, MyOllamaStatus};
use crate::health::ModelVerdict;

pub const PHASE_PROGRESSING: &str = "Progressing";
pub const PHASE_AVAILABLE: &str = "Available";
pub const PHASE_DEGRADED: &str = "Degraded";

/// Result of the model health step of one reconcile pass.
#[derive(Clone, Debug, PartialEq)]
pub enum HealthObservation {
    /// Health checks are switched off.
    Disabled,
    /// The current generation has no ready pod yet, so nothing was asked.
    WorkloadNotReady,
    Answered(ModelVerdict),
    /// The model answered "yes" for this generation recently enough to skip asking.
    StillReady,
    Failed(String),
}

/// What one reconcile pass saw for the current generation.
#[derive(Clone, Debug)]
pub struct Observation<'a> {
    pub generation: Option<i64>,
    pub hash: &'a str,
    pub workload: &'a str,
    pub endpoint: &'a str,
    pub ready_replicas: i32,
    pub health: HealthObservation,
}

/// Compute the next status from the previous one and a fresh observation.
/// Condition transition times only move when the condition status flips.
pub fn reduce(
    prev: Option<&MyOllamaStatus>,
    obs: &Observation<'_>,
    now: &str,
) -> MyOllamaStatus {
    let ready = obs.ready_replicas > 0;
    let (phase, message) = match (&obs.health, ready) {
        (_, false) => (
            PHASE_PROGRESSING,
            format!("waiting for {} to become ready", obs.workload),
        ),
        (HealthObservation::Disabled, true) => {
            (PHASE_AVAILABLE, format!("{} is ready", obs.workload))
        }
        (HealthObservation::Answered(ModelVerdict::Yes), true)
        | (HealthObservation::StillReady, true) => (
            PHASE_AVAILABLE,
            "model answered the health prompt affirmatively".to_string(),
        ),
        (HealthObservation::Answered(v), true) => (
            PHASE_DEGRADED,
            format!("model answered the health prompt with {}", v),
        ),
        (HealthObservation::Failed(e), true) => {
            (PHASE_DEGRADED, format!("health check failed: {}", e))
        }
        (HealthObservation::WorkloadNotReady, true) => (
            PHASE_PROGRESSING,
            format!("waiting for {} to become ready", obs.workload),
        ),
    };

    let degraded_reason = match (&obs.health, phase) {
        (_, p) if p != PHASE_DEGRADED => "AsExpected",
        (HealthObservation::Failed(_), _) => "HealthCheckFailed",
        _ => "HealthCheckNegative",
    };

    let prev_conds = prev.and_then(|s| s.conditions.as_deref()).unwrap_or(&[]);
    let mut conds = vec![
        condition(
            prev_conds,
            ConditionType::Available,
            flag(phase == PHASE_AVAILABLE),
            if phase == PHASE_AVAILABLE { "ModelServing" } else { "NotAvailable" },
            None,
            now,
        ),
        condition(
            prev_conds,
            ConditionType::Progressing,
            flag(!ready),
            if ready { "GenerationReady" } else { "GenerationRollingOut" },
            Some(format!("generation {}", obs.hash)),
            now,
        ),
        condition(
            prev_conds,
            ConditionType::Degraded,
            flag(phase == PHASE_DEGRADED),
            degraded_reason,
            None,
            now,
        ),
    ];

    let (model_ready, checked) = match &obs.health {
        HealthObservation::Disabled => (None, false),
        HealthObservation::WorkloadNotReady => {
            conds.push(condition(
                prev_conds,
                ConditionType::ModelReady,
                ConditionStatus::False,
                "WorkloadNotReady",
                None,
                now,
            ));
            (Some(false), false)
        }
        HealthObservation::Answered(v) => {
            let reason = match v {
                ModelVerdict::Yes => "ModelAnswered",
                ModelVerdict::No => "ModelDeclined",
                ModelVerdict::Unclear => "AnswerUnclear",
            };
            conds.push(condition(
                prev_conds,
                ConditionType::ModelReady,
                flag(*v == ModelVerdict::Yes),
                reason,
                Some(format!("answer: {}", v)),
                now,
            ));
            (Some(*v == ModelVerdict::Yes), true)
        }
        HealthObservation::StillReady => {
            conds.push(condition(
                prev_conds,
                ConditionType::ModelReady,
                ConditionStatus::True,
                "ModelAnswered",
                Some(format!("answer: {}", ModelVerdict::Yes)),
                now,
            ));
            (Some(true), false)
        }
        HealthObservation::Failed(e) => {
            conds.push(condition(
                prev_conds,
                ConditionType::ModelReady,
                ConditionStatus::Unknown,
                "CheckFailed",
                Some(e.clone()),
                now,
            ));
            (Some(false), true)
        }
    };

    let last_checked = if checked {
        Some(now.to_string())
    } else {
        prev.and_then(|s| s.last_checked.clone())
    };

    MyOllamaStatus {
        phase: Some(phase.to_string()),
        message: Some(message),
        observed_generation: obs.generation,
        current_hash: Some(obs.hash.to_string()),
        workload: Some(obs.workload.to_string()),
        endpoint: Some(obs.endpoint.to_string()),
        model_ready,
        last_checked,
        last_updated: Some(now.to_string()),
        conditions: Some(conds),
    }
}

fn flag(b: bool) -> ConditionStatus {
    if b {
        ConditionStatus::True
    } else {
        ConditionStatus::False
    }
}

fn condition(
    prev: &[Condition],
    type_: ConditionType,
    status: ConditionStatus,
    reason: &str,
    message: Option<String>,
    now: &str,
) -> Condition {
    let last_transition_time = prev
        .iter()
        .find(|c| c.type_ == type_ && c.status == status)
        .and_then(|c| c.last_transition_time.clone())
        .or_else(|| Some(now.to_string()));
    Condition {
        type_,
        status,
        reason: Some(reason.to_string()),
        message,
        last_transition_time,
    }
}

/// Compare two status objects for material differences, ignoring timestamp-only fields
/// that would otherwise cause a patch on every reconcile.
pub fn should_patch_status(
    current: Option<&MyOllamaStatus>,
    desired: &MyOllamaStatus,
) -> bool {
    match current {
        None => {
            debug!("should_patch_status: no current status, patching");
            true
        }
        Some(cur) => {
            let differs = normalize_status(cur) != normalize_status(desired);
            if differs {
                debug!("should_patch_status: status differs, patching");
            } else {
                trace!("should_patch_status: status identical, skipping patch");
            }
            differs
        }
    }
}

fn normalize_status(s: &MyOllamaStatus) -> JsonValue {
    let mut v = serde_json::to_value(s).unwrap_or_else(|_| json!({}));
    if let JsonValue::Object(ref mut map) = v {
        map.remove("last_updated");
        map.remove("last_checked");
        if let Some(JsonValue::Array(conds)) = map.get_mut("conditions") {
            for c in conds.iter_mut() {
                if let Some(obj) = c.as_object_mut() {
                    obj.remove("lastTransitionTime");
                }
            }
        }
    }
    v
}

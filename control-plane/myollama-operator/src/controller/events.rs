use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder};
use tracing::debug;

pub const REASON_GENERATION_CREATED: &str = "GenerationCreated";
pub const REASON_GENERATION_PRUNED: &str = "GenerationPruned";
pub const REASON_MODEL_READY: &str = "ModelReady";
pub const REASON_MODEL_NOT_READY: &str = "ModelNotReady";

pub async fn emit_event(
    recorder: &Recorder,
    reference: &ObjectReference,
    type_: EventType,
    reason: &str,
    action: &str,
    note: Option<String>,
) {
    if let Err(e) = recorder
        .publish(
            &Event {
                type_,
                reason: reason.into(),
                note,
                action: action.into(),
                secondary: None,
            },
            reference,
        )
        .await
    {
        debug!(error = %e, %reason, "failed to publish event");
    }
}

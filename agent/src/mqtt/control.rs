//! MQTT control plane callbacks
//!
//! Each callback runs on the network worker and only flips flags or swaps
//! small values on the shared [`OrchestratorState`].

use std::sync::Arc;

use tracing::info;

use crate::deploy::state::OrchestratorState;
use crate::errors::DeployError;
use crate::mqtt::bindings::{Callback, TopicBindings};
use crate::mqtt::topics::TopicKind;

fn callback_for(kind: TopicKind, state: Arc<OrchestratorState>) -> Option<Callback> {
    let callback: Callback = match kind {
        TopicKind::RecvFrame => Arc::new(move |payload: &[u8]| {
            state.set_received_frame(payload.to_vec());
        }),
        TopicKind::StartPublish => Arc::new(move |_: &[u8]| state.set_publishing(true)),
        TopicKind::StopPublish => Arc::new(move |_: &[u8]| state.set_publishing(false)),
        TopicKind::StartPublishFrame => Arc::new(move |_: &[u8]| state.set_publish_frame(true)),
        TopicKind::StopPublishFrame => Arc::new(move |_: &[u8]| state.set_publish_frame(false)),
        TopicKind::SaveFrame => Arc::new(move |_: &[u8]| {
            info!("Save frame requested");
            state.request_save_frame();
        }),
        TopicKind::StartRecord => Arc::new(move |_: &[u8]| state.set_record(true)),
        TopicKind::StopRecord => Arc::new(move |_: &[u8]| state.set_record(false)),
        TopicKind::ViewLabelCheck => Arc::new(move |payload: &[u8]| {
            state.label_check().on_message(payload);
            state.request_rerender();
        }),
        TopicKind::PublishResults | TopicKind::PublishFrame => return None,
    };
    Some(callback)
}

/// Bind every subscribed topic to its control callback
pub fn register_callbacks(
    bindings: &TopicBindings,
    state: &Arc<OrchestratorState>,
) -> Result<(), DeployError> {
    for kind in TopicKind::ALL {
        if let Some(callback) = callback_for(kind, state.clone()) {
            bindings.bind(kind, callback)?;
        }
    }
    Ok(())
}

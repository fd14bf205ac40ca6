use crate::{
    alert::{AlertOutcome, AlertSender, UNKNOWN_FACE_MESSAGE},
    server::SharedState,
};
use axum::{extract::State, response::Json, Form};
use serde::Deserialize;
use std::fmt;
use tracing::instrument;

#[derive(Deserialize)]
pub struct PhoneForm {
    #[serde(default)]
    phone: Option<String>,
}

// destination numbers stay out of the logs
impl fmt::Debug for PhoneForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhoneForm")
            .field("phone", &self.phone.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[instrument(skip(state, form))]
pub async fn set_phone(
    State(state): State<SharedState>,
    Form(form): Form<PhoneForm>,
) -> Json<AlertOutcome> {
    let outcome =
        send_unknown_face_alert(state.alert_sender.as_deref(), form.phone.as_deref()).await;
    state.metrics.record_alert(outcome.status.as_str());
    Json(outcome)
}

async fn send_unknown_face_alert(
    sender: Option<&dyn AlertSender>,
    phone: Option<&str>,
) -> AlertOutcome {
    let Some(phone) = phone.map(str::trim).filter(|p| !p.is_empty()) else {
        return AlertOutcome::error("no phone number provided");
    };
    let Some(sender) = sender else {
        tracing::warn!("Alert requested but alerting is not configured");
        return AlertOutcome::error("alerting is not configured");
    };
    sender.send(phone, UNKNOWN_FACE_MESSAGE).await
}

//! HTTP control surface.
//!
//! The dual relay device serves the AC-1 routes (`/json`, `/power`,
//! `/power/on|off|toggle`, `/power/{channel}[/on|/off]`). The single relay
//! device serves `/power` and `/power/on|off`. Writes refused because of
//! manual mode answer `403 Forbidden`.

use std::future::Future;
use std::sync::Arc;

use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::Json;
use axum::Router;
use log::error;
use serde::Serialize;

use crate::device::Device;
use crate::power_state::PowerSnapshot;
use crate::power_types::ChannelId;
use crate::power_types::PowerError;
use crate::power_types::PowerState;
use crate::power_types::RelayState;
use crate::sequencer::Sequencer;
use crate::switch::Switch;
use crate::switch::SwitchState;

const FORBIDDEN_MESSAGE: &str =
    "403 Forbidden: Automatic control disabled - manual override is active";

impl IntoResponse for PowerError {
    fn into_response(self) -> Response {
        match self {
            PowerError::AutoControlDisabled => {
                (StatusCode::FORBIDDEN, FORBIDDEN_MESSAGE).into_response()
            }
            PowerError::UnknownChannel(_) => {
                (StatusCode::NOT_FOUND, self.to_string()).into_response()
            }
            e => {
                error!("Request failed: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
            }
        }
    }
}

pub fn router(device: Device) -> Router {
    match device {
        Device::Dual(sequencer) => dual_router(sequencer),
        Device::Single(switch) => single_router(switch),
    }
}

fn dual_router(sequencer: Arc<Sequencer>) -> Router {
    Router::new()
        .route("/", get(dual_index))
        .route("/json", get(status_json))
        .route("/power", get(power_status))
        .route("/power/on", get(all_on))
        .route("/power/off", get(all_off))
        .route("/power/toggle", get(toggle))
        .route("/power/{channel}", get(channel_active))
        .route("/power/{channel}/on", get(channel_on))
        .route("/power/{channel}/off", get(channel_off))
        .with_state(sequencer)
}

fn single_router(switch: Arc<Switch>) -> Router {
    Router::new()
        .route("/", get(single_index))
        .route("/power", get(switch_status))
        .route("/power/on", get(turn_on))
        .route("/power/off", get(turn_off))
        .with_state(switch)
}

#[derive(Debug, Serialize)]
struct StatusReport {
    power_state: PowerState,
    state: &'static str,
    auto_mode: bool,
    manual_override: bool,
    relay1: bool,
    relay2: bool,
    relay1_active: bool,
    relay2_active: bool,
}

impl From<&PowerSnapshot> for StatusReport {
    fn from(snapshot: &PowerSnapshot) -> Self {
        let state = snapshot.state();
        StatusReport {
            power_state: state,
            state: state.label(),
            auto_mode: snapshot.inputs.auto_mode,
            manual_override: snapshot.inputs.manual_override,
            relay1: snapshot.channel1.is_on(),
            relay2: snapshot.channel2.is_on(),
            relay1_active: snapshot.channel1_active(),
            relay2_active: snapshot.channel2_active(),
        }
    }
}

fn on_off(on: bool) -> &'static str {
    match on {
        true => "ON",
        false => "OFF",
    }
}

async fn dual_index() -> Html<&'static str> {
    Html("<h1>Keritech Electronics AC-1 Audio Computer</h1><br>")
}

async fn status_json(
    State(sequencer): State<Arc<Sequencer>>,
) -> Result<Json<StatusReport>, PowerError> {
    let snapshot = sequencer.snapshot()?;
    Ok(Json(StatusReport::from(&snapshot)))
}

async fn power_status(State(sequencer): State<Arc<Sequencer>>) -> Result<Html<String>, PowerError> {
    output_status(&sequencer)
}

fn output_status(sequencer: &Sequencer) -> Result<Html<String>, PowerError> {
    let snapshot = sequencer.snapshot()?;
    let mut page = String::new();
    if snapshot.state() == PowerState::ManualOverride {
        page.push_str("<div>Manual override is on - software control inactive.</div>");
    }
    page.push_str(&format!(
        "<div>Main power is {}<br>Amp power is {}</div>",
        on_off(snapshot.channel1_active()),
        on_off(snapshot.channel2_active())
    ));
    Ok(Html(page))
}

/// Runs a sequence on its own task, so a client hanging up cannot stop it
/// half way.
async fn run_detached<F, Fut>(sequencer: &Arc<Sequencer>, operation: F) -> Result<(), PowerError>
where
    F: FnOnce(Arc<Sequencer>) -> Fut,
    Fut: Future<Output = Result<(), PowerError>> + Send + 'static,
{
    match tokio::spawn(operation(Arc::clone(sequencer))).await {
        Ok(result) => result,
        Err(e) => Err(PowerError::TaskFailed(e.to_string())),
    }
}

async fn all_on(State(sequencer): State<Arc<Sequencer>>) -> Result<Html<String>, PowerError> {
    run_detached(&sequencer, |s| async move { s.power_on().await }).await?;
    output_status(&sequencer)
}

async fn all_off(State(sequencer): State<Arc<Sequencer>>) -> Result<Html<String>, PowerError> {
    run_detached(&sequencer, |s| async move { s.power_off().await }).await?;
    output_status(&sequencer)
}

async fn toggle(State(sequencer): State<Arc<Sequencer>>) -> Result<Html<String>, PowerError> {
    run_detached(&sequencer, |s| async move { s.toggle().await }).await?;
    output_status(&sequencer)
}

fn parse_channel(number: &str) -> Result<ChannelId, PowerError> {
    match ChannelId::from_number(number) {
        Some(channel) => Ok(channel),
        None => Err(PowerError::UnknownChannel(number.to_string())),
    }
}

async fn channel_active(
    State(sequencer): State<Arc<Sequencer>>,
    Path(channel): Path<String>,
) -> Result<Json<bool>, PowerError> {
    let snapshot = sequencer.snapshot()?;
    let active = match parse_channel(&channel)? {
        ChannelId::Channel1 => snapshot.channel1_active(),
        ChannelId::Channel2 => snapshot.channel2_active(),
    };
    Ok(Json(active))
}

async fn channel_on(
    State(sequencer): State<Arc<Sequencer>>,
    Path(channel): Path<String>,
) -> Result<Html<String>, PowerError> {
    set_channel(sequencer, &channel, RelayState::On).await
}

async fn channel_off(
    State(sequencer): State<Arc<Sequencer>>,
    Path(channel): Path<String>,
) -> Result<Html<String>, PowerError> {
    set_channel(sequencer, &channel, RelayState::Off).await
}

async fn set_channel(
    sequencer: Arc<Sequencer>,
    channel: &str,
    state: RelayState,
) -> Result<Html<String>, PowerError> {
    let channel = parse_channel(channel)?;
    run_detached(&sequencer, move |s| async move {
        s.set_channel(channel, state).await
    })
    .await?;
    output_status(&sequencer)
}

#[derive(Debug, Serialize)]
struct SwitchReport {
    power: bool,
    auto_mode: bool,
    state: SwitchState,
}

async fn single_index() -> &'static str {
    "It works!"
}

async fn switch_status(State(switch): State<Arc<Switch>>) -> Result<Json<SwitchReport>, PowerError> {
    Ok(Json(SwitchReport {
        power: switch.check_output_state()?.is_on(),
        auto_mode: switch.check_automatic_mode()?,
        state: switch.state()?,
    }))
}

async fn turn_on(State(switch): State<Arc<Switch>>) -> Result<String, PowerError> {
    switch.turn_on()?;
    Ok(format!("Power is now {}", on_off(true)))
}

async fn turn_off(State(switch): State<Arc<Switch>>) -> Result<String, PowerError> {
    switch.turn_off()?;
    Ok(format!("Power is now {}", on_off(false)))
}

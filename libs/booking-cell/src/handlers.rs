// libs/booking-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_gateway::HospitalClient;
use shared_models::error::AppError;

use crate::gateway::{
    AppointmentGateway, CatalogGateway, ClientRedirectHandler, ExternalPaymentHandler,
    HttpAppointmentGateway, HttpCatalogGateway, HttpPaymentGateway, HttpProfileGateway,
    HttpSchedulingGateway, PaymentGateway, ProfileGateway, SchedulingGateway,
};
use crate::models::{
    BookingError, MedicalPackage, MedicalService, NewProfileDraft, PatientProfileRef,
    PaymentMethod, TimeSlotRef,
};
use crate::services::payment::CallbackOutcome;
use crate::services::wizard::{BookingWizard, PaymentProgress, RetreatOutcome};
use crate::session::SessionStore;

// ==============================================================================
// APP STATE
// ==============================================================================

pub struct Gateways {
    pub profiles: Arc<dyn ProfileGateway>,
    pub catalog: Arc<dyn CatalogGateway>,
    pub scheduling: Arc<dyn SchedulingGateway>,
    pub appointments: Arc<dyn AppointmentGateway>,
    pub payments: Arc<dyn PaymentGateway>,
    pub payment_handler: Arc<dyn ExternalPaymentHandler>,
}

impl Gateways {
    pub fn http(config: &AppConfig) -> Self {
        let client = Arc::new(HospitalClient::new(config));
        Self {
            profiles: Arc::new(HttpProfileGateway::new(Arc::clone(&client))),
            catalog: Arc::new(HttpCatalogGateway::new(Arc::clone(&client))),
            scheduling: Arc::new(HttpSchedulingGateway::new(Arc::clone(&client))),
            appointments: Arc::new(HttpAppointmentGateway::new(Arc::clone(&client))),
            payments: Arc::new(HttpPaymentGateway::new(client)),
            payment_handler: Arc::new(ClientRedirectHandler),
        }
    }
}

pub struct AppState {
    pub sessions: SessionStore,
    pub gateways: Gateways,
}

impl AppState {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            sessions: SessionStore::new(),
            gateways: Gateways::http(config),
        }
    }

    pub fn with_gateways(gateways: Gateways) -> Self {
        Self {
            sessions: SessionStore::new(),
            gateways,
        }
    }
}

// ==============================================================================
// REQUEST STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct SetProfileRequest {
    pub existing: Option<PatientProfileRef>,
    pub inline: Option<NewProfileDraft>,
}

#[derive(Debug, Deserialize)]
pub struct SelectPackageRequest {
    pub package: Option<MedicalPackage>,
}

#[derive(Debug, Deserialize)]
pub struct SelectServicesRequest {
    pub services: Vec<MedicalService>,
}

#[derive(Debug, Deserialize)]
pub struct SelectDateRequest {
    pub date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct SetReasonRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentMethodRequest {
    pub method: PaymentMethod,
}

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    pub specialty: Option<String>,
    pub doctor_id: Option<String>,
    pub date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct ProfileLookupQuery {
    pub document_number: String,
}

#[derive(Debug, Deserialize)]
pub struct LinkProfileRequest {
    pub profile_id: String,
}

// ==============================================================================
// HELPERS
// ==============================================================================

fn map_booking_error(e: BookingError) -> AppError {
    match e {
        BookingError::Validation(msg) => AppError::ValidationError(msg),
        BookingError::InvalidTransition { .. } => AppError::Conflict(e.to_string()),
        BookingError::Gateway(msg) => AppError::ExternalService(msg),
        BookingError::PaymentProvider(code) => {
            AppError::BadRequest(format!("Payment failed with provider code {}", code))
        }
        BookingError::MalformedCallback(msg) => {
            AppError::BadRequest(format!("Malformed payment callback: {}", msg))
        }
        BookingError::StalePaymentCallback => AppError::Conflict(e.to_string()),
        BookingError::SnapshotMissing => AppError::Conflict(e.to_string()),
        BookingError::ResultFetchExhausted(_) => AppError::ExternalService(e.to_string()),
    }
}

async fn session_or_404(
    state: &AppState,
    session_id: Uuid,
) -> Result<Arc<Mutex<BookingWizard>>, AppError> {
    state
        .sessions
        .get(session_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Booking session {} not found", session_id)))
}

/// User-driven endpoints refuse to overlap an in-flight operation on the
/// same session (duplicate-submission guard); the payment callback path
/// queues instead.
fn lock_for_user_action(
    wizard: &Arc<Mutex<BookingWizard>>,
) -> Result<tokio::sync::MutexGuard<'_, BookingWizard>, AppError> {
    wizard.try_lock().map_err(|_| {
        AppError::Conflict("Another operation is in progress for this session".to_string())
    })
}

fn session_view(session_id: Uuid, wizard: &BookingWizard) -> Value {
    json!({
        "session_id": session_id,
        "booking": wizard.view(),
    })
}

// ==============================================================================
// SESSION LIFECYCLE HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_session(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let session_id = state.sessions.create().await;
    info!("Booking session {} started", session_id);

    let wizard = session_or_404(&state, session_id).await?;
    let wizard = wizard.lock().await;
    Ok(Json(session_view(session_id, &wizard)))
}

#[axum::debug_handler]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let wizard = session_or_404(&state, session_id).await?;
    let wizard = wizard.lock().await;
    Ok(Json(session_view(session_id, &wizard)))
}

#[axum::debug_handler]
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    if !state.sessions.remove(session_id).await {
        return Err(AppError::NotFound(format!(
            "Booking session {} not found",
            session_id
        )));
    }
    Ok(Json(json!({ "deleted": true })))
}

#[axum::debug_handler]
pub async fn reset_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let wizard = session_or_404(&state, session_id).await?;
    let mut wizard = lock_for_user_action(&wizard)?;
    wizard.reset();
    Ok(Json(session_view(session_id, &wizard)))
}

// ==============================================================================
// WIZARD TRANSITION HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn advance(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let wizard = session_or_404(&state, session_id).await?;
    let mut wizard = lock_for_user_action(&wizard)?;

    let step = wizard.advance().map_err(map_booking_error)?;

    // Entering Payment freezes the snapshot; route future callbacks here.
    if let Some(snapshot) = wizard.snapshot() {
        state
            .sessions
            .register_appointment_code(snapshot.appointment_code, session_id)
            .await;
    }

    Ok(Json(json!({
        "moved_to": step,
        "booking": wizard.view(),
    })))
}

#[axum::debug_handler]
pub async fn retreat(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let wizard = session_or_404(&state, session_id).await?;
    let mut wizard = lock_for_user_action(&wizard)?;

    match wizard.retreat() {
        RetreatOutcome::Moved(step) => Ok(Json(json!({
            "outcome": "moved",
            "moved_to": step,
            "booking": wizard.view(),
        }))),
        RetreatOutcome::ExitWizard => Ok(Json(json!({
            "outcome": "exit_wizard",
        }))),
    }
}

#[axum::debug_handler]
pub async fn set_profile(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<SetProfileRequest>,
) -> Result<Json<Value>, AppError> {
    let wizard = session_or_404(&state, session_id).await?;
    let mut wizard = lock_for_user_action(&wizard)?;

    match (request.existing, request.inline) {
        (Some(profile), None) => wizard
            .select_existing_profile(profile)
            .map_err(map_booking_error)?,
        (None, Some(inline)) => wizard
            .edit_inline_profile(inline)
            .map_err(map_booking_error)?,
        _ => {
            return Err(AppError::BadRequest(
                "Provide exactly one of 'existing' or 'inline'".to_string(),
            ))
        }
    }

    Ok(Json(session_view(session_id, &wizard)))
}

#[axum::debug_handler]
pub async fn select_package(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<SelectPackageRequest>,
) -> Result<Json<Value>, AppError> {
    let wizard = session_or_404(&state, session_id).await?;
    let mut wizard = lock_for_user_action(&wizard)?;

    enter_leaf_if_needed(&mut wizard, BookingWizard::enter_package_picker)?;
    wizard
        .select_package(request.package)
        .map_err(map_booking_error)?;

    Ok(Json(session_view(session_id, &wizard)))
}

#[axum::debug_handler]
pub async fn select_services(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<SelectServicesRequest>,
) -> Result<Json<Value>, AppError> {
    let wizard = session_or_404(&state, session_id).await?;
    let mut wizard = lock_for_user_action(&wizard)?;

    enter_leaf_if_needed(&mut wizard, BookingWizard::enter_service_picker)?;
    wizard
        .select_services(request.services)
        .map_err(map_booking_error)?;

    Ok(Json(session_view(session_id, &wizard)))
}

#[axum::debug_handler]
pub async fn select_date(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<SelectDateRequest>,
) -> Result<Json<Value>, AppError> {
    let wizard = session_or_404(&state, session_id).await?;
    let mut wizard = lock_for_user_action(&wizard)?;

    // The booking window is checked against server-authoritative time,
    // falling back to local time when the gateway is unreachable.
    let today = match state.gateways.scheduling.fetch_server_time().await {
        Ok(now) => now.date_naive(),
        Err(e) => {
            warn!("Server time unavailable, falling back to local: {}", e);
            Utc::now().date_naive()
        }
    };

    enter_leaf_if_needed(&mut wizard, BookingWizard::enter_date_picker)?;
    wizard
        .select_date(request.date, today)
        .map_err(map_booking_error)?;

    Ok(Json(session_view(session_id, &wizard)))
}

#[axum::debug_handler]
pub async fn select_time(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
    Json(slot): Json<TimeSlotRef>,
) -> Result<Json<Value>, AppError> {
    let wizard = session_or_404(&state, session_id).await?;
    let mut wizard = lock_for_user_action(&wizard)?;

    enter_leaf_if_needed(&mut wizard, BookingWizard::enter_time_picker)?;
    wizard.select_time(slot).map_err(map_booking_error)?;

    Ok(Json(session_view(session_id, &wizard)))
}

#[axum::debug_handler]
pub async fn set_reason(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<SetReasonRequest>,
) -> Result<Json<Value>, AppError> {
    let wizard = session_or_404(&state, session_id).await?;
    let mut wizard = lock_for_user_action(&wizard)?;

    wizard.set_reason(request.reason);
    Ok(Json(session_view(session_id, &wizard)))
}

#[axum::debug_handler]
pub async fn set_payment_method(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<PaymentMethodRequest>,
) -> Result<Json<Value>, AppError> {
    let wizard = session_or_404(&state, session_id).await?;
    let mut wizard = lock_for_user_action(&wizard)?;

    wizard
        .choose_payment_method(request.method)
        .map_err(map_booking_error)?;

    Ok(Json(session_view(session_id, &wizard)))
}

// ==============================================================================
// PAYMENT HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn confirm_payment(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let wizard = session_or_404(&state, session_id).await?;
    let mut wizard = lock_for_user_action(&wizard)?;

    let progress = wizard
        .confirm_payment(
            state.gateways.appointments.as_ref(),
            state.gateways.payments.as_ref(),
            state.gateways.payment_handler.as_ref(),
        )
        .await
        .map_err(map_booking_error)?;

    if let Some(snapshot) = wizard.snapshot() {
        state
            .sessions
            .register_appointment_code(snapshot.appointment_code, session_id)
            .await;
    }

    let body = match progress {
        PaymentProgress::Confirmed => json!({
            "status": "confirmed",
            "booking": wizard.view(),
        }),
        PaymentProgress::RedirectedToProvider { checkout_url } => json!({
            "status": "awaiting_provider",
            "checkout_url": checkout_url,
            "booking": wizard.view(),
        }),
    };

    Ok(Json(body))
}

/// Normalized entry point for both the deep-link and native-SDK payment
/// results. The raw body is the provider's query string; the owning
/// session is found via `vnp_TxnRef`. Late callbacks for unknown or
/// concluded sessions are acknowledged and dropped.
#[axum::debug_handler]
pub async fn payment_callback(
    State(state): State<Arc<AppState>>,
    body: String,
) -> Result<Json<Value>, AppError> {
    let params =
        crate::services::payment::PaymentCorrelator::parse_callback_params(&body)
            .map_err(map_booking_error)?;

    let appointment_code = params
        .get("vnp_TxnRef")
        .and_then(|v| Uuid::parse_str(v).ok())
        .ok_or_else(|| {
            AppError::BadRequest("Malformed payment callback: missing vnp_TxnRef".to_string())
        })?;

    let wizard = match state.sessions.find_by_appointment_code(appointment_code).await {
        Some(wizard) => wizard,
        None => {
            debug!(
                "Payment callback for unknown appointment {}, ignoring",
                appointment_code
            );
            return Ok(Json(json!({ "outcome": "ignored" })));
        }
    };

    // Queued behind any in-flight transition for this session.
    let mut wizard = wizard.lock().await;
    let outcome = wizard
        .on_payment_callback(&body, state.gateways.payments.as_ref())
        .await
        .map_err(map_booking_error)?;

    let body = match outcome {
        CallbackOutcome::Settled => json!({
            "outcome": "settled",
            "booking": wizard.view(),
        }),
        CallbackOutcome::Failed { code } => json!({
            "outcome": "failed",
            "provider_code": code,
            "booking": wizard.view(),
        }),
        CallbackOutcome::Ignored => json!({ "outcome": "ignored" }),
    };

    Ok(Json(body))
}

// ==============================================================================
// GATEWAY PASS-THROUGH HANDLERS (picker screens)
// ==============================================================================

#[axum::debug_handler]
pub async fn list_packages(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let packages = state
        .gateways
        .catalog
        .fetch_packages()
        .await
        .map_err(map_booking_error)?;
    Ok(Json(json!({ "packages": packages })))
}

#[axum::debug_handler]
pub async fn list_services(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let services = state
        .gateways
        .catalog
        .fetch_services()
        .await
        .map_err(map_booking_error)?;
    Ok(Json(json!({ "services": services })))
}

#[axum::debug_handler]
pub async fn list_common_services(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, AppError> {
    let services = state
        .gateways
        .catalog
        .fetch_common_services()
        .await
        .map_err(map_booking_error)?;
    Ok(Json(json!({ "services": services })))
}

#[axum::debug_handler]
pub async fn list_profiles(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let profiles = state
        .gateways
        .profiles
        .fetch_profiles()
        .await
        .map_err(map_booking_error)?;
    Ok(Json(json!({ "profiles": profiles })))
}

#[axum::debug_handler]
pub async fn create_profile(
    State(state): State<Arc<AppState>>,
    Json(draft): Json<NewProfileDraft>,
) -> Result<Json<Value>, AppError> {
    if !draft.is_complete() {
        return Err(AppError::ValidationError(
            "Fill in full name, gender, phone and date of birth".to_string(),
        ));
    }

    let profile = state
        .gateways
        .profiles
        .create_profile(&draft)
        .await
        .map_err(map_booking_error)?;
    Ok(Json(json!({ "profile": profile })))
}

#[axum::debug_handler]
pub async fn lookup_profile(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProfileLookupQuery>,
) -> Result<Json<Value>, AppError> {
    let profile = state
        .gateways
        .profiles
        .fetch_by_document_number(&query.document_number)
        .await
        .map_err(map_booking_error)?;

    match profile {
        Some(profile) => Ok(Json(json!({ "profile": profile }))),
        None => Err(AppError::NotFound(format!(
            "No profile found for document number {}",
            query.document_number
        ))),
    }
}

#[axum::debug_handler]
pub async fn link_profile(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LinkProfileRequest>,
) -> Result<Json<Value>, AppError> {
    state
        .gateways
        .profiles
        .link_profile(&request.profile_id)
        .await
        .map_err(map_booking_error)?;
    Ok(Json(json!({ "linked": true })))
}

#[axum::debug_handler]
pub async fn list_slots(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SlotsQuery>,
) -> Result<Json<Value>, AppError> {
    let slots = state
        .gateways
        .scheduling
        .fetch_time_slots(
            query.specialty.as_deref(),
            query.doctor_id.as_deref(),
            query.date,
        )
        .await
        .map_err(map_booking_error)?;
    Ok(Json(json!({ "slots": slots })))
}

// ==============================================================================
// INTERNALS
// ==============================================================================

/// Picker endpoints accept a write directly from the overview: entering
/// the leaf and confirming the value arrive as one request.
fn enter_leaf_if_needed(
    wizard: &mut BookingWizard,
    enter: fn(&mut BookingWizard) -> Result<(), BookingError>,
) -> Result<(), AppError> {
    use crate::models::BookingStep;

    if wizard.current_step() == BookingStep::ServiceSelection {
        enter(wizard).map_err(map_booking_error)?;
    }
    Ok(())
}

// libs/booking-cell/src/gateway.rs
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc, NaiveDate};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use shared_gateway::HospitalClient;

use crate::models::{
    AppointmentRecord, BookingError, BookingSnapshot, MedicalPackage, MedicalService,
    NewProfileDraft, PatientProfileRef, PaymentMethod, TimeSlotRef,
};

// ==============================================================================
// GATEWAY RESULT MODELS
// ==============================================================================

/// Authoritative payment state as reported by the hospital backend, which
/// may lag the provider's own callback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GatewayPaymentStatus {
    Settled,
    Pending,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentVerification {
    pub status: GatewayPaymentStatus,
    pub provider_code: Option<String>,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerTime {
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CheckoutUrlResponse {
    url: String,
}

// ==============================================================================
// GATEWAY TRAITS
// ==============================================================================

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProfileGateway: Send + Sync {
    /// Current user's profile plus linked family member profiles.
    async fn fetch_profiles(&self) -> Result<Vec<PatientProfileRef>, BookingError>;

    async fn create_profile(&self, draft: &NewProfileDraft) -> Result<PatientProfileRef, BookingError>;

    async fn fetch_by_document_number(&self, document_number: &str) -> Result<Option<PatientProfileRef>, BookingError>;

    async fn link_profile(&self, profile_id: &str) -> Result<(), BookingError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogGateway: Send + Sync {
    async fn fetch_packages(&self) -> Result<Vec<MedicalPackage>, BookingError>;

    async fn fetch_services(&self) -> Result<Vec<MedicalService>, BookingError>;

    async fn fetch_common_services(&self) -> Result<Vec<MedicalService>, BookingError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SchedulingGateway: Send + Sync {
    async fn fetch_time_slots<'a>(
        &self,
        specialty: Option<&'a str>,
        doctor_id: Option<&'a str>,
        date: NaiveDate,
    ) -> Result<Vec<TimeSlotRef>, BookingError>;

    async fn fetch_server_time(&self) -> Result<DateTime<Utc>, BookingError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AppointmentGateway: Send + Sync {
    async fn create_appointment(&self, snapshot: &BookingSnapshot) -> Result<AppointmentRecord, BookingError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Provider checkout URL for a created appointment.
    async fn checkout_url(&self, appointment_code: Uuid, method: PaymentMethod) -> Result<String, BookingError>;

    /// Authoritative settlement check for provider callback parameters.
    async fn verify_result(&self, params: &HashMap<String, String>) -> Result<PaymentVerification, BookingError>;
}

/// Opens a provider checkout URL (in-app browser or native SDK). Outside
/// this core's control; the result arrives later as a callback payload.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExternalPaymentHandler: Send + Sync {
    async fn open_checkout(&self, url: &str) -> Result<(), BookingError>;
}

// ==============================================================================
// HTTP IMPLEMENTATIONS
// ==============================================================================

fn gateway_err(e: anyhow::Error) -> BookingError {
    BookingError::Gateway(e.to_string())
}

pub struct HttpProfileGateway {
    client: Arc<HospitalClient>,
}

impl HttpProfileGateway {
    pub fn new(client: Arc<HospitalClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProfileGateway for HttpProfileGateway {
    async fn fetch_profiles(&self) -> Result<Vec<PatientProfileRef>, BookingError> {
        self.client
            .request(Method::GET, "/api/v1/patient-profiles", None)
            .await
            .map_err(gateway_err)
    }

    async fn create_profile(&self, draft: &NewProfileDraft) -> Result<PatientProfileRef, BookingError> {
        let body = serde_json::to_value(draft)
            .map_err(|e| BookingError::Gateway(format!("Failed to serialize profile: {}", e)))?;

        self.client
            .request(Method::POST, "/api/v1/patient-profiles", Some(body))
            .await
            .map_err(gateway_err)
    }

    async fn fetch_by_document_number(&self, document_number: &str) -> Result<Option<PatientProfileRef>, BookingError> {
        let path = format!(
            "/api/v1/patient-profiles/lookup?document_number={}",
            urlencoding::encode(document_number)
        );

        let result: Vec<PatientProfileRef> = self.client
            .request(Method::GET, &path, None)
            .await
            .map_err(gateway_err)?;

        Ok(result.into_iter().next())
    }

    async fn link_profile(&self, profile_id: &str) -> Result<(), BookingError> {
        let path = format!("/api/v1/patient-profiles/{}/link", profile_id);
        let _: serde_json::Value = self.client
            .request(Method::POST, &path, None)
            .await
            .map_err(gateway_err)?;

        Ok(())
    }
}

pub struct HttpCatalogGateway {
    client: Arc<HospitalClient>,
}

impl HttpCatalogGateway {
    pub fn new(client: Arc<HospitalClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CatalogGateway for HttpCatalogGateway {
    async fn fetch_packages(&self) -> Result<Vec<MedicalPackage>, BookingError> {
        self.client
            .request(Method::GET, "/api/v1/packages", None)
            .await
            .map_err(gateway_err)
    }

    async fn fetch_services(&self) -> Result<Vec<MedicalService>, BookingError> {
        self.client
            .request(Method::GET, "/api/v1/services", None)
            .await
            .map_err(gateway_err)
    }

    async fn fetch_common_services(&self) -> Result<Vec<MedicalService>, BookingError> {
        self.client
            .request(Method::GET, "/api/v1/services/common", None)
            .await
            .map_err(gateway_err)
    }
}

pub struct HttpSchedulingGateway {
    client: Arc<HospitalClient>,
}

impl HttpSchedulingGateway {
    pub fn new(client: Arc<HospitalClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SchedulingGateway for HttpSchedulingGateway {
    async fn fetch_time_slots<'a>(
        &self,
        specialty: Option<&'a str>,
        doctor_id: Option<&'a str>,
        date: NaiveDate,
    ) -> Result<Vec<TimeSlotRef>, BookingError> {
        let mut path = format!("/api/v1/slots?date={}", date.format("%Y-%m-%d"));
        if let Some(specialty) = specialty {
            path.push_str(&format!("&specialty={}", urlencoding::encode(specialty)));
        }
        if let Some(doctor_id) = doctor_id {
            path.push_str(&format!("&doctor_id={}", urlencoding::encode(doctor_id)));
        }

        self.client
            .request(Method::GET, &path, None)
            .await
            .map_err(gateway_err)
    }

    async fn fetch_server_time(&self) -> Result<DateTime<Utc>, BookingError> {
        let result: ServerTime = self.client
            .request(Method::GET, "/api/v1/server-time", None)
            .await
            .map_err(gateway_err)?;

        Ok(result.now)
    }
}

pub struct HttpAppointmentGateway {
    client: Arc<HospitalClient>,
}

impl HttpAppointmentGateway {
    pub fn new(client: Arc<HospitalClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AppointmentGateway for HttpAppointmentGateway {
    async fn create_appointment(&self, snapshot: &BookingSnapshot) -> Result<AppointmentRecord, BookingError> {
        debug!("Creating appointment {} at hospital backend", snapshot.appointment_code);

        let body = json!({
            "appointment_code": snapshot.appointment_code,
            "patient": &snapshot.identity,
            "package_id": snapshot.package.as_ref().map(|p| p.id.clone()),
            "service_ids": snapshot.services.iter().map(|s| s.id.clone()).collect::<Vec<_>>(),
            "date": snapshot.date.format("%Y-%m-%d").to_string(),
            "time_slot_id": &snapshot.time.id,
            "reason": &snapshot.reason,
            "total_price": snapshot.total_price,
        });

        self.client
            .request(Method::POST, "/api/v1/appointments", Some(body))
            .await
            .map_err(gateway_err)
    }
}

pub struct HttpPaymentGateway {
    client: Arc<HospitalClient>,
}

impl HttpPaymentGateway {
    pub fn new(client: Arc<HospitalClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn checkout_url(&self, appointment_code: Uuid, method: PaymentMethod) -> Result<String, BookingError> {
        let path = format!(
            "/api/v1/payments/{}/checkout-url?method={}",
            appointment_code, method
        );

        let result: CheckoutUrlResponse = self.client
            .request(Method::GET, &path, None)
            .await
            .map_err(gateway_err)?;

        Ok(result.url)
    }

    async fn verify_result(&self, params: &HashMap<String, String>) -> Result<PaymentVerification, BookingError> {
        let body = serde_json::to_value(params)
            .map_err(|e| BookingError::Gateway(format!("Failed to serialize callback params: {}", e)))?;

        self.client
            .request(Method::POST, "/api/v1/payments/verify", Some(body))
            .await
            .map_err(gateway_err)
    }
}

/// Server-side stand-in for the mobile payment handler: the checkout URL
/// is returned to the client, which opens it in an in-app browser.
pub struct ClientRedirectHandler;

#[async_trait]
impl ExternalPaymentHandler for ClientRedirectHandler {
    async fn open_checkout(&self, url: &str) -> Result<(), BookingError> {
        info!("Handing checkout URL to client: {}", url);
        Ok(())
    }
}

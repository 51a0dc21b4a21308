// libs/booking-cell/src/models.rs
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc, NaiveDate};
use std::fmt;

// ==============================================================================
// PATIENT IDENTITY MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatientProfileRef {
    pub id: String,
    pub full_name: String,
    pub gender: String,
    pub phone: String,
    pub date_of_birth: String,
}

/// Inline profile entry, captured field by field on the profile screen.
/// Fields hold raw form input; validation is "required fields non-empty".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NewProfileDraft {
    pub full_name: String,
    pub gender: String,
    pub phone: String,
    pub date_of_birth: String,
    pub email: Option<String>,
    pub id_number: Option<String>,
    pub address: Option<String>,
    pub insurance_number: Option<String>,
}

impl NewProfileDraft {
    pub fn is_complete(&self) -> bool {
        !self.full_name.trim().is_empty()
            && !self.gender.trim().is_empty()
            && !self.phone.trim().is_empty()
            && !self.date_of_birth.trim().is_empty()
    }
}

/// Exactly one identity source is active at a time; selecting an existing
/// profile discards the inline draft and vice versa.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PatientIdentity {
    #[default]
    Unset,
    Existing(PatientProfileRef),
    Inline(NewProfileDraft),
}

impl PatientIdentity {
    pub fn is_set(&self) -> bool {
        !matches!(self, PatientIdentity::Unset)
    }

    pub fn display_name(&self) -> Option<&str> {
        match self {
            PatientIdentity::Unset => None,
            PatientIdentity::Existing(p) => Some(&p.full_name),
            PatientIdentity::Inline(d) => Some(&d.full_name),
        }
    }
}

// ==============================================================================
// CATALOG AND SCHEDULING MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MedicalPackage {
    pub id: String,
    pub name: String,
    pub price: i64,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MedicalService {
    pub id: String,
    pub name: String,
    pub price: i64,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeSlotRef {
    pub id: String,
    pub time: String,
    pub room: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    MoMo,
    VnPay,
    Cash,
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentMethod::MoMo => write!(f, "momo"),
            PaymentMethod::VnPay => write!(f, "vnpay"),
            PaymentMethod::Cash => write!(f, "cash"),
        }
    }
}

// ==============================================================================
// WIZARD STEP MODEL
// ==============================================================================

/// Logical wizard stages. Leaf steps write one draft field and always
/// return to ServiceSelection, never to the previously visited leaf.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookingStep {
    ProfileSelection,
    ServiceSelection,
    ChoosePackage,
    ChooseServices,
    ChooseDate,
    ChooseTime,
    Review,
    Payment,
    Confirmation,
}

impl BookingStep {
    pub fn is_leaf(&self) -> bool {
        matches!(
            self,
            BookingStep::ChoosePackage
                | BookingStep::ChooseServices
                | BookingStep::ChooseDate
                | BookingStep::ChooseTime
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStep::Confirmation)
    }
}

impl fmt::Display for BookingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookingStep::ProfileSelection => write!(f, "profile_selection"),
            BookingStep::ServiceSelection => write!(f, "service_selection"),
            BookingStep::ChoosePackage => write!(f, "choose_package"),
            BookingStep::ChooseServices => write!(f, "choose_services"),
            BookingStep::ChooseDate => write!(f, "choose_date"),
            BookingStep::ChooseTime => write!(f, "choose_time"),
            BookingStep::Review => write!(f, "review"),
            BookingStep::Payment => write!(f, "payment"),
            BookingStep::Confirmation => write!(f, "confirmation"),
        }
    }
}

// ==============================================================================
// BOOKING DRAFT
// ==============================================================================

/// The accumulated state of one in-progress booking session. Mutated in
/// place by the wizard; discarded on reset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingDraft {
    pub identity: PatientIdentity,
    pub selected_package: Option<MedicalPackage>,
    pub selected_services: Vec<MedicalService>,
    pub selected_date: Option<NaiveDate>,
    pub selected_time: Option<TimeSlotRef>,
    pub reason: Option<String>,
    pub payment_method: Option<PaymentMethod>,
    pub current_step: BookingStep,
}

impl Default for BookingDraft {
    fn default() -> Self {
        Self {
            identity: PatientIdentity::Unset,
            selected_package: None,
            selected_services: Vec::new(),
            selected_date: None,
            selected_time: None,
            reason: None,
            payment_method: None,
            current_step: BookingStep::ProfileSelection,
        }
    }
}

impl BookingDraft {
    /// A package or at least one service has been chosen.
    pub fn has_content_selection(&self) -> bool {
        self.selected_package.is_some() || !self.selected_services.is_empty()
    }

    /// Content-complete: (package OR services) AND date AND time.
    pub fn is_content_complete(&self) -> bool {
        self.has_content_selection()
            && self.selected_date.is_some()
            && self.selected_time.is_some()
    }

    pub fn total_price(&self) -> i64 {
        let package_price = self.selected_package.as_ref().map(|p| p.price).unwrap_or(0);
        let services_price: i64 = self.selected_services.iter().map(|s| s.price).sum();
        package_price + services_price
    }
}

// ==============================================================================
// SNAPSHOT AND APPOINTMENT MODELS
// ==============================================================================

/// Immutable copy of the draft taken at the Review -> Payment transition.
/// Submission and payment correlation read this, never the live draft.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingSnapshot {
    pub appointment_code: Uuid,
    pub identity: PatientIdentity,
    pub package: Option<MedicalPackage>,
    pub services: Vec<MedicalService>,
    pub date: NaiveDate,
    pub time: TimeSlotRef,
    pub reason: Option<String>,
    pub total_price: i64,
    pub frozen_at: DateTime<Utc>,
}

impl BookingSnapshot {
    /// Freeze the draft. Caller must have checked content-completeness;
    /// a draft missing date or time cannot be frozen.
    pub fn from_draft(draft: &BookingDraft) -> Option<Self> {
        let date = draft.selected_date?;
        let time = draft.selected_time.clone()?;

        Some(Self {
            appointment_code: Uuid::new_v4(),
            identity: draft.identity.clone(),
            package: draft.selected_package.clone(),
            services: draft.selected_services.clone(),
            date,
            time,
            reason: draft.reason.clone(),
            total_price: draft.total_price(),
            frozen_at: Utc::now(),
        })
    }

    /// Whether the live draft still matches this snapshot's content. Used
    /// to decide if re-entering Payment needs a fresh freeze.
    pub fn matches_draft(&self, draft: &BookingDraft) -> bool {
        self.identity == draft.identity
            && self.package == draft.selected_package
            && self.services == draft.selected_services
            && Some(self.date) == draft.selected_date
            && Some(&self.time) == draft.selected_time.as_ref()
            && self.reason == draft.reason
    }
}

/// Remote appointment record returned by the hospital backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentRecord {
    pub id: String,
    pub appointment_code: Uuid,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

// ==============================================================================
// PAYMENT SESSION MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentSessionStatus {
    Pending,
    Settled,
    Failed { code: String },
    Abandoned,
}

impl PaymentSessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentSessionStatus::Pending)
    }
}

/// Ephemeral correlation state for one outstanding payment attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSession {
    pub appointment_code: Uuid,
    pub method: PaymentMethod,
    pub created_at: DateTime<Utc>,
    pub awaiting_external_result: bool,
    pub status: PaymentSessionStatus,
}

// ==============================================================================
// VALIDATION RULES
// ==============================================================================

#[derive(Debug, Clone)]
pub struct BookingValidationRules {
    pub max_advance_booking_days: i64,
    pub allow_same_day_booking: bool,
}

impl Default for BookingValidationRules {
    fn default() -> Self {
        Self {
            max_advance_booking_days: 60,
            allow_same_day_booking: true,
        }
    }
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum BookingError {
    #[error("{0}")]
    Validation(String),

    #[error("Cannot {action} from step {from}")]
    InvalidTransition { from: BookingStep, action: &'static str },

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Payment failed with provider code {0}")]
    PaymentProvider(String),

    #[error("Stale payment callback for an inactive session")]
    StalePaymentCallback,

    #[error("Malformed payment callback: {0}")]
    MalformedCallback(String),

    #[error("No confirmed booking snapshot for this session")]
    SnapshotMissing,

    #[error("Payment result not available after {0} attempts")]
    ResultFetchExhausted(u32),
}

// ==============================================================================
// VIEW MODELS
// ==============================================================================

/// UI-facing summary of the session, returned by the session endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingDraftView {
    pub current_step: BookingStep,
    pub patient_name: Option<String>,
    pub package_name: Option<String>,
    pub service_names: Vec<String>,
    pub selected_date: Option<NaiveDate>,
    pub selected_time: Option<String>,
    pub reason: Option<String>,
    pub payment_method: Option<PaymentMethod>,
    pub total_price: i64,
    pub content_complete: bool,
    pub appointment_code: Option<Uuid>,
}

impl BookingDraftView {
    pub fn new(draft: &BookingDraft, snapshot: Option<&BookingSnapshot>) -> Self {
        Self {
            current_step: draft.current_step,
            patient_name: draft.identity.display_name().map(str::to_string),
            package_name: draft.selected_package.as_ref().map(|p| p.name.clone()),
            service_names: draft.selected_services.iter().map(|s| s.name.clone()).collect(),
            selected_date: draft.selected_date,
            selected_time: draft.selected_time.as_ref().map(|t| t.time.clone()),
            reason: draft.reason.clone(),
            payment_method: draft.payment_method,
            total_price: draft.total_price(),
            content_complete: draft.is_content_complete(),
            appointment_code: snapshot.map(|s| s.appointment_code),
        }
    }
}

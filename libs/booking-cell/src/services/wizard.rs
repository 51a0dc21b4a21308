// libs/booking-cell/src/services/wizard.rs
use chrono::NaiveDate;
use tracing::{debug, info};

use crate::gateway::{AppointmentGateway, ExternalPaymentHandler, PaymentGateway};
use crate::models::{
    AppointmentRecord, BookingDraft, BookingDraftView, BookingError, BookingSnapshot, BookingStep,
    BookingValidationRules, MedicalPackage, MedicalService, NewProfileDraft, PatientIdentity,
    PatientProfileRef, PaymentMethod, PaymentSession, TimeSlotRef,
};
use crate::services::payment::{CallbackOutcome, PaymentCorrelator};
use crate::services::validator;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetreatOutcome {
    Moved(BookingStep),
    /// Backing out of the first step leaves the wizard; navigation is the
    /// caller's concern.
    ExitWizard,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PaymentProgress {
    /// Cash: appointment created, session settled, wizard confirmed.
    Confirmed,
    /// MoMo/VNPay: appointment created, checkout opened, awaiting the
    /// external result.
    RedirectedToProvider { checkout_url: String },
}

/// The booking state machine. Owns the draft, the frozen snapshot and the
/// payment correlator; all mutations arrive as sequential events on one
/// logical thread of control per session.
pub struct BookingWizard {
    draft: BookingDraft,
    snapshot: Option<BookingSnapshot>,
    submitted: Option<AppointmentRecord>,
    payment: PaymentCorrelator,
    rules: BookingValidationRules,
}

impl Default for BookingWizard {
    fn default() -> Self {
        Self::new()
    }
}

impl BookingWizard {
    pub fn new() -> Self {
        Self::with_rules(BookingValidationRules::default())
    }

    pub fn with_rules(rules: BookingValidationRules) -> Self {
        Self {
            draft: BookingDraft::default(),
            snapshot: None,
            submitted: None,
            payment: PaymentCorrelator::new(),
            rules,
        }
    }

    pub fn draft(&self) -> &BookingDraft {
        &self.draft
    }

    pub fn current_step(&self) -> BookingStep {
        self.draft.current_step
    }

    pub fn snapshot(&self) -> Option<&BookingSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn submitted_appointment(&self) -> Option<&AppointmentRecord> {
        self.submitted.as_ref()
    }

    pub fn payment_session(&self) -> Option<&PaymentSession> {
        self.payment.session()
    }

    pub fn view(&self) -> BookingDraftView {
        BookingDraftView::new(&self.draft, self.snapshot.as_ref())
    }

    // ==========================================================================
    // PROFILE STEP
    // ==========================================================================

    /// Selecting an existing profile discards any inline draft.
    pub fn select_existing_profile(&mut self, profile: PatientProfileRef) -> Result<(), BookingError> {
        self.require_step(BookingStep::ProfileSelection, "select a profile")?;
        debug!("Selected existing profile {}", profile.id);
        self.draft.identity = PatientIdentity::Existing(profile);
        Ok(())
    }

    /// Editing the inline form discards any selected existing profile.
    pub fn edit_inline_profile(&mut self, inline: NewProfileDraft) -> Result<(), BookingError> {
        self.require_step(BookingStep::ProfileSelection, "edit the patient form")?;
        self.draft.identity = PatientIdentity::Inline(inline);
        Ok(())
    }

    // ==========================================================================
    // FORWARD / BACKWARD TRANSITIONS
    // ==========================================================================

    /// Validator-gated forward transition. On rejection the state is
    /// unchanged and the reason is returned to the caller.
    pub fn advance(&mut self) -> Result<BookingStep, BookingError> {
        let step = self.draft.current_step;
        validator::validate_advance(step, &self.draft)?;

        let next = match step {
            BookingStep::ProfileSelection => BookingStep::ServiceSelection,
            BookingStep::ServiceSelection => BookingStep::Review,
            BookingStep::Review => {
                self.freeze_snapshot();
                BookingStep::Payment
            }
            BookingStep::Payment => {
                if !self.payment.is_settled() {
                    return Err(BookingError::Validation(
                        "Complete the payment to continue".to_string(),
                    ));
                }
                BookingStep::Confirmation
            }
            // A leaf's "confirm" without a new value just returns to the
            // overview.
            BookingStep::ChoosePackage
            | BookingStep::ChooseServices
            | BookingStep::ChooseDate
            | BookingStep::ChooseTime => BookingStep::ServiceSelection,
            BookingStep::Confirmation => unreachable!("validator rejects terminal advance"),
        };

        info!("Wizard advanced: {} -> {}", step, next);
        self.draft.current_step = next;
        Ok(next)
    }

    /// Back navigation. Leaves always return to the ServiceSelection
    /// overview, never to the previously visited leaf.
    pub fn retreat(&mut self) -> RetreatOutcome {
        let step = self.draft.current_step;

        let next = match step {
            BookingStep::ProfileSelection => return RetreatOutcome::ExitWizard,
            BookingStep::ServiceSelection => BookingStep::ProfileSelection,
            BookingStep::ChoosePackage
            | BookingStep::ChooseServices
            | BookingStep::ChooseDate
            | BookingStep::ChooseTime => BookingStep::ServiceSelection,
            BookingStep::Review => BookingStep::ServiceSelection,
            BookingStep::Payment => {
                // Leaving the payment screen abandons any pending session;
                // a late callback must not settle this booking.
                self.payment.abandon();
                BookingStep::Review
            }
            BookingStep::Confirmation => return RetreatOutcome::ExitWizard,
        };

        info!("Wizard retreated: {} -> {}", step, next);
        self.draft.current_step = next;
        RetreatOutcome::Moved(next)
    }

    // ==========================================================================
    // SUB-SELECTION LEAVES
    // ==========================================================================

    pub fn enter_package_picker(&mut self) -> Result<(), BookingError> {
        self.enter_leaf(BookingStep::ChoosePackage, "open the package picker")
    }

    pub fn enter_service_picker(&mut self) -> Result<(), BookingError> {
        self.enter_leaf(BookingStep::ChooseServices, "open the service picker")
    }

    pub fn enter_date_picker(&mut self) -> Result<(), BookingError> {
        self.enter_leaf(BookingStep::ChooseDate, "open the date picker")
    }

    pub fn enter_time_picker(&mut self) -> Result<(), BookingError> {
        self.enter_leaf(BookingStep::ChooseTime, "open the time picker")
    }

    /// Write the package selection and return to the overview. Changing
    /// the package invalidates the downstream date and time choices.
    pub fn select_package(&mut self, package: Option<MedicalPackage>) -> Result<BookingStep, BookingError> {
        self.require_step(BookingStep::ChoosePackage, "select a package")?;

        let changed = self.draft.selected_package.as_ref().map(|p| &p.id)
            != package.as_ref().map(|p| &p.id);
        if changed {
            self.clear_schedule("package changed");
        }

        self.draft.selected_package = package;
        self.return_to_overview()
    }

    /// Write the service set (unique by id, order-preserving) and return
    /// to the overview. A substantive change clears date and time.
    pub fn select_services(&mut self, services: Vec<MedicalService>) -> Result<BookingStep, BookingError> {
        self.require_step(BookingStep::ChooseServices, "select services")?;

        let mut deduped: Vec<MedicalService> = Vec::with_capacity(services.len());
        for service in services {
            if !deduped.iter().any(|s| s.id == service.id) {
                deduped.push(service);
            }
        }

        let mut old_ids: Vec<&str> = self.draft.selected_services.iter().map(|s| s.id.as_str()).collect();
        let mut new_ids: Vec<&str> = deduped.iter().map(|s| s.id.as_str()).collect();
        old_ids.sort_unstable();
        new_ids.sort_unstable();

        if old_ids != new_ids {
            self.clear_schedule("service set changed");
        }

        self.draft.selected_services = deduped;
        self.return_to_overview()
    }

    /// Write the exam date and return to the overview. A new date always
    /// clears the previously selected time slot.
    pub fn select_date(&mut self, date: NaiveDate, today: NaiveDate) -> Result<BookingStep, BookingError> {
        self.require_step(BookingStep::ChooseDate, "select a date")?;

        if date < today {
            return Err(BookingError::Validation(
                "The exam date cannot be in the past".to_string(),
            ));
        }
        if date == today && !self.rules.allow_same_day_booking {
            return Err(BookingError::Validation(
                "Same-day booking is not available".to_string(),
            ));
        }
        if date > today + chrono::Duration::days(self.rules.max_advance_booking_days) {
            return Err(BookingError::Validation(format!(
                "The exam date must be within {} days",
                self.rules.max_advance_booking_days
            )));
        }

        if self.draft.selected_date != Some(date) {
            debug!("Exam date changed, clearing selected time");
            self.draft.selected_time = None;
        }

        self.draft.selected_date = Some(date);
        self.return_to_overview()
    }

    /// Write the time slot and return to the overview. A slot is only
    /// meaningful for an already chosen date.
    pub fn select_time(&mut self, slot: TimeSlotRef) -> Result<BookingStep, BookingError> {
        self.require_step(BookingStep::ChooseTime, "select a time slot")?;

        if self.draft.selected_date.is_none() {
            return Err(BookingError::Validation(
                "Select an exam date first".to_string(),
            ));
        }

        self.draft.selected_time = Some(slot);
        self.return_to_overview()
    }

    pub fn set_reason(&mut self, reason: Option<String>) {
        self.draft.reason = reason.filter(|r| !r.trim().is_empty());
    }

    pub fn choose_payment_method(&mut self, method: PaymentMethod) -> Result<(), BookingError> {
        self.require_step(BookingStep::Payment, "choose a payment method")?;
        self.draft.payment_method = Some(method);
        Ok(())
    }

    // ==========================================================================
    // SUBMISSION AND PAYMENT
    // ==========================================================================

    /// Create the remote appointment for the current snapshot. Idempotent
    /// per snapshot: a second call returns the first result without a
    /// second remote create.
    pub async fn submit_appointment(
        &mut self,
        appointments: &dyn AppointmentGateway,
    ) -> Result<AppointmentRecord, BookingError> {
        let snapshot = self.snapshot.as_ref().ok_or(BookingError::SnapshotMissing)?;

        if let Some(existing) = &self.submitted {
            info!(
                "Appointment {} already created for this snapshot, short-circuiting",
                snapshot.appointment_code
            );
            return Ok(existing.clone());
        }

        let record = appointments.create_appointment(snapshot).await?;
        info!(
            "Appointment {} created (remote id {})",
            record.appointment_code, record.id
        );
        self.submitted = Some(record.clone());
        Ok(record)
    }

    /// Confirm payment on the Payment step. Cash settles immediately and
    /// completes the wizard; MoMo/VNPay create the appointment first, then
    /// redirect to the provider and wait for the external callback.
    pub async fn confirm_payment(
        &mut self,
        appointments: &dyn AppointmentGateway,
        payments: &dyn PaymentGateway,
        handler: &dyn ExternalPaymentHandler,
    ) -> Result<PaymentProgress, BookingError> {
        self.require_step(BookingStep::Payment, "confirm payment")?;

        let method = self.draft.payment_method.ok_or_else(|| {
            BookingError::Validation("Select a payment method".to_string())
        })?;
        let appointment_code = self
            .snapshot
            .as_ref()
            .ok_or(BookingError::SnapshotMissing)?
            .appointment_code;

        match method {
            PaymentMethod::Cash => {
                self.submit_appointment(appointments).await?;
                self.payment.settle_cash(appointment_code);
                self.draft.current_step = BookingStep::Confirmation;
                info!("Cash booking confirmed for appointment {}", appointment_code);
                Ok(PaymentProgress::Confirmed)
            }
            PaymentMethod::MoMo | PaymentMethod::VnPay => {
                // Created before the redirect so the provider callback has
                // an appointment to settle against.
                self.submit_appointment(appointments).await?;
                let checkout_url = payments.checkout_url(appointment_code, method).await?;
                handler.open_checkout(&checkout_url).await?;
                self.payment.begin_awaiting(appointment_code, method);
                info!(
                    "Redirected appointment {} to {} checkout",
                    appointment_code, method
                );
                Ok(PaymentProgress::RedirectedToProvider { checkout_url })
            }
        }
    }

    /// Feed one externally-delivered payment result into the correlator.
    /// A settle signal advances the wizard to Confirmation exactly once.
    pub async fn on_payment_callback(
        &mut self,
        raw_payload: &str,
        payments: &dyn PaymentGateway,
    ) -> Result<CallbackOutcome, BookingError> {
        let outcome = self.payment.on_external_result(raw_payload, payments).await?;

        if outcome == CallbackOutcome::Settled
            && self.draft.current_step == BookingStep::Payment
        {
            self.draft.current_step = BookingStep::Confirmation;
            info!("Payment settled, wizard advanced to confirmation");
        }

        Ok(outcome)
    }

    /// "New booking" from the confirmation screen: discard everything and
    /// return to the initial state.
    pub fn reset(&mut self) {
        info!("Wizard reset to initial state");
        self.payment.abandon();
        self.draft = BookingDraft::default();
        self.snapshot = None;
        self.submitted = None;
        self.payment = PaymentCorrelator::new();
    }

    // ==========================================================================
    // INTERNALS
    // ==========================================================================

    fn require_step(&self, expected: BookingStep, action: &'static str) -> Result<(), BookingError> {
        if self.draft.current_step != expected {
            return Err(BookingError::InvalidTransition {
                from: self.draft.current_step,
                action,
            });
        }
        Ok(())
    }

    fn enter_leaf(&mut self, leaf: BookingStep, action: &'static str) -> Result<(), BookingError> {
        self.require_step(BookingStep::ServiceSelection, action)?;
        debug!("Entering leaf step {}", leaf);
        self.draft.current_step = leaf;
        Ok(())
    }

    fn return_to_overview(&mut self) -> Result<BookingStep, BookingError> {
        self.draft.current_step = BookingStep::ServiceSelection;
        Ok(BookingStep::ServiceSelection)
    }

    fn clear_schedule(&mut self, why: &str) {
        if self.draft.selected_date.is_some() || self.draft.selected_time.is_some() {
            debug!("Clearing date/time selections: {}", why);
        }
        self.draft.selected_date = None;
        self.draft.selected_time = None;
    }

    /// Freeze the draft at Review -> Payment. Re-entering with an
    /// unchanged draft keeps the snapshot (and the created appointment);
    /// any content change produces a fresh code and drops the stale
    /// submission and payment session.
    fn freeze_snapshot(&mut self) {
        let reusable = self
            .snapshot
            .as_ref()
            .map(|s| s.matches_draft(&self.draft))
            .unwrap_or(false);

        if reusable {
            debug!("Draft unchanged since last freeze, keeping snapshot");
            return;
        }

        if self.snapshot.is_some() {
            debug!("Draft changed since last freeze, discarding stale snapshot");
            self.payment.abandon();
            self.submitted = None;
        }

        // Content-completeness was validated before the transition, so the
        // freeze cannot fail here.
        self.snapshot = BookingSnapshot::from_draft(&self.draft);
    }
}

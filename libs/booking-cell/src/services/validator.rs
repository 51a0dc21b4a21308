// libs/booking-cell/src/services/validator.rs
use tracing::debug;

use crate::models::{BookingDraft, BookingError, BookingStep, PatientIdentity};

/// Whether an explicit "next" request from `step` would be accepted for
/// the current draft.
pub fn can_proceed(step: BookingStep, draft: &BookingDraft) -> bool {
    validate_advance(step, draft).is_ok()
}

/// Gate an advance request. Failures carry the user-facing message; the
/// caller leaves the wizard state untouched on error.
pub fn validate_advance(step: BookingStep, draft: &BookingDraft) -> Result<(), BookingError> {
    debug!("Validating advance from step {}", step);

    match step {
        BookingStep::ProfileSelection => validate_profile(draft),
        BookingStep::ServiceSelection | BookingStep::Review => validate_content(draft),
        BookingStep::Payment => {
            if draft.payment_method.is_none() {
                return Err(BookingError::Validation(
                    "Select a payment method".to_string(),
                ));
            }
            Ok(())
        }
        BookingStep::Confirmation => Err(BookingError::InvalidTransition {
            from: step,
            action: "advance",
        }),
        // Leaf screens gate their own confirm button locally; writing a
        // value and returning to the overview is never validator-gated.
        BookingStep::ChoosePackage
        | BookingStep::ChooseServices
        | BookingStep::ChooseDate
        | BookingStep::ChooseTime => Ok(()),
    }
}

fn validate_profile(draft: &BookingDraft) -> Result<(), BookingError> {
    match &draft.identity {
        PatientIdentity::Unset => Err(BookingError::Validation(
            "Select a patient profile or fill in the new patient form".to_string(),
        )),
        PatientIdentity::Inline(inline) if !inline.is_complete() => Err(BookingError::Validation(
            "Fill in full name, gender, phone and date of birth".to_string(),
        )),
        _ => Ok(()),
    }
}

fn validate_content(draft: &BookingDraft) -> Result<(), BookingError> {
    if !draft.has_content_selection() {
        return Err(BookingError::Validation(
            "Select a specialty/package or at least one service".to_string(),
        ));
    }
    if draft.selected_date.is_none() {
        return Err(BookingError::Validation(
            "Select an exam date".to_string(),
        ));
    }
    if draft.selected_time.is_none() {
        return Err(BookingError::Validation(
            "Select an exam time".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        MedicalService, NewProfileDraft, PatientProfileRef, PaymentMethod, TimeSlotRef,
    };
    use assert_matches::assert_matches;
    use chrono::NaiveDate;

    fn service(id: &str, price: i64) -> MedicalService {
        MedicalService {
            id: id.to_string(),
            name: format!("Service {}", id),
            price,
            description: None,
        }
    }

    fn slot(id: &str) -> TimeSlotRef {
        TimeSlotRef {
            id: id.to_string(),
            time: "08:00-09:00".to_string(),
            room: None,
        }
    }

    fn complete_draft() -> BookingDraft {
        let mut draft = BookingDraft::default();
        draft.selected_services = vec![service("S1", 200_000)];
        draft.selected_date = NaiveDate::from_ymd_opt(2025, 5, 29);
        draft.selected_time = Some(slot("T1"));
        draft
    }

    #[test]
    fn profile_step_rejects_unset_identity() {
        let draft = BookingDraft::default();

        assert!(!can_proceed(BookingStep::ProfileSelection, &draft));
        assert_matches!(
            validate_advance(BookingStep::ProfileSelection, &draft),
            Err(BookingError::Validation(msg)) if msg.contains("patient profile")
        );
    }

    #[test]
    fn profile_step_rejects_incomplete_inline_fields() {
        let mut draft = BookingDraft::default();
        draft.identity = PatientIdentity::Inline(NewProfileDraft {
            full_name: "Nguyen Van A".to_string(),
            phone: "0912345678".to_string(),
            ..Default::default()
        });

        assert!(!can_proceed(BookingStep::ProfileSelection, &draft));
    }

    #[test]
    fn profile_step_accepts_existing_profile() {
        let mut draft = BookingDraft::default();
        draft.identity = PatientIdentity::Existing(PatientProfileRef {
            id: "P1".to_string(),
            full_name: "Nguyen Van A".to_string(),
            gender: "Nam".to_string(),
            phone: "0912345678".to_string(),
            date_of_birth: "01/01/1990".to_string(),
        });

        assert!(can_proceed(BookingStep::ProfileSelection, &draft));
    }

    #[test]
    fn profile_step_accepts_complete_inline_fields() {
        let mut draft = BookingDraft::default();
        draft.identity = PatientIdentity::Inline(NewProfileDraft {
            full_name: "Nguyen Van A".to_string(),
            gender: "Nam".to_string(),
            phone: "0912345678".to_string(),
            date_of_birth: "01/01/1990".to_string(),
            ..Default::default()
        });

        assert!(can_proceed(BookingStep::ProfileSelection, &draft));
    }

    #[test]
    fn selection_step_requires_package_or_service() {
        let mut draft = complete_draft();
        draft.selected_services.clear();

        assert_matches!(
            validate_advance(BookingStep::ServiceSelection, &draft),
            Err(BookingError::Validation(msg)) if msg.contains("at least one service")
        );
    }

    #[test]
    fn selection_step_requires_date_and_time() {
        let mut draft = complete_draft();
        draft.selected_date = None;
        assert_matches!(
            validate_advance(BookingStep::ServiceSelection, &draft),
            Err(BookingError::Validation(msg)) if msg.contains("exam date")
        );

        let mut draft = complete_draft();
        draft.selected_time = None;
        assert_matches!(
            validate_advance(BookingStep::ServiceSelection, &draft),
            Err(BookingError::Validation(msg)) if msg.contains("exam time")
        );
    }

    #[test]
    fn can_proceed_matches_content_completeness() {
        // (package OR services) AND date AND time, checked across the grid
        // of present/absent combinations.
        let package = crate::models::MedicalPackage {
            id: "PK1".to_string(),
            name: "General checkup".to_string(),
            price: 500_000,
            description: None,
        };

        for has_package in [false, true] {
            for has_service in [false, true] {
                for has_date in [false, true] {
                    for has_time in [false, true] {
                        let mut draft = BookingDraft::default();
                        if has_package {
                            draft.selected_package = Some(package.clone());
                        }
                        if has_service {
                            draft.selected_services = vec![service("S1", 100_000)];
                        }
                        if has_date {
                            draft.selected_date = NaiveDate::from_ymd_opt(2025, 5, 29);
                        }
                        if has_time {
                            draft.selected_time = Some(slot("T1"));
                        }

                        let expected = (has_package || has_service) && has_date && has_time;
                        assert_eq!(
                            can_proceed(BookingStep::ServiceSelection, &draft),
                            expected,
                            "package={} service={} date={} time={}",
                            has_package, has_service, has_date, has_time
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn review_step_uses_same_content_gate() {
        assert!(can_proceed(BookingStep::Review, &complete_draft()));
        assert!(!can_proceed(BookingStep::Review, &BookingDraft::default()));
    }

    #[test]
    fn payment_step_requires_method() {
        let mut draft = complete_draft();
        assert_matches!(
            validate_advance(BookingStep::Payment, &draft),
            Err(BookingError::Validation(msg)) if msg.contains("payment method")
        );

        draft.payment_method = Some(PaymentMethod::Cash);
        assert!(can_proceed(BookingStep::Payment, &draft));
    }

    #[test]
    fn confirmation_is_terminal() {
        assert_matches!(
            validate_advance(BookingStep::Confirmation, &complete_draft()),
            Err(BookingError::InvalidTransition { .. })
        );
    }

    #[test]
    fn leaf_steps_are_not_gated() {
        let draft = BookingDraft::default();
        for step in [
            BookingStep::ChoosePackage,
            BookingStep::ChooseServices,
            BookingStep::ChooseDate,
            BookingStep::ChooseTime,
        ] {
            assert!(can_proceed(step, &draft));
        }
    }
}

// libs/booking-cell/src/services/payment.rs
use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::gateway::{GatewayPaymentStatus, PaymentGateway, PaymentVerification};
use crate::models::{BookingError, PaymentMethod, PaymentSession, PaymentSessionStatus};

/// Provider-reported success in a VNPay-shaped callback payload.
pub const PROVIDER_SUCCESS_CODE: &str = "00";

// The backend may lag the provider's callback, so the authoritative
// result is polled a bounded number of times.
const RESULT_FETCH_ATTEMPTS: u32 = 5;
const RESULT_FETCH_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub enum CallbackOutcome {
    /// Gateway confirmed settlement; the wizard should advance to
    /// Confirmation exactly once.
    Settled,
    /// Provider or gateway reported failure; the code is surfaced to the
    /// user and the wizard stays on Payment.
    Failed { code: String },
    /// Late or duplicate callback for an inactive session. Not an error.
    Ignored,
}

/// Reconciles externally-delivered payment results (deep link or native
/// SDK event, normalized upstream into one raw query string) with the
/// session's pending payment attempt.
#[derive(Debug, Default)]
pub struct PaymentCorrelator {
    session: Option<PaymentSession>,
}

impl PaymentCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self) -> Option<&PaymentSession> {
        self.session.as_ref()
    }

    pub fn is_settled(&self) -> bool {
        matches!(
            self.session.as_ref().map(|s| &s.status),
            Some(PaymentSessionStatus::Settled)
        )
    }

    pub fn active_code(&self) -> Option<Uuid> {
        self.session.as_ref().map(|s| s.appointment_code)
    }

    /// Cash settles immediately; there is no external result to wait for.
    pub fn settle_cash(&mut self, appointment_code: Uuid) {
        info!("Cash payment settled for appointment {}", appointment_code);
        self.session = Some(PaymentSession {
            appointment_code,
            method: PaymentMethod::Cash,
            created_at: Utc::now(),
            awaiting_external_result: false,
            status: PaymentSessionStatus::Settled,
        });
    }

    /// Start waiting for an external provider result. Replaces any
    /// previous session; a pending one is abandoned first.
    pub fn begin_awaiting(&mut self, appointment_code: Uuid, method: PaymentMethod) {
        if let Some(previous) = &self.session {
            if previous.appointment_code != appointment_code && !previous.status.is_terminal() {
                debug!(
                    "Abandoning pending payment session for appointment {}",
                    previous.appointment_code
                );
            }
        }

        self.session = Some(PaymentSession {
            appointment_code,
            method,
            created_at: Utc::now(),
            awaiting_external_result: true,
            status: PaymentSessionStatus::Pending,
        });
    }

    /// User left the payment screen before a result arrived. Callbacks
    /// for this session are ignored from now on.
    pub fn abandon(&mut self) {
        if let Some(session) = &mut self.session {
            if !session.status.is_terminal() {
                info!(
                    "Payment session abandoned for appointment {}",
                    session.appointment_code
                );
                session.status = PaymentSessionStatus::Abandoned;
            }
            session.awaiting_external_result = false;
        }
    }

    /// Parse a query-string-shaped callback payload (optionally a full
    /// deep-link URL) into key/value pairs.
    pub fn parse_callback_params(raw: &str) -> Result<HashMap<String, String>, BookingError> {
        let query = match raw.split_once('?') {
            Some((_, query)) => query,
            None => raw,
        };

        let mut params = HashMap::new();
        for pair in query.split('&') {
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = urlencoding::decode(key)
                .map_err(|e| BookingError::MalformedCallback(e.to_string()))?;
            let value = urlencoding::decode(value)
                .map_err(|e| BookingError::MalformedCallback(e.to_string()))?;
            params.insert(key.into_owned(), value.into_owned());
        }

        if params.is_empty() {
            return Err(BookingError::MalformedCallback("empty payload".to_string()));
        }

        Ok(params)
    }

    /// Process one externally-delivered payment result. Provider success
    /// (`vnp_ResponseCode=00`) is only trusted after the gateway confirms
    /// settlement; any other code fails the session with that code as the
    /// user-facing detail.
    pub async fn on_external_result(
        &mut self,
        raw_payload: &str,
        payments: &dyn PaymentGateway,
    ) -> Result<CallbackOutcome, BookingError> {
        let params = Self::parse_callback_params(raw_payload)?;

        let response_code = params
            .get("vnp_ResponseCode")
            .cloned()
            .ok_or_else(|| BookingError::MalformedCallback("missing vnp_ResponseCode".to_string()))?;
        let callback_code = params
            .get("vnp_TxnRef")
            .and_then(|v| Uuid::parse_str(v).ok());

        let session = match &mut self.session {
            Some(session) => session,
            None => {
                debug!("Payment callback with no active session, ignoring");
                return Ok(CallbackOutcome::Ignored);
            }
        };

        if session.status.is_terminal() || !session.awaiting_external_result {
            debug!(
                "Payment callback for concluded session {}, ignoring",
                session.appointment_code
            );
            return Ok(CallbackOutcome::Ignored);
        }

        if let Some(code) = callback_code {
            if code != session.appointment_code {
                debug!(
                    "Payment callback for appointment {} does not match active session {}, ignoring",
                    code, session.appointment_code
                );
                return Ok(CallbackOutcome::Ignored);
            }
        }

        if response_code != PROVIDER_SUCCESS_CODE {
            warn!(
                "Provider reported payment failure for appointment {}: code {}",
                session.appointment_code, response_code
            );
            session.status = PaymentSessionStatus::Failed {
                code: response_code.clone(),
            };
            session.awaiting_external_result = false;
            return Ok(CallbackOutcome::Failed { code: response_code });
        }

        let verification = fetch_settled_result_with_retry(payments, &params).await?;

        match verification.status {
            GatewayPaymentStatus::Settled => {
                info!(
                    "Payment settled for appointment {} (transaction {:?})",
                    session.appointment_code, verification.transaction_id
                );
                session.status = PaymentSessionStatus::Settled;
                session.awaiting_external_result = false;
                Ok(CallbackOutcome::Settled)
            }
            _ => {
                let code = verification
                    .provider_code
                    .unwrap_or_else(|| "declined".to_string());
                warn!(
                    "Gateway declined payment for appointment {}: code {}",
                    session.appointment_code, code
                );
                session.status = PaymentSessionStatus::Failed { code: code.clone() };
                session.awaiting_external_result = false;
                Ok(CallbackOutcome::Failed { code })
            }
        }
    }
}

/// Poll the gateway for a terminal payment result, up to
/// `RESULT_FETCH_ATTEMPTS` attempts with a fixed delay.
pub async fn fetch_settled_result_with_retry(
    payments: &dyn PaymentGateway,
    params: &HashMap<String, String>,
) -> Result<PaymentVerification, BookingError> {
    for attempt in 1..=RESULT_FETCH_ATTEMPTS {
        match payments.verify_result(params).await {
            Ok(verification) if verification.status != GatewayPaymentStatus::Pending => {
                return Ok(verification);
            }
            Ok(_) => {
                debug!(
                    "Payment result still pending at gateway (attempt {}/{})",
                    attempt, RESULT_FETCH_ATTEMPTS
                );
            }
            Err(e) => {
                warn!(
                    "Payment result fetch failed (attempt {}/{}): {}",
                    attempt, RESULT_FETCH_ATTEMPTS, e
                );
            }
        }

        if attempt < RESULT_FETCH_ATTEMPTS {
            sleep(RESULT_FETCH_DELAY).await;
        }
    }

    Err(BookingError::ResultFetchExhausted(RESULT_FETCH_ATTEMPTS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockPaymentGateway;
    use assert_matches::assert_matches;

    fn settled_verification() -> PaymentVerification {
        PaymentVerification {
            status: GatewayPaymentStatus::Settled,
            provider_code: Some(PROVIDER_SUCCESS_CODE.to_string()),
            transaction_id: Some("TX123".to_string()),
        }
    }

    #[test]
    fn parses_query_string_payload() {
        let params = PaymentCorrelator::parse_callback_params(
            "vnp_ResponseCode=00&vnp_TxnRef=abc&vnp_OrderInfo=Thanh%20toan",
        )
        .unwrap();

        assert_eq!(params.get("vnp_ResponseCode").unwrap(), "00");
        assert_eq!(params.get("vnp_OrderInfo").unwrap(), "Thanh toan");
    }

    #[test]
    fn parses_full_deep_link_url() {
        let params = PaymentCorrelator::parse_callback_params(
            "medibook://payment/result?vnp_ResponseCode=24&vnp_TxnRef=abc",
        )
        .unwrap();

        assert_eq!(params.get("vnp_ResponseCode").unwrap(), "24");
    }

    #[test]
    fn rejects_empty_payload() {
        assert_matches!(
            PaymentCorrelator::parse_callback_params(""),
            Err(BookingError::MalformedCallback(_))
        );
    }

    #[tokio::test]
    async fn provider_failure_code_fails_session_with_code() {
        let code = Uuid::new_v4();
        let mut correlator = PaymentCorrelator::new();
        correlator.begin_awaiting(code, PaymentMethod::VnPay);

        let payments = MockPaymentGateway::new();
        let payload = format!("vnp_ResponseCode=24&vnp_TxnRef={}", code);

        let outcome = correlator.on_external_result(&payload, &payments).await.unwrap();

        assert_eq!(outcome, CallbackOutcome::Failed { code: "24".to_string() });
        assert_matches!(
            &correlator.session().unwrap().status,
            PaymentSessionStatus::Failed { code } if code == "24"
        );
    }

    #[tokio::test]
    async fn success_code_settles_after_gateway_confirmation() {
        let code = Uuid::new_v4();
        let mut correlator = PaymentCorrelator::new();
        correlator.begin_awaiting(code, PaymentMethod::VnPay);

        let mut payments = MockPaymentGateway::new();
        payments
            .expect_verify_result()
            .times(1)
            .returning(|_| Ok(settled_verification()));

        let payload = format!("vnp_ResponseCode=00&vnp_TxnRef={}", code);
        let outcome = correlator.on_external_result(&payload, &payments).await.unwrap();

        assert_eq!(outcome, CallbackOutcome::Settled);
        assert!(correlator.is_settled());
    }

    #[tokio::test]
    async fn second_terminal_callback_is_ignored() {
        let code = Uuid::new_v4();
        let mut correlator = PaymentCorrelator::new();
        correlator.begin_awaiting(code, PaymentMethod::MoMo);

        let mut payments = MockPaymentGateway::new();
        payments
            .expect_verify_result()
            .times(1)
            .returning(|_| Ok(settled_verification()));

        let payload = format!("vnp_ResponseCode=00&vnp_TxnRef={}", code);
        assert_eq!(
            correlator.on_external_result(&payload, &payments).await.unwrap(),
            CallbackOutcome::Settled
        );
        assert_eq!(
            correlator.on_external_result(&payload, &payments).await.unwrap(),
            CallbackOutcome::Ignored
        );
    }

    #[tokio::test]
    async fn callback_for_other_appointment_is_ignored() {
        let mut correlator = PaymentCorrelator::new();
        correlator.begin_awaiting(Uuid::new_v4(), PaymentMethod::VnPay);

        let payments = MockPaymentGateway::new();
        let payload = format!("vnp_ResponseCode=00&vnp_TxnRef={}", Uuid::new_v4());

        assert_eq!(
            correlator.on_external_result(&payload, &payments).await.unwrap(),
            CallbackOutcome::Ignored
        );
        // The active session is untouched.
        assert_matches!(
            &correlator.session().unwrap().status,
            PaymentSessionStatus::Pending
        );
    }

    #[tokio::test]
    async fn callback_after_abandon_is_ignored() {
        let code = Uuid::new_v4();
        let mut correlator = PaymentCorrelator::new();
        correlator.begin_awaiting(code, PaymentMethod::VnPay);
        correlator.abandon();

        let payments = MockPaymentGateway::new();
        let payload = format!("vnp_ResponseCode=00&vnp_TxnRef={}", code);

        assert_eq!(
            correlator.on_external_result(&payload, &payments).await.unwrap(),
            CallbackOutcome::Ignored
        );
    }

    #[tokio::test(start_paused = true)]
    async fn result_fetch_gives_up_after_bounded_attempts() {
        let mut payments = MockPaymentGateway::new();
        payments
            .expect_verify_result()
            .times(RESULT_FETCH_ATTEMPTS as usize)
            .returning(|_| {
                Ok(PaymentVerification {
                    status: GatewayPaymentStatus::Pending,
                    provider_code: None,
                    transaction_id: None,
                })
            });

        let params = PaymentCorrelator::parse_callback_params("vnp_ResponseCode=00").unwrap();
        let result = fetch_settled_result_with_retry(&payments, &params).await;

        assert_matches!(result, Err(BookingError::ResultFetchExhausted(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn result_fetch_recovers_from_lagging_backend() {
        let mut payments = MockPaymentGateway::new();
        let mut calls = 0;
        payments.expect_verify_result().returning(move |_| {
            calls += 1;
            if calls < 3 {
                Ok(PaymentVerification {
                    status: GatewayPaymentStatus::Pending,
                    provider_code: None,
                    transaction_id: None,
                })
            } else {
                Ok(settled_verification())
            }
        });

        let params = PaymentCorrelator::parse_callback_params("vnp_ResponseCode=00").unwrap();
        let verification = fetch_settled_result_with_retry(&payments, &params).await.unwrap();

        assert_eq!(verification.status, GatewayPaymentStatus::Settled);
    }
}

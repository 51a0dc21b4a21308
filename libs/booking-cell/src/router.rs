// libs/booking-cell/src/router.rs
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers;
use crate::handlers::AppState;

/// Booking wizard routes. Session endpoints drive one wizard each; the
/// payment callback is unauthenticated and routed by appointment code.
pub fn booking_routes(state: Arc<AppState>) -> Router {
    Router::new()
        // Session lifecycle
        .route("/bookings/sessions", post(handlers::create_session))
        .route(
            "/bookings/sessions/{session_id}",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route("/bookings/sessions/{session_id}/reset", post(handlers::reset_session))
        // Wizard transitions
        .route("/bookings/sessions/{session_id}/advance", post(handlers::advance))
        .route("/bookings/sessions/{session_id}/retreat", post(handlers::retreat))
        .route("/bookings/sessions/{session_id}/profile", post(handlers::set_profile))
        .route("/bookings/sessions/{session_id}/package", post(handlers::select_package))
        .route("/bookings/sessions/{session_id}/services", post(handlers::select_services))
        .route("/bookings/sessions/{session_id}/date", post(handlers::select_date))
        .route("/bookings/sessions/{session_id}/time", post(handlers::select_time))
        .route("/bookings/sessions/{session_id}/reason", post(handlers::set_reason))
        .route("/bookings/sessions/{session_id}/payment-method", post(handlers::set_payment_method))
        .route("/bookings/sessions/{session_id}/payment/confirm", post(handlers::confirm_payment))
        // External payment result (deep link relay and provider IPN)
        .route("/bookings/payment/callback", post(handlers::payment_callback))
        // Picker data pass-throughs
        .route("/catalog/packages", get(handlers::list_packages))
        .route("/catalog/services", get(handlers::list_services))
        .route("/catalog/services/common", get(handlers::list_common_services))
        .route("/profiles", get(handlers::list_profiles).post(handlers::create_profile))
        .route("/profiles/lookup", get(handlers::lookup_profile))
        .route("/profiles/link", post(handlers::link_profile))
        .route("/slots", get(handlers::list_slots))
        .with_state(state)
}

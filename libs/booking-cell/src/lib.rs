pub mod gateway;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;
pub mod session;

pub use gateway::{
    AppointmentGateway, CatalogGateway, ExternalPaymentHandler, PaymentGateway, ProfileGateway,
    SchedulingGateway,
};
pub use handlers::{AppState, Gateways};
pub use models::{
    BookingDraft, BookingDraftView, BookingError, BookingSnapshot, BookingStep, PaymentMethod,
};
pub use router::booking_routes;
pub use services::payment::{CallbackOutcome, PaymentCorrelator};
pub use services::wizard::{BookingWizard, PaymentProgress, RetreatOutcome};
pub use session::SessionStore;

// HTTP gateway implementations against a mock hospital backend.
use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_json_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shared_gateway::HospitalClient;

use booking_cell::gateway::{
    AppointmentGateway, CatalogGateway, HttpAppointmentGateway, HttpCatalogGateway,
    HttpPaymentGateway, HttpSchedulingGateway, PaymentGateway, SchedulingGateway,
};
use booking_cell::models::{
    BookingError, BookingSnapshot, MedicalService, PatientIdentity, PatientProfileRef,
    PaymentMethod, TimeSlotRef,
};

const API_KEY: &str = "test-api-key";

async fn setup() -> (MockServer, Arc<HospitalClient>) {
    let server = MockServer::start().await;
    let client = Arc::new(HospitalClient::with_base_url(&server.uri(), API_KEY));
    (server, client)
}

fn snapshot() -> BookingSnapshot {
    BookingSnapshot {
        appointment_code: Uuid::new_v4(),
        identity: PatientIdentity::Existing(PatientProfileRef {
            id: "P1".to_string(),
            full_name: "Nguyen Van A".to_string(),
            gender: "Nam".to_string(),
            phone: "0912345678".to_string(),
            date_of_birth: "01/01/1990".to_string(),
        }),
        package: None,
        services: vec![MedicalService {
            id: "S1".to_string(),
            name: "General consultation".to_string(),
            price: 200_000,
            description: None,
        }],
        date: NaiveDate::from_ymd_opt(2025, 5, 29).unwrap(),
        time: TimeSlotRef {
            id: "T1".to_string(),
            time: "08:00-09:00".to_string(),
            room: None,
        },
        reason: Some("Annual checkup".to_string()),
        total_price: 200_000,
        frozen_at: chrono::Utc::now(),
    }
}

#[tokio::test]
async fn catalog_gateway_fetches_packages_with_api_key() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/packages"))
        .and(header("x-api-key", API_KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "PK1", "name": "General checkup", "price": 500000, "description": null }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = HttpCatalogGateway::new(client);
    let packages = gateway.fetch_packages().await.unwrap();

    assert_eq!(packages.len(), 1);
    assert_eq!(packages[0].id, "PK1");
    assert_eq!(packages[0].price, 500_000);
}

#[tokio::test]
async fn catalog_gateway_surfaces_backend_errors() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/services"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&server)
        .await;

    let gateway = HttpCatalogGateway::new(client);
    let err = gateway.fetch_services().await.unwrap_err();

    match err {
        BookingError::Gateway(msg) => assert!(msg.contains("500")),
        other => panic!("expected gateway error, got {:?}", other),
    }
}

#[tokio::test]
async fn scheduling_gateway_passes_filters_as_query_params() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/slots"))
        .and(query_param("date", "2025-05-29"))
        .and(query_param("specialty", "cardiology"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "T1", "time": "08:00-09:00", "room": "A101" },
            { "id": "T2", "time": "09:00-10:00", "room": null }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = HttpSchedulingGateway::new(client);
    let slots = gateway
        .fetch_time_slots(
            Some("cardiology"),
            None,
            NaiveDate::from_ymd_opt(2025, 5, 29).unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(slots.len(), 2);
    assert_eq!(slots[0].room.as_deref(), Some("A101"));
}

#[tokio::test]
async fn appointment_gateway_posts_the_snapshot() {
    let (server, client) = setup().await;
    let snapshot = snapshot();
    let code = snapshot.appointment_code;

    Mock::given(method("POST"))
        .and(path("/api/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "APT-1",
            "appointment_code": code,
            "status": "pending",
            "created_at": "2025-05-20T08:00:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = HttpAppointmentGateway::new(client);
    let record = gateway.create_appointment(&snapshot).await.unwrap();

    assert_eq!(record.id, "APT-1");
    assert_eq!(record.appointment_code, code);
    assert_eq!(record.status, "pending");
}

#[tokio::test]
async fn payment_gateway_fetches_checkout_url_for_method() {
    let (server, client) = setup().await;
    let code = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path(format!("/api/v1/payments/{}/checkout-url", code)))
        .and(query_param("method", "vnpay"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "url": "https://pay.example/checkout/abc"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = HttpPaymentGateway::new(client);
    let url = gateway.checkout_url(code, PaymentMethod::VnPay).await.unwrap();

    assert_eq!(url, "https://pay.example/checkout/abc");
}

#[tokio::test]
async fn payment_gateway_verifies_callback_params() {
    let (server, client) = setup().await;

    let mut params = std::collections::HashMap::new();
    params.insert("vnp_ResponseCode".to_string(), "00".to_string());
    params.insert("vnp_TxnRef".to_string(), "abc".to_string());

    Mock::given(method("POST"))
        .and(path("/api/v1/payments/verify"))
        .and(body_json_string(
            serde_json::to_string(&params).unwrap(),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "settled",
            "provider_code": "00",
            "transaction_id": "TX-9"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = HttpPaymentGateway::new(client);
    let verification = gateway.verify_result(&params).await.unwrap();

    assert_eq!(
        verification.status,
        booking_cell::gateway::GatewayPaymentStatus::Settled
    );
    assert_eq!(verification.transaction_id.as_deref(), Some("TX-9"));
}

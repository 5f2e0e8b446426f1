//! Provider adapters against mocked rail APIs.

use rentals_mobile_money::config::Environment;
use rentals_mobile_money::payments::callback;
use rentals_mobile_money::payments::provider::{PaymentProvider, ProviderDeps};
use rentals_mobile_money::payments::providers::{
    AirtelConfig, AirtelProvider, MpesaConfig, MpesaProvider, TigoConfig, TigoProvider,
};
use rentals_mobile_money::payments::retry::RetryPolicy;
use rentals_mobile_money::payments::token_cache::TokenCache;
use rentals_mobile_money::payments::types::{
    B2cCommand, CollectionRequest, DisbursementRequest, Money, PaymentStatus, ProviderName,
};
use rentals_mobile_money::payments::utils::PaymentHttpClient;
use rentals_mobile_money::payments::PaymentError;
use serde_json::json;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn deps() -> ProviderDeps {
    ProviderDeps::new(
        PaymentHttpClient::new(Duration::from_secs(5)).unwrap(),
        Arc::new(TokenCache::default()),
        RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(50)),
    )
}

fn mpesa(server: &MockServer, deps: ProviderDeps) -> MpesaProvider {
    MpesaProvider::new(
        MpesaConfig {
            consumer_key: "consumer-key".to_string(),
            consumer_secret: "consumer-secret".to_string(),
            business_short_code: "174379".to_string(),
            passkey: "passkey".to_string(),
            callback_url: "https://rentals.example.com/callbacks/mpesa".to_string(),
            b2c_short_code: Some("600996".to_string()),
            initiator_name: Some("testapi".to_string()),
            security_credential: Some("encrypted-credential".to_string()),
            b2c_result_url: Some("https://rentals.example.com/callbacks/mpesa/b2c".to_string()),
            b2c_timeout_url: None,
            callback_secret: None,
            environment: Environment::Sandbox,
            base_url: Some(server.uri()),
        },
        deps,
    )
}

fn airtel(server: &MockServer) -> AirtelProvider {
    AirtelProvider::new(
        AirtelConfig {
            client_id: "airtel-client".to_string(),
            client_secret: "airtel-secret".to_string(),
            country: "KE".to_string(),
            disbursement_pin: Some("encrypted-pin".to_string()),
            callback_secret: None,
            environment: Environment::Sandbox,
            base_url: Some(server.uri()),
        },
        deps(),
    )
    .unwrap()
}

fn tigo(server: &MockServer) -> TigoProvider {
    TigoProvider::new(
        TigoConfig {
            api_key: "tigo-key".to_string(),
            api_secret: "tigo-secret".to_string(),
            biller_code: "400700".to_string(),
            company_name: "Msasani Apartments".to_string(),
            callback_secret: None,
            environment: Environment::Sandbox,
            base_url: Some(server.uri()),
            collection_path: "/billerpay".to_string(),
        },
        deps(),
    )
}

fn rent(major: u64, currency: &str, phone: &str) -> CollectionRequest {
    CollectionRequest {
        amount: Money::from_major(major, currency).unwrap(),
        payer_phone: phone.to_string(),
        reference: "INV-2024-000123".to_string(),
        description: Some("March rent".to_string()),
    }
}

async fn mount_mpesa_token(server: &MockServer, expires_in: &str, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path("/oauth/v1/generate"))
        .and(query_param("grant_type", "client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "daraja-token",
            "expires_in": expires_in
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

fn stk_accepted() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "MerchantRequestID": "29115-34620561-1",
        "CheckoutRequestID": "ws_CO_191220191020363925",
        "ResponseCode": "0",
        "ResponseDescription": "Success. Request accepted for processing",
        "CustomerMessage": "Success. Request accepted for processing"
    }))
}

#[tokio::test]
async fn mpesa_stk_push_is_pending_and_reuses_cached_token() {
    let server = MockServer::start().await;
    mount_mpesa_token(&server, "3599", 1).await;
    Mock::given(method("POST"))
        .and(path("/mpesa/stkpush/v1/processrequest"))
        .and(header("Authorization", "Bearer daraja-token"))
        .and(body_partial_json(json!({
            "BusinessShortCode": "174379",
            "TransactionType": "CustomerPayBillOnline",
            "Amount": 45000,
            "PartyA": "254712345678",
            "PhoneNumber": "254712345678",
            "AccountReference": "INV-2024-000",
            "TransactionDesc": "March rent"
        })))
        .respond_with(stk_accepted())
        .expect(2)
        .mount(&server)
        .await;

    let provider = mpesa(&server, deps());
    let first = provider
        .initiate_collection(rent(45_000, "KES", "0712345678"))
        .await
        .expect("stk push accepted");
    assert_eq!(first.status, PaymentStatus::Pending);
    assert_eq!(first.provider_reference, "ws_CO_191220191020363925");
    assert_eq!(first.secondary_reference.as_deref(), Some("29115-34620561-1"));
    assert_eq!(first.reference, "INV-2024-000");

    // Token is still valid: no second exchange.
    provider
        .initiate_collection(rent(45_000, "KES", "+254 712 345 678"))
        .await
        .expect("stk push accepted");
}

#[tokio::test]
async fn expired_token_is_exchanged_exactly_once_per_call() {
    let server = MockServer::start().await;
    // 30s lifetime sits inside the 60s safety margin.
    mount_mpesa_token(&server, "30", 2).await;
    Mock::given(method("POST"))
        .and(path("/mpesa/stkpush/v1/processrequest"))
        .respond_with(stk_accepted())
        .expect(2)
        .mount(&server)
        .await;

    let provider = mpesa(&server, deps());
    for _ in 0..2 {
        provider
            .initiate_collection(rent(1_500, "KES", "0712345678"))
            .await
            .expect("stk push accepted");
    }
}

#[tokio::test]
async fn out_of_range_amount_fails_before_any_network_call() {
    let server = MockServer::start().await;
    let provider = mpesa(&server, deps());

    let err = provider
        .initiate_collection(rent(150_001, "KES", "0712345678"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PaymentError::ValidationError { provider: ProviderName::Mpesa, .. }
    ));

    let err = provider
        .initiate_collection(rent(45_000, "TZS", "0712345678"))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::ValidationError { .. }));

    let received = server.received_requests().await.unwrap_or_default();
    assert!(received.is_empty());
}

#[tokio::test]
async fn initiation_is_not_retried_on_server_error() {
    let server = MockServer::start().await;
    mount_mpesa_token(&server, "3599", 1).await;
    Mock::given(method("POST"))
        .and(path("/mpesa/stkpush/v1/processrequest"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "requestId": "1-2",
            "errorCode": "503.001.01",
            "errorMessage": "Service unavailable"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = mpesa(&server, deps())
        .initiate_collection(rent(45_000, "KES", "0712345678"))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    match err {
        PaymentError::ProviderError { provider_code, .. } => {
            assert_eq!(provider_code.as_deref(), Some("503.001.01"))
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn rejected_token_is_invalidated() {
    let server = MockServer::start().await;
    mount_mpesa_token(&server, "3599", 2).await;
    Mock::given(method("POST"))
        .and(path("/mpesa/stkpush/v1/processrequest"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "errorCode": "404.001.03",
            "errorMessage": "Invalid Access Token"
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/mpesa/stkpush/v1/processrequest"))
        .respond_with(stk_accepted())
        .mount(&server)
        .await;

    let provider = mpesa(&server, deps());
    let err = provider
        .initiate_collection(rent(45_000, "KES", "0712345678"))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::ProviderAuthError { .. }));

    provider
        .initiate_collection(rent(45_000, "KES", "0712345678"))
        .await
        .expect("fresh token accepted");
}

#[tokio::test]
async fn stk_query_maps_processing_error_to_pending() {
    let server = MockServer::start().await;
    mount_mpesa_token(&server, "3599", 1).await;
    Mock::given(method("POST"))
        .and(path("/mpesa/stkpushquery/v1/query"))
        .and(body_partial_json(json!({
            "CheckoutRequestID": "ws_CO_191220191020363925"
        })))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "requestId": "1-3",
            "errorCode": "500.001.1001",
            "errorMessage": "The transaction is being processed"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let status = mpesa(&server, deps())
        .query_status("ws_CO_191220191020363925")
        .await
        .expect("query answered");
    assert_eq!(status.status, PaymentStatus::Pending);
    assert_eq!(status.result_code.as_deref(), Some("500.001.1001"));
}

#[tokio::test]
async fn stk_query_maps_result_codes() {
    let server = MockServer::start().await;
    mount_mpesa_token(&server, "3599", 1).await;
    Mock::given(method("POST"))
        .and(path("/mpesa/stkpushquery/v1/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ResponseCode": "0",
            "ResponseDescription": "The service request has been accepted successsfully",
            "MerchantRequestID": "22205-34066-1",
            "CheckoutRequestID": "ws_CO_13012021093521236557",
            "ResultCode": "1032",
            "ResultDesc": "Request cancelled by user"
        })))
        .mount(&server)
        .await;

    let status = mpesa(&server, deps())
        .query_status("ws_CO_13012021093521236557")
        .await
        .unwrap();
    assert_eq!(status.status, PaymentStatus::Cancelled);
    assert_eq!(status.description.as_deref(), Some("Request cancelled by user"));
}

#[tokio::test]
async fn mpesa_b2c_returns_conversation_id() {
    let server = MockServer::start().await;
    mount_mpesa_token(&server, "3599", 1).await;
    Mock::given(method("POST"))
        .and(path("/mpesa/b2c/v1/paymentrequest"))
        .and(body_partial_json(json!({
            "InitiatorName": "testapi",
            "SecurityCredential": "encrypted-credential",
            "CommandID": "BusinessPayment",
            "Amount": 12000,
            "PartyA": "600996",
            "PartyB": "254712345678",
            "Remarks": "Deposit refund",
            "QueueTimeOutURL": "https://rentals.example.com/callbacks/mpesa/b2c",
            "ResultURL": "https://rentals.example.com/callbacks/mpesa/b2c"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ConversationID": "AG_20191219_00005797af5d7d75f652",
            "OriginatorConversationID": "16740-34861180-1",
            "ResponseCode": "0",
            "ResponseDescription": "Accept the service request successfully."
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = mpesa(&server, deps())
        .initiate_disbursement(DisbursementRequest {
            amount: Money::from_major(12_000, "KES").unwrap(),
            recipient_phone: "0712345678".to_string(),
            reference: "REFUND-88".to_string(),
            remarks: "Deposit refund".to_string(),
            occasion: None,
            command: B2cCommand::BusinessPayment,
            initiator_name: None,
            security_credential: None,
        })
        .await
        .expect("b2c accepted");
    assert_eq!(response.status, PaymentStatus::Pending);
    assert_eq!(response.provider_reference, "AG_20191219_00005797af5d7d75f652");
}

async fn mount_airtel_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/auth/oauth2/token"))
        .and(body_partial_json(json!({
            "client_id": "airtel-client",
            "grant_type": "client_credentials"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token_type": "bearer",
            "access_token": "airtel-token",
            "expires_in": 180
        })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn airtel_collection_sends_local_msisdn_and_country_headers() {
    let server = MockServer::start().await;
    mount_airtel_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/merchant/v1/payments/"))
        .and(header("X-Country", "KE"))
        .and(header("X-Currency", "KES"))
        .and(header("Authorization", "Bearer airtel-token"))
        .and(body_partial_json(json!({
            "subscriber": {"country": "KE", "currency": "KES", "msisdn": "712345678"},
            "transaction": {"amount": 45000, "id": "INV-2024-000123"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"transaction": {"id": "INV-2024-000123", "status": "Success."}},
            "status": {
                "code": "200",
                "message": "SUCCESS",
                "result_code": "TS",
                "response_code": "DP00800001006",
                "success": true
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = airtel(&server)
        .initiate_collection(rent(45_000, "KES", "0712345678"))
        .await
        .expect("collection accepted");
    assert_eq!(response.status, PaymentStatus::Pending);
    assert_eq!(response.provider_reference, "INV-2024-000123");
}

#[tokio::test]
async fn airtel_non_ts_result_is_provider_error() {
    let server = MockServer::start().await;
    mount_airtel_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/merchant/v1/payments/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": {
                "code": "200",
                "message": "Invalid subscriber",
                "result_code": "ESB000001",
                "success": false
            }
        })))
        .mount(&server)
        .await;

    let err = airtel(&server)
        .initiate_collection(rent(45_000, "KES", "0712345678"))
        .await
        .unwrap_err();
    match err {
        PaymentError::ProviderError {
            provider,
            provider_code,
            retryable,
            ..
        } => {
            assert_eq!(provider, ProviderName::AirtelMoney);
            assert_eq!(provider_code.as_deref(), Some("ESB000001"));
            assert!(!retryable);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn airtel_status_query_retries_transient_failures() {
    let server = MockServer::start().await;
    mount_airtel_token(&server).await;
    Mock::given(method("GET"))
        .and(path("/standard/v1/payments/INV-2024-000123"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/standard/v1/payments/INV-2024-000123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "transaction": {
                    "airtel_money_id": "C36*******67",
                    "id": "INV-2024-000123",
                    "message": "success",
                    "status": "TS"
                }
            },
            "status": {"code": "200", "result_code": "ESB000010", "success": true}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let status = airtel(&server)
        .query_status("INV-2024-000123")
        .await
        .expect("status after retry");
    assert_eq!(status.status, PaymentStatus::Succeeded);
    assert_eq!(status.result_code.as_deref(), Some("TS"));
}

#[tokio::test]
async fn tigo_collection_signs_xml_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/billerpay"))
        .and(header("X-Api-Key", "tigo-key"))
        .and(header("Content-Type", "application/xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<?xml version=\"1.0\"?><COMMAND><TXNID>TG-55</TXNID><STATUS>PENDING</STATUS>\
             <MESSAGE>Push sent</MESSAGE></COMMAND>",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let response = tigo(&server)
        .initiate_collection(rent(250_000, "TZS", "0754123456"))
        .await
        .expect("push accepted");
    assert_eq!(response.status, PaymentStatus::Pending);
    assert_eq!(response.provider_reference, "TG-55");
    assert_eq!(response.customer_message.as_deref(), Some("Push sent"));

    let requests = server.received_requests().await.unwrap_or_default();
    assert_eq!(requests.len(), 1);
    let body = &requests[0].body;
    let signature = requests[0]
        .headers
        .get("X-Signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert_eq!(signature, callback::sign(body, "tigo-secret"));
    let xml = String::from_utf8_lossy(body);
    assert!(xml.contains("<MSISDN>255754123456</MSISDN>"));
    assert!(xml.contains("<AMOUNT>250000</AMOUNT>"));
    assert!(xml.contains("<CUSTOMERREFERENCEID>INV-2024-000123</CUSTOMERREFERENCEID>"));
}

#[tokio::test]
async fn tigo_failed_status_is_provider_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/billerpay"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<COMMAND><STATUS>FAILED</STATUS><ERRORCODE>E101</ERRORCODE>\
             <MESSAGE>Biller not found</MESSAGE></COMMAND>",
        ))
        .mount(&server)
        .await;

    let err = tigo(&server)
        .initiate_collection(rent(250_000, "TZS", "0754123456"))
        .await
        .unwrap_err();
    match err {
        PaymentError::ProviderError {
            message,
            provider_code,
            ..
        } => {
            assert_eq!(message, "Biller not found");
            assert_eq!(provider_code.as_deref(), Some("E101"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn collection_logs_never_contain_payer_phone() {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("rentals_mobile_money=trace"))
        .with_ansi(false)
        .with_writer({
            let logs = logs.clone();
            move || logs.clone()
        })
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let server = MockServer::start().await;
    mount_mpesa_token(&server, "3599", 1).await;
    mount_airtel_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/mpesa/stkpush/v1/processrequest"))
        .respond_with(stk_accepted())
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/merchant/v1/payments/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"transaction": {"id": "INV-2024-000123", "status": "Success."}},
            "status": {"code": "200", "message": "SUCCESS", "result_code": "TS", "success": true}
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/billerpay"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<COMMAND><TXNID>TG-56</TXNID><STATUS>PENDING</STATUS></COMMAND>",
        ))
        .mount(&server)
        .await;

    mpesa(&server, deps())
        .initiate_collection(rent(45_000, "KES", "0712345678"))
        .await
        .expect("stk push accepted");
    airtel(&server)
        .initiate_collection(rent(45_000, "KES", "0712345678"))
        .await
        .expect("ussd push accepted");
    tigo(&server)
        .initiate_collection(rent(250_000, "TZS", "0754123456"))
        .await
        .expect("bill push accepted");

    let output = logs.contents();
    assert!(output.contains("sending stk push"));
    assert!(output.contains("sending ussd push"));
    assert!(output.contains("sending bill payment push"));
    assert!(!output.contains("712345678"));
    assert!(!output.contains("754123456"));
    assert!(!output.contains("payer"));
}

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use vendabot_whatsapp::{PayloadError, SIGNATURE_HEADER};

use crate::ingestion::{IngestError, IngestionService};

#[derive(Clone)]
pub struct WebhookState {
    pub ingestion: Arc<IngestionService>,
    pub verify_token: SecretString,
}

#[derive(Debug, Default, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeliveryAck {
    pub accepted: usize,
    pub duplicates: u32,
    pub failed: u32,
}

pub fn router(state: WebhookState) -> Router {
    Router::new().route("/webhook", get(verify).post(receive)).with_state(state)
}

/// Subscription handshake: echoes the challenge when the token matches.
pub async fn verify(State(state): State<WebhookState>, Query(params): Query<VerifyParams>) -> Response {
    let token_matches = params.verify_token.as_deref() == Some(state.verify_token.expose_secret())
        && !state.verify_token.expose_secret().is_empty();
    match (params.mode.as_deref(), token_matches, params.challenge) {
        (Some("subscribe"), true, Some(challenge)) => {
            info!(event_name = "ingress.webhook.verified", "webhook subscription verified");
            (StatusCode::OK, challenge).into_response()
        }
        _ => {
            warn!(event_name = "ingress.webhook.verify_rejected", "webhook verification rejected");
            StatusCode::FORBIDDEN.into_response()
        }
    }
}

pub async fn receive(State(state): State<WebhookState>, headers: HeaderMap, body: Bytes) -> Response {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|value| value.to_str().ok());
    match state.ingestion.ingest(&body, signature).await {
        // Acknowledged even when some sub-events failed to store; a non-200
        // would only trigger provider redelivery storms.
        Ok(report) => (
            StatusCode::OK,
            Json(DeliveryAck {
                accepted: report.accepted.len(),
                duplicates: report.duplicates,
                failed: report.failed,
            }),
        )
            .into_response(),
        Err(IngestError::Signature(error)) => {
            warn!(event_name = "ingress.webhook.signature_rejected", error = %error, "webhook signature rejected");
            StatusCode::UNAUTHORIZED.into_response()
        }
        Err(IngestError::Payload(PayloadError::UnsupportedObject(object))) => {
            info!(event_name = "ingress.webhook.ignored", object = %object, "webhook object ignored");
            let ack = DeliveryAck { accepted: 0, duplicates: 0, failed: 0 };
            (StatusCode::OK, Json(ack)).into_response()
        }
        Err(IngestError::Payload(error)) => {
            warn!(event_name = "ingress.webhook.invalid_payload", error = %error, "webhook body rejected");
            StatusCode::BAD_REQUEST.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::json;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    use vendabot_db::connect_with_settings;
    use vendabot_db::repositories::{
        InMemoryAccountRepository, InMemoryWebhookEventRepository, SqlWebhookEventRepository,
    };
    use vendabot_whatsapp::signature::sign;

    use super::{router, WebhookState};
    use crate::ingestion::IngestionService;

    fn app() -> axum::Router {
        let (sender, _queue) = mpsc::channel(8);
        let ingestion = IngestionService::new(
            Arc::new(InMemoryAccountRepository::default()),
            Arc::new(InMemoryWebhookEventRepository::default()),
            "app-secret".to_string().into(),
            sender,
        );
        router(WebhookState { ingestion: Arc::new(ingestion), verify_token: "verify-me".to_string().into() })
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
        String::from_utf8(bytes.to_vec()).expect("utf8")
    }

    #[tokio::test]
    async fn verification_echoes_challenge_for_matching_token() {
        let response = app()
            .oneshot(
                Request::get("/webhook?hub.mode=subscribe&hub.verify_token=verify-me&hub.challenge=1234")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "1234");
    }

    #[tokio::test]
    async fn verification_rejects_wrong_token() {
        let response = app()
            .oneshot(
                Request::get("/webhook?hub.mode=subscribe&hub.verify_token=nope&hub.challenge=1234")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn unsigned_delivery_is_unauthorized() {
        let response = app()
            .oneshot(
                Request::post("/webhook")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"object":"whatsapp_business_account","entry":[]}"#))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn signed_garbage_is_bad_request() {
        let body = b"not json".to_vec();
        let signature = sign(b"app-secret", &body).expect("sign");
        let response = app()
            .oneshot(
                Request::post("/webhook")
                    .header("x-hub-signature-256", signature)
                    .body(Body::from(body))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn signed_empty_delivery_is_acknowledged() {
        let body = br#"{"object":"whatsapp_business_account","entry":[]}"#.to_vec();
        let signature = sign(b"app-secret", &body).expect("sign");
        let response = app()
            .oneshot(
                Request::post("/webhook")
                    .header("x-hub-signature-256", signature)
                    .body(Body::from(body))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, r#"{"accepted":0,"duplicates":0,"failed":0}"#);
    }

    #[tokio::test]
    async fn unstored_sub_events_are_counted_in_the_ack() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool");
        pool.close().await;
        let (sender, _queue) = mpsc::channel(8);
        let ingestion = IngestionService::new(
            Arc::new(InMemoryAccountRepository::default()),
            Arc::new(SqlWebhookEventRepository::new(pool)),
            "app-secret".to_string().into(),
            sender,
        );
        let app = router(WebhookState {
            ingestion: Arc::new(ingestion),
            verify_token: "verify-me".to_string().into(),
        });
        let body = json!({
            "object": "whatsapp_business_account",
            "entry": [{ "id": "waba-1", "changes": [{ "field": "messages", "value": {
                "metadata": { "display_phone_number": "5511999990000", "phone_number_id": "2222" },
                "messages": [{
                    "from": "5511988887777", "id": "wamid.in.1", "timestamp": "1760000000",
                    "type": "text", "text": { "body": "oi" }
                }]
            }}]}]
        })
        .to_string()
        .into_bytes();
        let signature = sign(b"app-secret", &body).expect("sign");

        let response = app
            .oneshot(
                Request::post("/webhook")
                    .header("x-hub-signature-256", signature)
                    .body(Body::from(body))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let ack: serde_json::Value = serde_json::from_str(&body_text(response).await).expect("json");
        assert_eq!(ack["accepted"], 0);
        assert_eq!(ack["failed"], 1);
    }
}

use crate::provider::use_transcription;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{HeaderName, HeaderValue},
    Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};
use tracing::{error, info, warn};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Logs each request under a generated request id and echoes that id back
/// in `x-request-id`.
///
/// Connection routes also log the live session id they leave behind. That
/// lookup goes through the provider scope, so register this middleware
/// inside [`super::ProvideTranscription`].
pub struct RequestLogging;

impl<S, B> Transform<S, ServiceRequest> for RequestLogging
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestLoggingMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestLoggingMiddleware { service }))
    }
}

pub struct RequestLoggingMiddleware<S> {
    service: S,
}

fn is_connection_route(path: &str) -> bool {
    path.starts_with("/api/connection")
}

/// Session held by the provider in scope, if any.
fn current_session_id() -> Option<Uuid> {
    use_transcription().ok()?.connection().map(|s| s.id())
}

impl<S, B> Service<ServiceRequest> for RequestLoggingMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let started = Instant::now();
        let request_id = Uuid::new_v4();
        let method = req.method().clone();
        let path = req.path().to_string();
        let tracks_session = is_connection_route(&path);

        info!(%request_id, %method, %path, "Request started");

        let fut = self.service.call(req);

        Box::pin(async move {
            let mut result = fut.await;
            let duration_ms = started.elapsed().as_millis() as u64;
            let session_id = if tracks_session {
                current_session_id()
            } else {
                None
            };

            match &mut result {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if response.status().is_server_error() {
                        warn!(
                            %request_id, %method, %path, status, duration_ms, ?session_id,
                            "Request failed"
                        );
                    } else {
                        info!(
                            %request_id, %method, %path, status, duration_ms, ?session_id,
                            "Request completed"
                        );
                    }

                    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
                        response
                            .headers_mut()
                            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
                    }
                }
                Err(err) => {
                    error!(
                        %request_id, %method, %path, duration_ms, error = %err,
                        "Request errored"
                    );
                }
            }

            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::LiveOptions;
    use crate::middleware::ProvideTranscription;
    use crate::provider;
    use crate::test_support::mock_provider;
    use actix_web::{test, web, App, HttpResponse};

    #[::core::prelude::v1::test]
    fn test_connection_routes_are_tracked() {
        assert!(is_connection_route("/api/connection"));
        assert!(is_connection_route("/api/connection/audio"));
        assert!(!is_connection_route("/api/authenticate"));
        assert!(!is_connection_route("/health"));
    }

    #[tokio::test]
    async fn test_current_session_id_reads_provider_scope() {
        let (provider, _opened) = mock_provider(Some("key"));
        assert_eq!(current_session_id(), None);

        provider.connect(LiveOptions::new(), None).await.unwrap();
        let session = provider.connection().unwrap();
        let seen = provider::scope(provider.clone(), async { current_session_id() }).await;
        assert_eq!(seen, Some(session.id()));
    }

    #[actix_web::test]
    async fn test_response_carries_request_id() {
        let (provider, _opened) = mock_provider(Some("key"));
        let app = test::init_service(
            App::new()
                .wrap(RequestLogging)
                .wrap(ProvideTranscription::new(provider))
                .route(
                    "/api/connection",
                    web::get().to(|| async { HttpResponse::Ok().finish() }),
                ),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/connection").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let header = resp.headers().get(REQUEST_ID_HEADER).unwrap();
        assert!(Uuid::parse_str(header.to_str().unwrap()).is_ok());
    }
}

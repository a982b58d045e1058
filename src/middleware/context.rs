//! Installs the transcription provider as shared context for each request.
//!
//! Handlers wrapped by [`ProvideTranscription`] read the provider with
//! [`crate::provider::use_transcription`]; without the middleware that call
//! fails with `AppError::OutsideProvider`.

use crate::provider::{self, TranscriptionProvider};
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use futures_util::future::LocalBoxFuture;
use std::future::{ready, Ready};

pub struct ProvideTranscription {
    provider: TranscriptionProvider,
}

impl ProvideTranscription {
    pub fn new(provider: TranscriptionProvider) -> Self {
        Self { provider }
    }
}

impl<S, B> Transform<S, ServiceRequest> for ProvideTranscription
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = ProvideTranscriptionMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(ProvideTranscriptionMiddleware {
            service,
            provider: self.provider.clone(),
        }))
    }
}

pub struct ProvideTranscriptionMiddleware<S> {
    service: S,
    provider: TranscriptionProvider,
}

impl<S, B> Service<ServiceRequest> for ProvideTranscriptionMiddleware<S>
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
        let fut = self.service.call(req);
        Box::pin(provider::scope(self.provider.clone(), fut))
    }
}

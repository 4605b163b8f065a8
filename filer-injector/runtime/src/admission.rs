use crate::{
    core::{Injection, Injector, Pod, STATUS_ANNOTATION, STATUS_INJECTED},
    metrics::AdmissionMetrics,
    secrets::ListCredentials,
};
use futures::future;
use http_body_util::BodyExt;
use hyper::{http, Request, Response};
use std::{collections::BTreeMap, sync::Arc};
use thiserror::Error;
use tokio::time;
use tracing::{debug, info, trace, warn};


/// Serves the pod mutating admission webhook.
#[derive(Clone)]
pub struct Admission {
    injector: Arc<Injector>,
    credentials: Arc<dyn ListCredentials>,
    list_timeout: time::Duration,
    metrics: AdmissionMetrics,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read request body: {0}")]
    Request(#[from] hyper::Error),

    #[error("failed to encode json response: {0}")]
    Json(#[from] serde_json::Error),
}

type Review = kube::core::admission::AdmissionReview<Pod>;
type AdmissionRequest = kube::core::admission::AdmissionRequest<Pod>;
type AdmissionResponse = kube::core::admission::AdmissionResponse;
type AdmissionReview = kube::core::admission::AdmissionReview<kube::core::DynamicObject>;

type Body = http_body_util::Full<bytes::Bytes>;

// === impl Admission ===

impl tower::Service<Request<hyper::body::Incoming>> for Admission {
    type Response = Response<Body>;
    type Error = Error;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<hyper::body::Incoming>) -> Self::Future {
        trace!(?req);
        if req.method() != http::Method::POST || req.uri().path() != "/" {
            return Box::pin(future::ok(
                Response::builder()
                    .status(http::StatusCode::NOT_FOUND)
                    .body(Body::default())
                    .expect("not found response must be valid"),
            ));
        }

        let admission = self.clone();
        Box::pin(async move {
            use bytes::Buf;
            let bytes = req.into_body().collect().await?.to_bytes();
            let review: Review = match serde_json::from_reader(bytes.reader()) {
                Ok(review) => review,
                Err(error) => {
                    warn!(%error, "Failed to parse request body");
                    admission.metrics.failed();
                    return json_response(AdmissionResponse::invalid(error).into_review());
                }
            };

            let rsp = match review.try_into() {
                Ok(req) => {
                    debug!(?req);
                    admission.admit(req).await
                }
                Err(error) => {
                    warn!(%error, "Invalid admission request");
                    admission.metrics.failed();
                    AdmissionResponse::invalid(error)
                }
            };
            debug!(?rsp);
            json_response(rsp.into_review())
        })
    }
}

impl Admission {
    pub fn new(
        injector: Injector,
        credentials: impl ListCredentials + 'static,
        list_timeout: time::Duration,
        metrics: AdmissionMetrics,
    ) -> Self {
        Self {
            injector: Arc::new(injector),
            credentials: Arc::new(credentials),
            list_timeout,
            metrics,
        }
    }

    async fn admit(self, req: AdmissionRequest) -> AdmissionResponse {
        let rsp = AdmissionResponse::from(&req);

        let Some(pod) = req.object.as_ref() else {
            info!(uid = %req.uid, "Admission request missing object");
            self.metrics.failed();
            return rsp.deny("admission request missing 'object'");
        };

        let ns = req
            .namespace
            .clone()
            .or_else(|| pod.metadata.namespace.clone())
            .unwrap_or_default();
        let name = pod
            .metadata
            .name
            .as_deref()
            .or(pod.metadata.generate_name.as_deref())
            .unwrap_or_default();
        info!(uid = %req.uid, %ns, %name, operation = ?req.operation, "Admission review");

        if !self.injector.is_mutation_required(&pod.metadata) {
            self.metrics.skipped();
            return rsp;
        }

        let credentials = match time::timeout(
            self.list_timeout,
            self.credentials.list_credentials(&ns),
        )
        .await
        {
            Ok(Ok(credentials)) => credentials,
            Ok(Err(error)) => {
                warn!(%error, %ns, %name, "Failed to list filer secrets");
                self.metrics.failed();
                return rsp.deny(format!("failed to list filer secrets in {ns}: {error}"));
            }
            Err(_) => {
                warn!(timeout = ?self.list_timeout, %ns, %name, "Timed out listing filer secrets");
                self.metrics.failed();
                return rsp.deny(format!(
                    "timed out after {:?} listing filer secrets in {ns}",
                    self.list_timeout
                ));
            }
        };

        let status = BTreeMap::from([(
            STATUS_ANNOTATION.to_string(),
            STATUS_INJECTED.to_string(),
        )]);
        let injection = match self.injector.build(pod, &ns, &credentials, &status) {
            Ok(injection) => injection,
            Err(error) => {
                warn!(%error, %ns, %name, "Failed to build patch");
                self.metrics.failed();
                return rsp.deny(error);
            }
        };

        if injection.is_empty() {
            info!(%ns, %name, skipped = injection.skipped, "No valid filer secrets");
            self.metrics.empty();
            return rsp;
        }

        let Injection { sidecars, patch, .. } = injection;
        debug!(?patch);

        match rsp.with_patch(patch) {
            Ok(rsp) => {
                info!(%ns, %name, ?sidecars, "Injected filer sidecars");
                self.metrics.injected(sidecars.len());
                rsp
            }
            Err(error) => {
                warn!(%error, %ns, %name, "Failed to attach patch");
                self.metrics.failed();
                AdmissionResponse::from(&req).deny(error)
            }
        }
    }
}

fn json_response(rsp: AdmissionReview) -> Result<Response<Body>, Error> {
    let bytes = serde_json::to_vec(&rsp)?;
    Ok(Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .expect("admission review response must be valid"))
}

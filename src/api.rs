mod account;
mod error;

pub use error::{Error, ErrorEnvelope};

use crate::domain::AccountRepository;
use anyhow::{Context, Result};
use axum::{
    body::Body,
    http::{HeaderMap, Request, StatusCode, Uri},
    routing::get,
    Router,
};
use opentelemetry::{global, propagation::Extractor, trace::TraceContextExt};
use serde::Deserialize;
use serde_with::{serde_as, DurationMilliSeconds};
use std::{net::IpAddr, time::Duration};
use tokio::{
    net::TcpListener,
    signal::unix::{signal, SignalKind},
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, field, info, info_span, warn, Span};
use tracing_opentelemetry::OpenTelemetrySpanExt;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    addr: IpAddr,
    port: u16,
    /// Deadline for the storage work of a single request, in milliseconds.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    request_timeout: Duration,
}

impl Config {
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

#[derive(Debug, OpenApi)]
#[openapi(info(title = "rusty-bank"))]
pub struct ApiDoc;

pub async fn serve<R>(config: Config, account_repository: R) -> Result<()>
where
    R: AccountRepository,
{
    let Config {
        addr,
        port,
        request_timeout,
    } = config;

    let app_state = AppState {
        account_repository,
        request_timeout,
    };

    let app = router(app_state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(CorsLayer::permissive())
            .map_request(accept_trace)
            .map_request(record_trace_id),
    );

    let listener = TcpListener::bind((addr, port))
        .await
        .context("bind TcpListener")?;
    info!(%addr, port, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("run server")
}

fn router<R>(app_state: AppState<R>) -> Router
where
    R: AccountRepository,
{
    let mut api_doc = ApiDoc::openapi();
    api_doc.merge(account::ApiDoc::openapi());

    Router::new()
        .route("/", get(ready))
        .merge(account::app::<R>())
        .merge(SwaggerUi::new("/api-doc").url("/openapi.json", api_doc))
        .fallback(unknown_path)
        .with_state(app_state)
}

/// Per-process state shared by all handlers; the repository is expected to be cheap to clone.
#[derive(Clone)]
pub struct AppState<R> {
    account_repository: R,
    request_timeout: Duration,
}

async fn ready() -> StatusCode {
    StatusCode::OK
}

async fn unknown_path(uri: Uri) -> Error {
    Error::UnknownPath(uri.path().to_string())
}

async fn shutdown_signal() {
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(error) => {
                error!(%error, "cannot install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = terminate => {},
        _ = tokio::signal::ctrl_c() => {},
    }
    info!("shutting down");
}

fn make_span(request: &Request<Body>) -> Span {
    let headers = request.headers();
    let method = request.method();
    let path = request.uri().path();
    info_span!("incoming request", %method, path, ?headers, trace_id = field::Empty)
}

struct HeaderExtractor<'a>(&'a HeaderMap);

impl<'a> Extractor for HeaderExtractor<'a> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| {
            let s = v.to_str();
            if let Err(ref error) = s {
                warn!(%error, ?v, "cannot convert header value to ASCII")
            };
            s.ok()
        })
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }
}

fn accept_trace(request: Request<Body>) -> Request<Body> {
    // Current context, if no or invalid data is received.
    let parent_context = global::get_text_map_propagator(|propagator| {
        propagator.extract(&HeaderExtractor(request.headers()))
    });
    Span::current().set_parent(parent_context);

    request
}

fn record_trace_id(request: Request<Body>) -> Request<Body> {
    let span = Span::current();

    let trace_id = span.context().span().span_context().trace_id();
    span.record("trace_id", trace_id.to_string());

    request
}

use std::time::Duration;

use axum::{
    Router,
    body::Bytes,
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    routing::{get, post},
};

use serde::Deserialize;

use tracing::{info, warn};

use devgate::backend::Backend;
use devgate::dispatcher::Dispatcher;
use devgate::fault::{Fault, classify};
use devgate::message::OtaKind;
use devgate::request::{OtaParams, Request, RequestContext};

use crate::responses::{ErrorResponse, OutcomeResponse};

pub(crate) struct RouteState<B: Backend> {
    dispatcher: Dispatcher<B>,
    request_timeout: Duration,
}

impl<B: Backend> Clone for RouteState<B> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
            request_timeout: self.request_timeout,
        }
    }
}

impl<B: Backend> RouteState<B> {
    async fn respond(&self, context: RequestContext) -> Response {
        let pending = self.dispatcher.dispatch(context);
        OutcomeResponse(pending.wait_timeout(self.request_timeout).await).into_response()
    }
}

// Requests rejected before reaching the dispatcher.
fn reject(fault: &Fault) -> Response {
    warn!("Request rejected: {fault}");
    ErrorResponse::from(classify(fault)).into_response()
}

fn utf8(body: &Bytes) -> Result<String, Fault> {
    std::str::from_utf8(body)
        .map(str::to_owned)
        .map_err(|e| Fault::syntax(format!("body is not UTF-8: {e}")))
}

fn number(value: Option<&str>, name: &str) -> Result<Option<usize>, Fault> {
    value
        .map(|v| {
            v.trim()
                .parse::<usize>()
                .map_err(|_| Fault::semantic(format!("`{name}` is not a non-negative integer")))
        })
        .transpose()
}

#[derive(Debug, Deserialize)]
pub(crate) struct OtaQuery {
    title: Option<String>,
    version: Option<String>,
    size: Option<String>,
    chunk: Option<String>,
}

impl OtaQuery {
    fn into_params(self, kind: OtaKind) -> Result<OtaParams, Fault> {
        Ok(OtaParams {
            kind,
            title: self.title,
            version: self.version,
            chunk_size: number(self.size.as_deref(), "size")?,
            chunk: number(self.chunk.as_deref(), "chunk")?.unwrap_or(0),
        })
    }
}

async fn auth<B: Backend>(State(state): State<RouteState<B>>, Path(token): Path<String>) -> Response {
    state.respond(RequestContext::auth(token)).await
}

async fn provision<B: Backend>(State(state): State<RouteState<B>>, body: Bytes) -> Response {
    match utf8(&body) {
        Ok(body) => state.respond(RequestContext::provision(body)).await,
        Err(fault) => reject(&fault),
    }
}

async fn ota<B: Backend>(
    state: RouteState<B>,
    token: String,
    query: OtaQuery,
    kind: OtaKind,
) -> Response {
    match query.into_params(kind) {
        Ok(params) => state.respond(RequestContext::ota_chunk(token, params)).await,
        Err(fault) => reject(&fault),
    }
}

async fn firmware<B: Backend>(
    State(state): State<RouteState<B>>,
    Path(token): Path<String>,
    Query(query): Query<OtaQuery>,
) -> Response {
    ota(state, token, query, OtaKind::Firmware).await
}

async fn software<B: Backend>(
    State(state): State<RouteState<B>>,
    Path(token): Path<String>,
    Query(query): Query<OtaQuery>,
) -> Response {
    ota(state, token, query, OtaKind::Software).await
}

async fn server_time<B: Backend>(
    State(state): State<RouteState<B>>,
    Path(token): Path<String>,
) -> Response {
    state.respond(RequestContext::server_time(token)).await
}

async fn telemetry<B: Backend>(
    State(state): State<RouteState<B>>,
    Path(token): Path<String>,
    body: Bytes,
) -> Response {
    match utf8(&body) {
        Ok(body) => {
            state
                .respond(RequestContext::new(token, Request::Telemetry(body)))
                .await
        }
        Err(fault) => reject(&fault),
    }
}

async fn attributes<B: Backend>(
    State(state): State<RouteState<B>>,
    Path(token): Path<String>,
    body: Bytes,
) -> Response {
    match utf8(&body) {
        Ok(body) => {
            state
                .respond(RequestContext::new(token, Request::Attributes(body)))
                .await
        }
        Err(fault) => reject(&fault),
    }
}

pub(crate) fn build_router<B: Backend>(
    api_root: &str,
    dispatcher: Dispatcher<B>,
    request_timeout: Duration,
) -> Router {
    let routes = [
        ("GET", "/{token}/auth"),
        ("POST", "/provision"),
        ("GET", "/{token}/firmware"),
        ("GET", "/{token}/software"),
        ("GET", "/{token}/time"),
        ("POST", "/{token}/telemetry"),
        ("POST", "/{token}/attributes"),
    ];
    let api_root = api_root.trim_end_matches('/');
    for (method, route) in routes {
        info!("Device route: [{method}, \"{api_root}{route}\"]");
    }

    let device_routes = Router::new()
        .route("/{token}/auth", get(auth::<B>))
        .route("/provision", post(provision::<B>))
        .route("/{token}/firmware", get(firmware::<B>))
        .route("/{token}/software", get(software::<B>))
        .route("/{token}/time", get(server_time::<B>))
        .route("/{token}/telemetry", post(telemetry::<B>))
        .route("/{token}/attributes", post(attributes::<B>))
        .with_state(RouteState {
            dispatcher,
            request_timeout,
        });

    if api_root.is_empty() {
        device_routes
    } else {
        Router::new().nest(api_root, device_routes)
    }
}

#[cfg(test)]
mod tests {
    use devgate::fault::Fault;
    use devgate::message::OtaKind;

    use super::{OtaQuery, number};

    #[test]
    fn parse_numbers() {
        assert_eq!(number(None, "size").unwrap(), None);
        assert_eq!(number(Some(" 11 "), "size").unwrap(), Some(11));
        assert!(matches!(number(Some("-3"), "chunk"), Err(Fault::Semantic(_))));
        assert!(matches!(number(Some("eleven"), "size"), Err(Fault::Semantic(_))));
    }

    #[test]
    fn ota_query_defaults() {
        let query = OtaQuery {
            title: Some("Title".into()),
            version: Some("version".into()),
            size: None,
            chunk: None,
        };

        let params = query.into_params(OtaKind::Firmware).unwrap();
        assert_eq!(params.chunk_size, None);
        assert_eq!(params.chunk, 0);
    }
}

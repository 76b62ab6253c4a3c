use axum::{
    Router,
    extract::State,
    http::{
        HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri,
        header::{ALLOW, CACHE_CONTROL},
    },
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};

use crate::{
    application::error::HttpError,
    cache::{CacheStatus, PageOutcome, Renderer, cache_control_header},
    infra::upstream::{CACHE_TAGS_HEADER, REVALIDATE_HEADER, RenderedPage, UpstreamRequest},
};

use super::{
    CACHE_STATUS_HEADER, HttpState,
    middleware::{log_responses, set_request_context},
};

const NO_STORE: &str = "no-store";

/// Public site: every GET or HEAD goes through the regeneration cache.
pub fn build_public_router<R>(state: HttpState<R>) -> Router
where
    R: Renderer<Request = UpstreamRequest, Output = RenderedPage>,
{
    Router::new()
        .route("/_health", get(health))
        .fallback(serve_page::<R>)
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn serve_page<R>(
    State(state): State<HttpState<R>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response
where
    R: Renderer<Request = UpstreamRequest, Output = RenderedPage>,
{
    if method != Method::GET && method != Method::HEAD {
        let mut response = StatusCode::METHOD_NOT_ALLOWED.into_response();
        response
            .headers_mut()
            .insert(ALLOW, HeaderValue::from_static("GET, HEAD"));
        return response;
    }

    let target = uri
        .path_and_query()
        .map(|value| value.as_str())
        .unwrap_or("/");
    let request = UpstreamRequest::from_headers(&headers);

    match state.cache.get_page_with_status(target, &request, None).await {
        Ok(outcome) => page_response(outcome),
        Err(err) => HttpError::from(err).into_response(),
    }
}

fn page_response(outcome: PageOutcome<RenderedPage>) -> Response {
    let PageOutcome {
        output: page,
        status,
        revalidate_seconds,
        stale_while_revalidate_seconds,
    } = outcome;

    let code = StatusCode::from_u16(page.status).unwrap_or(StatusCode::OK);
    let mut response = (code, page.body).into_response();
    let response_headers = response.headers_mut();

    for (name, value) in &page.headers {
        if name.eq_ignore_ascii_case(REVALIDATE_HEADER)
            || name.eq_ignore_ascii_case(CACHE_TAGS_HEADER)
        {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            response_headers.insert(name, value);
        }
    }

    let cache_control = match status {
        CacheStatus::Bypass => HeaderValue::from_static(NO_STORE),
        _ => HeaderValue::try_from(cache_control_header(
            revalidate_seconds,
            stale_while_revalidate_seconds,
        ))
        .unwrap_or_else(|_| HeaderValue::from_static(NO_STORE)),
    };
    response_headers.insert(CACHE_CONTROL, cache_control);
    response_headers.insert(
        CACHE_STATUS_HEADER,
        HeaderValue::from_static(status.as_str()),
    );
    response
}

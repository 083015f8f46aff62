use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
    RequestExt,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};

use crate::errors::HttpError;
use crate::transport::http::{HttpState, API_KEY_HEADER};

/// Admits the request when no shared secret is configured, or when
/// `X-API-Key` or a bearer token matches it exactly. `X-API-Key` wins, so the
/// `Authorization` header is only consulted when it is absent.
pub async fn require_api_key(
    State(state): State<HttpState>,
    mut request: Request,
    next: Next,
) -> Result<Response, HttpError> {
    let Some(expected) = state.api_key.as_deref() else {
        return Ok(next.run(request).await);
    };

    let presented = match api_key_header(&request) {
        Some(key) => Some(key),
        None => bearer_token(&mut request).await?,
    };

    match presented {
        None => Err(HttpError::unauthorized("missing_api_key", "missing API key")),
        Some(presented) if presented != expected => {
            Err(HttpError::unauthorized("invalid_api_key", "invalid API key"))
        }
        Some(_) => Ok(next.run(request).await),
    }
}

fn api_key_header(request: &Request) -> Option<String> {
    request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

async fn bearer_token(request: &mut Request) -> Result<Option<String>, HttpError> {
    match request
        .extract_parts::<TypedHeader<Authorization<Bearer>>>()
        .await
    {
        Ok(TypedHeader(auth)) => Ok(Some(auth.token().to_owned())),
        Err(rejection) if rejection.is_missing() => Ok(None),
        Err(_) => Err(HttpError::unauthorized(
            "invalid_api_key",
            "malformed authorization header",
        )),
    }
}

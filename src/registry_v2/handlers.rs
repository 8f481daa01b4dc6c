//! V2 Protocol Engine handlers (spec.md §4.7), dispatched from a single
//! wildcard route so the path parser (not axum's router) owns the
//! N-segment repository-name grammar.
//!
//! Grounded on `nora-registry/src/registry/docker.rs`'s handler bodies
//! (`check`, `catalog`, `check_blob`/`download_blob`,
//! `start_upload`/`patch_blob`/`upload_blob`, `get_manifest`/`put_manifest`,
//! `list_tags`), generalized from its duplicated 1-/2-segment routes to
//! the arbitrary-depth parser in [`super::path`].

use axum::body::Bytes;
use axum::extract::{OriginalUri, Query, State};
use axum::http::{header, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use crate::content::{ContentError, Digest};
use crate::error::AppError;
use crate::AppState;

use super::manifest;
use super::path::{self, V2Route};

const API_VERSION_HEADER: HeaderName = HeaderName::from_static("docker-distribution-api-version");
const API_VERSION_VALUE: &str = "registry/2.0";
const CONTENT_DIGEST_HEADER: HeaderName = HeaderName::from_static("docker-content-digest");
const UPLOAD_UUID_HEADER: HeaderName = HeaderName::from_static("docker-upload-uuid");

pub async fn dispatch(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: OriginalUri,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let raw_path = uri
        .path()
        .strip_prefix("/v2")
        .unwrap_or(uri.path())
        .trim_start_matches('/');

    let route = match path::parse(raw_path) {
        Some(route) => route,
        None => return with_api_version(AppError::not_found("unrecognized v2 path").into_response()),
    };

    let result = handle(&state, method, route, params, body).await;
    with_api_version(match result {
        Ok(response) => response,
        Err(err) => err.into_response(),
    })
}

fn with_api_version(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(API_VERSION_HEADER, HeaderValue::from_static(API_VERSION_VALUE));
    response
}

async fn handle(
    state: &AppState,
    method: Method,
    route: V2Route,
    params: HashMap<String, String>,
    body: Bytes,
) -> Result<Response, AppError> {
    match route {
        V2Route::Check => Ok(Json(json!({})).into_response()),
        V2Route::Catalog => catalog(state).await,
        V2Route::TagsList { name } => tags_list(state, &name).await,
        V2Route::Manifest { name, reference } => match method {
            Method::HEAD => manifest_head(state, &name, &reference).await,
            Method::GET => manifest_get(state, &name, &reference).await,
            Method::PUT => manifest_put(state, &name, &reference, body).await,
            Method::DELETE => manifest_delete(state, &name, &reference).await,
            _ => Err(AppError::MethodNotAllowed(method.to_string())),
        },
        V2Route::Blob { name, digest } => match method {
            Method::HEAD => blob_head(state, &name, &digest).await,
            Method::GET => blob_get(state, &name, &digest).await,
            Method::DELETE => blob_delete(state, &name, &digest).await,
            _ => Err(AppError::MethodNotAllowed(method.to_string())),
        },
        V2Route::StartUpload { name } => match method {
            Method::POST => start_upload(state, &name).await,
            _ => Err(AppError::MethodNotAllowed(method.to_string())),
        },
        V2Route::UploadSession { name, uuid } => match method {
            Method::PATCH => patch_upload(state, &name, &uuid, body).await,
            Method::PUT => finalize_upload(state, &name, &uuid, &params, body).await,
            Method::HEAD => upload_status(state, &uuid).await,
            Method::DELETE => abort_upload(state, &uuid).await,
            _ => Err(AppError::MethodNotAllowed(method.to_string())),
        },
    }
}

async fn catalog(state: &AppState) -> Result<Response, AppError> {
    let repositories = state.content.list_repositories().await?;
    Ok(Json(json!({ "repositories": repositories })).into_response())
}

async fn tags_list(state: &AppState, name: &str) -> Result<Response, AppError> {
    // spec.md §4.2: listTags on an unknown repo returns empty, not an error.
    let tags = match state.content.list_tags(name).await {
        Ok(tags) => tags,
        Err(ContentError::RepositoryNotFound(_)) => Vec::new(),
        Err(e) => return Err(e.into()),
    };
    Ok(Json(json!({ "name": name, "tags": tags })).into_response())
}

async fn manifest_head(state: &AppState, name: &str, reference: &str) -> Result<Response, AppError> {
    let manifest = state.content.get_manifest(name, reference).await?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, manifest.media_type.clone()),
            (CONTENT_DIGEST_HEADER, manifest.digest.to_string()),
            (header::CONTENT_LENGTH, manifest.bytes.len().to_string()),
        ],
    )
        .into_response())
}

async fn manifest_get(state: &AppState, name: &str, reference: &str) -> Result<Response, AppError> {
    let manifest = state.content.get_manifest(name, reference).await?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, manifest.media_type.clone()),
            (CONTENT_DIGEST_HEADER, manifest.digest.to_string()),
        ],
        manifest.bytes,
    )
        .into_response())
}

async fn manifest_put(
    state: &AppState,
    name: &str,
    reference: &str,
    body: Bytes,
) -> Result<Response, AppError> {
    let media_type = manifest::validate_and_infer(&body)
        .map_err(|e| AppError::bad_request(e.to_string()))?;
    let digest = state
        .content
        .put_manifest(name, reference, body, media_type)
        .await?;
    Ok((
        StatusCode::CREATED,
        [(CONTENT_DIGEST_HEADER, digest.to_string())],
    )
        .into_response())
}

async fn manifest_delete(state: &AppState, name: &str, reference: &str) -> Result<Response, AppError> {
    state.content.delete_tag(name, reference).await?;
    Ok(StatusCode::ACCEPTED.into_response())
}

async fn blob_head(state: &AppState, name: &str, digest: &str) -> Result<Response, AppError> {
    let digest = Digest::parse(digest).map_err(AppError::from)?;
    if !state.content.has_blob(name, &digest).await {
        return Err(AppError::not_found(format!("blob {digest} not found")));
    }
    let bytes = state.content.get_blob(name, &digest).await?;
    Ok((
        StatusCode::OK,
        [
            (CONTENT_DIGEST_HEADER, digest.to_string()),
            (header::CONTENT_LENGTH, bytes.len().to_string()),
        ],
    )
        .into_response())
}

async fn blob_get(state: &AppState, name: &str, digest: &str) -> Result<Response, AppError> {
    let digest = Digest::parse(digest).map_err(AppError::from)?;
    let bytes = state.content.get_blob(name, &digest).await?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (CONTENT_DIGEST_HEADER, digest.to_string()),
        ],
        bytes,
    )
        .into_response())
}

async fn blob_delete(state: &AppState, name: &str, digest: &str) -> Result<Response, AppError> {
    let digest = Digest::parse(digest).map_err(AppError::from)?;
    state.content.delete_blob(name, &digest).await?;
    Ok(StatusCode::ACCEPTED.into_response())
}

async fn start_upload(state: &AppState, name: &str) -> Result<Response, AppError> {
    let session_id = state.content.start_upload(name).await?;
    let location = format!("/v2/{name}/blobs/uploads/{session_id}");
    Ok((
        StatusCode::ACCEPTED,
        [
            (header::LOCATION, location),
            (header::RANGE, "0-0".to_string()),
        ],
        [(UPLOAD_UUID_HEADER, session_id)],
    )
        .into_response())
}

async fn patch_upload(
    state: &AppState,
    name: &str,
    session_id: &str,
    body: Bytes,
) -> Result<Response, AppError> {
    let offset = state.content.append_upload(session_id, &body).await?;
    let location = format!("/v2/{name}/blobs/uploads/{session_id}");
    let range = if offset > 0 {
        format!("0-{}", offset - 1)
    } else {
        "0-0".to_string()
    };
    Ok((
        StatusCode::ACCEPTED,
        [(header::LOCATION, location), (header::RANGE, range)],
        [(UPLOAD_UUID_HEADER, session_id.to_string())],
    )
        .into_response())
}

async fn finalize_upload(
    state: &AppState,
    name: &str,
    session_id: &str,
    params: &HashMap<String, String>,
    body: Bytes,
) -> Result<Response, AppError> {
    let digest_param = params
        .get("digest")
        .ok_or_else(|| AppError::bad_request("missing digest query parameter"))?;
    let digest = Digest::parse(digest_param).map_err(AppError::from)?;

    if !body.is_empty() {
        state.content.append_upload(session_id, &body).await?;
    }
    state.content.finish_upload(name, session_id, &digest).await?;

    let location = format!("/v2/{name}/blobs/{digest}");
    Ok((
        StatusCode::CREATED,
        [
            (header::LOCATION, location),
            (CONTENT_DIGEST_HEADER, digest.to_string()),
        ],
    )
        .into_response())
}

async fn upload_status(state: &AppState, session_id: &str) -> Result<Response, AppError> {
    let offset = state.content.upload_offset(session_id).await?;
    let range = if offset > 0 {
        format!("0-{}", offset - 1)
    } else {
        "0-0".to_string()
    };
    Ok((StatusCode::NO_CONTENT, [(header::RANGE, range)]).into_response())
}

async fn abort_upload(state: &AppState, session_id: &str) -> Result<Response, AppError> {
    state.content.abort_upload(session_id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

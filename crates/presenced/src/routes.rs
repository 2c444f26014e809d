use crate::config::Config;
use crate::engine::EngineHandle;
use crate::error::{ApiError, Envelope};
use axum::extract::{Multipart, Path, State};
use axum::response::{Html, Redirect};
use axum::routing::{delete, get, post};
use axum::{Form, Json, Router};
use presence_core::frame;
use presence_store::IdentityStore;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Shared handler state: the engine handle plus configuration.
#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub config: Arc<Config>,
}

/// Build the daemon's router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { Redirect::to("/attendance") }))
        .route("/health", get(|| async { "OK" }))
        .route("/admin", get(admin_page))
        .route("/admin/register", post(admin_register))
        .route("/attendance", get(attendance_page))
        .route("/attendance/camera", post(attendance_camera))
        .route("/attendance/upload", post(attendance_upload))
        .route("/api/status", get(api_status))
        .route("/api/identities", get(api_identities))
        .route("/api/identities/:id", delete(api_remove_identity))
        .nest_service("/static/uploads", ServeDir::new(&state.config.upload_dir))
        .fallback(|| async { (axum::http::StatusCode::NOT_FOUND, "404 Not Found") })
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn admin_page() -> Html<&'static str> {
    Html(include_str!("../templates/admin_register.html"))
}

async fn attendance_page() -> Html<&'static str> {
    Html(include_str!("../templates/attendance.html"))
}

/// Enroll an identity from a multipart form (`name`, `photo`).
///
/// Successful and no-face outcomes both render HTML, matching the admin
/// page flow; malformed requests and server failures use the JSON error
/// boundary.
async fn admin_register(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Html<String>, ApiError> {
    let mut name: Option<String> = None;
    let mut photo: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("malformed multipart body: {e}")))?
    {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("name") => {
                name = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::BadRequest(format!("name field: {e}")))?,
                )
            }
            Some("photo") => {
                photo = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::BadRequest(format!("photo field: {e}")))?
                        .to_vec(),
                )
            }
            _ => {}
        }
    }

    let name = name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing form field: name".into()))?;
    let photo = photo
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing form field: photo".into()))?;

    let rgb = frame::decode_image(&photo)?;

    let outcome = match state.engine.enroll(rgb).await {
        Ok(outcome) => outcome,
        Err(err) => {
            let api: ApiError = err.into();
            if matches!(api, ApiError::FaceNotDetected) {
                tracing::warn!(name, "enrollment rejected: no face detected");
                return Ok(Html(
                    "<h3>Enrollment failed</h3>\
                     <p>No face detected in the photo.</p>\
                     <a href='/admin'>Back</a>"
                        .to_string(),
                ));
            }
            return Err(api);
        }
    };

    let filename = derive_photo_filename(&name);
    tokio::fs::write(state.config.upload_dir.join(&filename), &photo)
        .await
        .map_err(|e| ApiError::Internal(format!("saving photo: {e}")))?;

    let (db, key) = store_paths(&state);
    let stored_name = name.clone();
    let stored_filename = filename.clone();
    let embedding = outcome.embedding;
    let record = tokio::task::spawn_blocking(move || {
        IdentityStore::open(&db, &key)?.upsert_identity(&stored_name, &stored_filename, &embedding)
    })
    .await??;

    tracing::info!(
        name = %record.name,
        id = %record.id,
        quality = outcome.quality,
        "enrollment complete"
    );

    Ok(Html(format!(
        "<h3>Enrollment complete</h3>\
         <p>Name: {}</p>\
         <img src='/static/uploads/{}' width='200'>\
         <br><br>\
         <a href='/admin'>Back</a>",
        html_escape(&record.name),
        html_escape(&filename),
    )))
}

#[derive(Deserialize)]
struct CameraForm {
    /// Base64 data URL captured from the browser camera.
    image_data: String,
}

/// Check in from a live camera frame (base64 data URL).
async fn attendance_camera(
    State(state): State<AppState>,
    Form(form): Form<CameraForm>,
) -> Result<Json<Envelope>, ApiError> {
    let bytes = frame::decode_data_url(&form.image_data)?;
    identify_and_record(&state, bytes).await.map(Json)
}

/// Check in from an uploaded photo (multipart `photo`).
async fn attendance_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Envelope>, ApiError> {
    let mut photo: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("malformed multipart body: {e}")))?
    {
        if field.name() == Some("photo") {
            photo = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("photo field: {e}")))?
                    .to_vec(),
            );
        }
    }

    let photo = photo
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing form field: photo".into()))?;

    identify_and_record(&state, photo).await.map(Json)
}

/// Shared attendance decision path: decode → match → log the event.
///
/// The gallery is re-read from SQLite on every call; the matcher scans it
/// in full. A below-threshold best match is a negative outcome, not an
/// error.
async fn identify_and_record(state: &AppState, image: Vec<u8>) -> Result<Envelope, ApiError> {
    let rgb = frame::decode_image(&image)?;

    let (db, key) = store_paths(state);
    let gallery =
        tokio::task::spawn_blocking(move || IdentityStore::open(&db, &key)?.list_identities())
            .await??;

    let result = state
        .engine
        .identify(rgb, gallery, state.config.similarity_threshold)
        .await?;

    if !result.matched {
        return Ok(Envelope::rejected("Face not recognized."));
    }

    let (Some(identity_id), Some(identity_name)) = (result.identity_id, result.identity_name)
    else {
        return Err(ApiError::Internal("match carried no identity".into()));
    };

    let (db, key) = store_paths(state);
    tokio::task::spawn_blocking(move || {
        IdentityStore::open(&db, &key)?.record_attendance(&identity_id)
    })
    .await??;

    Ok(Envelope {
        status: true,
        message: format!("Attendance recorded: {identity_name}"),
        score: Some(result.similarity),
    })
}

#[derive(Serialize)]
struct IdentityView {
    id: String,
    name: String,
    photo_path: String,
    model_version: String,
    created_at: String,
}

async fn api_identities(
    State(state): State<AppState>,
) -> Result<Json<Vec<IdentityView>>, ApiError> {
    let (db, key) = store_paths(&state);
    let records =
        tokio::task::spawn_blocking(move || IdentityStore::open(&db, &key)?.list_identities())
            .await??;

    Ok(Json(
        records
            .into_iter()
            .map(|r| IdentityView {
                id: r.id,
                name: r.name,
                photo_path: r.photo_path,
                model_version: r.embedding.model_version,
                created_at: r.created_at,
            })
            .collect(),
    ))
}

async fn api_remove_identity(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Envelope>, ApiError> {
    let (db, key) = store_paths(&state);
    let target = id.clone();
    let photo_path = tokio::task::spawn_blocking(move || {
        let store = IdentityStore::open(&db, &key)?;
        let photo = store.get_identity(&target)?.map(|r| r.photo_path);
        if photo.is_some() {
            store.remove_identity(&target)?;
        }
        Ok::<_, presence_store::StoreError>(photo)
    })
    .await??;

    let Some(photo_path) = photo_path else {
        return Ok(Json(Envelope::rejected("Unknown identity.")));
    };

    // Best-effort photo cleanup; the row is already gone.
    if let Err(e) = tokio::fs::remove_file(state.config.upload_dir.join(&photo_path)).await {
        tracing::warn!(photo = %photo_path, error = %e, "stored photo not removed");
    }

    Ok(Json(Envelope::ok("Identity removed.")))
}

async fn api_status(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let (db, key) = store_paths(&state);
    let enrolled =
        tokio::task::spawn_blocking(move || IdentityStore::open(&db, &key)?.count_identities())
            .await??;

    Ok(Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "models_loaded": true,
        "enrolled": enrolled,
        "similarity_threshold": state.config.similarity_threshold,
        "arcface_fp16": state.config.arcface_fp16,
    })))
}

fn store_paths(state: &AppState) -> (PathBuf, PathBuf) {
    (state.config.db_path.clone(), state.config.key_path.clone())
}

/// Derive the stored photo filename from a display name:
/// spaces become underscores, with a fixed `.jpg` extension.
fn derive_photo_filename(name: &str) -> String {
    format!("{}.jpg", name.replace(' ', "_"))
}

/// Minimal HTML entity escaping for rendered confirmation pages.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_photo_filename() {
        assert_eq!(derive_photo_filename("Jane Roe"), "Jane_Roe.jpg");
        assert_eq!(derive_photo_filename("Madonna"), "Madonna.jpg");
        assert_eq!(derive_photo_filename("A B C"), "A_B_C.jpg");
    }

    #[test]
    fn test_html_escape() {
        assert_eq!(
            html_escape("<script>\"x\" & 'y'</script>"),
            "&lt;script&gt;&quot;x&quot; &amp; &#39;y&#39;&lt;/script&gt;"
        );
    }
}

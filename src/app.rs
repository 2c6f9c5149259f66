#![cfg(not(tarpaulin_include))]

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::cell::CellValue;
use crate::cleaning::FillStrategy;
use crate::config::Config;
use crate::error::DataflowError;
use crate::filter::{FilterOp, FilterPredicate};
use crate::graph::ChartRequest;
use crate::reconcile::EditedRow;
use crate::session::Session;
use crate::stats;
use crate::table::RowId;

pub const SESSION_COOKIE: &str = "dataflow_session";

const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

struct SessionSlot {
    session: Session,
    last_seen: Instant,
}

pub struct AppState {
    config: Config,
    sessions: Mutex<HashMap<Uuid, SessionSlot>>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        AppState {
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Runs `f` against the caller's session, creating one (and resuming its
    /// autosave) when the cookie is missing or unknown.
    ///
    /// Sessions idle for longer than `Config::session_idle` are dropped from
    /// memory first; their autosave stays on disk.
    fn with_session<T>(&self, jar: CookieJar, f: impl FnOnce(&mut Session) -> T) -> (CookieJar, T) {
        let id = jar
            .get(SESSION_COOKIE)
            .and_then(|c| Uuid::parse_str(c.value()).ok())
            .unwrap_or_else(Uuid::new_v4);

        let now = Instant::now();
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.retain(|other, slot| {
            let keep = *other == id || now.duration_since(slot.last_seen) < self.config.session_idle;
            if !keep {
                debug!("dropping idle session {}", other);
            }
            keep
        });

        let slot = sessions.entry(id).or_insert_with(|| SessionSlot {
            session: Session::resume(self.config.session_config(&id.to_string())),
            last_seen: now,
        });
        slot.last_seen = now;
        let out = f(&mut slot.session);

        let cookie = Cookie::build((SESSION_COOKIE, id.to_string()))
            .path("/")
            .http_only(true);
        (jar.add(cookie), out)
    }
}

/// Error body returned by every endpoint.
#[derive(Serialize)]
struct ErrorResponse {
    status: String,
    message: String,
}

pub enum ApiError {
    Dataflow(DataflowError),
    BadRequest(String),
}

impl From<DataflowError> for ApiError {
    fn from(e: DataflowError) -> Self {
        ApiError::Dataflow(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Dataflow(e) => {
                let status = match &e {
                    DataflowError::UnsupportedFormat(_)
                    | DataflowError::EmptyInput
                    | DataflowError::UnknownColumn(_)
                    | DataflowError::Csv(_)
                    | DataflowError::Xlsx(_) => StatusCode::BAD_REQUEST,
                    DataflowError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    DataflowError::NoTable => StatusCode::CONFLICT,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status.is_server_error() {
                    log::error!("request failed: {}", e);
                }
                (status, e.to_string())
            }
        };
        let body = ErrorResponse {
            status: "error".to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Deserialize)]
struct FilterBody {
    column: String,
    op: String,
    value: Value,
}

#[derive(Deserialize)]
struct EditBody {
    #[serde(default)]
    row_id: Option<RowId>,
    #[serde(default)]
    values: serde_json::Map<String, Value>,
}

#[derive(Deserialize)]
struct ColumnsBody {
    columns: Vec<String>,
}

#[derive(Deserialize)]
struct RowsBody {
    row_ids: Vec<RowId>,
}

#[derive(Deserialize)]
struct RenameBody {
    mapping: BTreeMap<String, String>,
}

pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let bind_addr = config.bind_addr.clone();
    let app = router(Arc::new(AppState::new(config)));

    let listener = TcpListener::bind(&bind_addr).await?;
    info!("listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/upload", post(upload))
        .route("/api/sheet", axum::routing::delete(clear_sheet))
        .route("/api/view", get(get_view))
        .route("/api/filter", post(set_filter).delete(clear_filter))
        .route("/api/edits", post(apply_edits))
        .route("/api/clean/fill", post(fill_missing))
        .route("/api/clean/delete_columns", post(delete_columns))
        .route("/api/clean/delete_rows", post(delete_rows))
        .route("/api/clean/rename", post(rename_columns))
        .route("/api/restore", post(restore_original))
        .route("/api/stats", get(get_stats))
        .route("/api/stats/:column", get(get_column_stats))
        .route("/api/chart", post(build_chart))
        .route("/api/export/csv", get(export_csv))
        .route("/api/export/xlsx", get(export_xlsx))
        .route("/api/export/pdf", get(export_pdf))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// JSON rendering of the session's view; cells are plain JSON scalars.
fn view_json(session: &Session) -> Value {
    let view = session.view();
    let table = &view.table;
    let rows: Vec<Value> = view
        .ids
        .iter()
        .zip(table.rows())
        .map(|(id, cells)| {
            json!({
                "row_id": id,
                "values": cells.iter().map(CellValue::to_json).collect::<Vec<_>>(),
            })
        })
        .collect();

    json!({
        "file_name": session.file_name(),
        "columns": table.columns(),
        "kinds": &view.kinds,
        "rows": rows,
        "total_rows": session.master().map(|m| m.len()).unwrap_or(0),
        "filter": session.predicate(),
        "filter_error": session.filter_error().map(|e| e.to_string()),
    })
}

fn attachment(bytes: Vec<u8>, content_type: &str, file_name: &str) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name),
            ),
        ],
        bytes,
    )
        .into_response()
}

/// Download name `<stem>_cleaned.<ext>`. The stem comes from the uploaded
/// file name and is reduced to characters that are safe inside a quoted
/// `Content-Disposition` filename.
fn export_name(session: &Session, extension: &str) -> String {
    let stem: String = session
        .file_name()
        .and_then(|n| std::path::Path::new(n).file_stem())
        .and_then(|s| s.to_str())
        .unwrap_or("dataflow")
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' | ' ' => c,
            _ => '_',
        })
        .collect();
    format!("{}_cleaned.{}", stem, extension)
}

async fn upload(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut multipart: Multipart,
) -> (CookieJar, ApiResult<Json<Value>>) {
    let mut upload: Option<(String, Vec<u8>)> = None;
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return (jar, Err(ApiError::BadRequest(e.to_string()))),
        };
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or("upload.csv").to_string();
        match field.bytes().await {
            Ok(bytes) => upload = Some((name, bytes.to_vec())),
            Err(e) => return (jar, Err(ApiError::BadRequest(e.to_string()))),
        }
    }

    let Some((name, bytes)) = upload else {
        return (jar, Err(ApiError::BadRequest("missing multipart field `file`".into())));
    };

    state.with_session(jar, |s| -> ApiResult<Json<Value>> {
        s.import_bytes(&name, bytes)?;
        Ok(Json(view_json(s)))
    })
}

async fn clear_sheet(State(state): State<Arc<AppState>>, jar: CookieJar) -> impl IntoResponse {
    state.with_session(jar, |s| {
        s.clear();
        Json(json!({ "status": "ok" }))
    })
}

async fn get_view(State(state): State<Arc<AppState>>, jar: CookieJar) -> impl IntoResponse {
    state.with_session(jar, |s| Json(view_json(s)))
}

async fn set_filter(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(body): Json<FilterBody>,
) -> (CookieJar, ApiResult<Json<Value>>) {
    let op = match body.op.parse::<FilterOp>() {
        Ok(op) => op,
        Err(e) => return (jar, Err(ApiError::BadRequest(e))),
    };
    let value = match body.value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    };
    let predicate = FilterPredicate::new(body.column, op, value);
    state.with_session(jar, |s| {
        s.set_filter(predicate);
        Ok(Json(view_json(s)))
    })
}

async fn clear_filter(State(state): State<Arc<AppState>>, jar: CookieJar) -> impl IntoResponse {
    state.with_session(jar, |s| {
        s.clear_filter();
        Json(view_json(s))
    })
}

async fn apply_edits(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(body): Json<Vec<EditBody>>,
) -> impl IntoResponse {
    let edited: Vec<EditedRow> = body
        .into_iter()
        .map(|row| EditedRow {
            row_id: row.row_id,
            values: row
                .values
                .iter()
                .map(|(k, v)| (k.clone(), CellValue::from_json(v)))
                .collect(),
        })
        .collect();

    state.with_session(jar, |s| {
        let report = s.apply_edits(&edited);
        Json(json!({ "report": report, "view": view_json(s) }))
    })
}

async fn fill_missing(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(strategy): Json<FillStrategy>,
) -> impl IntoResponse {
    state.with_session(jar, |s| {
        let filled = s.fillna(&strategy);
        Json(json!({ "filled": filled, "view": view_json(s) }))
    })
}

async fn delete_columns(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(body): Json<ColumnsBody>,
) -> impl IntoResponse {
    state.with_session(jar, |s| {
        let removed = s.delete_columns(&body.columns);
        Json(json!({ "removed": removed, "view": view_json(s) }))
    })
}

async fn delete_rows(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(body): Json<RowsBody>,
) -> impl IntoResponse {
    state.with_session(jar, |s| {
        let removed = s.delete_rows(&body.row_ids);
        Json(json!({ "removed": removed, "view": view_json(s) }))
    })
}

async fn rename_columns(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(body): Json<RenameBody>,
) -> impl IntoResponse {
    state.with_session(jar, |s| {
        let report = s.rename_columns(&body.mapping);
        Json(json!({ "report": report, "view": view_json(s) }))
    })
}

async fn restore_original(State(state): State<Arc<AppState>>, jar: CookieJar) -> impl IntoResponse {
    state.with_session(jar, |s| {
        s.restore_original();
        Json(view_json(s))
    })
}

async fn get_stats(State(state): State<Arc<AppState>>, jar: CookieJar) -> impl IntoResponse {
    state.with_session(jar, |s| -> ApiResult<Json<Value>> {
        s.master().ok_or(DataflowError::NoTable)?;
        let view = s.view();
        Ok(Json(json!({
            "summary": stats::summarize(&view.table),
            "columns": stats::describe_view(view),
        })))
    })
}

async fn get_column_stats(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(column): Path<String>,
) -> impl IntoResponse {
    state.with_session(jar, |s| -> ApiResult<Json<Value>> {
        s.master().ok_or(DataflowError::NoTable)?;
        let stats = stats::describe_view_column(s.view(), &column)
            .ok_or(DataflowError::UnknownColumn(column))?;
        Ok(Json(json!(stats)))
    })
}

async fn build_chart(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(request): Json<ChartRequest>,
) -> impl IntoResponse {
    state.with_session(jar, |s| -> ApiResult<Response> {
        let path = s.build_chart(&request)?;
        let png = std::fs::read(&path).map_err(DataflowError::from)?;
        Ok(attachment(png, "image/png", &request.file_name()))
    })
}

async fn export_csv(State(state): State<Arc<AppState>>, jar: CookieJar) -> impl IntoResponse {
    state.with_session(jar, |s| -> ApiResult<Response> {
        let bytes = s.export_csv()?;
        Ok(attachment(bytes, "text/csv; charset=utf-8", &export_name(s, "csv")))
    })
}

async fn export_xlsx(State(state): State<Arc<AppState>>, jar: CookieJar) -> impl IntoResponse {
    state.with_session(jar, |s| -> ApiResult<Response> {
        let bytes = s.export_xlsx()?;
        Ok(attachment(
            bytes,
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            &export_name(s, "xlsx"),
        ))
    })
}

async fn export_pdf(State(state): State<Arc<AppState>>, jar: CookieJar) -> impl IntoResponse {
    state.with_session(jar, |s| -> ApiResult<Response> {
        let path = s.build_report()?;
        let bytes = std::fs::read(&path).map_err(DataflowError::from)?;
        Ok(attachment(bytes, "application/pdf", crate::report::REPORT_FILE_NAME))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    const BOUNDARY: &str = "dataflowboundary";

    fn app(dir: &std::path::Path) -> Router {
        let config = Config {
            session_root: dir.to_path_buf(),
            ..Config::default()
        };
        router(Arc::new(AppState::new(config)))
    }

    fn upload_request(name: &str, content: &str) -> Request<Body> {
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{n}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n{c}\r\n--{b}--\r\n",
            b = BOUNDARY,
            n = name,
            c = content
        );
        Request::post("/api/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn session_cookie(response: &Response) -> String {
        let raw = response
            .headers()
            .get(header::SET_COOKIE)
            .expect("session cookie")
            .to_str()
            .unwrap();
        raw.split(';').next().unwrap().to_string()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_upload_filter_edit_flow() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());

        let response = app
            .clone()
            .oneshot(upload_request("data.csv", "A,B\n1,x\n2,y\n3,z"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = session_cookie(&response);
        let view = json_body(response).await;
        assert_eq!(view["rows"].as_array().unwrap().len(), 3);

        let response = app
            .clone()
            .oneshot(
                Request::post("/api/filter")
                    .header(header::COOKIE, &cookie)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"column":"A","op":">","value":1}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        let view = json_body(response).await;
        assert_eq!(view["rows"][0]["row_id"], 1);
        assert_eq!(view["rows"].as_array().unwrap().len(), 2);

        let response = app
            .clone()
            .oneshot(
                Request::post("/api/edits")
                    .header(header::COOKIE, &cookie)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"[{"row_id":1,"values":{"A":20}},{"values":{"B":"w"}}]"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["report"]["appended"], json!([3]));
        assert_eq!(body["view"]["total_rows"], 4);

        let response = app
            .oneshot(
                Request::get("/api/export/csv")
                    .header(header::COOKIE, &cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"A,B\n20,y\n3,z\n");
    }

    #[test]
    fn test_export_name_is_header_safe() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = Session::new(crate::config::SessionConfig::new(dir.path()));
        assert_eq!(export_name(&s, "csv"), "dataflow_cleaned.csv");

        s.import_bytes("q\"uo;te\r\nd é.csv", b"A\n1\n".to_vec()).unwrap();
        let name = export_name(&s, "xlsx");
        assert_eq!(name, "q_uo_te__d __cleaned.xlsx");
        let response = attachment(Vec::new(), "text/csv", &name);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"q_uo_te__d __cleaned.xlsx\""
        );
    }

    #[test]
    fn test_idle_sessions_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(Config {
            session_root: dir.path().to_path_buf(),
            session_idle: std::time::Duration::ZERO,
            ..Config::default()
        });

        let (jar, _) = state.with_session(CookieJar::new(), |s| {
            s.import_bytes("a.csv", b"A\n1\n".to_vec()).unwrap();
        });
        state.with_session(CookieJar::new(), |_| ());
        assert_eq!(state.sessions.lock().unwrap().len(), 1);

        // the dropped session comes back from its autosave
        let (_, rows) = state.with_session(jar, |s| s.master().map(|m| m.len()));
        assert_eq!(rows, Some(1));
        assert_eq!(state.sessions.lock().unwrap().len(), 1);

        let kept = AppState::new(Config {
            session_root: dir.path().to_path_buf(),
            ..Config::default()
        });
        kept.with_session(CookieJar::new(), |_| ());
        kept.with_session(CookieJar::new(), |_| ());
        assert_eq!(kept.sessions.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());

        let response = app
            .clone()
            .oneshot(Request::get("/api/export/xlsx").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(json_body(response).await["status"], "error");

        let response = app
            .clone()
            .oneshot(upload_request("notes.txt", "hello"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app.clone().oneshot(upload_request("d.csv", "A,B\n1,x")).await.unwrap();
        let cookie = session_cookie(&response);
        let response = app
            .oneshot(
                Request::post("/api/chart")
                    .header(header::COOKIE, &cookie)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"y_column":"B","kind":"histogram"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}

use axum::{
    extract::{DefaultBodyLimit, Json, Multipart, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::{
    app_state::{AppState, Status},
    builder::build,
    errors::CoreError,
    ingest::FileUpload,
    models::{AgentConfig, DocRelation, EditableFields, KnowledgeBaseDocument, Preset},
    normalizer::normalize,
};

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveConfigPayload {
    preset: Preset,
    #[serde(flatten)]
    fields: EditableFields,
}

#[derive(Deserialize)]
pub struct EditFieldPayload {
    field: String,
    value: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectBindingPayload {
    document_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestUrlPayload {
    name: String,
    url: String,
    description: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingView {
    committed: Option<String>,
    pending: Option<String>,
    dirty: bool,
}

impl From<crate::session::BindingSession> for BindingView {
    fn from(s: crate::session::BindingSession) -> Self {
        Self {
            dirty: s.dirty(),
            committed: s.committed,
            pending: s.pending,
        }
    }
}

/// Vista de la sesión de edición: la forma canónica con los valores que el
/// usuario tiene delante (incluidas sus ediciones locales sin guardar).
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigView {
    node_id: String,
    #[serde(flatten)]
    config: AgentConfig,
    binding: BindingView,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSummary {
    node_id: String,
    #[serde(flatten)]
    config: AgentConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentView {
    #[serde(flatten)]
    document: KnowledgeBaseDocument,
    relation: DocRelation,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    let body_limit = app_state.config.max_upload_mb * 1024 * 1024;
    Router::new()
        .route("/api/nodes", get(list_nodes_handler))
        .route(
            "/api/nodes/:id/config",
            get(get_config_handler).put(save_config_handler),
        )
        .route("/api/nodes/:id/config/refresh", post(refresh_config_handler))
        .route("/api/nodes/:id/edits", post(edit_field_handler))
        .route("/api/nodes/:id/session", delete(close_session_handler))
        .route("/api/nodes/:id/documents", get(list_documents_handler))
        .route("/api/nodes/:id/binding/select", post(select_binding_handler))
        .route("/api/nodes/:id/binding/commit", post(commit_binding_handler))
        .route("/api/documents/upload", post(upload_documents_handler))
        .route("/api/documents/url", post(ingest_url_handler))
        .route("/api/documents/:id", delete(delete_document_handler))
        .route("/datasets", post(create_dataset_handler).get(list_datasets_handler))
        .route("/datasets/:id/files/:file_type", get(dataset_file_handler))
        .route("/api/status", get(status_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(app_state)
}

// --- Handlers de configuración de nodos ---

#[axum::debug_handler]
async fn list_nodes_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<NodeSummary>>, CoreError> {
    let configs = state.gateway.get_all_node_configurations().await?;
    let mut nodes: Vec<NodeSummary> = configs
        .iter()
        .map(|(node_id, raw)| NodeSummary {
            node_id: node_id.clone(),
            config: normalize(Some(raw)),
        })
        .collect();
    nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
    Ok(Json(nodes))
}

/// Abre (o reactiva) la sesión de edición de un nodo. La carga lleva el token
/// de generación del momento de la petición: si el nodo activo cambia antes
/// de resolverse, la respuesta obsoleta se descarta sin tocar la vista.
#[axum::debug_handler]
async fn get_config_handler(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Result<Json<ConfigView>, CoreError> {
    let token = state.editor.lock().unwrap().open(&node_id);
    let configs = state.gateway.get_all_node_configurations().await?;
    let canonical = normalize(configs.get(&node_id));

    let config = {
        let mut editor = state.editor.lock().unwrap();
        editor.resolve_fetch(&token, canonical);
        session_view(&editor, &node_id)?
    };
    let binding = state.bindings.open_session(&node_id).await?;

    Ok(Json(ConfigView {
        node_id,
        config,
        binding: binding.into(),
    }))
}

#[axum::debug_handler]
async fn save_config_handler(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    Json(payload): Json<SaveConfigPayload>,
) -> Result<Json<AgentConfig>, CoreError> {
    let configs = state.gateway.get_all_node_configurations().await?;
    let raw = build(&payload.fields, payload.preset, configs.get(&node_id));
    state
        .gateway
        .save_node_configuration(&node_id, raw.clone())
        .await?;

    // Tras guardar, la sesión vuelve a ser remota con lo recién persistido.
    let canonical = normalize(Some(&raw));
    state
        .editor
        .lock()
        .unwrap()
        .refresh(&node_id, canonical.clone());
    info!("Configuración guardada para el nodo {node_id}");
    Ok(Json(canonical))
}

/// Recarga explícita: el usuario pide descartar sus ediciones locales.
#[axum::debug_handler]
async fn refresh_config_handler(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Result<Json<AgentConfig>, CoreError> {
    let configs = state.gateway.get_all_node_configurations().await?;
    let canonical = normalize(configs.get(&node_id));
    let mut editor = state.editor.lock().unwrap();
    editor.open(&node_id);
    editor.refresh(&node_id, canonical.clone());
    Ok(Json(canonical))
}

/// Registra una edición local; a partir de aquí las recargas en segundo plano
/// ya no pisan este campo.
#[axum::debug_handler]
async fn edit_field_handler(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    Json(payload): Json<EditFieldPayload>,
) -> Result<impl IntoResponse, CoreError> {
    let mut editor = state.editor.lock().unwrap();
    match payload.field.as_str() {
        "systemPrompt" => editor.edit_system_prompt(&node_id, payload.value),
        "limitations" => editor.edit_limitations(&node_id, payload.value),
        other => {
            return Err(CoreError::Validation(format!(
                "Campo editable desconocido: {other}"
            )))
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

#[axum::debug_handler]
async fn close_session_handler(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> impl IntoResponse {
    state.editor.lock().unwrap().close(&node_id);
    state.bindings.close_session(&node_id).await;
    StatusCode::NO_CONTENT
}

fn session_view(
    editor: &crate::session::EditorState,
    node_id: &str,
) -> Result<AgentConfig, CoreError> {
    let session = editor
        .session(node_id)
        .ok_or_else(|| CoreError::NotFound(format!("sesión del nodo {node_id}")))?;
    let mut config = session.config.clone();
    config.system_prompt = session.system_prompt.value.clone();
    config.limitations = session.limitations.value.clone();
    Ok(config)
}

// --- Handlers de documentos y vinculación ---

#[axum::debug_handler]
async fn list_documents_handler(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Result<Json<Vec<DocumentView>>, CoreError> {
    let docs = state.bindings.list_documents(&node_id).await?;
    Ok(Json(
        docs.into_iter()
            .map(|(document, relation)| DocumentView { document, relation })
            .collect(),
    ))
}

#[axum::debug_handler]
async fn select_binding_handler(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    Json(payload): Json<SelectBindingPayload>,
) -> Result<Json<BindingView>, CoreError> {
    state
        .bindings
        .select_pending(&node_id, &payload.document_id)
        .await;
    let session = state
        .bindings
        .session(&node_id)
        .await
        .ok_or_else(|| CoreError::NotFound(format!("sesión del nodo {node_id}")))?;
    Ok(Json(session.into()))
}

#[axum::debug_handler]
async fn commit_binding_handler(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Result<Json<serde_json::Value>, CoreError> {
    let docs = state.bindings.commit(&node_id).await?;
    let session = state
        .bindings
        .session(&node_id)
        .await
        .ok_or_else(|| CoreError::NotFound(format!("sesión del nodo {node_id}")))?;
    let documents: Vec<DocumentView> = docs
        .into_iter()
        .map(|(document, relation)| DocumentView { document, relation })
        .collect();
    Ok(Json(json!({
        "binding": BindingView::from(session),
        "documents": documents,
    })))
}

#[axum::debug_handler]
async fn upload_documents_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, CoreError> {
    let mut uploads = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| CoreError::Validation(format!("Multipart inválido: {e}")))?
    {
        if let Some(file_name) = field.file_name().map(str::to_string) {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| CoreError::Validation(format!("Fichero ilegible: {e}")))?;
            uploads.push(FileUpload {
                name: file_name,
                bytes: bytes.to_vec(),
            });
        }
    }
    if uploads.is_empty() {
        return Err(CoreError::Validation(
            "La subida no contiene ningún fichero".to_string(),
        ));
    }

    let outcome = state.ingestion.ingest_batch(&uploads).await;
    info!(
        "Lote de subida procesado: {} éxitos, {} fallos",
        outcome.ingested.len(),
        outcome.failures.len()
    );
    Ok((StatusCode::OK, Json(outcome)))
}

#[axum::debug_handler]
async fn ingest_url_handler(
    State(state): State<AppState>,
    Json(payload): Json<IngestUrlPayload>,
) -> Result<impl IntoResponse, CoreError> {
    let doc = state
        .ingestion
        .ingest_url(&payload.name, &payload.url, payload.description)
        .await?;
    Ok((StatusCode::CREATED, Json(doc)))
}

#[axum::debug_handler]
async fn delete_document_handler(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
) -> Result<impl IntoResponse, CoreError> {
    state.bindings.delete_document(&doc_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Handlers del catálogo de datasets ---

#[axum::debug_handler]
async fn create_dataset_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, CoreError> {
    let mut name = String::new();
    let mut test_type = String::new();
    let mut description = String::new();
    let mut dataset_file: Option<FileUpload> = None;
    let mut test_file: Option<FileUpload> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| CoreError::Validation(format!("Multipart inválido: {e}")))?
    {
        let field_name = field.name().unwrap_or_default().to_string();
        if let Some(file_name) = field.file_name().map(str::to_string) {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| CoreError::Validation(format!("Fichero ilegible: {e}")))?;
            let upload = FileUpload {
                name: file_name,
                bytes: bytes.to_vec(),
            };
            match field_name.as_str() {
                "datasetFile" => dataset_file = Some(upload),
                "testFile" => test_file = Some(upload),
                _ => {}
            }
        } else {
            let text = field
                .text()
                .await
                .map_err(|e| CoreError::Validation(format!("Campo ilegible: {e}")))?;
            match field_name.as_str() {
                "datasetName" => name = text,
                "testType" => test_type = text,
                "description" => description = text,
                _ => {}
            }
        }
    }

    let dataset_file = dataset_file.ok_or_else(|| {
        CoreError::Validation("Falta el fichero principal del dataset".to_string())
    })?;
    let record = state
        .datasets
        .create(&name, &test_type, &description, dataset_file, test_file)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

#[axum::debug_handler]
async fn list_datasets_handler(
    State(state): State<AppState>,
) -> Json<Vec<crate::datasets::DatasetRecord>> {
    Json(state.datasets.list().await)
}

#[axum::debug_handler]
async fn dataset_file_handler(
    State(state): State<AppState>,
    Path((dataset_id, file_type)): Path<(String, String)>,
) -> Result<impl IntoResponse, CoreError> {
    let path = state.datasets.file_path(&dataset_id, &file_type).await?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| CoreError::NotFound(format!("fichero físico: {e}")))?;
    let mime = mime_guess::from_path(&path)
        .first_or_octet_stream()
        .to_string();
    let file_name = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    Ok((
        [
            (header::CONTENT_TYPE, mime),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        bytes,
    ))
}

// --- Handlers de estado y apagado ---

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    Json(state.status.lock().unwrap().clone())
}

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Some(sender) = state.shutdown_sender.lock().unwrap().take() {
        let _ = sender.send(());
    }
    StatusCode::OK
}

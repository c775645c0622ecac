use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

use crate::{
    binding::BindingManager, config::AppConfig, datasets::DatasetStore, ingest::IngestionGate,
    session::EditorState, store::PersistenceGateway,
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub gateway: Arc<dyn PersistenceGateway>,
    /// Estado del editor (sesiones por nodo). Mutex síncrono: nunca se
    /// retiene a través de un await.
    pub editor: Arc<Mutex<EditorState>>,
    pub bindings: Arc<BindingManager>,
    pub ingestion: Arc<IngestionGate>,
    pub datasets: Arc<DatasetStore>,
    pub status: Arc<Mutex<Status>>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Status {
    pub is_busy: bool,
    pub message: String,
}

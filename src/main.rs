// Módulos de la aplicación
mod api;
mod app_state;
mod binding;
mod builder;
mod config;
mod datasets;
mod errors;
mod ingest;
mod models;
mod normalizer;
mod session;
mod store;

use std::sync::{Arc, Mutex};

use axum::Router;
use tokio::sync::oneshot;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::app_state::{AppState, Status};
use crate::binding::BindingManager;
use crate::datasets::DatasetStore;
use crate::ingest::IngestionGate;
use crate::session::EditorState;
use crate::store::{JsonFileStore, MemoryStore, PersistenceGateway};

#[tokio::main]
async fn main() {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().expect("Error al cargar la configuración");

    // 3. Abrir el gateway de persistencia y el catálogo de datasets
    let gateway: Arc<dyn PersistenceGateway> = if cfg.ephemeral {
        info!("Modo efímero: la persistencia vive sólo en memoria");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(
            JsonFileStore::open(&cfg.data_file)
                .await
                .expect("Error abriendo el almacén de persistencia"),
        )
    };
    let datasets = Arc::new(
        DatasetStore::open(&cfg.upload_dir, cfg.dataset_allow_list.clone())
            .await
            .expect("Error abriendo el catálogo de datasets"),
    );

    // 4. Inicializar el núcleo: editor, vinculaciones e ingesta
    let bindings = Arc::new(BindingManager::new(gateway.clone()));
    let ingestion = Arc::new(IngestionGate::new(gateway.clone(), cfg.kb_allow_list.clone()));

    // Crear canal para la señal de apagado.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    // 5. Crear estado compartido de la aplicación
    let app_state = AppState {
        config: cfg.clone(),
        gateway,
        editor: Arc::new(Mutex::new(EditorState::default())),
        bindings,
        ingestion,
        datasets,
        status: Arc::new(Mutex::new(Status {
            is_busy: false,
            message: "Servidor listo.".to_string(),
        })),
        shutdown_sender: Arc::new(Mutex::new(Some(shutdown_tx))),
    };

    // 6. Configurar el router de la API y el servicio de ficheros estáticos
    let app = Router::new()
        .merge(api::create_router(app_state.clone()))
        .fallback_service(ServeDir::new("frontend"))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 7. Iniciar el servidor
    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr)
        .await
        .expect("No se pudo abrir el puerto del servidor");
    let server_url = format!("http://{}", server_addr);
    info!("🚀 Servidor escuchando en {}", &server_url);

    // Abrir el frontend en el navegador por defecto
    if webbrowser::open(&server_url).is_err() {
        info!(
            "No se pudo abrir el navegador. Por favor, accede a {} manualmente.",
            server_url
        );
    }

    // Configurar el apagado ordenado.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await
        .expect("El servidor terminó con error");

    info!("✅ Servidor cerrado correctamente.");
}

//! Taxonomía de errores del núcleo y su traducción a respuestas HTTP.
//!
//! Nota: no existe ningún error de "forma estructural no reconocida". El
//! normalizador degrada a la forma canónica vacía en vez de fallar, para que
//! un registro heredado siempre sea editable.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Falta un campo obligatorio antes de guardar o subir. Se resuelve en
    /// local, sin intentar ninguna operación de E/S.
    #[error("Error de validación: {0}")]
    Validation(String),

    /// La extensión del fichero no está en la lista permitida. Bloquea sólo
    /// ese fichero, nunca el lote completo.
    #[error("Formato de fichero no soportado: '{extension}'")]
    UnsupportedFormat { extension: String },

    /// Registro o fichero físico inexistente en una búsqueda.
    #[error("No encontrado: {0}")]
    NotFound(String),

    /// El gateway de persistencia rechazó la operación. El estado en memoria
    /// de la sesión queda intacto para que el usuario pueda reintentar.
    #[error("Error de persistencia: {0}")]
    Persistence(String),
}

impl CoreError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::UnsupportedFormat { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Persistence(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

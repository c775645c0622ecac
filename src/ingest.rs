//! Puerta de ingesta de la base de conocimiento: valida y materializa un
//! fichero subido o una referencia URL en un registro de documento.
//!
//! Los lotes se procesan en secuencia y con aislamiento de fallos: el error
//! del fichero *k* se anota y los ficheros *k+1..N* siguen su curso. El
//! llamante recibe a la vez la lista de éxitos y la de fallos por fichero.

use std::sync::Arc;

use mime_guess::MimeGuess;
use serde::Serialize;
use tracing::{info, warn};
use url::Url;

use crate::errors::CoreError;
use crate::models::{KnowledgeBaseDocument, NewDocument, SourceType};
use crate::store::PersistenceGateway;

/// Fichero recibido de una subida multipart.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Fallo de un fichero concreto dentro de un lote.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFailure {
    pub file_name: String,
    pub error: String,
}

/// Resultado de un lote: éxitos y fallos, ambos visibles para el llamante.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub ingested: Vec<KnowledgeBaseDocument>,
    pub failures: Vec<FileFailure>,
}

pub struct IngestionGate {
    gateway: Arc<dyn PersistenceGateway>,
    allow_list: Vec<String>,
}

impl IngestionGate {
    /// `allow_list`: extensiones permitidas con punto inicial (".txt", ".pdf"...).
    pub fn new(gateway: Arc<dyn PersistenceGateway>, allow_list: Vec<String>) -> Self {
        Self {
            gateway,
            allow_list,
        }
    }

    /// Ingesta un único fichero: comprobación de extensión contra la lista
    /// permitida, extracción síncrona del texto y alta vía gateway.
    pub async fn ingest_file(
        &self,
        upload: &FileUpload,
        description: Option<String>,
    ) -> Result<KnowledgeBaseDocument, CoreError> {
        if upload.name.trim().is_empty() {
            return Err(CoreError::Validation(
                "El fichero no tiene nombre".to_string(),
            ));
        }
        let extension = self.checked_extension(&upload.name)?;
        let content = extract_text(&extension, &upload.bytes, &upload.name)?;
        let mime: MimeGuess = MimeGuess::from_path(&upload.name);

        let doc = self
            .gateway
            .create_document(NewDocument {
                name: upload.name.clone(),
                description,
                source_type: SourceType::File,
                content,
                file_name: Some(upload.name.clone()),
                file_type: mime.first().map(|m| m.to_string()),
                file_size: Some(upload.bytes.len() as u64),
            })
            .await?;
        info!("Documento ingerido: {} ({})", doc.name, doc.id);
        Ok(doc)
    }

    /// Ingesta una referencia URL. La URL se valida y se guarda tal cual como
    /// `content`; este núcleo nunca la descarga.
    pub async fn ingest_url(
        &self,
        name: &str,
        url: &str,
        description: Option<String>,
    ) -> Result<KnowledgeBaseDocument, CoreError> {
        if name.trim().is_empty() {
            return Err(CoreError::Validation(
                "El documento necesita un nombre".to_string(),
            ));
        }
        Url::parse(url).map_err(|e| CoreError::Validation(format!("URL no válida: {e}")))?;

        let doc = self
            .gateway
            .create_document(NewDocument {
                name: name.to_string(),
                description,
                source_type: SourceType::Url,
                content: url.to_string(),
                file_name: None,
                file_type: None,
                file_size: None,
            })
            .await?;
        info!("Referencia URL ingerida: {} ({})", doc.name, doc.id);
        Ok(doc)
    }

    /// Ingesta secuencial de un lote de ficheros con fallos aislados.
    pub async fn ingest_batch(&self, uploads: &[FileUpload]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for upload in uploads {
            match self.ingest_file(upload, None).await {
                Ok(doc) => outcome.ingested.push(doc),
                Err(err) => {
                    warn!("Fallo ingiriendo {}: {err}", upload.name);
                    outcome.failures.push(FileFailure {
                        file_name: upload.name.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }
        outcome
    }

    /// Extensión del fichero (con punto, en minúsculas) si está permitida.
    fn checked_extension(&self, file_name: &str) -> Result<String, CoreError> {
        let extension = file_name
            .rsplit_once('.')
            .map(|(_, ext)| format!(".{}", ext.to_lowercase()))
            .unwrap_or_default();
        let allowed = self
            .allow_list
            .iter()
            .any(|e| e.eq_ignore_ascii_case(&extension));
        if allowed {
            Ok(extension)
        } else {
            Err(CoreError::UnsupportedFormat { extension })
        }
    }
}

/// Extracción síncrona del texto según la extensión.
fn extract_text(extension: &str, bytes: &[u8], file_name: &str) -> Result<String, CoreError> {
    if extension == ".pdf" {
        return pdf_extract::extract_text_from_mem(bytes).map_err(|e| {
            CoreError::Validation(format!("No se pudo extraer texto del PDF {file_name}: {e}"))
        });
    }
    String::from_utf8(bytes.to_vec())
        .map_err(|_| CoreError::Validation(format!("El fichero {file_name} no es texto UTF-8")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn gate() -> IngestionGate {
        IngestionGate::new(
            Arc::new(MemoryStore::new()),
            vec![".json".into(), ".csv".into(), ".txt".into()],
        )
    }

    fn subida(nombre: &str, texto: &str) -> FileUpload {
        FileUpload {
            name: nombre.to_string(),
            bytes: texto.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn extension_fuera_de_la_lista_se_rechaza() {
        let err = gate()
            .ingest_file(&subida("x.exe", "binario"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::UnsupportedFormat { extension } if extension == ".exe"));
    }

    #[tokio::test]
    async fn extension_permitida_se_ingiere_con_metadatos() {
        let doc = gate()
            .ingest_file(&subida("x.csv", "a,b,c"), None)
            .await
            .unwrap();
        assert_eq!(doc.content, "a,b,c");
        assert_eq!(doc.source_type, SourceType::File);
        assert_eq!(doc.file_name.as_deref(), Some("x.csv"));
        assert_eq!(doc.file_size, Some(5));
        assert_eq!(doc.bound_node_id, None);
    }

    #[tokio::test]
    async fn la_comprobacion_ignora_mayusculas() {
        assert!(gate()
            .ingest_file(&subida("INFORME.TXT", "hola"), None)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn el_lote_aisla_los_fallos_por_fichero() {
        let lote = vec![
            subida("bueno1.txt", "uno"),
            subida("malo.exe", "dos"),
            subida("bueno2.csv", "tres"),
        ];
        let outcome = gate().ingest_batch(&lote).await;
        // El fallo del segundo fichero no impide la ingesta del tercero.
        assert_eq!(outcome.ingested.len(), 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].file_name, "malo.exe");
    }

    #[tokio::test]
    async fn la_url_se_guarda_tal_cual_sin_descargarla() {
        let doc = gate()
            .ingest_url("Docs", "https://example.com/guia", None)
            .await
            .unwrap();
        assert_eq!(doc.source_type, SourceType::Url);
        assert_eq!(doc.content, "https://example.com/guia");
        assert_eq!(doc.file_name, None);
    }

    #[tokio::test]
    async fn una_url_invalida_es_error_de_validacion() {
        let err = gate()
            .ingest_url("Docs", "no-es-una-url", None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }
}

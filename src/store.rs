//! Gateway de persistencia: el único componente con acceso al almacenamiento
//! durable. El resto del núcleo (normalizador, builder, vinculaciones,
//! ingesta) pasa siempre por este trait y nunca toca disco directamente.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::{
    DocumentPatch, KnowledgeBaseDocument, NewDocument, NodeId, RawConfigRecord,
};

/// Operaciones del almacenamiento durable. Todas asíncronas; un rechazo se
/// propaga inmediatamente al llamante como `CoreError::Persistence` (no hay
/// timeouts ni reintentos automáticos).
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn get_all_node_configurations(
        &self,
    ) -> Result<HashMap<NodeId, RawConfigRecord>, CoreError>;

    async fn save_node_configuration(
        &self,
        node_id: &str,
        record: RawConfigRecord,
    ) -> Result<(), CoreError>;

    async fn get_all_documents(&self) -> Result<Vec<KnowledgeBaseDocument>, CoreError>;

    /// Crea un documento; el `id` y `created_at` los asigna el gateway.
    async fn create_document(
        &self,
        fields: NewDocument,
    ) -> Result<KnowledgeBaseDocument, CoreError>;

    async fn update_document(&self, id: &str, patch: DocumentPatch) -> Result<(), CoreError>;

    async fn delete_document(&self, id: &str) -> Result<(), CoreError>;
}

/// Instantánea completa del almacenamiento: configuraciones por nodo (en su
/// forma cruda, sin migrar) y documentos de la base de conocimiento.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Snapshot {
    configurations: HashMap<NodeId, RawConfigRecord>,
    documents: Vec<KnowledgeBaseDocument>,
}

impl Snapshot {
    fn create_document(&mut self, fields: NewDocument) -> KnowledgeBaseDocument {
        let doc = KnowledgeBaseDocument {
            id: Uuid::new_v4().to_string(),
            name: fields.name,
            description: fields.description,
            source_type: fields.source_type,
            content: fields.content,
            file_name: fields.file_name,
            file_type: fields.file_type,
            file_size: fields.file_size,
            bound_node_id: None,
            created_at: Utc::now(),
        };
        self.documents.push(doc.clone());
        doc
    }

    fn update_document(&mut self, id: &str, patch: DocumentPatch) -> Result<(), CoreError> {
        let doc = self
            .documents
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| CoreError::NotFound(format!("documento {id}")))?;
        if let Some(name) = patch.name {
            doc.name = name;
        }
        if let Some(description) = patch.description {
            doc.description = Some(description);
        }
        if let Some(bound) = patch.bound_node_id {
            doc.bound_node_id = bound;
        }
        Ok(())
    }

    fn delete_document(&mut self, id: &str) -> Result<(), CoreError> {
        let before = self.documents.len();
        self.documents.retain(|d| d.id != id);
        if self.documents.len() == before {
            return Err(CoreError::NotFound(format!("documento {id}")));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Almacén en memoria (tests y ejecuciones efímeras)
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Snapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistenceGateway for MemoryStore {
    async fn get_all_node_configurations(
        &self,
    ) -> Result<HashMap<NodeId, RawConfigRecord>, CoreError> {
        Ok(self.inner.lock().await.configurations.clone())
    }

    async fn save_node_configuration(
        &self,
        node_id: &str,
        record: RawConfigRecord,
    ) -> Result<(), CoreError> {
        self.inner
            .lock()
            .await
            .configurations
            .insert(node_id.to_string(), record);
        Ok(())
    }

    async fn get_all_documents(&self) -> Result<Vec<KnowledgeBaseDocument>, CoreError> {
        Ok(self.inner.lock().await.documents.clone())
    }

    async fn create_document(
        &self,
        fields: NewDocument,
    ) -> Result<KnowledgeBaseDocument, CoreError> {
        Ok(self.inner.lock().await.create_document(fields))
    }

    async fn update_document(&self, id: &str, patch: DocumentPatch) -> Result<(), CoreError> {
        self.inner.lock().await.update_document(id, patch)
    }

    async fn delete_document(&self, id: &str) -> Result<(), CoreError> {
        self.inner.lock().await.delete_document(id)
    }
}

// ---------------------------------------------------------------------------
// Almacén sobre fichero JSON
// ---------------------------------------------------------------------------

/// Persistencia en un único fichero JSON bajo el directorio de datos. Cada
/// escritura reescribe la instantánea completa en un fichero temporal y lo
/// renombra sobre el definitivo, para no dejar nunca un JSON a medias.
pub struct JsonFileStore {
    path: PathBuf,
    inner: Mutex<Snapshot>,
}

impl JsonFileStore {
    /// Abre el almacén, cargando la instantánea previa si el fichero existe.
    pub async fn open(path: &Path) -> Result<Self, CoreError> {
        let snapshot = match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| CoreError::Persistence(format!("instantánea corrupta: {e}")))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Snapshot::default(),
            Err(e) => {
                return Err(CoreError::Persistence(format!(
                    "no se pudo leer {}: {e}",
                    path.display()
                )))
            }
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::Persistence(e.to_string()))?;
        }
        info!("Almacén JSON abierto en {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(snapshot),
        })
    }

    async fn persist(&self, snapshot: &Snapshot) -> Result<(), CoreError> {
        let bytes = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| CoreError::Persistence(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| CoreError::Persistence(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| CoreError::Persistence(e.to_string()))
    }
}

#[async_trait]
impl PersistenceGateway for JsonFileStore {
    async fn get_all_node_configurations(
        &self,
    ) -> Result<HashMap<NodeId, RawConfigRecord>, CoreError> {
        Ok(self.inner.lock().await.configurations.clone())
    }

    async fn save_node_configuration(
        &self,
        node_id: &str,
        record: RawConfigRecord,
    ) -> Result<(), CoreError> {
        let mut snapshot = self.inner.lock().await;
        snapshot
            .configurations
            .insert(node_id.to_string(), record);
        self.persist(&snapshot).await
    }

    async fn get_all_documents(&self) -> Result<Vec<KnowledgeBaseDocument>, CoreError> {
        Ok(self.inner.lock().await.documents.clone())
    }

    async fn create_document(
        &self,
        fields: NewDocument,
    ) -> Result<KnowledgeBaseDocument, CoreError> {
        let mut snapshot = self.inner.lock().await;
        let doc = snapshot.create_document(fields);
        self.persist(&snapshot).await?;
        Ok(doc)
    }

    async fn update_document(&self, id: &str, patch: DocumentPatch) -> Result<(), CoreError> {
        let mut snapshot = self.inner.lock().await;
        snapshot.update_document(id, patch)?;
        self.persist(&snapshot).await
    }

    async fn delete_document(&self, id: &str) -> Result<(), CoreError> {
        let mut snapshot = self.inner.lock().await;
        snapshot.delete_document(id)?;
        self.persist(&snapshot).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceType;
    use serde_json::json;

    fn nuevo_doc(name: &str) -> NewDocument {
        NewDocument {
            name: name.to_string(),
            description: None,
            source_type: SourceType::File,
            content: "contenido".to_string(),
            file_name: Some(format!("{name}.txt")),
            file_type: Some("text/plain".to_string()),
            file_size: Some(9),
        }
    }

    #[tokio::test]
    async fn memoria_crea_actualiza_y_borra() {
        let store = MemoryStore::new();
        let doc = store.create_document(nuevo_doc("a")).await.unwrap();
        assert!(!doc.id.is_empty());

        store
            .update_document(&doc.id, DocumentPatch::bind_to("nodo-1"))
            .await
            .unwrap();
        let docs = store.get_all_documents().await.unwrap();
        assert_eq!(docs[0].bound_node_id.as_deref(), Some("nodo-1"));

        store.delete_document(&doc.id).await.unwrap();
        assert!(store.get_all_documents().await.unwrap().is_empty());
        assert!(matches!(
            store.delete_document(&doc.id).await,
            Err(CoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn fichero_json_sobrevive_a_la_reapertura() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("datos").join("snapshot.json");

        {
            let store = JsonFileStore::open(&path).await.unwrap();
            store
                .save_node_configuration("nodo-1", json!({ "search": {}, "systemPrompt": "p" }))
                .await
                .unwrap();
            store.create_document(nuevo_doc("doc")).await.unwrap();
        }

        let reabierto = JsonFileStore::open(&path).await.unwrap();
        let configs = reabierto.get_all_node_configurations().await.unwrap();
        assert_eq!(configs["nodo-1"]["systemPrompt"], json!("p"));
        assert_eq!(reabierto.get_all_documents().await.unwrap().len(), 1);
    }
}

//! Gestión de la vinculación exclusiva documento ↔ nodo.
//!
//! Cada documento apunta como mucho a un nodo (`bound_node_id`); la
//! exclusividad se impone con la secuencia desvincular-luego-vincular del
//! `commit`, no con una transacción del almacenamiento. Dos sesiones que
//! confirmen el mismo documento contra nodos distintos quedan en
//! último-escritor-gana, sin detección del conflicto (hueco documentado en
//! DESIGN.md). Todas las operaciones son idempotentes ante repeticiones.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::errors::CoreError;
use crate::models::{DocRelation, DocumentPatch, KnowledgeBaseDocument, NodeId};
use crate::session::BindingSession;
use crate::store::PersistenceGateway;

pub struct BindingManager {
    gateway: Arc<dyn PersistenceGateway>,
    /// Una sesión por nodo en edición; nunca una selección global compartida.
    sessions: Mutex<HashMap<NodeId, BindingSession>>,
}

impl BindingManager {
    pub fn new(gateway: Arc<dyn PersistenceGateway>) -> Self {
        Self {
            gateway,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Lista los documentos clasificados respecto al nodo en edición.
    pub async fn list_documents(
        &self,
        node_id: &str,
    ) -> Result<Vec<(KnowledgeBaseDocument, DocRelation)>, CoreError> {
        let docs = self.gateway.get_all_documents().await?;
        Ok(docs
            .into_iter()
            .map(|doc| {
                let relation = classify(doc.bound_node_id.as_deref(), node_id);
                (doc, relation)
            })
            .collect())
    }

    /// Abre la sesión de vinculación de un nodo, cargando de persistencia el
    /// documento que hoy lo tiene registrado (`committed`).
    pub async fn open_session(&self, node_id: &str) -> Result<BindingSession, CoreError> {
        let docs = self.gateway.get_all_documents().await?;
        let committed = docs
            .iter()
            .find(|d| d.bound_node_id.as_deref() == Some(node_id))
            .map(|d| d.id.clone());
        let session = BindingSession {
            committed: committed.clone(),
            pending: committed,
        };
        self.sessions
            .lock()
            .await
            .insert(node_id.to_string(), session.clone());
        Ok(session)
    }

    pub async fn session(&self, node_id: &str) -> Option<BindingSession> {
        self.sessions.lock().await.get(node_id).cloned()
    }

    /// Selección de trabajo del usuario. Actualización pura de estado, sin
    /// ninguna E/S.
    pub async fn select_pending(&self, node_id: &str, doc_id: &str) {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.entry(node_id.to_string()).or_default();
        session.pending = Some(doc_id.to_string());
    }

    /// Confirma la selección pendiente del nodo. Sin cambios pendientes es un
    /// no-op. La secuencia es estricta: (1) desvincular el committed
    /// anterior, (2) vincular el pendiente, y sólo con ambas escrituras
    /// aceptadas (3) avanzar el estado de la sesión y (4) refrescar la lista.
    /// Un fallo a medias deja la sesión sucia para que el usuario reintente.
    pub async fn commit(
        &self,
        node_id: &str,
    ) -> Result<Vec<(KnowledgeBaseDocument, DocRelation)>, CoreError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.entry(node_id.to_string()).or_default().clone();

        if !session.dirty() {
            drop(sessions);
            return self.list_documents(node_id).await;
        }

        // 1) Desvincular el documento confirmado anterior, si cambia.
        if let Some(prev) = &session.committed {
            if session.pending.as_deref() != Some(prev.as_str()) {
                self.gateway
                    .update_document(prev, DocumentPatch::unbind())
                    .await
                    .map_err(|e| {
                        warn!("Fallo desvinculando {prev} del nodo {node_id}: {e}");
                        e
                    })?;
            }
        }

        // 2) Vincular el pendiente al nodo.
        if let Some(next) = &session.pending {
            self.gateway
                .update_document(next, DocumentPatch::bind_to(node_id))
                .await
                .map_err(|e| {
                    warn!("Fallo vinculando {next} al nodo {node_id}: {e}");
                    e
                })?;
        }

        // 3) Ambas escrituras aceptadas: ahora sí se avanza el estado.
        if let Some(stored) = sessions.get_mut(node_id) {
            stored.committed = session.pending.clone();
        }
        drop(sessions);
        info!(
            "Vinculación confirmada para el nodo {node_id}: {:?}",
            session.pending
        );

        // 4) Lista refrescada desde el almacenamiento.
        self.list_documents(node_id).await
    }

    /// Borra un documento. Las sesiones que lo tuvieran como committed o
    /// pendiente caen al siguiente documento disponible, o a ninguno.
    pub async fn delete_document(&self, doc_id: &str) -> Result<(), CoreError> {
        self.gateway.delete_document(doc_id).await?;
        let restantes = self.gateway.get_all_documents().await?;
        let siguiente = restantes.first().map(|d| d.id.clone());

        let mut sessions = self.sessions.lock().await;
        for session in sessions.values_mut() {
            if session.committed.as_deref() == Some(doc_id) {
                session.committed = siguiente.clone();
            }
            if session.pending.as_deref() == Some(doc_id) {
                session.pending = siguiente.clone();
            }
        }
        Ok(())
    }

    /// Descarta el estado efímero del nodo (la vista se cerró o cambió).
    pub async fn close_session(&self, node_id: &str) {
        self.sessions.lock().await.remove(node_id);
    }
}

/// Clasificación de sólo lectura de un documento respecto a un nodo.
fn classify(bound: Option<&str>, node_id: &str) -> DocRelation {
    match bound {
        Some(b) if b == node_id => DocRelation::BoundHere,
        Some(_) => DocRelation::BoundElsewhere,
        None => DocRelation::Unbound,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewDocument, SourceType};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::collections::HashMap as StdHashMap;

    async fn store_con_docs(nombres: &[&str]) -> (Arc<MemoryStore>, Vec<String>) {
        let store = Arc::new(MemoryStore::new());
        let mut ids = Vec::new();
        for nombre in nombres {
            let doc = store
                .create_document(NewDocument {
                    name: nombre.to_string(),
                    description: None,
                    source_type: SourceType::File,
                    content: "texto".into(),
                    file_name: None,
                    file_type: None,
                    file_size: None,
                })
                .await
                .unwrap();
            ids.push(doc.id);
        }
        (store, ids)
    }

    #[tokio::test]
    async fn exclusividad_entre_dos_nodos_sobre_el_mismo_documento() {
        let (store, ids) = store_con_docs(&["X"]).await;
        let manager = BindingManager::new(store.clone());
        let x = &ids[0];

        manager.open_session("A").await.unwrap();
        manager.select_pending("A", x).await;
        manager.commit("A").await.unwrap();

        manager.open_session("B").await.unwrap();
        manager.select_pending("B", x).await;
        manager.commit("B").await.unwrap();

        let docs = store.get_all_documents().await.unwrap();
        assert_eq!(docs[0].bound_node_id.as_deref(), Some("B"));

        // Para A el documento ya no está vinculado aquí: su vinculación dejó
        // de referenciar a A y se clasifica por comparación con el nodo.
        let lista_a = manager.list_documents("A").await.unwrap();
        assert_eq!(lista_a[0].1, DocRelation::BoundElsewhere);
        assert!(lista_a[0].0.bound_node_id.as_deref() != Some("A"));
        let lista_b = manager.list_documents("B").await.unwrap();
        assert_eq!(lista_b[0].1, DocRelation::BoundHere);
    }

    #[tokio::test]
    async fn cambiar_de_documento_desvincula_el_anterior() {
        let (store, ids) = store_con_docs(&["X", "Y"]).await;
        let manager = BindingManager::new(store.clone());

        manager.open_session("A").await.unwrap();
        manager.select_pending("A", &ids[0]).await;
        manager.commit("A").await.unwrap();
        manager.select_pending("A", &ids[1]).await;
        manager.commit("A").await.unwrap();

        let docs = store.get_all_documents().await.unwrap();
        let x = docs.iter().find(|d| d.id == ids[0]).unwrap();
        let y = docs.iter().find(|d| d.id == ids[1]).unwrap();
        assert_eq!(x.bound_node_id, None);
        assert_eq!(y.bound_node_id.as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn commit_sin_cambios_es_un_noop() {
        let (store, ids) = store_con_docs(&["X"]).await;
        let manager = BindingManager::new(store.clone());

        manager.open_session("A").await.unwrap();
        manager.select_pending("A", &ids[0]).await;
        manager.commit("A").await.unwrap();
        // Repetir la misma confirmación no altera nada.
        manager.commit("A").await.unwrap();

        let session = manager.session("A").await.unwrap();
        assert!(!session.dirty());
        assert_eq!(session.committed.as_deref(), Some(ids[0].as_str()));
    }

    #[tokio::test]
    async fn borrar_el_documento_seleccionado_cae_al_siguiente() {
        let (store, ids) = store_con_docs(&["X", "Y"]).await;
        let manager = BindingManager::new(store.clone());

        manager.open_session("A").await.unwrap();
        manager.select_pending("A", &ids[0]).await;
        manager.commit("A").await.unwrap();

        manager.delete_document(&ids[0]).await.unwrap();
        let session = manager.session("A").await.unwrap();
        assert_eq!(session.committed.as_deref(), Some(ids[1].as_str()));
        assert_eq!(session.pending.as_deref(), Some(ids[1].as_str()));
    }

    /// Gateway que rechaza la segunda escritura, para comprobar que un fallo
    /// a mitad de commit deja la sesión sucia.
    struct FallaAlVincular {
        inner: Arc<MemoryStore>,
        fallos: Mutex<u32>,
    }

    #[async_trait]
    impl PersistenceGateway for FallaAlVincular {
        async fn get_all_node_configurations(
            &self,
        ) -> Result<StdHashMap<NodeId, crate::models::RawConfigRecord>, CoreError> {
            self.inner.get_all_node_configurations().await
        }
        async fn save_node_configuration(
            &self,
            node_id: &str,
            record: crate::models::RawConfigRecord,
        ) -> Result<(), CoreError> {
            self.inner.save_node_configuration(node_id, record).await
        }
        async fn get_all_documents(&self) -> Result<Vec<KnowledgeBaseDocument>, CoreError> {
            self.inner.get_all_documents().await
        }
        async fn create_document(
            &self,
            fields: NewDocument,
        ) -> Result<KnowledgeBaseDocument, CoreError> {
            self.inner.create_document(fields).await
        }
        async fn update_document(&self, id: &str, patch: DocumentPatch) -> Result<(), CoreError> {
            let mut fallos = self.fallos.lock().await;
            if *fallos > 0 {
                *fallos -= 1;
                return Err(CoreError::Persistence("rechazado".into()));
            }
            self.inner.update_document(id, patch).await
        }
        async fn delete_document(&self, id: &str) -> Result<(), CoreError> {
            self.inner.delete_document(id).await
        }
    }

    #[tokio::test]
    async fn un_fallo_de_persistencia_deja_la_sesion_sucia() {
        let (store, ids) = store_con_docs(&["X"]).await;
        let gateway = Arc::new(FallaAlVincular {
            inner: store.clone(),
            fallos: Mutex::new(1),
        });
        let manager = BindingManager::new(gateway);

        manager.open_session("A").await.unwrap();
        manager.select_pending("A", &ids[0]).await;
        assert!(manager.commit("A").await.is_err());

        // El estado en memoria no avanzó: el usuario puede reintentar.
        let session = manager.session("A").await.unwrap();
        assert!(session.dirty());
        assert_eq!(session.committed, None);

        // El reintento, ya sin rechazo, completa la vinculación.
        manager.commit("A").await.unwrap();
        let docs = store.get_all_documents().await.unwrap();
        assert_eq!(docs[0].bound_node_id.as_deref(), Some("A"));
    }
}

//! Catálogo mínimo de datasets con almacenamiento físico de ficheros.
//!
//! Lo consumen únicamente las páginas de subida; el núcleo de configuración
//! y vinculación no pasa por aquí. Los ficheros se guardan bajo el directorio
//! de subidas y el índice de registros en un JSON junto a ellos.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::errors::CoreError;
use crate::ingest::FileUpload;

/// Metadatos de un fichero almacenado físicamente.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub original_name: String,
    pub filename: String,
    pub size: u64,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetFiles {
    pub dataset: StoredFile,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test: Option<StoredFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetRecord {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub test_type: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub files: DatasetFiles,
}

pub struct DatasetStore {
    upload_dir: PathBuf,
    index_path: PathBuf,
    allow_list: Vec<String>,
    records: Mutex<Vec<DatasetRecord>>,
}

impl DatasetStore {
    /// Abre el catálogo, creando el directorio de subidas si no existe y
    /// cargando el índice previo si lo hay.
    pub async fn open(upload_dir: &Path, allow_list: Vec<String>) -> Result<Self, CoreError> {
        tokio::fs::create_dir_all(upload_dir)
            .await
            .map_err(|e| CoreError::Persistence(e.to_string()))?;
        let index_path = upload_dir.join("index.json");
        let records = match tokio::fs::read(&index_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| CoreError::Persistence(format!("índice corrupto: {e}")))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(CoreError::Persistence(e.to_string())),
        };
        info!("Catálogo de datasets abierto en {}", upload_dir.display());
        Ok(Self {
            upload_dir: upload_dir.to_path_buf(),
            index_path,
            allow_list,
            records: Mutex::new(records),
        })
    }

    /// Crea un dataset guardando el fichero principal y, si llega, el de
    /// pruebas.
    pub async fn create(
        &self,
        name: &str,
        test_type: &str,
        description: &str,
        dataset_file: FileUpload,
        test_file: Option<FileUpload>,
    ) -> Result<DatasetRecord, CoreError> {
        if name.trim().is_empty() {
            return Err(CoreError::Validation(
                "El dataset necesita un nombre".to_string(),
            ));
        }

        let dataset = self.store_file(dataset_file).await?;
        let test = match test_file {
            Some(upload) => Some(self.store_file(upload).await?),
            None => None,
        };

        let record = DatasetRecord {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            test_type: test_type.to_string(),
            description: description.to_string(),
            created_at: Utc::now(),
            files: DatasetFiles { dataset, test },
        };

        let mut records = self.records.lock().await;
        records.push(record.clone());
        self.persist(&records).await?;
        info!("Dataset creado: {} ({})", record.name, record.id);
        Ok(record)
    }

    pub async fn list(&self) -> Vec<DatasetRecord> {
        self.records.lock().await.clone()
    }

    /// Ruta del fichero físico de un dataset. Responde `NotFound` si falta el
    /// dataset, la entrada pedida o el propio fichero en disco.
    pub async fn file_path(&self, id: &str, file_type: &str) -> Result<PathBuf, CoreError> {
        let records = self.records.lock().await;
        let record = records
            .iter()
            .find(|r| r.id == id)
            .ok_or_else(|| CoreError::NotFound(format!("dataset {id}")))?;
        let entry = match file_type {
            "dataset" => Some(&record.files.dataset),
            "test" => record.files.test.as_ref(),
            _ => None,
        }
        .ok_or_else(|| CoreError::NotFound(format!("fichero '{file_type}' del dataset {id}")))?;

        let path = self.upload_dir.join(&entry.filename);
        if !path.is_file() {
            return Err(CoreError::NotFound(format!(
                "fichero físico {}",
                entry.filename
            )));
        }
        Ok(path)
    }

    /// Escribe un fichero subido en disco con un nombre único.
    async fn store_file(&self, upload: FileUpload) -> Result<StoredFile, CoreError> {
        let extension = upload
            .name
            .rsplit_once('.')
            .map(|(_, ext)| format!(".{}", ext.to_lowercase()))
            .unwrap_or_default();
        if !self.allow_list.iter().any(|e| e.eq_ignore_ascii_case(&extension)) {
            return Err(CoreError::UnsupportedFormat { extension });
        }

        let filename = format!("{}-{}", Uuid::new_v4(), upload.name);
        let path = self.upload_dir.join(&filename);
        tokio::fs::write(&path, &upload.bytes)
            .await
            .map_err(|e| CoreError::Persistence(e.to_string()))?;

        Ok(StoredFile {
            original_name: upload.name,
            size: upload.bytes.len() as u64,
            path: path.to_string_lossy().to_string(),
            filename,
        })
    }

    async fn persist(&self, records: &[DatasetRecord]) -> Result<(), CoreError> {
        let bytes = serde_json::to_vec_pretty(records)
            .map_err(|e| CoreError::Persistence(e.to_string()))?;
        tokio::fs::write(&self.index_path, bytes)
            .await
            .map_err(|e| CoreError::Persistence(e.to_string()))
    }
}

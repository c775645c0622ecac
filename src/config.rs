//! Carga y gestión de configuración de la aplicación (servidor + almacenes).

use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Result};

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    /// Fichero de instantánea del gateway de persistencia.
    pub data_file: PathBuf,
    /// Directorio de subidas del catálogo de datasets.
    pub upload_dir: PathBuf,
    /// Límite de subida en megabytes (50 por defecto).
    pub max_upload_mb: usize,
    /// Extensiones permitidas en el catálogo de datasets.
    pub dataset_allow_list: Vec<String>,
    /// Extensiones permitidas en la base de conocimiento.
    pub kb_allow_list: Vec<String>,
    /// Con `EPHEMERAL=1` todo se guarda sólo en memoria (útil para demos).
    pub ephemeral: bool,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:3344".to_string());

        let data_dir = env::var("DATA_DIR").map(PathBuf::from).unwrap_or_else(|_| {
            dirs::data_dir()
                .map(|d| d.join("agent-studio"))
                .unwrap_or_else(|| PathBuf::from("./data"))
        });
        let data_file = data_dir.join("store.json");

        let upload_dir = env::var("UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("uploads"));

        let max_upload_mb = match env::var("MAX_UPLOAD_MB") {
            Ok(v) => v
                .parse()
                .map_err(|_| anyhow!("MAX_UPLOAD_MB no es un número válido: {v}"))?,
            Err(_) => 50,
        };

        let dataset_allow_list = extension_list(
            "DATASET_EXTENSIONS",
            ".csv,.json,.txt,.xlsx,.xls,.pdf,.docx",
        );
        let kb_allow_list = extension_list("KB_EXTENSIONS", ".txt,.md,.csv,.json,.pdf");

        let ephemeral = matches!(
            env::var("EPHEMERAL").as_deref(),
            Ok("1") | Ok("true")
        );

        Ok(Self {
            server_addr,
            data_file,
            upload_dir,
            max_upload_mb,
            dataset_allow_list,
            kb_allow_list,
            ephemeral,
        })
    }
}

/// Lista de extensiones separadas por comas, normalizadas a ".ext" minúscula.
fn extension_list(var: &str, default: &str) -> Vec<String> {
    env::var(var)
        .unwrap_or_else(|_| default.to_string())
        .split(',')
        .map(|e| {
            let e = e.trim().to_lowercase();
            if e.starts_with('.') {
                e
            } else {
                format!(".{e}")
            }
        })
        .filter(|e| e.len() > 1)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn las_listas_de_extensiones_se_normalizan() {
        // Sin variable de entorno definida se usa el default.
        let lista = extension_list("VARIABLE_QUE_NO_EXISTE", "csv, .TXT ,pdf");
        assert_eq!(lista, vec![".csv", ".txt", ".pdf"]);
    }
}

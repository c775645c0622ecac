//! Modelos de dominio (configuración canónica de agentes y documentos de la
//! base de conocimiento).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type NodeId = String;
pub type DocumentId = String;

/// Registro de configuración tal y como se persiste: un árbol JSON sin tipar
/// que puede presentar cualquiera de las ocho formas históricas. Nunca se
/// migra; las formas antiguas y nuevas conviven indefinidamente.
pub type RawConfigRecord = serde_json::Value;

// --- Defaults declarados de cada preset ---

pub const DEFAULT_SEARCH_SCOPE: &str = "General Web Search";
pub const DEFAULT_RESULT_PROCESSING: &str = "Summarize key points";
pub const DEFAULT_MAX_RESULTS: u32 = 10;
pub const DEFAULT_CHUNK_SIZE: u32 = 512;
pub const DEFAULT_CHUNK_OVERLAP: u32 = 50;
pub const DEFAULT_TOP_K_RESULTS: u32 = 3;
pub const DEFAULT_RETRIEVAL_STRATEGY: &str = "similarity";
pub const DEFAULT_WEATHER_UNITS: &str = "metric";

/// Identificador del preset activo de un agente.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Preset {
    Search,
    CustomRag,
    Weather,
}

impl Preset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Preset::Search => "search",
            Preset::CustomRag => "customRag",
            Preset::Weather => "weather",
        }
    }
}

/// Campos del preset de búsqueda web.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchConfig {
    pub serp_api_key: String,
    pub search_scope: String,
    pub custom_instructions: String,
    pub filter_criteria: String,
    pub result_processing: String,
    pub max_results: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            serp_api_key: String::new(),
            search_scope: DEFAULT_SEARCH_SCOPE.to_string(),
            custom_instructions: String::new(),
            filter_criteria: String::new(),
            result_processing: DEFAULT_RESULT_PROCESSING.to_string(),
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

/// Campos del preset RAG personalizado.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomRagConfig {
    pub chunk_size: u32,
    pub chunk_overlap: u32,
    pub top_k_results: u32,
    pub embedding_model: String,
    pub retrieval_strategy: String,
}

impl Default for CustomRagConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            top_k_results: DEFAULT_TOP_K_RESULTS,
            embedding_model: String::new(),
            retrieval_strategy: DEFAULT_RETRIEVAL_STRATEGY.to_string(),
        }
    }
}

/// Campos del preset de meteorología.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherConfig {
    pub api_key: String,
    pub default_location: String,
    pub units: String,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            default_location: String::new(),
            units: DEFAULT_WEATHER_UNITS.to_string(),
        }
    }
}

/// Unión discriminada: exactamente un preset activo con su bolsa de campos.
/// Los campos de los presets inactivos no se materializan en la forma
/// canónica (pueden seguir existiendo, inertes, en el registro persistido).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "preset", rename_all = "camelCase")]
pub enum PresetConfig {
    Search(SearchConfig),
    CustomRag(CustomRagConfig),
    Weather(WeatherConfig),
}

impl PresetConfig {
    pub fn preset(&self) -> Preset {
        match self {
            PresetConfig::Search(_) => Preset::Search,
            PresetConfig::CustomRag(_) => Preset::CustomRag,
            PresetConfig::Weather(_) => Preset::Weather,
        }
    }
}

/// Configuración canónica en memoria de un agente, independiente de la forma
/// heredada bajo la que estuviera persistida.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    #[serde(flatten)]
    pub preset: PresetConfig,
    pub system_prompt: String,
    pub limitations: String,
    pub updated_at: Option<DateTime<Utc>>,
}

impl AgentConfig {
    /// Forma canónica vacía: preset de búsqueda con defaults y textos vacíos.
    /// Es el resultado de normalizar un registro ausente o no reconocido.
    pub fn empty() -> Self {
        Self {
            preset: PresetConfig::Search(SearchConfig::default()),
            system_prompt: String::new(),
            limitations: String::new(),
            updated_at: None,
        }
    }
}

// --- Campos editables (entrada del usuario, siempre texto) ---

/// Entradas de texto del formulario de búsqueda. Los campos numéricos llegan
/// como texto y se convierten en el builder (fallo suave a default).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchFields {
    pub serp_api_key: String,
    pub search_scope: String,
    pub custom_instructions: String,
    pub filter_criteria: String,
    pub result_processing: String,
    pub max_results: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomRagFields {
    pub chunk_size: String,
    pub chunk_overlap: String,
    pub top_k_results: String,
    pub embedding_model: String,
    pub retrieval_strategy: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WeatherFields {
    pub api_key: String,
    pub default_location: String,
    pub units: String,
}

/// Conjunto completo de campos editables de la vista de configuración.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EditableFields {
    pub system_prompt: String,
    pub limitations: String,
    pub search: SearchFields,
    pub custom_rag: CustomRagFields,
    pub weather: WeatherFields,
}

// --- Documentos de la base de conocimiento ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    File,
    Url,
}

/// Documento de la base de conocimiento. `bound_node_id` apunta como mucho a
/// un nodo en cada instante; la inversa (un documento por nodo) la impone el
/// BindingManager, no el almacenamiento.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeBaseDocument {
    pub id: DocumentId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub source_type: SourceType,
    /// Cuerpo de texto extraído (fuentes `file`) o la URL referenciada tal
    /// cual (fuentes `url`; este núcleo nunca la descarga).
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bound_node_id: Option<NodeId>,
    pub created_at: DateTime<Utc>,
}

/// Campos de creación de un documento; el gateway asigna `id` y `created_at`.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub name: String,
    pub description: Option<String>,
    pub source_type: SourceType,
    pub content: String,
    pub file_name: Option<String>,
    pub file_type: Option<String>,
    pub file_size: Option<u64>,
}

/// Actualización parcial de un documento. `bound_node_id` usa doble Option:
/// `None` = no tocar, `Some(None)` = desvincular, `Some(Some(id))` = vincular.
#[derive(Debug, Clone, Default)]
pub struct DocumentPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub bound_node_id: Option<Option<NodeId>>,
}

impl DocumentPatch {
    pub fn bind_to(node_id: &str) -> Self {
        Self {
            bound_node_id: Some(Some(node_id.to_string())),
            ..Default::default()
        }
    }

    pub fn unbind() -> Self {
        Self {
            bound_node_id: Some(None),
            ..Default::default()
        }
    }
}

/// Relación de un documento con el nodo que se está editando.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DocRelation {
    /// Vinculado al nodo en edición.
    BoundHere,
    /// Vinculado a otro nodo; clasificación de sólo lectura, nunca un destino
    /// de transición local.
    BoundElsewhere,
    Unbound,
}

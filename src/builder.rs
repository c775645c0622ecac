//! Reconstrucción del registro persistible a partir de los campos editados.
//!
//! La regla central es la preservación estructural: si el registro existente
//! usa el envoltorio `{type:"agent", agent:{...}}`, el resultado emite el
//! mismo envoltorio; si es plano, se emite plano. La mezcla es superficial en
//! la frontera del envoltorio: sólo se reescriben la bolsa del preset activo,
//! los textos y el sello temporal, y el resto de claves del registro queda
//! intacto.

use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::models::{
    CustomRagConfig, EditableFields, Preset, RawConfigRecord, SearchConfig, WeatherConfig,
    DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_RESULTS, DEFAULT_RESULT_PROCESSING,
    DEFAULT_RETRIEVAL_STRATEGY, DEFAULT_SEARCH_SCOPE, DEFAULT_TOP_K_RESULTS,
    DEFAULT_WEATHER_UNITS,
};

/// Construye el registro a persistir mezclando los campos editados sobre el
/// registro previamente almacenado (si existe).
pub fn build(
    edited: &EditableFields,
    classification: Preset,
    existing_raw: Option<&Value>,
) -> RawConfigRecord {
    let mut fields = preset_fields(edited, classification);
    fields.insert("systemPrompt".into(), json!(edited.system_prompt));
    fields.insert("limitations".into(), json!(edited.limitations));
    fields.insert("updatedAt".into(), json!(Utc::now().to_rfc3339()));

    match existing_raw {
        Some(raw) if is_agent_wrapped(raw) => {
            // Envoltorio {type:"agent", agent:{...}}: se mezcla dentro del
            // objeto agent y el resto de claves (de ambos niveles) se respeta.
            let mut root = raw.as_object().cloned().unwrap_or_default();
            let mut agent = root
                .get("agent")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            merge_fields(&mut agent, fields, classification);
            root.insert("agent".into(), Value::Object(agent));
            root.insert("type".into(), json!("agent"));
            Value::Object(root)
        }
        Some(raw) => {
            let mut root = raw.as_object().cloned().unwrap_or_default();
            merge_fields(&mut root, fields, classification);
            Value::Object(root)
        }
        None => {
            let mut root = Map::new();
            merge_fields(&mut root, fields, classification);
            Value::Object(root)
        }
    }
}

fn is_agent_wrapped(raw: &Value) -> bool {
    raw.get("type").and_then(Value::as_str) == Some("agent")
        && raw.get("agent").map(Value::is_object).unwrap_or(false)
}

/// Vuelca los campos reconstruidos en el nivel portador. Las bolsas de los
/// presets que ya no son el activo se eliminan del nivel portador y también
/// de su sub-objeto `configuration` heredado: si quedaran inertes en
/// cualquiera de los niveles que sondea la normalización, el registro se
/// reclasificaría contra la elección del usuario en la siguiente carga.
fn merge_fields(carrier: &mut Map<String, Value>, fields: Map<String, Value>, active: Preset) {
    strip_stale_presets(carrier, active);
    if let Some(legacy) = carrier
        .get_mut("configuration")
        .and_then(Value::as_object_mut)
    {
        strip_stale_presets(legacy, active);
    }
    for (key, value) in fields {
        carrier.insert(key, value);
    }
}

/// Retira de un nivel las bolsas de los presets inactivos y, si ya no aplica,
/// el marcador heredado `preset: "weather"`.
fn strip_stale_presets(level: &mut Map<String, Value>, active: Preset) {
    for stale in [Preset::Search, Preset::CustomRag, Preset::Weather] {
        if stale != active {
            level.remove(stale.as_str());
        }
    }
    if active != Preset::Weather
        && level.get("preset").and_then(Value::as_str) == Some("weather")
    {
        level.remove("preset");
    }
}

/// Bolsa del preset activo más sus campos derivados.
fn preset_fields(edited: &EditableFields, classification: Preset) -> Map<String, Value> {
    let mut fields = Map::new();
    match classification {
        Preset::Search => {
            let cfg = coerce_search(edited);
            // Derivado, recalculado en cada build; nunca se edita a mano.
            fields.insert("processingPrompt".into(), json!(processing_prompt(&cfg)));
            fields.insert("search".into(), json!(cfg));
        }
        Preset::CustomRag => {
            fields.insert("customRag".into(), json!(coerce_custom_rag(edited)));
        }
        Preset::Weather => {
            fields.insert("weather".into(), json!(coerce_weather(edited)));
        }
    }
    fields
}

/// Plantilla fija del prompt de procesamiento: cinco líneas etiquetadas,
/// siempre en este orden.
fn processing_prompt(cfg: &SearchConfig) -> String {
    format!(
        "Search Scope: {}\nCustom Instructions: {}\nFilter Criteria: {}\nResult Processing: {}\nMax Results: {}",
        cfg.search_scope,
        cfg.custom_instructions,
        cfg.filter_criteria,
        cfg.result_processing,
        cfg.max_results,
    )
}

// --- Coerción de los campos de texto a la forma canónica ---

fn coerce_search(edited: &EditableFields) -> SearchConfig {
    let s = &edited.search;
    SearchConfig {
        serp_api_key: s.serp_api_key.clone(),
        search_scope: text_or(&s.search_scope, DEFAULT_SEARCH_SCOPE),
        custom_instructions: s.custom_instructions.clone(),
        filter_criteria: s.filter_criteria.clone(),
        result_processing: text_or(&s.result_processing, DEFAULT_RESULT_PROCESSING),
        max_results: parse_u32(&s.max_results, DEFAULT_MAX_RESULTS, "maxResults"),
    }
}

fn coerce_custom_rag(edited: &EditableFields) -> CustomRagConfig {
    let r = &edited.custom_rag;
    CustomRagConfig {
        chunk_size: parse_u32(&r.chunk_size, DEFAULT_CHUNK_SIZE, "chunkSize"),
        chunk_overlap: parse_u32(&r.chunk_overlap, DEFAULT_CHUNK_OVERLAP, "chunkOverlap"),
        top_k_results: parse_u32(&r.top_k_results, DEFAULT_TOP_K_RESULTS, "topKResults"),
        embedding_model: r.embedding_model.clone(),
        retrieval_strategy: text_or(&r.retrieval_strategy, DEFAULT_RETRIEVAL_STRATEGY),
    }
}

fn coerce_weather(edited: &EditableFields) -> WeatherConfig {
    let w = &edited.weather;
    WeatherConfig {
        api_key: w.api_key.clone(),
        default_location: w.default_location.clone(),
        units: text_or(&w.units, DEFAULT_WEATHER_UNITS),
    }
}

fn text_or(value: &str, default: &str) -> String {
    if value.trim().is_empty() {
        default.to_string()
    } else {
        value.to_string()
    }
}

/// Conversión suave de una entrada de texto a entero: un valor no parseable
/// toma el default declarado y el guardado continúa, nunca se aborta.
fn parse_u32(text: &str, default: u32, field: &str) -> u32 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return default;
    }
    match trimmed.parse() {
        Ok(v) => v,
        Err(_) => {
            warn!(
                "Valor no numérico '{}' en el campo {}; se usa el default {}",
                trimmed, field, default
            );
            default
        }
    }
}

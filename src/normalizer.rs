//! Normalización de registros de configuración heredados a la forma canónica
//! `AgentConfig`.
//!
//! El almacenamiento acumula al menos ocho formas históricas (planas,
//! envueltas en `agent`, en `configuration`, o en ambas). Aquí se sondean con
//! un orden de prioridad fijo y la primera coincidencia gana:
//! customRag → weather → search → mínima (sólo textos) → forma vacía.
//! Esta función nunca falla: un registro no reconocido degrada a la forma
//! canónica vacía para que siempre sea editable.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::debug;

use crate::models::{
    AgentConfig, CustomRagConfig, PresetConfig, SearchConfig, WeatherConfig,
    DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_RESULTS, DEFAULT_RESULT_PROCESSING,
    DEFAULT_RETRIEVAL_STRATEGY, DEFAULT_SEARCH_SCOPE, DEFAULT_TOP_K_RESULTS,
    DEFAULT_WEATHER_UNITS,
};

/// Normaliza un registro persistido (o su ausencia) a `AgentConfig`.
pub fn normalize(raw: Option<&Value>) -> AgentConfig {
    let Some(raw) = raw else {
        return AgentConfig::empty();
    };

    let levels = carrier_levels(raw);
    if levels.is_empty() {
        debug!("Registro sin objeto raíz reconocible; forma canónica vacía");
        return AgentConfig::empty();
    }

    let system_prompt = find_str(&levels, "systemPrompt").unwrap_or_default();
    let limitations = find_str(&levels, "limitations").unwrap_or_default();
    let updated_at = find_timestamp(&levels, "updatedAt");

    // Sondeo ordenado del preset; la primera coincidencia gana.
    let preset = if let Some(bag) = find_bag(&levels, "customRag") {
        debug!("Registro clasificado como customRag");
        PresetConfig::CustomRag(extract_custom_rag(bag))
    } else if let Some(cfg) = probe_weather(&levels) {
        debug!("Registro clasificado como weather");
        PresetConfig::Weather(cfg)
    } else if let Some(bag) = find_bag(&levels, "search") {
        debug!("Registro clasificado como search");
        PresetConfig::Search(extract_search(bag))
    } else if !system_prompt.is_empty() || !limitations.is_empty() {
        // Forma mínima: sólo textos. Se adopta el preset por defecto.
        PresetConfig::Search(SearchConfig::default())
    } else {
        debug!("Registro sin ninguna forma conocida; forma canónica vacía");
        return AgentConfig::empty();
    };

    AgentConfig {
        preset,
        system_prompt,
        limitations,
        updated_at,
    }
}

/// Niveles portadores donde pueden vivir la bolsa del preset y los textos,
/// en orden de sondeo fijo: raíz, `agent`, `configuration` y
/// `agent.configuration`.
fn carrier_levels(raw: &Value) -> Vec<&Map<String, Value>> {
    let mut levels = Vec::new();
    if let Some(root) = raw.as_object() {
        levels.push(root);
        if let Some(agent) = root.get("agent").and_then(Value::as_object) {
            levels.push(agent);
        }
        if let Some(cfg) = root.get("configuration").and_then(Value::as_object) {
            levels.push(cfg);
        }
        if let Some(inner) = root
            .get("agent")
            .and_then(Value::as_object)
            .and_then(|a| a.get("configuration"))
            .and_then(Value::as_object)
        {
            levels.push(inner);
        }
    }
    levels
}

/// Primer nivel que contenga `key` como objeto.
fn find_bag<'a>(levels: &[&'a Map<String, Value>], key: &str) -> Option<&'a Map<String, Value>> {
    levels
        .iter()
        .find_map(|level| level.get(key).and_then(Value::as_object))
}

/// Primer nivel que contenga `key` como cadena.
fn find_str(levels: &[&Map<String, Value>], key: &str) -> Option<String> {
    levels
        .iter()
        .find_map(|level| level.get(key).and_then(Value::as_str))
        .map(str::to_string)
}

fn find_timestamp(levels: &[&Map<String, Value>], key: &str) -> Option<DateTime<Utc>> {
    find_str(levels, key)
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// El preset de meteorología puede aparecer como bolsa `weather` o sólo como
/// marcador `preset: "weather"` en alguno de los niveles portadores.
fn probe_weather(levels: &[&Map<String, Value>]) -> Option<WeatherConfig> {
    if let Some(bag) = find_bag(levels, "weather") {
        return Some(extract_weather(bag));
    }
    let marked = levels
        .iter()
        .any(|level| level.get("preset").and_then(Value::as_str) == Some("weather"));
    marked.then(WeatherConfig::default)
}

// --- Extracción de campos con defaults declarados ---

fn extract_search(bag: &Map<String, Value>) -> SearchConfig {
    SearchConfig {
        serp_api_key: str_field(bag, "serpApiKey", ""),
        search_scope: str_field(bag, "searchScope", DEFAULT_SEARCH_SCOPE),
        custom_instructions: str_field(bag, "customInstructions", ""),
        filter_criteria: str_field(bag, "filterCriteria", ""),
        result_processing: str_field(bag, "resultProcessing", DEFAULT_RESULT_PROCESSING),
        max_results: u32_field(bag, "maxResults", DEFAULT_MAX_RESULTS),
    }
}

fn extract_custom_rag(bag: &Map<String, Value>) -> CustomRagConfig {
    CustomRagConfig {
        chunk_size: u32_field(bag, "chunkSize", DEFAULT_CHUNK_SIZE),
        chunk_overlap: u32_field(bag, "chunkOverlap", DEFAULT_CHUNK_OVERLAP),
        top_k_results: u32_field(bag, "topKResults", DEFAULT_TOP_K_RESULTS),
        embedding_model: str_field(bag, "embeddingModel", ""),
        retrieval_strategy: str_field(bag, "retrievalStrategy", DEFAULT_RETRIEVAL_STRATEGY),
    }
}

fn extract_weather(bag: &Map<String, Value>) -> WeatherConfig {
    WeatherConfig {
        api_key: str_field(bag, "apiKey", ""),
        default_location: str_field(bag, "defaultLocation", ""),
        units: str_field(bag, "units", DEFAULT_WEATHER_UNITS),
    }
}

fn str_field(bag: &Map<String, Value>, key: &str, default: &str) -> String {
    bag.get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

/// Los numéricos heredados aparecen como número JSON o como cadena numérica;
/// cualquier otra cosa, incluido un valor fuera del rango de `u32`, toma el
/// default declarado.
fn u32_field(bag: &Map<String, Value>, key: &str, default: u32) -> u32 {
    match bag.get(key) {
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(default),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Preset;
    use serde_json::json;

    fn search_bag() -> Value {
        json!({
            "serpApiKey": "clave",
            "searchScope": "News",
            "customInstructions": "ci",
            "filterCriteria": "fc",
            "resultProcessing": "rp",
            "maxResults": 7
        })
    }

    /// Las ocho formas históricas con la misma configuración semántica deben
    /// normalizar a exactamente la misma forma canónica.
    #[test]
    fn formas_equivalentes_normalizan_identico() {
        let textos = ("prompt", "limites");
        let variantes = vec![
            // 1. plana
            json!({ "search": search_bag(), "systemPrompt": textos.0, "limitations": textos.1 }),
            // 4. envuelta en agent
            json!({ "type": "agent", "agent": { "search": search_bag(), "systemPrompt": textos.0, "limitations": textos.1 } }),
            // 5. envuelta en configuration
            json!({ "configuration": { "search": search_bag(), "systemPrompt": textos.0, "limitations": textos.1 } }),
            // 6. doblemente envuelta
            json!({ "type": "agent", "agent": { "configuration": { "search": search_bag(), "systemPrompt": textos.0, "limitations": textos.1 } } }),
        ];

        let esperado = normalize(Some(&variantes[0]));
        assert_eq!(esperado.preset.preset(), Preset::Search);
        for variante in &variantes[1..] {
            assert_eq!(normalize(Some(variante)), esperado);
        }
    }

    #[test]
    fn escenario_search_con_defaults() {
        let raw = json!({
            "search": { "serpApiKey": "a", "maxResults": 5 },
            "systemPrompt": "p"
        });
        let cfg = normalize(Some(&raw));
        match &cfg.preset {
            PresetConfig::Search(s) => {
                assert_eq!(s.serp_api_key, "a");
                assert_eq!(s.max_results, 5);
                assert_eq!(s.search_scope, DEFAULT_SEARCH_SCOPE);
                assert_eq!(s.result_processing, DEFAULT_RESULT_PROCESSING);
            }
            other => panic!("preset inesperado: {other:?}"),
        }
        assert_eq!(cfg.system_prompt, "p");
        assert_eq!(cfg.limitations, "");
    }

    #[test]
    fn custom_rag_gana_al_sondeo_aunque_haya_search() {
        // Prioridad fija: un registro que estructuralmente satisface varias
        // formas se clasifica por el primer sondeo que coincida.
        let raw = json!({
            "customRag": { "chunkSize": "1024" },
            "search": search_bag()
        });
        let cfg = normalize(Some(&raw));
        match &cfg.preset {
            PresetConfig::CustomRag(r) => {
                assert_eq!(r.chunk_size, 1024);
                assert_eq!(r.chunk_overlap, DEFAULT_CHUNK_OVERLAP);
                assert_eq!(r.top_k_results, DEFAULT_TOP_K_RESULTS);
            }
            other => panic!("preset inesperado: {other:?}"),
        }
    }

    #[test]
    fn custom_rag_doblemente_envuelto() {
        let raw = json!({
            "type": "agent",
            "agent": { "configuration": { "customRag": { "topKResults": 9 } } }
        });
        let cfg = normalize(Some(&raw));
        assert_eq!(cfg.preset.preset(), Preset::CustomRag);
    }

    #[test]
    fn weather_por_marcador_de_preset() {
        let raw = json!({ "configuration": { "preset": "weather" }, "systemPrompt": "p" });
        let cfg = normalize(Some(&raw));
        match &cfg.preset {
            PresetConfig::Weather(w) => assert_eq!(w.units, DEFAULT_WEATHER_UNITS),
            other => panic!("preset inesperado: {other:?}"),
        }
        assert_eq!(cfg.system_prompt, "p");
    }

    #[test]
    fn weather_anidado_en_configuration() {
        let raw = json!({ "configuration": { "weather": { "apiKey": "k", "units": "imperial" } } });
        let cfg = normalize(Some(&raw));
        match &cfg.preset {
            PresetConfig::Weather(w) => {
                assert_eq!(w.api_key, "k");
                assert_eq!(w.units, "imperial");
            }
            other => panic!("preset inesperado: {other:?}"),
        }
    }

    #[test]
    fn forma_minima_adopta_search_por_defecto() {
        let raw = json!({ "systemPrompt": "sólo texto", "limitations": "l" });
        let cfg = normalize(Some(&raw));
        assert_eq!(cfg.preset, PresetConfig::Search(SearchConfig::default()));
        assert_eq!(cfg.system_prompt, "sólo texto");
        assert_eq!(cfg.limitations, "l");
    }

    #[test]
    fn ausente_o_no_reconocido_degrada_a_vacio() {
        assert_eq!(normalize(None), AgentConfig::empty());
        assert_eq!(normalize(Some(&json!(null))), AgentConfig::empty());
        assert_eq!(normalize(Some(&json!("texto"))), AgentConfig::empty());
        assert_eq!(normalize(Some(&json!({ "otraCosa": 1 }))), AgentConfig::empty());
    }

    #[test]
    fn numericos_como_cadena_se_aceptan() {
        let raw = json!({ "search": { "maxResults": "15" } });
        match normalize(Some(&raw)).preset {
            PresetConfig::Search(s) => assert_eq!(s.max_results, 15),
            other => panic!("preset inesperado: {other:?}"),
        }
    }

    #[test]
    fn numericos_fuera_de_rango_toman_el_default() {
        // Un número que no cabe en u32 degrada igual que una cadena no
        // parseable: al default declarado, sin truncar.
        let desbordado = u64::from(u32::MAX) + 5;
        let raw = json!({ "search": { "maxResults": desbordado } });
        match normalize(Some(&raw)).preset {
            PresetConfig::Search(s) => assert_eq!(s.max_results, DEFAULT_MAX_RESULTS),
            other => panic!("preset inesperado: {other:?}"),
        }

        let raw = json!({ "customRag": { "chunkSize": -3 } });
        match normalize(Some(&raw)).preset {
            PresetConfig::CustomRag(r) => assert_eq!(r.chunk_size, DEFAULT_CHUNK_SIZE),
            other => panic!("preset inesperado: {other:?}"),
        }
    }
}

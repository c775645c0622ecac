//! Estado efímero de las vistas de edición de nodos.
//!
//! Cada nodo en edición tiene su propia sesión, con un registro de
//! procedencia por campo (`FieldState`) para que las recargas en segundo
//! plano nunca pisen lo que el usuario ya escribió, y un token de generación
//! (la identidad del nodo en el momento de lanzar la petición) para descartar
//! respuestas que llegan tarde, después de cambiar de nodo. La cancelación es
//! lógica: la petición subyacente no se aborta, sólo se ignora su resultado.

use std::collections::HashMap;

use tracing::debug;

use crate::models::{AgentConfig, DocumentId, NodeId};

/// Procedencia del valor actual de un campo editable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Viene del almacenamiento; una recarga puede sustituirlo.
    Remote,
    /// Lo escribió el usuario; sólo una recarga explícita lo sustituye.
    Local,
}

/// Registro de procedencia de un campo: valor + origen, consultado de forma
/// uniforme por el paso de reconciliación.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldState {
    pub value: String,
    pub origin: Origin,
}

impl FieldState {
    fn remote(value: String) -> Self {
        Self {
            value,
            origin: Origin::Remote,
        }
    }

    /// Edición del usuario: el campo pasa a ser local.
    pub fn set_local(&mut self, value: String) {
        self.value = value;
        self.origin = Origin::Local;
    }

    /// Reconciliación con un valor recién normalizado: sólo se aplica si el
    /// usuario no ha editado el campo.
    fn apply_remote(&mut self, value: String) {
        if self.origin == Origin::Remote {
            self.value = value;
        }
    }

    /// Recarga explícita pedida por el usuario: pisa también lo local.
    fn force_remote(&mut self, value: String) {
        self.value = value;
        self.origin = Origin::Remote;
    }
}

/// Selección de documento de una sesión: lo que persistencia registra hoy
/// (`committed`) frente a la selección de trabajo sin guardar (`pending`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindingSession {
    pub committed: Option<DocumentId>,
    pub pending: Option<DocumentId>,
}

impl BindingSession {
    /// `dirty` se deriva siempre, nunca se almacena desfasado.
    pub fn dirty(&self) -> bool {
        self.pending != self.committed
    }
}

/// Token de generación de una petición de carga: la identidad del nodo en
/// edición en el momento de lanzarla.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchToken(NodeId);

/// Sesión de edición de un nodo concreto.
#[derive(Debug, Clone)]
pub struct EditSession {
    pub node_id: NodeId,
    /// Última forma canónica aplicada a la vista.
    pub config: AgentConfig,
    pub system_prompt: FieldState,
    pub limitations: FieldState,
}

impl EditSession {
    fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            config: AgentConfig::empty(),
            system_prompt: FieldState::remote(String::new()),
            limitations: FieldState::remote(String::new()),
        }
    }
}

/// Estado del editor: una sesión por nodo, con un único nodo activo. Las
/// sesiones van con clave explícita de nodo para que varias vistas de
/// edición no puedan interferir entre sí.
#[derive(Debug, Default)]
pub struct EditorState {
    active: Option<NodeId>,
    sessions: HashMap<NodeId, EditSession>,
}

impl EditorState {
    /// Abre (o reactiva) la sesión de un nodo y devuelve el token con el que
    /// deberá resolverse la carga lanzada para él.
    pub fn open(&mut self, node_id: &str) -> FetchToken {
        self.active = Some(node_id.to_string());
        self.sessions
            .entry(node_id.to_string())
            .or_insert_with(|| EditSession::new(node_id.to_string()));
        FetchToken(node_id.to_string())
    }

    pub fn session(&self, node_id: &str) -> Option<&EditSession> {
        self.sessions.get(node_id)
    }

    /// Resuelve una carga en segundo plano. Si el nodo activo cambió desde
    /// que se lanzó, la respuesta se descarta (cancelación lógica) y se
    /// devuelve `false`. Los campos con ediciones locales no se tocan.
    pub fn resolve_fetch(&mut self, token: &FetchToken, config: AgentConfig) -> bool {
        if self.active.as_deref() != Some(token.0.as_str()) {
            debug!(
                "Descartada respuesta obsoleta para el nodo {} (activo: {:?})",
                token.0, self.active
            );
            return false;
        }
        let Some(session) = self.sessions.get_mut(&token.0) else {
            return false;
        };
        session.system_prompt.apply_remote(config.system_prompt.clone());
        session.limitations.apply_remote(config.limitations.clone());
        session.config = config;
        true
    }

    /// Recarga explícita: el usuario pidió descartar sus ediciones.
    pub fn refresh(&mut self, node_id: &str, config: AgentConfig) {
        if let Some(session) = self.sessions.get_mut(node_id) {
            debug!("Recarga explícita de la sesión del nodo {}", session.node_id);
            session.system_prompt.force_remote(config.system_prompt.clone());
            session.limitations.force_remote(config.limitations.clone());
            session.config = config;
        }
    }

    pub fn edit_system_prompt(&mut self, node_id: &str, value: String) {
        if let Some(session) = self.sessions.get_mut(node_id) {
            session.system_prompt.set_local(value);
        }
    }

    pub fn edit_limitations(&mut self, node_id: &str, value: String) {
        if let Some(session) = self.sessions.get_mut(node_id) {
            session.limitations.set_local(value);
        }
    }

    /// Cierra la vista de un nodo y descarta su estado efímero.
    pub fn close(&mut self, node_id: &str) {
        self.sessions.remove(node_id);
        if self.active.as_deref() == Some(node_id) {
            self.active = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PresetConfig, SearchConfig};

    fn config_remota(prompt: &str) -> AgentConfig {
        AgentConfig {
            preset: PresetConfig::Search(SearchConfig::default()),
            system_prompt: prompt.to_string(),
            limitations: String::new(),
            updated_at: None,
        }
    }

    #[test]
    fn la_edicion_local_sobrevive_a_una_recarga_en_segundo_plano() {
        let mut editor = EditorState::default();
        let token = editor.open("A");
        editor.edit_system_prompt("A", "v1".into());

        // Recarga de fondo con el valor del servidor: no debe pisar "v1".
        assert!(editor.resolve_fetch(&token, config_remota("server-value")));
        let session = editor.session("A").unwrap();
        assert_eq!(session.system_prompt.value, "v1");
        assert_eq!(session.system_prompt.origin, Origin::Local);
        // El campo no editado sí se reconcilia.
        assert_eq!(session.limitations.origin, Origin::Remote);
    }

    #[test]
    fn la_recarga_explicita_si_pisa_lo_local() {
        let mut editor = EditorState::default();
        editor.open("A");
        editor.edit_system_prompt("A", "v1".into());
        editor.refresh("A", config_remota("server-value"));

        let session = editor.session("A").unwrap();
        assert_eq!(session.system_prompt.value, "server-value");
        assert_eq!(session.system_prompt.origin, Origin::Remote);
    }

    #[test]
    fn una_respuesta_obsoleta_no_altera_el_nodo_activo() {
        let mut editor = EditorState::default();
        let token_a = editor.open("A");
        // El usuario cambia al nodo B antes de que resuelva la carga de A.
        let token_b = editor.open("B");

        assert!(!editor.resolve_fetch(&token_a, config_remota("de-A")));
        assert!(editor.resolve_fetch(&token_b, config_remota("de-B")));

        assert_eq!(editor.session("A").unwrap().system_prompt.value, "");
        assert_eq!(editor.session("B").unwrap().system_prompt.value, "de-B");
    }

    #[test]
    fn dirty_se_deriva_de_pending_y_committed() {
        let mut binding = BindingSession::default();
        assert!(!binding.dirty());
        binding.pending = Some("doc-1".into());
        assert!(binding.dirty());
        binding.committed = Some("doc-1".into());
        assert!(!binding.dirty());
    }

    #[test]
    fn cerrar_descarta_la_sesion() {
        let mut editor = EditorState::default();
        editor.open("A");
        editor.close("A");
        assert!(editor.session("A").is_none());
    }
}

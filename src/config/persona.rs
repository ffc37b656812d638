use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use log::info;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersonaError {
    #[error("Persona file IO error for '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Persona JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Persona preamble is empty")]
    EmptyPreamble,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
enum PreambleText {
    Single(String),
    Lines(Vec<String>),
}

impl PreambleText {
    fn into_text(self) -> String {
        match self {
            PreambleText::Single(text) => text,
            PreambleText::Lines(lines) => lines.join("\n"),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
struct PersonaFile {
    assistant_name: String,
    preamble: PreambleText,
}

/// The system-role text describing who the assistant speaks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persona {
    pub assistant_name: String,
    pub preamble: String,
}

impl Persona {
    pub fn new(
        assistant_name: impl Into<String>,
        preamble: impl Into<String>
    ) -> Result<Self, PersonaError> {
        let preamble = preamble.into();
        if preamble.trim().is_empty() {
            return Err(PersonaError::EmptyPreamble);
        }
        Ok(Self { assistant_name: assistant_name.into(), preamble })
    }
}

/// Parses a persona document. `preamble` may be one string or an array of lines.
pub fn load_persona_from_str(json: &str) -> Result<Persona, PersonaError> {
    let file: PersonaFile = serde_json::from_str(json)?;
    Persona::new(file.assistant_name, file.preamble.into_text())
}

pub fn load_persona<P: AsRef<Path>>(path: P) -> Result<Arc<Persona>, PersonaError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| PersonaError::IoError {
        path: path.display().to_string(),
        source,
    })?;
    let persona = load_persona_from_str(&content)?;
    info!(
        "Loaded persona '{}' from {} ({} chars of preamble)",
        persona.assistant_name,
        path.display(),
        persona.preamble.chars().count()
    );
    Ok(Arc::new(persona))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_preamble_lines() {
        let persona = load_persona_from_str(
            r#"{ "assistant_name": "Segnify", "preamble": ["You are helpful.", "Be concise."] }"#
        ).unwrap();
        assert_eq!(persona.assistant_name, "Segnify");
        assert_eq!(persona.preamble, "You are helpful.\nBe concise.");
    }

    #[test]
    fn accepts_single_string_preamble() {
        let persona = load_persona_from_str(
            r#"{ "assistant_name": "Segnify", "preamble": "You are helpful." }"#
        ).unwrap();
        assert_eq!(persona.preamble, "You are helpful.");
    }

    #[test]
    fn rejects_blank_preamble() {
        let err = load_persona_from_str(
            r#"{ "assistant_name": "Segnify", "preamble": ["", "  "] }"#
        ).unwrap_err();
        assert!(matches!(err, PersonaError::EmptyPreamble));
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = load_persona("does/not/exist.json").unwrap_err();
        assert!(err.to_string().contains("does/not/exist.json"));
    }

    #[test]
    fn bundled_persona_loads() {
        let persona = load_persona(concat!(env!("CARGO_MANIFEST_DIR"), "/json/persona.json")).unwrap();
        assert!(persona.preamble.contains("Segni Tulu"));
    }
}

//! Where sandbox definitions live.
//!
//! Sandboxie keeps every sandbox as a section of `Sandboxie.ini`. The file is
//! not an ordinary INI file: keys repeat, and it is stored as UTF-16LE with CRLF
//! line endings. [`SettingsStore`] hides the format; [`IniFileStore`] reads and
//! writes the real file and [`MemoryStore`] keeps everything in memory.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use crate::error::SandboxError;

/// Sections of the configuration store, keyed by section name, each holding
/// its raw setting lines in order.
pub type Sections = BTreeMap<String, Vec<String>>;

/// Read/write access to the sandbox configuration store.
pub trait SettingsStore: Send {
    /// Reads every section.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::Store` if the store cannot be read.
    fn load(&self) -> Result<Sections, SandboxError>;

    /// Replaces the store's content with `sections`.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::Store` if the store cannot be written.
    fn save(&mut self, sections: &Sections) -> Result<(), SandboxError>;
}

/// An in-memory store, mainly for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    sections: Sections,
    saves: usize,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts with the given sections.
    #[must_use]
    pub fn with_sections(sections: Sections) -> Self {
        Self { sections, saves: 0 }
    }

    #[must_use]
    pub fn sections(&self) -> &Sections {
        &self.sections
    }

    /// How many times [`SettingsStore::save`] was called.
    #[must_use]
    pub fn saves(&self) -> usize {
        self.saves
    }
}

impl SettingsStore for MemoryStore {
    fn load(&self) -> Result<Sections, SandboxError> {
        Ok(self.sections.clone())
    }

    fn save(&mut self, sections: &Sections) -> Result<(), SandboxError> {
        self.sections = sections.clone();
        self.saves += 1;
        Ok(())
    }
}

/// A `Sandboxie.ini` file.
///
/// Writing usually needs administrator rights; a denied write surfaces as
/// `SandboxError::Store`.
#[derive(Debug, Clone)]
pub struct IniFileStore {
    path: PathBuf,
}

impl IniFileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for IniFileStore {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    fn load(&self) -> Result<Sections, SandboxError> {
        let bytes = fs::read(&self.path).map_err(|e| {
            SandboxError::Store(format!("failed to read {}: {e}", self.path.display()))
        })?;
        let sections = parse_ini(&decode_utf16le(&bytes)?)?;
        debug!(sections = sections.len(), "Loaded settings");
        Ok(sections)
    }

    #[instrument(skip(self, sections), fields(path = %self.path.display()))]
    fn save(&mut self, sections: &Sections) -> Result<(), SandboxError> {
        let bytes = encode_utf16le(&render_ini(sections));
        fs::write(&self.path, bytes).map_err(|e| {
            SandboxError::Store(format!("failed to write {}: {e}", self.path.display()))
        })?;
        debug!(sections = sections.len(), "Saved settings");
        Ok(())
    }
}

fn decode_utf16le(bytes: &[u8]) -> Result<String, SandboxError> {
    if bytes.len() % 2 != 0 {
        return Err(SandboxError::Store(
            "settings file is not valid UTF-16LE: odd length".to_string(),
        ));
    }

    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let text = String::from_utf16(&units)
        .map_err(|e| SandboxError::Store(format!("settings file is not valid UTF-16LE: {e}")))?;

    Ok(match text.strip_prefix('\u{feff}') {
        Some(rest) => rest.to_string(),
        None => text,
    })
}

fn encode_utf16le(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

/// Parses the text of a settings file. Blank lines are dropped; a `[name]`
/// line opens a section and every other line belongs to the open section.
fn parse_ini(text: &str) -> Result<Sections, SandboxError> {
    let mut sections = Sections::new();
    let mut current: Option<String> = None;

    for line in text.split('\n').map(|l| l.trim_end_matches('\r')) {
        if line.is_empty() {
            continue;
        }

        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            sections.insert(name.to_string(), Vec::new());
            current = Some(name.to_string());
            continue;
        }

        match current.as_ref().and_then(|name| sections.get_mut(name)) {
            Some(lines) => lines.push(line.to_string()),
            None => {
                return Err(SandboxError::Store(format!(
                    "setting outside of any section: {line}"
                )));
            }
        }
    }

    Ok(sections)
}

/// Renders sections the way Sandboxie's own control UI writes them.
fn render_ini(sections: &Sections) -> String {
    let mut text = String::new();
    for (name, lines) in sections {
        text.push_str(&format!("\r\n[{name}]\r\n\r\n"));
        for line in lines {
            text.push_str(line);
            text.push_str("\r\n");
        }
    }
    text
}

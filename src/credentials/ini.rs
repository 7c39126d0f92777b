//! Minimal INI reader for the credentials file
//!
//! Supports `[section]` headers, `key = value` pairs, `;`/`#` comments and
//! optionally quoted values. Keys before the first header belong to the
//! global (unsectioned) table.

use std::collections::HashMap;
use thiserror::Error;

/// Key/value pairs of one section
pub type Section = HashMap<String, String>;

/// Parse failure with the offending line number (1-based)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct IniError {
    /// Line number of the failure
    pub line: usize,
    /// Description of the problem
    pub message: String,
}

/// Parsed INI document
#[derive(Debug, Default, Clone)]
pub struct IniDocument {
    global: Section,
    sections: Vec<(String, Section)>,
}

impl IniDocument {
    /// Parse INI text
    pub fn parse(content: &str) -> Result<Self, IniError> {
        let mut doc = IniDocument::default();
        let mut current: Option<usize> = None;

        for (index, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            if let Some(rest) = line.strip_prefix('[') {
                let name = rest.strip_suffix(']').ok_or_else(|| IniError {
                    line: index + 1,
                    message: format!("unterminated section header: {}", line),
                })?;
                let name = name.trim();
                if name.is_empty() {
                    return Err(IniError {
                        line: index + 1,
                        message: "empty section name".to_string(),
                    });
                }
                current = Some(doc.section_index(name));
                continue;
            }

            let (key, value) = line.split_once('=').ok_or_else(|| IniError {
                line: index + 1,
                message: format!("expected key = value, found: {}", line),
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(IniError {
                    line: index + 1,
                    message: "missing key before '='".to_string(),
                });
            }

            let table = match current {
                Some(i) => &mut doc.sections[i].1,
                None => &mut doc.global,
            };
            table.insert(key.to_string(), unquote(value.trim()).to_string());
        }

        Ok(doc)
    }

    /// Keys that appear before any section header
    pub fn global(&self) -> &Section {
        &self.global
    }

    /// Look up a section by name, ignoring ASCII case
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections
            .iter()
            .find(|(section, _)| section.eq_ignore_ascii_case(name))
            .map(|(_, table)| table)
    }

    /// Section names in file order
    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|(name, _)| name.as_str())
    }

    fn section_index(&mut self, name: &str) -> usize {
        // repeated headers extend the earlier section
        if let Some(i) = self.sections.iter().position(|(n, _)| n == name) {
            return i;
        }
        self.sections.push((name.to_string(), Section::new()));
        self.sections.len() - 1
    }
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

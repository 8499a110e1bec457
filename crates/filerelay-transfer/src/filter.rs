//! File name allow-list.

use regex::Regex;

use crate::error::{TransferError, TransferResult};

/// Case-insensitive suffix match over a fixed set of extensions.
///
/// Trailing whitespace in a listed name is ignored.
#[derive(Debug, Clone)]
pub struct ExtensionFilter {
    pattern: Regex,
    extensions: Vec<String>,
}

impl ExtensionFilter {
    /// Compile the allow-list. Entries may be given with or without the leading dot.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidFilter`] for an empty list or a blank
    /// entry, and [`TransferError::FilterPattern`] if the pattern cannot compile.
    pub fn new<I, S>(extensions: I) -> TransferResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized = Vec::new();
        for raw in extensions {
            let raw = raw.as_ref();
            let extension = raw.trim().trim_start_matches('.').to_ascii_lowercase();
            if extension.is_empty() {
                return Err(TransferError::InvalidFilter {
                    reason: "blank extension",
                    value: Some(raw.to_string()),
                });
            }
            if !normalized.contains(&extension) {
                normalized.push(extension);
            }
        }
        if normalized.is_empty() {
            return Err(TransferError::InvalidFilter {
                reason: "no extensions configured",
                value: None,
            });
        }

        let alternatives = normalized
            .iter()
            .map(|extension| regex::escape(extension))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = Regex::new(&format!(r"(?i)\.(?:{alternatives})\s*$"))
            .map_err(|source| TransferError::FilterPattern { source })?;
        Ok(Self {
            pattern,
            extensions: normalized,
        })
    }

    /// Whether `name` carries one of the allowed extensions.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        self.pattern.is_match(name)
    }

    /// Normalised extensions, without leading dots.
    #[must_use]
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }
}

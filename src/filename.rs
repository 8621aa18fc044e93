//! Brick-side NXT filenames.

use std::fmt;
use std::path::Path;

use crate::errors::ValidationError;

/// Longest stem the NXT filesystem accepts
pub const MAX_STEM: usize = 15;
/// Longest extension, not counting the dot
pub const MAX_EXTENSION: usize = 3;

/// Executable programs
pub const PROGRAM_EXTENSION: &str = ".rxe";
/// Sound files
pub const SOUND_EXTENSION: &str = ".rso";

/// A validated NXT filename: at most one `.`, a stem of at most 15
/// characters and an extension of at most 3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filename(String);

impl Filename {
    /// Validates `name`, appending `required` (e.g. `".rxe"`) when the name
    /// has no extension of its own. A name carrying a different extension
    /// than `required` is rejected.
    pub fn new(name: &str, required: Option<&str>) -> Result<Self, ValidationError> {
        if name.is_empty() {
            return Err(ValidationError::EmptyFilename);
        }

        let mut parts = name.splitn(3, '.');
        let stem = parts.next().unwrap_or_default();
        let extension = parts.next();
        if parts.next().is_some() {
            return Err(ValidationError::TooManyDots(name.to_string()));
        }

        if stem.chars().count() > MAX_STEM {
            return Err(ValidationError::StemTooLong(name.to_string()));
        }

        let required = required.map(|r| r.trim_start_matches('.'));
        match (extension, required) {
            (Some(ext), _) if ext.chars().count() > MAX_EXTENSION => {
                Err(ValidationError::ExtensionTooLong(name.to_string()))
            }
            (Some(ext), Some(req)) if !ext.eq_ignore_ascii_case(req) => {
                Err(ValidationError::WrongExtension {
                    name: name.to_string(),
                    required: format!(".{}", req),
                })
            }
            (None, Some(req)) => Filename::new(&format!("{}.{}", name, req), None),
            _ => Ok(Filename(name.to_string())),
        }
    }

    /// The brick-side name for a local file: its basename.
    pub fn from_local_path(path: &Path, required: Option<&str>) -> Result<Self, ValidationError> {
        let base = path
            .file_name()
            .map(|b| b.to_string_lossy().into_owned())
            .unwrap_or_default();
        Filename::new(&base, required)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Filename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

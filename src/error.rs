//! Structured error types for the engine subsystems.

use thiserror::Error;

/// Where in a config file something happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePosition {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl FilePosition {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self { file: file.into(), line, column }
    }
}

impl std::fmt::Display for FilePosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// A config parse failure with source location and the innermost open tag.
#[derive(Debug, Clone, Error)]
pub struct ConfigParseError {
    pub message: String,
    pub position: FilePosition,
    /// Name of the tag being parsed when the error occurred, if any.
    pub tag: Option<String>,
}

impl std::fmt::Display for ConfigParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}", self.message, self.position)?;
        if let Some(tag) = &self.tag {
            write!(f, " (inside tag {tag})")?;
        }
        Ok(())
    }
}

/// Configuration loading failures. Fatal at startup; a rehash that fails
/// keeps the previous tag tree.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Parse(#[from] ConfigParseError),
}

/// Mode registration failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModeRegistryError {
    #[error("mode letter for {name} is invalid: {letter}")]
    InvalidLetter { name: String, letter: char },

    #[error("mode prefix for {name} is invalid: {prefix}")]
    InvalidPrefix { name: String, prefix: char },

    #[error("mode prefix for {name} already used by {other}: {prefix}")]
    PrefixInUse { name: String, other: String, prefix: char },

    #[error("mode letter for {name} already used by {other}: {letter}")]
    LetterInUse { name: String, other: String, letter: char },

    #[error("mode name {name} already used by {letter}")]
    NameInUse { name: String, letter: char },

    #[error("out of mode ids registering {name}")]
    OutOfModeIds { name: String },
}

/// X-line subsystem failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum XLineError {
    #[error("no factory registered for {kind} lines")]
    UnknownKind { kind: String },

    #[error("{kind} line on {mask} already exists")]
    Duplicate { kind: String, mask: String },

    #[error("invalid {kind} pattern: {mask}")]
    BadPattern { kind: String, mask: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_display_includes_location_and_tag() {
        let err = ConfigParseError {
            message: "Unexpected end-of-file".into(),
            position: FilePosition::new("ircd.conf", 12, 3),
            tag: Some("oper".into()),
        };
        let text = err.to_string();
        assert!(text.contains("ircd.conf:12:3"));
        assert!(text.contains("inside tag oper"));
    }

    #[test]
    fn parse_error_display_without_tag() {
        let err = ConfigParseError {
            message: "Syntax error".into(),
            position: FilePosition::new("a.conf", 1, 1),
            tag: None,
        };
        assert_eq!(err.to_string(), "Syntax error at a.conf:1:1");
    }
}

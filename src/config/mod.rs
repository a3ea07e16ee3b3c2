//! Configuration loading and management.
//!
//! The config language is the block/attribute format parsed by
//! [`parser`]: `<tag key="value" ...>` blocks with comments, entity
//! expansion, includes and file caches. [`Config`] wraps one parsed tree
//! and layers typed views over the tags the core reads on every hot path
//! (`<server>`, `<limits>`). Everything else is fetched by tag name
//! through [`Config::value`] / [`Config::values`].
//!
//! A parse failure at startup is fatal; on rehash the caller keeps the
//! previous `Config` and reports the error.

mod parser;
mod tag;

pub use parser::{ParseFlags, ParseStack};
pub use tag::ConfigTag;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::error::ConfigError;

/// Server identity from `<server>`.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub name: String,
    pub network: String,
    pub description: String,
    /// Three-character server id used as the UID prefix.
    pub sid: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: "irc.example.net".into(),
            network: "ExampleNet".into(),
            description: "ferrod".into(),
            sid: "001".into(),
        }
    }
}

/// Numeric limits from `<limits>`.
#[derive(Debug, Clone)]
pub struct Limits {
    /// Cap on mode changes applied per MODE line.
    pub max_modes: usize,
    /// Away message length cap.
    pub max_away: usize,
    /// Nickname length cap.
    pub max_nick: usize,
    /// Ident (username) length cap.
    pub max_user: usize,
    /// Displayed host length cap.
    pub max_host: usize,
    /// Channel name length cap.
    pub max_channel: usize,
    /// Topic length cap.
    pub max_topic: usize,
    /// Per-channel list mode entry cap (bans and friends).
    pub max_bans: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_modes: 20,
            max_away: 200,
            max_nick: 30,
            max_user: 10,
            max_host: 64,
            max_channel: 64,
            max_topic: 307,
            max_bans: 64,
        }
    }
}

/// One `<oper>` block.
#[derive(Debug, Clone)]
pub struct OperBlock {
    pub name: String,
    pub password: String,
    /// `nick!user@host` masks allowed to use this block, space-separated
    /// in config; empty allows any.
    pub hosts: Vec<String>,
    /// Oper type label shown in WHOIS and snotices.
    pub oper_type: String,
}

/// A parsed configuration tree plus typed views.
pub struct Config {
    path: PathBuf,
    tags: Vec<(String, Rc<ConfigTag>)>,
    by_name: HashMap<String, Vec<Rc<ConfigTag>>>,
    files: HashMap<String, Vec<String>>,
    pub server: ServerInfo,
    pub limits: Limits,
    pub opers: Vec<OperBlock>,
}

impl Config {
    /// Load and parse the file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let base = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        let file = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let mut stack = ParseStack::new(base);
        stack.parse_file(&file, ParseFlags::default(), None, false)?;
        Ok(Self::from_stack(path, stack))
    }

    /// Build a config from in-memory text; the root for relative
    /// includes is the current directory.
    pub fn from_text(text: &str) -> Result<Config, ConfigError> {
        let mut stack = ParseStack::new(".");
        stack.parse_text("<inline>", text, ParseFlags::default())?;
        Ok(Self::from_stack(PathBuf::from("<inline>"), stack))
    }

    fn from_stack(path: PathBuf, stack: ParseStack) -> Config {
        let mut by_name: HashMap<String, Vec<Rc<ConfigTag>>> = HashMap::new();
        for (name, tag) in &stack.tags {
            by_name.entry(name.clone()).or_default().push(Rc::clone(tag));
        }

        let mut config = Config {
            path,
            tags: stack.tags,
            by_name,
            files: stack.files,
            server: ServerInfo::default(),
            limits: Limits::default(),
            opers: Vec::new(),
        };
        config.read_core_tags();
        config
    }

    fn read_core_tags(&mut self) {
        let server = self.value("server");
        self.server = ServerInfo {
            name: server.get_string_checked("name", "irc.example.net", |s| {
                !s.is_empty() && !s.contains(' ')
            }),
            network: server.get_string("network", "ExampleNet"),
            description: server.get_string("description", "ferrod"),
            sid: server.get_string_checked("id", "001", |s| {
                s.len() == 3
                    && s.starts_with(|c: char| c.is_ascii_digit())
                    && s.chars().all(|c| c.is_ascii_alphanumeric())
            }),
        };

        let limits = self.value("limits");
        self.limits = Limits {
            max_modes: limits.get_uint("maxmodes", 20, 1, 100) as usize,
            max_away: limits.get_uint("maxaway", 200, 1, 512) as usize,
            max_nick: limits.get_uint("maxnick", 30, 1, 100) as usize,
            max_user: limits.get_uint("maxuser", 10, 1, 32) as usize,
            max_host: limits.get_uint("maxhost", 64, 1, 255) as usize,
            max_channel: limits.get_uint("maxchannel", 64, 2, 255) as usize,
            max_topic: limits.get_uint("maxtopic", 307, 1, 512) as usize,
            max_bans: limits.get_uint("maxbans", 64, 1, 1024) as usize,
        };

        self.opers = self
            .values("oper")
            .iter()
            .filter_map(|tag| {
                let name = tag.get_string("name", "");
                let password = tag.get_string("password", "");
                if name.is_empty() || password.is_empty() {
                    tracing::warn!(source = %tag.source(), "<oper> block without name or password, skipped");
                    return None;
                }
                Some(OperBlock {
                    name,
                    password,
                    hosts: tag
                        .get_string("host", "*@*")
                        .split_whitespace()
                        .map(str::to_string)
                        .collect(),
                    oper_type: tag.get_string("type", "oper"),
                })
            })
            .collect();
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// First tag with this name, or an empty stand-in so accessors fall
    /// through to their defaults.
    pub fn value(&self, name: &str) -> Rc<ConfigTag> {
        self.by_name
            .get(&name.to_ascii_lowercase())
            .and_then(|v| v.first())
            .cloned()
            .unwrap_or_else(|| Rc::new(ConfigTag::empty(name)))
    }

    /// All tags with this name, in file order.
    pub fn values(&self, name: &str) -> &[Rc<ConfigTag>] {
        self.by_name
            .get(&name.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every tag in file order, for diagnostics.
    pub fn all_tags(&self) -> &[(String, Rc<ConfigTag>)] {
        &self.tags
    }

    /// Contents cached by `<files>` / `<execfiles>`, by key.
    pub fn file_contents(&self, key: &str) -> Option<&[String]> {
        self.files.get(key).map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_views_read_core_tags() {
        let config = Config::from_text(
            "<server name=\"irc.test.net\" network=\"TestNet\" id=\"042\">\n\
             <limits maxmodes=\"6\" maxaway=\"100\">\n",
        )
        .unwrap();
        assert_eq!(config.server.name, "irc.test.net");
        assert_eq!(config.server.sid, "042");
        assert_eq!(config.limits.max_modes, 6);
        assert_eq!(config.limits.max_away, 100);
        // Unspecified limits keep their defaults.
        assert_eq!(config.limits.max_topic, 307);
    }

    #[test]
    fn defaults_apply_without_tags() {
        let config = Config::from_text("").unwrap();
        assert_eq!(config.server.sid, "001");
        assert_eq!(config.limits.max_modes, 20);
        assert!(config.opers.is_empty());
    }

    #[test]
    fn invalid_sid_falls_back() {
        let config = Config::from_text("<server id=\"XYZ1\">").unwrap();
        assert_eq!(config.server.sid, "001");
    }

    #[test]
    fn oper_blocks_collected() {
        let config = Config::from_text(
            "<oper name=\"alice\" password=\"s3cret\" host=\"*@localhost *@10.0.0.*\" type=\"netadmin\">\n\
             <oper name=\"broken\">\n",
        )
        .unwrap();
        assert_eq!(config.opers.len(), 1);
        assert_eq!(config.opers[0].name, "alice");
        assert_eq!(config.opers[0].hosts.len(), 2);
        assert_eq!(config.opers[0].oper_type, "netadmin");
    }

    #[test]
    fn value_returns_empty_tag_when_missing() {
        let config = Config::from_text("").unwrap();
        let tag = config.value("shun");
        assert_eq!(tag.get_bool("notifyuser", true), true);
        assert!(config.values("shun").is_empty());
    }

    #[test]
    fn multi_tags_keep_order() {
        let config = Config::from_text(
            "<allowchannel name=\"#a\">\n<allowchannel name=\"#b\">\n",
        )
        .unwrap();
        let names: Vec<String> = config
            .values("allowchannel")
            .iter()
            .map(|t| t.get_string("name", ""))
            .collect();
        assert_eq!(names, vec!["#a", "#b"]);
    }
}

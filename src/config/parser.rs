//! Recursive parser for the block/attribute config language.
//!
//! ```text
//! # comment
//! <server name="irc.example.net" network="Example">
//! <include file="opers.conf" missingokay="yes">
//! <define name="prefix" value="/home/ircd">
//! <files motd="&prefix;/motd.txt">
//! ```
//!
//! Values expand XML-style entities: numeric (`&#65;`, `&#x41;`),
//! environment (`&env.HOME;`) and named (`&amp;`, plus anything installed
//! by `<define>`). Includes may pull files, directories of `*.conf`
//! files, or the stdout of an executable; a stack of open paths detects
//! inclusion loops. Errors carry file/line/column and the tag being
//! parsed when they fired.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::rc::Rc;

use crate::error::{ConfigParseError, FilePosition};
use crate::util::wildcard_match;

use super::tag::ConfigTag;

/// Parse restrictions inherited down the include chain. `strengthen`-only:
/// a file included with `noexec="yes"` can never re-enable exec beneath
/// itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseFlags {
    pub no_exec: bool,
    pub no_include: bool,
    pub no_env: bool,
    pub missing_okay: bool,
}

/// Accumulated output of a parse: the tag multimap (insertion order),
/// defined variables, and the `<files>`/`<execfiles>` cache.
#[derive(Debug)]
pub struct ParseStack {
    pub vars: HashMap<String, String>,
    pub tags: Vec<(String, Rc<ConfigTag>)>,
    pub files: HashMap<String, Vec<String>>,
    /// Paths currently being parsed, innermost last.
    reading: Vec<PathBuf>,
    /// Directory relative include paths resolve against.
    base_dir: PathBuf,
}

impl ParseStack {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let mut vars = HashMap::new();
        // Predefined entities, matching the usual XML set.
        for (k, v) in [
            ("amp", "&"),
            ("quot", "\""),
            ("lt", "<"),
            ("gt", ">"),
            ("nl", "\n"),
            ("newline", "\n"),
        ] {
            vars.insert(k.to_string(), v.to_string());
        }
        Self {
            vars,
            tags: Vec::new(),
            files: HashMap::new(),
            reading: Vec::new(),
            base_dir: base_dir.into(),
        }
    }

    fn prepend_base(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.base_dir.join(p)
        }
    }

    /// Parse a file (or, with `is_exec`, the stdout of a command).
    pub fn parse_file(
        &mut self,
        path: &str,
        flags: ParseFlags,
        mandatory_tag: Option<&str>,
        is_exec: bool,
    ) -> Result<(), ConfigParseError> {
        let full = if is_exec {
            PathBuf::from(path)
        } else {
            self.prepend_base(path)
        };

        if self.reading.contains(&full) {
            return Err(ConfigParseError {
                message: format!(
                    "{} {} is included recursively (looped inclusion)",
                    if is_exec { "Executable" } else { "File" },
                    full.display()
                ),
                position: FilePosition::new(full.display().to_string(), 0, 0),
                tag: None,
            });
        }

        let content = if is_exec {
            let output = Command::new("sh")
                .arg("-c")
                .arg(path)
                .output()
                .map_err(|e| ConfigParseError {
                    message: format!("Could not execute \"{path}\" for include: {e}"),
                    position: FilePosition::new(path, 0, 0),
                    tag: None,
                })?;
            String::from_utf8_lossy(&output.stdout).into_owned()
        } else {
            match fs::read_to_string(&full) {
                Ok(c) => c,
                Err(_) if flags.missing_okay => return Ok(()),
                Err(e) => {
                    return Err(ConfigParseError {
                        message: format!(
                            "Could not read \"{}\" for include: {e}",
                            full.display()
                        ),
                        position: FilePosition::new(full.display().to_string(), 0, 0),
                        tag: None,
                    })
                }
            }
        };

        tracing::debug!(path = %full.display(), is_exec, "reading config");
        self.reading.push(full.clone());
        let result = Parser::new(self, flags, &content, &full.display().to_string(), mandatory_tag)
            .parse();
        self.reading.pop();
        result
    }

    /// Parse in-memory text; used at the root by tests and rehash dry
    /// runs. Includes still resolve against `base_dir`.
    pub fn parse_text(
        &mut self,
        name: &str,
        content: &str,
        flags: ParseFlags,
    ) -> Result<(), ConfigParseError> {
        Parser::new(self, flags, content, name, None).parse()
    }

    /// `<include file|directory|executable=...>` dispatch.
    fn do_include(&mut self, tag: &ConfigTag, mut flags: ParseFlags) -> Result<(), ConfigParseError> {
        if flags.no_include {
            return Err(ConfigParseError {
                message: "Invalid <include> tag in file included with noinclude=\"yes\"".into(),
                position: tag.source().clone(),
                tag: Some(tag.name().to_string()),
            });
        }

        let mandatory = tag.read_string("mandatorytag", false);

        if let Some(file) = tag.read_string("file", false) {
            flags.no_include |= tag.get_bool("noinclude", false);
            flags.no_exec |= tag.get_bool("noexec", false);
            flags.no_env |= tag.get_bool("noenv", false);
            flags.missing_okay = tag.get_bool("missingokay", false);
            self.parse_file(&file, flags, mandatory.as_deref(), false)
        } else if let Some(dir) = tag.read_string("directory", false) {
            flags.no_include |= tag.get_bool("noinclude", false);
            flags.no_exec |= tag.get_bool("noexec", false);
            flags.no_env |= tag.get_bool("noenv", false);

            let dir = self.prepend_base(&dir);
            let entries = fs::read_dir(&dir).map_err(|e| ConfigParseError {
                message: format!("Unable to read directory for include {}: {e}", dir.display()),
                position: tag.source().clone(),
                tag: Some(tag.name().to_string()),
            })?;
            let mut paths: Vec<PathBuf> = entries
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
                .map(|e| e.path())
                .filter(|p| wildcard_match("*.conf", &p.display().to_string()))
                .collect();
            paths.sort();
            for path in paths {
                self.parse_file(&path.display().to_string(), flags, mandatory.as_deref(), false)?;
            }
            Ok(())
        } else if let Some(exec) = tag.read_string("executable", false) {
            if flags.no_exec {
                return Err(ConfigParseError {
                    message: "Invalid <include:executable> tag in file included with noexec=\"yes\""
                        .into(),
                    position: tag.source().clone(),
                    tag: Some(tag.name().to_string()),
                });
            }
            flags.no_include |= tag.get_bool("noinclude", false);
            // Exec output may not include further executables or read the
            // environment unless it explicitly asks.
            flags.no_exec |= tag.get_bool("noexec", true);
            flags.no_env |= tag.get_bool("noenv", true);
            self.parse_file(&exec, flags, mandatory.as_deref(), true)
        } else {
            Ok(())
        }
    }

    /// `<files>` / `<execfiles>`: read each value into the named cache.
    fn do_read_file(
        &mut self,
        key: &str,
        name: &str,
        flags: ParseFlags,
        exec: bool,
        position: &FilePosition,
    ) -> Result<(), ConfigParseError> {
        if flags.no_include {
            return Err(ConfigParseError {
                message: "Invalid <files> tag in file included with noinclude=\"yes\"".into(),
                position: position.clone(),
                tag: None,
            });
        }
        if exec && flags.no_exec {
            return Err(ConfigParseError {
                message: "Invalid <execfiles> tag in file included with noexec=\"yes\"".into(),
                position: position.clone(),
                tag: None,
            });
        }

        let content = if exec {
            let output = Command::new("sh").arg("-c").arg(name).output().map_err(|e| {
                ConfigParseError {
                    message: format!("Could not read \"{name}\" for \"{key}\" file: {e}"),
                    position: position.clone(),
                    tag: None,
                }
            })?;
            String::from_utf8_lossy(&output.stdout).into_owned()
        } else {
            let path = self.prepend_base(name);
            fs::read_to_string(&path).map_err(|e| ConfigParseError {
                message: format!("Could not read \"{}\" for \"{key}\" file: {e}", path.display()),
                position: position.clone(),
                tag: None,
            })?
        };

        self.files.insert(
            key.to_string(),
            content.lines().map(|l| l.trim_end_matches('\r').to_string()).collect(),
        );
        Ok(())
    }
}

/// Character-level parser for one file. Tracks position for error
/// reporting; one character of pushback is enough for this grammar.
struct Parser<'a> {
    stack: &'a mut ParseStack,
    flags: ParseFlags,
    chars: Vec<char>,
    pos: usize,
    current: FilePosition,
    last_tag: FilePosition,
    tag_name: Option<String>,
    mandatory_tag: Option<String>,
}

impl<'a> Parser<'a> {
    fn new(
        stack: &'a mut ParseStack,
        flags: ParseFlags,
        content: &str,
        name: &str,
        mandatory_tag: Option<&str>,
    ) -> Self {
        Self {
            stack,
            flags,
            chars: content.chars().collect(),
            pos: 0,
            current: FilePosition::new(name, 1, 0),
            last_tag: FilePosition::new(name, 0, 0),
            tag_name: None,
            mandatory_tag: mandatory_tag.map(str::to_string),
        }
    }

    fn err(&self, message: impl Into<String>) -> ConfigParseError {
        ConfigParseError {
            message: message.into(),
            position: self.current.clone(),
            tag: self.tag_name.clone(),
        }
    }

    fn next(&mut self) -> Result<char, ConfigParseError> {
        self.advance().ok_or_else(|| self.err("Unexpected end-of-file"))
    }

    fn advance(&mut self) -> Option<char> {
        let ch = *self.chars.get(self.pos)?;
        self.pos += 1;
        if ch == '\n' {
            self.current.line += 1;
            self.current.column = 0;
        } else {
            self.current.column += 1;
        }
        Some(ch)
    }

    fn unget(&mut self) {
        debug_assert!(self.pos > 0);
        self.pos -= 1;
        let ch = self.chars[self.pos];
        if ch == '\n' {
            self.current.line -= 1;
        } else {
            self.current.column = self.current.column.saturating_sub(1);
        }
    }

    fn skip_comment(&mut self) -> Result<(), ConfigParseError> {
        loop {
            if matches!(self.advance(), None | Some('\n')) {
                return Ok(());
            }
        }
    }

    fn wordchar(ch: char) -> bool {
        ch.is_ascii_alphanumeric() || matches!(ch, '-' | '.' | '_')
    }

    /// Skip whitespace, then read a run of word characters.
    fn next_word(&mut self) -> Result<String, ConfigParseError> {
        let mut ch = self.next()?;
        while ch.is_whitespace() {
            ch = self.next()?;
        }
        let mut word = String::new();
        while Self::wordchar(ch) {
            word.push(ch);
            match self.advance() {
                Some(c) => ch = c,
                None => return Ok(word),
            }
        }
        self.unget();
        Ok(word)
    }

    /// Expand one `&...;` entity into `value`.
    fn entity(&mut self, key: &str, value: &mut String) -> Result<(), ConfigParseError> {
        let mut name = String::new();
        loop {
            let ch = self.next()?;
            if Self::wordchar(ch) || (name.is_empty() && ch == '#') {
                name.push(ch);
            } else if ch == ';' {
                break;
            } else {
                return Err(self.err(format!(
                    "Invalid XML entity name in value of <{}:{key}> \
                     (to include an ampersand or quote, use &amp; or &quot;)",
                    self.tag_name.as_deref().unwrap_or("?")
                )));
            }
        }

        if name.is_empty() {
            return Err(self.err("Empty XML entity reference"));
        }

        if let Some(num) = name.strip_prefix('#') {
            let (radix, digits) = match num.strip_prefix('x') {
                Some(hex) => (16, hex),
                None => (10, num),
            };
            if digits.is_empty() {
                return Err(self.err("Empty numeric character reference"));
            }
            let code = u32::from_str_radix(digits, radix)
                .ok()
                .filter(|&v| v <= 255)
                .ok_or_else(|| self.err(format!("Invalid numeric character reference '&{name};'")))?;
            value.push(char::from_u32(code).expect("value <= 255"));
            return Ok(());
        }

        if let Some(env_name) = name.strip_prefix("env.") {
            if self.flags.no_env {
                return Err(self.err(
                    "XML environment entity reference in file included with noenv=\"yes\"",
                ));
            }
            let env = std::env::var(env_name).map_err(|_| {
                self.err(format!("Undefined XML environment entity reference '&{name};'"))
            })?;
            value.push_str(&env);
            return Ok(());
        }

        match self.stack.vars.get(&name) {
            Some(var) => {
                value.push_str(var);
                Ok(())
            }
            None => Err(self.err(format!("Undefined XML entity reference '&{name};'"))),
        }
    }

    /// One `key="value"` pair; false when the closing `>` was consumed.
    fn key_value(&mut self, tag: &mut ConfigTag) -> Result<bool, ConfigParseError> {
        let key = self.next_word()?;
        let ch = self.next()?;
        if ch == '>' && key.is_empty() {
            return Ok(false);
        }
        if ch == '#' && key.is_empty() {
            self.skip_comment()?;
            return Ok(true);
        }
        if ch != '=' {
            return Err(self.err(format!("Invalid character {ch:?} in key ({key})")));
        }

        let ch = self.next()?;
        if ch != '"' {
            return Err(self.err(format!(
                "Invalid character in value of <{}:{key}>",
                tag.name()
            )));
        }

        let mut value = String::new();
        loop {
            let ch = self.next()?;
            match ch {
                '&' => self.entity(&key, &mut value)?,
                '"' => break,
                '\r' => {}
                _ => value.push(ch),
            }
        }

        if !tag.insert(key.clone(), value) {
            return Err(self.err(format!("Duplicate key '{key}' found")));
        }
        Ok(true)
    }

    fn do_tag(&mut self) -> Result<(), ConfigParseError> {
        self.last_tag = self.current.clone();
        let name = self.next_word()?;

        let spc = self.next()?;
        if spc == '>' {
            self.unget();
        } else if !spc.is_whitespace() {
            return Err(self.err("Invalid character in tag name"));
        }

        if name.is_empty() {
            return Err(self.err("Empty tag name"));
        }

        self.tag_name = Some(name.clone());
        let mut tag = ConfigTag::new(&name, self.last_tag.clone());
        while self.key_value(&mut tag)? {}

        if self
            .mandatory_tag
            .as_deref()
            .is_some_and(|m| m.eq_ignore_ascii_case(&name))
        {
            self.mandatory_tag = None;
        }

        if name.eq_ignore_ascii_case("include") {
            self.stack.do_include(&tag, self.flags)?;
        } else if name.eq_ignore_ascii_case("files") {
            for (key, value) in tag.items().to_vec() {
                let pos = tag.source().clone();
                self.stack.do_read_file(&key, &value, self.flags, false, &pos)?;
            }
        } else if name.eq_ignore_ascii_case("execfiles") {
            for (key, value) in tag.items().to_vec() {
                let pos = tag.source().clone();
                self.stack.do_read_file(&key, &value, self.flags, true, &pos)?;
            }
        } else if name.eq_ignore_ascii_case("define") {
            let var = tag.get_string("name", "");
            let value = tag.get_string("value", "");
            if var.is_empty() {
                return Err(self.err("Variable definition must include variable name"));
            }
            self.stack.vars.insert(var, value);
        } else {
            self.stack.tags.push((name.to_ascii_lowercase(), Rc::new(tag)));
        }

        self.tag_name = None;
        Ok(())
    }

    fn parse(mut self) -> Result<(), ConfigParseError> {
        loop {
            match self.advance() {
                None => {
                    if let Some(mandatory) = &self.mandatory_tag {
                        return Err(self.err(format!("Mandatory tag \"{mandatory}\" not found")));
                    }
                    return Ok(());
                }
                Some('#') => self.skip_comment()?,
                Some('<') => self.do_tag()?,
                Some(' ') | Some('\t') | Some('\r') | Some('\n') => {}
                Some('\u{FEFF}') | Some('\u{FFFE}') | Some('\u{FFFD}') => {
                    return Err(self.err(
                        "Do not save your files as UTF-16 or UTF-32, use UTF-8",
                    ));
                }
                Some(_) => return Err(self.err("Syntax error - start of tag expected")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<ParseStack, ConfigParseError> {
        let mut stack = ParseStack::new(".");
        stack.parse_text("test.conf", text, ParseFlags::default())?;
        Ok(stack)
    }

    fn tag<'a>(stack: &'a ParseStack, name: &str) -> &'a ConfigTag {
        &stack
            .tags
            .iter()
            .find(|(n, _)| n == name)
            .expect("tag present")
            .1
    }

    #[test]
    fn parses_tags_and_comments() {
        let stack = parse(
            "# leading comment\n\
             <server name=\"irc.example.net\" network=\"Example\">\n\
             <listen port=\"6667\"> # trailing comment\n",
        )
        .unwrap();
        assert_eq!(stack.tags.len(), 2);
        assert_eq!(tag(&stack, "server").get_string("name", ""), "irc.example.net");
        assert_eq!(tag(&stack, "listen").get_int("port", 0, 0, 65535), 6667);
    }

    #[test]
    fn same_name_tags_form_a_multimap() {
        let stack = parse("<oper name=\"a\">\n<oper name=\"b\">\n").unwrap();
        let names: Vec<String> = stack
            .tags
            .iter()
            .filter(|(n, _)| n == "oper")
            .map(|(_, t)| t.get_string("name", ""))
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn numeric_entities() {
        let stack = parse("<x dec=\"&#65;\" hex=\"&#x41;\">").unwrap();
        assert_eq!(tag(&stack, "x").get_string("dec", ""), "A");
        assert_eq!(tag(&stack, "x").get_string("hex", ""), "A");
    }

    #[test]
    fn named_entities_and_defines() {
        let stack = parse(
            "<define name=\"foo\" value=\"bar\">\n\
             <x amp=\"&amp;\" quote=\"&quot;\" var=\"&foo;baz\">",
        )
        .unwrap();
        let t = tag(&stack, "x");
        assert_eq!(t.get_string("amp", ""), "&");
        assert_eq!(t.get_string("quote", ""), "\"");
        assert_eq!(t.get_string("var", ""), "barbaz");
    }

    #[test]
    fn env_entity_expansion() {
        std::env::set_var("FERROD_TEST_ENV", "from-env");
        let stack = parse("<x v=\"&env.FERROD_TEST_ENV;\">").unwrap();
        assert_eq!(tag(&stack, "x").get_string("v", ""), "from-env");

        let err = parse("<x v=\"&env.FERROD_UNSET_DOES_NOT_EXIST;\">").unwrap_err();
        assert!(err.message.contains("Undefined XML environment entity"));
    }

    #[test]
    fn env_entity_disabled_by_flag() {
        std::env::set_var("FERROD_TEST_ENV2", "x");
        let mut stack = ParseStack::new(".");
        let flags = ParseFlags { no_env: true, ..ParseFlags::default() };
        let err = stack
            .parse_text("t", "<x v=\"&env.FERROD_TEST_ENV2;\">", flags)
            .unwrap_err();
        assert!(err.message.contains("noenv"));
    }

    #[test]
    fn undefined_entity_fails() {
        let err = parse("<x v=\"&nosuch;\">").unwrap_err();
        assert!(err.message.contains("Undefined XML entity reference"));
    }

    #[test]
    fn bad_numeric_entity_fails() {
        assert!(parse("<x v=\"&#999;\">").is_err());
        assert!(parse("<x v=\"&#;\">").is_err());
        assert!(parse("<x v=\"&#xZZ;\">").is_err());
    }

    #[test]
    fn carriage_returns_are_stripped_from_values() {
        let stack = parse("<x v=\"a\r\rb\">").unwrap();
        assert_eq!(tag(&stack, "x").get_string("v", ""), "ab");
    }

    #[test]
    fn duplicate_key_fails() {
        let err = parse("<x a=\"1\" a=\"2\">").unwrap_err();
        assert!(err.message.contains("Duplicate key"));
    }

    #[test]
    fn error_carries_position_and_tag() {
        let err = parse("<server name=\"x\"\n  bad?=\"y\">").unwrap_err();
        assert_eq!(err.position.file, "test.conf");
        assert_eq!(err.position.line, 2);
        assert_eq!(err.tag.as_deref(), Some("server"));
    }

    #[test]
    fn eof_inside_tag_fails() {
        let err = parse("<server name=\"x").unwrap_err();
        assert!(err.message.contains("end-of-file"));
    }

    #[test]
    fn garbage_outside_tag_fails() {
        let err = parse("server name\n").unwrap_err();
        assert!(err.message.contains("start of tag expected"));
    }

    #[test]
    fn mandatory_tag_missing_fails() {
        let mut stack = ParseStack::new(".");
        let err = Parser::new(
            &mut stack,
            ParseFlags::default(),
            "<other>",
            "t",
            Some("needed"),
        )
        .parse()
        .unwrap_err();
        assert!(err.message.contains("Mandatory tag \"needed\" not found"));
    }

    #[test]
    fn include_cycle_is_detected() {
        let dir = std::env::temp_dir().join("ferrod-inc-cycle");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("a.conf"), "<include file=\"b.conf\">\n").unwrap();
        fs::write(dir.join("b.conf"), "<include file=\"a.conf\">\n").unwrap();

        let mut stack = ParseStack::new(&dir);
        let err = stack
            .parse_file("a.conf", ParseFlags::default(), None, false)
            .unwrap_err();
        assert!(err.message.contains("included recursively"));
    }

    #[test]
    fn include_missing_okay() {
        let dir = std::env::temp_dir().join("ferrod-inc-missing");
        fs::create_dir_all(&dir).unwrap();

        let mut stack = ParseStack::new(&dir);
        stack
            .parse_text(
                "t",
                "<include file=\"nope.conf\" missingokay=\"yes\">",
                ParseFlags::default(),
            )
            .unwrap();

        let err = parse("<include file=\"definitely-missing.conf\">").unwrap_err();
        assert!(err.message.contains("Could not read"));
    }

    #[test]
    fn include_inherits_and_strengthens_flags() {
        let dir = std::env::temp_dir().join("ferrod-inc-flags");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("outer.conf"),
            "<include file=\"inner.conf\" noinclude=\"yes\">\n",
        )
        .unwrap();
        fs::write(dir.join("inner.conf"), "<include file=\"outer.conf\">\n").unwrap();

        let mut stack = ParseStack::new(&dir);
        let err = stack
            .parse_file("outer.conf", ParseFlags::default(), None, false)
            .unwrap_err();
        assert!(err.message.contains("noinclude"));
    }

    #[test]
    fn files_tag_reads_into_cache() {
        let dir = std::env::temp_dir().join("ferrod-files-tag");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("motd.txt"), "line one\nline two\n").unwrap();

        let mut stack = ParseStack::new(&dir);
        stack
            .parse_text("t", "<files motd=\"motd.txt\">", ParseFlags::default())
            .unwrap();
        assert_eq!(
            stack.files.get("motd").unwrap(),
            &vec!["line one".to_string(), "line two".to_string()]
        );
    }

    #[test]
    fn execfiles_honours_noexec() {
        let mut stack = ParseStack::new(".");
        let flags = ParseFlags { no_exec: true, ..ParseFlags::default() };
        let err = stack
            .parse_text("t", "<execfiles x=\"echo hi\">", flags)
            .unwrap_err();
        assert!(err.message.contains("noexec"));
    }

    #[test]
    fn executable_include_parses_stdout() {
        let mut stack = ParseStack::new(".");
        stack
            .parse_text(
                "t",
                "<include executable=\"echo '<fromexec value=\\\"1\\\">'\">",
                ParseFlags::default(),
            )
            .unwrap();
        assert_eq!(tag(&stack, "fromexec").get_int("value", 0, 0, 10), 1);
    }

    #[test]
    fn directory_include_reads_conf_files() {
        let dir = std::env::temp_dir().join("ferrod-inc-dir");
        let sub = dir.join("conf.d");
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join("one.conf"), "<a v=\"1\">\n").unwrap();
        fs::write(sub.join("two.conf"), "<b v=\"2\">\n").unwrap();
        fs::write(sub.join("ignored.txt"), "not config\n").unwrap();

        let mut stack = ParseStack::new(&dir);
        stack
            .parse_text("t", "<include directory=\"conf.d\">", ParseFlags::default())
            .unwrap();
        assert!(stack.tags.iter().any(|(n, _)| n == "a"));
        assert!(stack.tags.iter().any(|(n, _)| n == "b"));
        assert_eq!(stack.tags.len(), 2);
    }
}

//! Typed log streams with level filtering and fan-out.
//!
//! Engine events are published with a string type tag (`"CONFIG"`,
//! `"XLINE"`, `"SNOTICE"`, ...) and a level. Subscribers are
//! [`LogStream`]s: each type has a chain of streams, plus a global chain
//! registered under `*` that carries a per-stream exclusion set. File
//! streams buffer writes and flush on a configurable write-count
//! threshold; a bridge stream forwards everything into `tracing` so the
//! engine log interleaves with daemon diagnostics.
//!
//! The manager uses interior mutability so `log` works on `&self`: a
//! stream may hold a handle back to the manager, and the reentrancy
//! guard turns a log-from-within-a-log into a no-op instead of a stack.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::rc::Rc;

use crate::config::ConfigTag;

/// Verbosity ranks. A stream subscribed at level L receives messages at
/// L or below, so `Default` streams skip `Verbose`/`Debug`/`Rawio`
/// traffic and a `None` stream receives nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    None,
    Sparse,
    Default,
    Verbose,
    Debug,
    Rawio,
}

impl LogLevel {
    pub fn parse(s: &str) -> Option<LogLevel> {
        match s.to_ascii_lowercase().as_str() {
            "rawio" => Some(LogLevel::Rawio),
            "debug" => Some(LogLevel::Debug),
            "verbose" => Some(LogLevel::Verbose),
            "default" => Some(LogLevel::Default),
            "sparse" => Some(LogLevel::Sparse),
            "none" => Some(LogLevel::None),
            _ => None,
        }
    }
}

/// A log subscriber. `on_log` receives every published message that
/// passes the stream's own level gate.
pub trait LogStream {
    fn on_log(&mut self, level: LogLevel, kind: &str, message: &str);

    /// Called at teardown; buffered implementations flush here.
    fn shutdown(&mut self) {}
}

pub type SharedStream = Rc<RefCell<dyn LogStream>>;

/// Fan-out hub. Holds per-type chains and the global (`*`) chain.
pub struct LogManager {
    streams: RefCell<HashMap<String, Vec<SharedStream>>>,
    global: RefCell<Vec<(SharedStream, Vec<String>)>>,
    /// Reentrancy guard: a stream that logs from inside `on_log` is
    /// suppressed instead of recursing.
    logging: Cell<bool>,
    /// Force rawio-level publication regardless of stream config.
    raw_log: Cell<bool>,
}

impl Default for LogManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LogManager {
    pub fn new() -> Self {
        Self {
            streams: RefCell::new(HashMap::new()),
            global: RefCell::new(Vec::new()),
            logging: Cell::new(false),
            raw_log: Cell::new(false),
        }
    }

    pub fn raw_log(&self) -> bool {
        self.raw_log.get()
    }

    pub fn set_raw_log(&self, on: bool) {
        self.raw_log.set(on);
    }

    /// Subscribe `stream` to one type. `*` joins the global chain.
    pub fn attach(&self, kind: &str, stream: SharedStream) {
        if kind == "*" {
            let mut global = self.global.borrow_mut();
            if !global.iter().any(|(s, _)| Rc::ptr_eq(s, &stream)) {
                global.push((Rc::clone(&stream), Vec::new()));
            }
        }
        self.streams
            .borrow_mut()
            .entry(kind.to_string())
            .or_default()
            .push(stream);
    }

    /// Subscribe `stream` to a space-separated type list. Tokens starting
    /// with `-` are exclusions, applied after the additions, so
    /// `"USERINPUT USEROUTPUT -USERINPUT"` equals `"USEROUTPUT"` and a
    /// global subscription collects its exclusion set here.
    pub fn attach_types(&self, types: &str, stream: SharedStream) {
        let mut excludes = Vec::new();
        for tok in types.split_whitespace() {
            if let Some(ex) = tok.strip_prefix('-') {
                excludes.push(ex.to_string());
            } else {
                self.attach(tok, Rc::clone(&stream));
            }
        }
        for ex in &excludes {
            if ex == "*" {
                self.detach_all(&stream);
                return;
            }
            self.detach(ex, &stream);
        }
        let mut global = self.global.borrow_mut();
        if let Some((_, set)) = global.iter_mut().find(|(s, _)| Rc::ptr_eq(s, &stream)) {
            *set = excludes;
        }
    }

    /// Remove `stream` from one type's chain.
    pub fn detach(&self, kind: &str, stream: &SharedStream) -> bool {
        if kind == "*" {
            self.global
                .borrow_mut()
                .retain(|(s, _)| !Rc::ptr_eq(s, stream));
        }
        let mut streams = self.streams.borrow_mut();
        match streams.get_mut(kind) {
            Some(chain) => {
                let before = chain.len();
                chain.retain(|s| !Rc::ptr_eq(s, stream));
                let removed = chain.len() != before;
                if chain.is_empty() {
                    streams.remove(kind);
                }
                removed
            }
            None => false,
        }
    }

    /// Remove `stream` everywhere.
    pub fn detach_all(&self, stream: &SharedStream) {
        let mut streams = self.streams.borrow_mut();
        for chain in streams.values_mut() {
            chain.retain(|s| !Rc::ptr_eq(s, stream));
        }
        streams.retain(|_, chain| !chain.is_empty());
        self.global
            .borrow_mut()
            .retain(|(s, _)| !Rc::ptr_eq(s, stream));
    }

    /// Publish a message: global streams first (honouring exclusion
    /// sets), then the type-specific chain. The chain borrows are
    /// released before any callback runs, so streams may attach or
    /// detach others from inside `on_log`.
    pub fn log(&self, kind: &str, level: LogLevel, message: &str) {
        if self.logging.get() {
            return;
        }
        self.logging.set(true);

        let global: Vec<SharedStream> = self
            .global
            .borrow()
            .iter()
            .filter(|(_, excl)| !excl.iter().any(|e| e == kind))
            .map(|(s, _)| Rc::clone(s))
            .collect();
        for stream in global {
            stream.borrow_mut().on_log(level, kind, message);
        }

        let typed: Vec<SharedStream> = self
            .streams
            .borrow()
            .get(kind)
            .map(|chain| chain.iter().map(Rc::clone).collect())
            .unwrap_or_default();
        for stream in typed {
            stream.borrow_mut().on_log(level, kind, message);
        }

        self.logging.set(false);
    }

    /// Open file streams from `<log>` tags. `nolog` skips everything;
    /// `forcedebug` switches to raw logging instead. Tags sharing a
    /// target path share one buffered writer.
    pub fn open_file_logs(&self, tags: &[Rc<ConfigTag>], nolog: bool, forcedebug: bool) {
        if forcedebug {
            self.raw_log.set(true);
            return;
        }
        if nolog {
            return;
        }

        let mut writers: HashMap<String, Rc<RefCell<FileWriter>>> = HashMap::new();
        for tag in tags {
            let method = tag.get_string("method", "file");
            if !method.eq_ignore_ascii_case("file") {
                continue;
            }
            let types = tag.get_string("type", "");
            let level = LogLevel::parse(&tag.get_string("level", "default"))
                .unwrap_or(LogLevel::Default);
            if level == LogLevel::Rawio {
                self.raw_log.set(true);
            }
            let target = tag.get_string("target", "");
            if target.is_empty() {
                tracing::warn!(tag = %tag.source(), "<log> tag without a target, skipped");
                continue;
            }
            let flush = tag.get_uint("flush", 20, 1, u64::MAX) as usize;

            let writer = match writers.get(&target) {
                Some(w) => Rc::clone(w),
                None => match FileWriter::open(Path::new(&target), flush) {
                    Ok(w) => {
                        let w = Rc::new(RefCell::new(w));
                        writers.insert(target.clone(), Rc::clone(&w));
                        w
                    }
                    Err(err) => {
                        tracing::warn!(target = %target, error = %err, "cannot open log file");
                        continue;
                    }
                },
            };

            let stream: SharedStream = Rc::new(RefCell::new(FileLogStream::new(level, writer)));
            stream
                .borrow_mut()
                .on_log(LogLevel::Sparse, "HEADER", "Log started");
            self.attach_types(&types, stream);
        }
    }

    /// Flush and drop every stream.
    pub fn close(&self) {
        let mut seen: Vec<SharedStream> = Vec::new();
        for chain in self.streams.borrow().values() {
            for s in chain {
                if !seen.iter().any(|x| Rc::ptr_eq(x, s)) {
                    seen.push(Rc::clone(s));
                }
            }
        }
        for s in seen {
            s.borrow_mut().shutdown();
        }
        self.streams.borrow_mut().clear();
        self.global.borrow_mut().clear();
    }
}

/// Append-mode file sink that flushes every `flush_count` writes.
pub struct FileWriter {
    file: File,
    flush_count: usize,
    write_ops: usize,
}

impl FileWriter {
    pub fn open(path: &Path, flush_count: usize) -> std::io::Result<FileWriter> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(FileWriter { file, flush_count: flush_count.max(1), write_ops: 0 })
    }

    pub fn write_line(&mut self, line: &str) {
        let _ = self.file.write_all(line.as_bytes());
        let _ = self.file.write_all(b"\n");
        self.write_ops += 1;
        if self.write_ops % self.flush_count == 0 {
            let _ = self.file.flush();
        }
    }

    pub fn flush(&mut self) {
        let _ = self.file.flush();
    }
}

impl Drop for FileWriter {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Stream writing timestamped lines through a (possibly shared)
/// [`FileWriter`].
pub struct FileLogStream {
    level: LogLevel,
    writer: Rc<RefCell<FileWriter>>,
}

impl FileLogStream {
    pub fn new(level: LogLevel, writer: Rc<RefCell<FileWriter>>) -> Self {
        Self { level, writer }
    }
}

impl LogStream for FileLogStream {
    fn on_log(&mut self, level: LogLevel, kind: &str, message: &str) {
        if level > self.level {
            return;
        }
        let stamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S");
        self.writer
            .borrow_mut()
            .write_line(&format!("{stamp} {kind}: {message}"));
    }

    fn shutdown(&mut self) {
        self.writer.borrow_mut().flush();
    }
}

/// Bridge into the `tracing` subscriber.
pub struct TracingStream {
    level: LogLevel,
}

impl TracingStream {
    pub fn new(level: LogLevel) -> Self {
        Self { level }
    }
}

impl LogStream for TracingStream {
    fn on_log(&mut self, level: LogLevel, kind: &str, message: &str) {
        if level > self.level {
            return;
        }
        match level {
            LogLevel::Rawio | LogLevel::Debug => tracing::debug!(kind, "{message}"),
            _ => tracing::info!(kind, "{message}"),
        }
    }
}

/// Test sink capturing `(level, kind, message)` triples.
pub struct CollectingStream {
    pub level: LogLevel,
    pub lines: Vec<(LogLevel, String, String)>,
}

impl CollectingStream {
    pub fn new(level: LogLevel) -> Self {
        Self { level, lines: Vec::new() }
    }
}

impl LogStream for CollectingStream {
    fn on_log(&mut self, level: LogLevel, kind: &str, message: &str) {
        if level > self.level {
            return;
        }
        self.lines.push((level, kind.to_string(), message.to_string()));
    }
}

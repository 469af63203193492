// Structured logging through `tracing`. In the browser every formatted event
// goes to the devtools console; natively it goes to stderr.

use std::io;
use std::str::FromStr;

use tracing::Level;

/// Parse a level name (`trace` .. `error`, case-insensitive).
pub fn parse_level(level: &str) -> Option<Level> {
    Level::from_str(level.trim()).ok()
}

/// Install the global subscriber. Safe to call more than once; only the first
/// call takes effect. Unknown level names fall back to `info`.
pub fn init_logging(level: &str) {
    let level = parse_level(level).unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_ansi(false)
        .without_time();

    #[cfg(target_arch = "wasm32")]
    let result = builder.with_writer(ConsoleMakeWriter).try_init();
    #[cfg(not(target_arch = "wasm32"))]
    let result = builder.with_writer(io::stderr).try_init();

    if result.is_ok() {
        tracing::debug!(%level, "logging initialized");
    }
}

/// `MakeWriter` producing one console line per event.
#[cfg(target_arch = "wasm32")]
#[derive(Clone, Copy, Default)]
pub struct ConsoleMakeWriter;

#[cfg(target_arch = "wasm32")]
impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for ConsoleMakeWriter {
    type Writer = ConsoleWriter;

    fn make_writer(&'a self) -> Self::Writer {
        ConsoleWriter { buf: Vec::new(), level: Level::INFO }
    }

    fn make_writer_for(&'a self, meta: &tracing::Metadata<'_>) -> Self::Writer {
        ConsoleWriter { buf: Vec::new(), level: *meta.level() }
    }
}

/// Buffers one formatted event and emits it on drop.
#[cfg(any(target_arch = "wasm32", test))]
pub struct ConsoleWriter {
    buf: Vec<u8>,
    level: Level,
}

#[cfg(any(target_arch = "wasm32", test))]
impl io::Write for ConsoleWriter {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(any(target_arch = "wasm32", test))]
impl Drop for ConsoleWriter {
    fn drop(&mut self) {
        let line = String::from_utf8_lossy(&self.buf);
        let line = line.trim_end();
        if line.is_empty() {
            return;
        }
        emit(self.level, line);
    }
}

#[cfg(target_arch = "wasm32")]
fn emit(level: Level, line: &str) {
    use wasm_bindgen::JsValue;
    use web_sys::console;

    let value = JsValue::from_str(line);
    match level {
        Level::ERROR => console::error_1(&value),
        Level::WARN => console::warn_1(&value),
        Level::INFO => console::info_1(&value),
        _ => console::debug_1(&value),
    }
}

#[cfg(all(not(target_arch = "wasm32"), test))]
fn emit(_level: Level, line: &str) {
    eprintln!("{}", line);
}

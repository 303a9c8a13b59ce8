//! Tracing subscriber setup: console routing, the per-command pass log, and
//! initialisation.
use std::fs;
use std::io::{self, Write as _};
use std::sync::Mutex;

use tracing::Level;
use tracing_subscriber::fmt::writer::{EitherWriter, MakeWriter};

use super::utils::{
    MAX_LOG_BYTES, format_utc_datetime, format_utc_time, log_file_path, rotate_if_large, strip_ansi,
};

const STAGE_TARGET: &str = "gp_startup::stage";
const DRY_RUN_TARGET: &str = "gp_startup::dry_run";

/// Extracts the `message` field from a [`tracing::Event`].
#[derive(Default)]
struct MessageExtractor {
    message: String,
}

impl tracing::field::Visit for MessageExtractor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        }
    }
}

/// Prefix marking an event's kind in the pass log.
fn file_tag(level: Level, target: &str) -> &'static str {
    match level {
        Level::ERROR => "[error] ",
        Level::WARN => "[warn] ",
        Level::INFO if target == STAGE_TARGET => "==> ",
        Level::INFO if target == DRY_RUN_TARGET => "[dry run] ",
        Level::INFO => "",
        _ => "[debug] ",
    }
}

/// A [`tracing_subscriber::Layer`] that appends every event of a pass to the
/// command's log file, timestamped and with ANSI codes stripped.
///
/// Each pass starts with a header naming the command, so the history of
/// boot-time and scheduled refreshes reads top to bottom in one file.
#[derive(Debug)]
pub(super) struct FileLayer {
    file: Mutex<fs::File>,
}

impl FileLayer {
    /// Open the log file for `command` in append mode, rotating it first if
    /// it has grown too large, and write the pass header.
    ///
    /// Returns `None` if no log directory is available or the file cannot be
    /// opened.
    pub(super) fn new(command: &str) -> Option<Self> {
        let path = log_file_path(command)?;
        rotate_if_large(&path, MAX_LOG_BYTES).ok()?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .ok()?;
        writeln!(file, "{}", pass_header(command)).ok()?;
        Some(Self {
            file: Mutex::new(file),
        })
    }
}

fn pass_header(command: &str) -> String {
    let version =
        option_env!("GP_STARTUP_VERSION").unwrap_or(concat!("dev-", env!("CARGO_PKG_VERSION")));
    format!(
        "--- {} gp-startup {version} {command} (pid {}) ---",
        format_utc_datetime(),
        std::process::id(),
    )
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for FileLayer {
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let metadata = event.metadata();
        let mut extractor = MessageExtractor::default();
        event.record(&mut extractor);

        let line = format!(
            "[{}] {}{}",
            format_utc_time(),
            file_tag(*metadata.level(), metadata.target()),
            strip_ansi(&extractor.message),
        );
        if let Ok(mut f) = self.file.lock() {
            writeln!(f, "{line}").ok();
        }
    }
}

/// A [`tracing_subscriber::fmt::FormatEvent`] for console output.
struct ConsoleFormatter;

impl<S, N> tracing_subscriber::fmt::FormatEvent<S, N> for ConsoleFormatter
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: tracing_subscriber::fmt::format::Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();
        let target = metadata.target();
        let mut extractor = MessageExtractor::default();
        event.record(&mut extractor);
        let msg = &extractor.message;

        match *metadata.level() {
            Level::ERROR => writeln!(writer, "\x1b[31mERROR\x1b[0m {msg}"),
            Level::WARN => writeln!(writer, "\x1b[33mWARN\x1b[0m  {msg}"),
            Level::INFO if target == STAGE_TARGET => {
                writeln!(writer, "\x1b[1;34m==>\x1b[0m \x1b[1m{msg}\x1b[0m")
            }
            Level::INFO if target == DRY_RUN_TARGET => {
                writeln!(writer, "  \x1b[33m[DRY RUN]\x1b[0m {msg}")
            }
            Level::INFO => writeln!(writer, "  {msg}"),
            _ => writeln!(writer, "  \x1b[2m{msg}\x1b[0m"),
        }
    }
}

/// Console stream an event is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

/// Pick the console stream for an event at `level`.
///
/// Warnings and errors always go to stderr. When the command's report owns
/// stdout (`rsop`), progress goes to stderr as well so the report can be
/// piped into other tools unmixed.
fn console_stream(level: Level, report_on_stdout: bool) -> Stream {
    if report_on_stdout || level <= Level::WARN {
        Stream::Stderr
    } else {
        Stream::Stdout
    }
}

/// [`MakeWriter`] that routes each event according to [`console_stream`].
#[derive(Debug, Clone, Copy)]
struct ConsoleWriter {
    report_on_stdout: bool,
}

impl<'a> MakeWriter<'a> for ConsoleWriter {
    type Writer = EitherWriter<io::Stdout, io::Stderr>;

    fn make_writer(&'a self) -> Self::Writer {
        if self.report_on_stdout {
            EitherWriter::B(io::stderr())
        } else {
            EitherWriter::A(io::stdout())
        }
    }

    fn make_writer_for(&'a self, meta: &tracing::Metadata<'_>) -> Self::Writer {
        match console_stream(*meta.level(), self.report_on_stdout) {
            Stream::Stdout => EitherWriter::A(io::stdout()),
            Stream::Stderr => EitherWriter::B(io::stderr()),
        }
    }
}

/// Initialise the global [`tracing`] subscriber.
///
/// Console progress goes to stdout and warnings to stderr, unless
/// `report_on_stdout` is set, in which case the console uses stderr only.
/// The file layer always captures DEBUG and above in `<command>.log` under
/// the log directory. Must be called once at program
/// startup, before any logging.
pub fn init_subscriber(verbose: bool, command: &str, report_on_stdout: bool) {
    use tracing_subscriber::{
        Layer as _, filter::LevelFilter, fmt, layer::SubscriberExt as _,
        util::SubscriberInitExt as _,
    };

    let console_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    let console_layer = fmt::layer()
        .event_format(ConsoleFormatter)
        .with_writer(ConsoleWriter { report_on_stdout })
        .with_filter(console_level);

    let file_layer = FileLayer::new(command).map(|l| l.with_filter(LevelFilter::DEBUG));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();
}

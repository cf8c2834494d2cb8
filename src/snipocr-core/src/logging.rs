//! Colored, component-prefixed log output on stderr
//!
//! Stdout is reserved for command output (JSON event lines in `session`
//! mode), so every log line goes to stderr. Lines name the crate that
//! logged them and, when the event carries a `generation` field, the
//! recognition run it belongs to.

use owo_colors::{OwoColorize, Style};
use std::fmt;
use std::io;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::{
    format::{FormatEvent, FormatFields, Writer},
    FmtContext,
};
use tracing_subscriber::registry::LookupSpan;

/// Component identifier for prefixing logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Cli,
    Session,
    Recognize,
    Check,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Cli => "CLI",
            Component::Session => "SESSION",
            Component::Recognize => "OCR",
            Component::Check => "CHECK",
        }
    }

    pub fn color_style(&self) -> Style {
        match self {
            Component::Cli => Style::new().cyan().bold(),
            Component::Session => Style::new().green().bold(),
            Component::Recognize => Style::new().yellow().bold(),
            Component::Check => Style::new().magenta().bold(),
        }
    }
}

/// Short name of the workspace crate an event target belongs to
fn origin(target: &str) -> &'static str {
    match target.split("::").next().unwrap_or(target) {
        "snipocr_imaging" => "img",
        "snipocr_ocr" => "ocr",
        "snipocr_core" | "snipocr" => "core",
        _ => "dep",
    }
}

fn level_tag(level: Level) -> String {
    match level {
        Level::ERROR => "E".red().bold().to_string(),
        Level::WARN => "W".yellow().bold().to_string(),
        Level::INFO => "I".green().to_string(),
        Level::DEBUG => "D".blue().to_string(),
        Level::TRACE => "T".dimmed().to_string(),
    }
}

/// Event fields split into message, run generation and the rest
#[derive(Default)]
struct EventFields {
    message: String,
    generation: Option<u64>,
    extra: Vec<(&'static str, String)>,
}

impl Visit for EventFields {
    fn record_u64(&mut self, field: &Field, value: u64) {
        if field.name() == "generation" {
            self.generation = Some(value);
        } else {
            self.extra.push((field.name(), value.to_string()));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.extra.push((field.name(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.extra.push((field.name(), format!("{:?}", value)));
        }
    }
}

/// Formatter writing `HH:MM:SS.mmm [COMPONENT] L origin#generation message`
pub struct ColoredFormatter {
    pub component: Component,
}

impl<S, N> FormatEvent<S, N> for ColoredFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        let mut fields = EventFields::default();
        event.record(&mut fields);

        let now = chrono::Local::now();
        write!(writer, "{} ", now.format("%H:%M:%S%.3f").dimmed())?;

        let prefix = format!("[{:7}]", self.component.as_str());
        write!(writer, "{} ", prefix.style(self.component.color_style()))?;
        write!(writer, "{} ", level_tag(*metadata.level()))?;

        let source = match fields.generation {
            Some(generation) => format!("{}#{}", origin(metadata.target()), generation),
            None => origin(metadata.target()).to_string(),
        };
        write!(writer, "{:8} ", source.dimmed())?;

        write!(writer, "{}", fields.message)?;
        for (name, value) in &fields.extra {
            write!(writer, " {}={}", name.italic(), value)?;
        }
        writeln!(writer)
    }
}

/// Initialize colored logging for a component.
///
/// `RUST_LOG` still applies; `verbose` only raises the default level.
pub fn init_component_logger(component: Component, verbose: bool) -> anyhow::Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let level = if verbose { Level::DEBUG } else { Level::INFO };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .event_format(ColoredFormatter { component })
        .with_writer(io::stderr);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture(f: impl FnOnce()) -> String {
        let sink = Capture::default();
        let writer = sink.clone();
        let subscriber = tracing_subscriber::fmt()
            .event_format(ColoredFormatter {
                component: Component::Session,
            })
            .with_writer(move || writer.clone())
            .with_max_level(Level::DEBUG)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = sink.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_prefixes_fit_column() {
        for component in [
            Component::Cli,
            Component::Session,
            Component::Recognize,
            Component::Check,
        ] {
            assert!(component.as_str().len() <= 7);
        }
    }

    #[test]
    fn test_origin_from_target() {
        assert_eq!(origin("snipocr_imaging::pipeline"), "img");
        assert_eq!(origin("snipocr_ocr::local"), "ocr");
        assert_eq!(origin("snipocr_core::session"), "core");
        assert_eq!(origin("snipocr"), "core");
        assert_eq!(origin("hyper::client"), "dep");
    }

    #[test]
    fn test_generation_tagged_on_line() {
        let out = capture(|| {
            tracing::debug!(target: "snipocr_core::scheduler", generation = 7u64, "dispatching");
            tracing::info!(target: "snipocr_ocr::adapter", backend = "local", "recognized");
        });
        let lines: Vec<&str> = out.lines().collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("core#7"));
        assert!(lines[0].ends_with("dispatching"));
        assert!(!lines[0].contains("generation="));
        assert!(lines[1].contains("ocr"));
        assert!(!lines[1].contains('#'));
        assert!(lines[1].contains("recognized"));
        assert!(lines[1].contains("local"));
    }
}

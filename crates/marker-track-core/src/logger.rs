//! Stderr logger for tracking runs.
//!
//! Lines look like `[  1.234s  INFO rayon-3  store::marker] message`. Detector
//! tasks for different cameras run on worker threads, so the thread and
//! module columns are what tell interleaved camera tasks apart. Install once
//! at startup with [`init`] or [`init_with_level`].

use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::{LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, EnvFilter};

const CRATE_PREFIX: &str = "marker_track";

/// What the stderr logger prints.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogOptions {
    pub level: LevelFilter,
    /// Add the worker thread name column.
    pub threads: bool,
    /// Add the emitting module, with the `marker_track_` prefix dropped.
    pub modules: bool,
    /// Drop records from dependencies (image decoding, rayon).
    pub own_crates_only: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            level: LevelFilter::Info,
            threads: true,
            modules: true,
            own_crates_only: true,
        }
    }
}

struct TrackLogger {
    options: LogOptions,
    started: Instant,
}

/// `marker_track_store::marker` → `store::marker`; foreign targets unchanged.
fn short_target(target: &str) -> &str {
    match target.strip_prefix(CRATE_PREFIX) {
        Some(rest) => rest.strip_prefix('_').unwrap_or(rest).trim_start_matches("::"),
        None => target,
    }
}

impl TrackLogger {
    fn format_line(&self, record: &Record) -> String {
        let mut line = format!(
            "[{:7.3}s {:>5}",
            self.started.elapsed().as_secs_f64(),
            record.level()
        );
        if self.options.threads {
            let thread = std::thread::current();
            line.push(' ');
            line.push_str(thread.name().unwrap_or("worker"));
        }
        if self.options.modules {
            let target = short_target(record.target());
            if !target.is_empty() {
                line.push(' ');
                line.push_str(target);
            }
        }
        line.push_str("] ");
        line.push_str(&record.args().to_string());
        line
    }
}

impl Log for TrackLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.options.level
            && (!self.options.own_crates_only || metadata.target().starts_with(CRATE_PREFIX))
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = self.format_line(record);
        let _ = writeln!(std::io::stderr().lock(), "{line}");
    }

    fn flush(&self) {}
}

static LOGGER: OnceLock<TrackLogger> = OnceLock::new();

/// Install the stderr logger. Later calls keep the first options.
pub fn init(options: LogOptions) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_none() {
        let logger = LOGGER.get_or_init(|| TrackLogger {
            options,
            started: Instant::now(),
        });
        log::set_logger(logger)?;
        log::set_max_level(options.level);
    }
    Ok(())
}

/// [`init`] with default columns and the given level.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    init(LogOptions {
        level,
        ..LogOptions::default()
    })
}

/// Output of the `tracing` subscriber.
#[cfg(feature = "tracing")]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraceOutput {
    /// Human-readable lines with uptime and span close timings.
    Text,
    /// One flattened JSON object per event, for profiling tracking steps.
    Json,
}

/// Install a `tracing` subscriber. `RUST_LOG` overrides the default of
/// `info` for this workspace's crates and `warn` for everything else.
#[cfg(feature = "tracing")]
pub fn init_tracing(output: TraceOutput) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,{CRATE_PREFIX}=info")));
    let builder = fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_thread_names(true);
    let _ = match output {
        TraceOutput::Json => builder.json().flatten_event(true).finish().try_init(),
        TraceOutput::Text => builder
            .with_timer(fmt::time::Uptime::default())
            .finish()
            .try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logger(options: LogOptions) -> TrackLogger {
        TrackLogger {
            options,
            started: Instant::now(),
        }
    }

    #[test]
    fn second_initialisation_is_a_no_op() {
        init_with_level(LevelFilter::Debug).expect("first init");
        init(LogOptions {
            level: LevelFilter::Trace,
            ..LogOptions::default()
        })
        .expect("second init");
        log::debug!("logger installed for marker-track-core tests");
        assert_eq!(LOGGER.get().map(|l| l.options.level), Some(LevelFilter::Debug));
    }

    #[test]
    fn targets_lose_the_workspace_prefix() {
        assert_eq!(short_target("marker_track_store::marker"), "store::marker");
        assert_eq!(short_target("marker_track::tracking"), "tracking");
        assert_eq!(short_target("marker_track"), "");
        assert_eq!(short_target("image::codecs"), "image::codecs");
    }

    #[test]
    fn lines_carry_level_module_and_message() {
        let line = logger(LogOptions::default()).format_line(
            &Record::builder()
                .args(format_args!("camera 2 tracked"))
                .level(log::Level::Warn)
                .target("marker_track::tracking")
                .build(),
        );
        assert!(line.contains(" WARN"), "{line}");
        assert!(line.contains(" tracking] "), "{line}");
        assert!(line.ends_with("camera 2 tracked"), "{line}");

        let bare = logger(LogOptions {
            threads: false,
            modules: false,
            ..LogOptions::default()
        })
        .format_line(
            &Record::builder()
                .args(format_args!("frame 4"))
                .level(log::Level::Info)
                .target("marker_track_store::marker")
                .build(),
        );
        assert!(bare.ends_with(" INFO] frame 4"), "{bare}");
    }

    #[test]
    fn dependency_records_are_filtered() {
        let own = logger(LogOptions::default());
        let meta = |target| {
            Metadata::builder()
                .level(log::Level::Info)
                .target(target)
                .build()
        };
        assert!(own.enabled(&meta("marker_track_detect::detector")));
        assert!(!own.enabled(&meta("rayon_core")));
        let all = logger(LogOptions {
            own_crates_only: false,
            ..LogOptions::default()
        });
        assert!(all.enabled(&meta("rayon_core")));
        assert!(!all.enabled(
            &Metadata::builder()
                .level(log::Level::Debug)
                .target("marker_track")
                .build()
        ));
    }
}

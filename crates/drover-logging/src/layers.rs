//! Output layers for the drover subscriber
//!
//! Each layer is boxed so the builder can assemble any combination of
//! console and file output into one `Vec` without a match arm per case.

use std::fs::{self, File};
use std::io;

use tracing::Subscriber;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::{ConsoleConfig, FileConfig, JsonlConfig, RotationStrategy};
use crate::error::{LoggingError, LoggingResult};

/// A type-erased layer over subscriber `S`
pub type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

/// JSONL formatting layer writing to `writer`
pub fn jsonl_layer<S, W>(jsonl: &JsonlConfig, writer: W) -> BoxedLayer<S>
where
    S: Subscriber + for<'span> LookupSpan<'span> + 'static,
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(jsonl.include_spans)
        .flatten_event(jsonl.flatten_events)
        .with_file(jsonl.include_location)
        .with_line_number(jsonl.include_location)
        .with_thread_ids(jsonl.include_thread_info)
        .with_thread_names(jsonl.include_thread_info)
        .with_writer(writer)
        .boxed()
}

/// Console layer, pretty or JSONL, with its own optional level
pub fn console_layer<S>(
    console: &ConsoleConfig,
    jsonl: &JsonlConfig,
) -> LoggingResult<BoxedLayer<S>>
where
    S: Subscriber + for<'span> LookupSpan<'span> + 'static,
{
    let writer = if console.stderr {
        BoxMakeWriter::new(io::stderr)
    } else {
        BoxMakeWriter::new(io::stdout)
    };

    let layer: BoxedLayer<S> = if console.pretty {
        tracing_subscriber::fmt::layer()
            .with_ansi(console.ansi)
            .with_target(true)
            .with_writer(writer)
            .boxed()
    } else {
        jsonl_layer(jsonl, writer)
    };

    match &console.level {
        Some(level) => Ok(layer.with_filter(parse_filter(level)?).boxed()),
        None => Ok(layer),
    }
}

/// Non-blocking writer for file output
///
/// The returned guard flushes buffered lines when dropped and must outlive
/// the subscriber.
pub fn file_writer(config: &FileConfig) -> LoggingResult<(NonBlocking, WorkerGuard)> {
    fs::create_dir_all(&config.directory)?;

    let rotation = match config.rotation {
        RotationStrategy::Never => {
            let file = File::create(config.single_file_path())?;
            return Ok(tracing_appender::non_blocking(file));
        }
        RotationStrategy::Daily => Rotation::DAILY,
        RotationStrategy::Hourly => Rotation::HOURLY,
    };

    let mut builder = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(config.prefix.clone())
        .filename_suffix("log");
    if let Some(max_files) = config.max_files {
        builder = builder.max_log_files(max_files);
    }
    let appender = builder
        .build(&config.directory)
        .map_err(|e| LoggingError::Appender(e.to_string()))?;

    Ok(tracing_appender::non_blocking(appender))
}

/// Parse filter directives such as `info,drover_pipeline=trace`
pub fn parse_filter(directives: &str) -> LoggingResult<EnvFilter> {
    EnvFilter::try_new(directives)
        .map_err(|e| LoggingError::Filter(format!("{}: {}", directives, e)))
}

#![deny(warnings)]
#![warn(unused_extern_crates)]
use num_enum::{IntoPrimitive, TryFromPrimitive};
use tracing_forest::printer::TestCapturePrinter;
use tracing_forest::tag::NoTag;
use tracing_forest::util::*;
use tracing_forest::Tag;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

pub mod macros;

pub use {tracing, tracing_forest, tracing_subscriber};

/// Start up the logging for test mode. Logs are captured per-test and only
/// shown on failure.
pub fn test_init() {
    let filter = EnvFilter::from_default_env()
        .add_directive(LevelFilter::TRACE.into());

    let _ = tracing_subscriber::Registry::default()
        .with(ForestLayer::new(TestCapturePrinter::new(), NoTag).with_filter(filter))
        .try_init();
}

/// Tag resolution hook for subscribers that want per-event tags. Not wired
/// into the default layers yet.
pub fn event_tagger(_event: &Event) -> Option<Tag> {
    None
}

#[derive(Debug, Clone, Copy, IntoPrimitive, TryFromPrimitive)]
#[repr(u64)]
pub enum EventTag {
    AdminDebug,
    AdminError,
    AdminWarn,
    AdminInfo,
    CodecError,
    CodecWarn,
    CodecTrace,
    ReplError,
    ReplWarn,
    ReplInfo,
    PerfTrace,
}

impl EventTag {
    pub fn pretty(self) -> &'static str {
        match self {
            EventTag::AdminDebug => "admin.debug",
            EventTag::AdminError => "admin.error",
            EventTag::AdminWarn => "admin.warn",
            EventTag::AdminInfo => "admin.info",
            EventTag::CodecError => "codec.error",
            EventTag::CodecWarn => "codec.warn",
            EventTag::CodecTrace => "codec.trace",
            EventTag::ReplError => "repl.error",
            EventTag::ReplWarn => "repl.warn",
            EventTag::ReplInfo => "repl.info",
            EventTag::PerfTrace => "perf.trace",
        }
    }

    pub fn emoji(self) -> &'static str {
        use EventTag::*;
        match self {
            AdminDebug => "🐛",
            AdminError | CodecError | ReplError => "🚨",
            AdminWarn | CodecWarn | ReplWarn => "⚠️",
            AdminInfo | ReplInfo => "ℹ️",
            CodecTrace | PerfTrace => "📍",
        }
    }
}

#[macro_export]
macro_rules! tagged_event {
    ($level:ident, $event_tag:path, $($arg:tt)*) => {{
        use tracing;
        fn assert_eventtag(_: &EventTag) {}
        assert_eventtag(&$event_tag);
        let event_tag_id: u64 = $event_tag.into();
        tracing::event!(tracing::Level::$level, event_tag_id, $($arg)*)
    }}
}

#[macro_export]
macro_rules! admin_debug {
    ($($arg:tt)*) => { tagged_event!(DEBUG, EventTag::AdminDebug, $($arg)*) }
}

#[macro_export]
macro_rules! admin_error {
    ($($arg:tt)*) => { tagged_event!(ERROR, EventTag::AdminError, $($arg)*) }
}

#[macro_export]
macro_rules! admin_warn {
    ($($arg:tt)*) => { tagged_event!(WARN, EventTag::AdminWarn, $($arg)*) }
}

#[macro_export]
macro_rules! admin_info {
    ($($arg:tt)*) => { tagged_event!(INFO, EventTag::AdminInfo, $($arg)*) }
}

#[macro_export]
macro_rules! codec_error {
    ($($arg:tt)*) => { tagged_event!(ERROR, EventTag::CodecError, $($arg)*) }
}

#[macro_export]
macro_rules! codec_warn {
    ($($arg:tt)*) => { tagged_event!(WARN, EventTag::CodecWarn, $($arg)*) }
}

#[macro_export]
macro_rules! codec_trace {
    ($($arg:tt)*) => { tagged_event!(TRACE, EventTag::CodecTrace, $($arg)*) }
}

#[macro_export]
macro_rules! repl_error {
    ($($arg:tt)*) => { tagged_event!(ERROR, EventTag::ReplError, $($arg)*) }
}

#[macro_export]
macro_rules! repl_warn {
    ($($arg:tt)*) => { tagged_event!(WARN, EventTag::ReplWarn, $($arg)*) }
}

#[macro_export]
macro_rules! repl_info {
    ($($arg:tt)*) => { tagged_event!(INFO, EventTag::ReplInfo, $($arg)*) }
}

#[macro_export]
macro_rules! perf_trace {
    ($($arg:tt)*) => { tagged_event!(TRACE, EventTag::PerfTrace, $($arg)*) }
}

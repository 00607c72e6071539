use std::{
    backtrace::{Backtrace, BacktraceStatus},
    panic::{self, PanicHookInfo},
    thread,
};

/// Log panics through `tracing` so they land in the configured outputs next to the pull loop
/// logs instead of only on stderr.
pub fn panic_hook(panic_info: &PanicHookInfo) {
    let payload = panic_info.payload();
    let payload = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str));

    let location = panic_info.location().map(|l| l.to_string());
    let current = thread::current();
    let backtrace = Backtrace::capture();
    let note = (backtrace.status() == BacktraceStatus::Disabled)
        .then_some("run with RUST_BACKTRACE=1 environment variable to display a backtrace");

    tracing::error!(
        panic.payload = payload,
        panic.location = location,
        panic.thread = current.name(),
        panic.backtrace = backtrace.to_string(),
        panic.note = note,
        "A panic occurred",
    );
}

pub fn install_panic_hook() {
    panic::set_hook(Box::new(panic_hook));
}

use std::panic::PanicHookInfo;

/// Panic hook that prints roughly the same message as the default panic hook
/// but uses tracing:error instead of stderr.
///
/// Useful when we want panic messages to have the proper log format.
pub fn tracing_panic_hook(panic: &PanicHookInfo) {
    let thread = std::thread::current();
    let name = thread.name().unwrap_or("<unnamed>");
    let backtrace = std::backtrace::Backtrace::force_capture();
    tracing::error!("thread '{name}' {panic}\nstack backtrace:\n{backtrace}");
}

/// Sets `tracing_panic_hook` as the global panic hook.
pub fn set_panic_hook() {
    std::panic::set_hook(Box::new(tracing_panic_hook));
}

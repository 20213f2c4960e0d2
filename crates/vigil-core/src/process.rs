//! Process-level conventions
//!
//! Exit codes: 0 clean shutdown, 1 startup failure, 2 unhandled fatal.

/// Turn any panic into exit code 2 after the default hook prints it.
/// Installed first thing in every service main.
pub fn exit_on_panic() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_hook(info);
        std::process::exit(2);
    }));
}

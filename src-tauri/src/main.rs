// Prevents additional console window on Windows in release, DO NOT REMOVE!!
#![cfg_attr(
    all(not(debug_assertions), feature = "tray"),
    windows_subsystem = "windows"
)]

#[cfg(feature = "tray")]
fn main() {
    sms_code_watcher_lib::run()
}

#[cfg(not(feature = "tray"))]
fn main() {
    if let Err(err) = sms_code_watcher_lib::run_headless() {
        log::error!("{err:?}");
        std::process::exit(1);
    }
}

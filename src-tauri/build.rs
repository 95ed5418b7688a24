fn main() {
    // The tray shell embeds tauri.conf.json; the headless build needs nothing.
    #[cfg(feature = "tray")]
    tauri_build::build();
}

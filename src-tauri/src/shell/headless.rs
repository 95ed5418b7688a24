use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use log::{error, info};
use tokio_util::sync::CancellationToken;

use crate::{
    pipeline::{bootstrap, Prepared, StoreAccessError},
    session::CodeSink,
    settings::{default_settings_path, SettingsStore, WatcherSettings},
};

/// Sink for the windowless build: system pasteboard through `arboard`,
/// notification banner through `osascript` on macOS.
pub struct HeadlessSink;

impl CodeSink for HeadlessSink {
    fn copy_to_clipboard(&self, code: &str) -> Result<()> {
        let mut clipboard =
            arboard::Clipboard::new().map_err(|err| anyhow!("clipboard unavailable: {err}"))?;
        clipboard
            .set_text(code.to_string())
            .map_err(|err| anyhow!("clipboard write failed: {err}"))
    }

    #[cfg(target_os = "macos")]
    fn notify(&self, title: &str, body: &str) -> Result<()> {
        let script = format!(
            "display notification {} with title {}",
            applescript_string(body),
            applescript_string(title)
        );
        let status = std::process::Command::new("osascript")
            .arg("-e")
            .arg(script)
            .status()
            .context("failed to run osascript")?;
        if !status.success() {
            return Err(anyhow!("osascript exited with {status}"));
        }
        Ok(())
    }

    #[cfg(not(target_os = "macos"))]
    fn notify(&self, title: &str, body: &str) -> Result<()> {
        info!("{title}: {body}");
        Ok(())
    }
}

/// Quote `value` as an AppleScript string literal.
pub fn applescript_string(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

fn load_settings() -> Result<WatcherSettings> {
    match default_settings_path() {
        Some(path) => Ok(SettingsStore::load_or_init(path)?.effective()),
        None => Ok(WatcherSettings::default().with_env_overrides()),
    }
}

/// Watch the store until Ctrl-C. Exits early with the permission message when
/// the store cannot be read.
pub fn run_headless() -> Result<()> {
    let settings = load_settings()?;
    info!("SMS code watcher starting on {}", settings.db_path.display());

    let Prepared {
        pipeline,
        detector,
        changes,
    } = bootstrap(&settings, Arc::new(HeadlessSink)).map_err(|err| {
        if let Some(access) = err.downcast_ref::<StoreAccessError>() {
            error!("{}", access.user_message());
        }
        err
    })?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build runtime")?;

    runtime.block_on(async move {
        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_signal.cancel();
            }
        });

        let session = pipeline.run(changes, cancel).await;
        drop(detector);
        info!(
            "SMS code watcher stopped; {} code(s) copied this run",
            session.history().len()
        );
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applescript_strings_are_escaped() {
        assert_eq!(applescript_string("839201"), "\"839201\"");
        assert_eq!(
            applescript_string(r#"say "hi" \ bye"#),
            r#""say \"hi\" \\ bye""#
        );
    }
}

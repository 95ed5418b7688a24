use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use anyhow::{anyhow, Result};
use chrono::Local;
use log::{error, info, warn};
use tauri::{
    menu::{CheckMenuItem, Menu, MenuEvent, MenuItem, PredefinedMenuItem},
    tray::TrayIconBuilder,
    AppHandle, Manager,
};
use tauri_plugin_autostart::{MacosLauncher, ManagerExt};
use tauri_plugin_clipboard_manager::ClipboardExt;
use tauri_plugin_dialog::{DialogExt, MessageDialogKind};
use tauri_plugin_notification::NotificationExt;
use tokio_util::sync::CancellationToken;

use crate::{
    pipeline::{bootstrap, Prepared, StoreAccessError, PERMISSION_HINT},
    session::{CodeSink, HistoryEntry},
    settings::SettingsStore,
};

const TRAY_ID: &str = "main";
const MENU_QUIT: &str = "quit";
const MENU_AUTOSTART: &str = "autostart";
const MENU_HISTORY_EMPTY: &str = "history-empty";
const HISTORY_PREFIX: &str = "history:";

const AUTOSTART_HINT: &str = "无法自动设置开机启动。请手动添加：\n\
    系统设置 > 通用 > 登录项 > 点击 \"+\" 并选择本应用";

pub(crate) struct ShellState {
    history: Mutex<Vec<HistoryEntry>>,
    autostart_hint_shown: AtomicBool,
    cancel: CancellationToken,
}

struct TauriSink {
    app: AppHandle,
}

impl CodeSink for TauriSink {
    fn copy_to_clipboard(&self, code: &str) -> Result<()> {
        self.app
            .clipboard()
            .write_text(code.to_string())
            .map_err(|err| anyhow!("clipboard write failed: {err}"))
    }

    fn notify(&self, title: &str, body: &str) -> Result<()> {
        self.app
            .notification()
            .builder()
            .title(title)
            .body(body)
            .show()
            .map_err(|err| anyhow!("notification failed: {err}"))
    }

    fn history_changed(&self, history: &[HistoryEntry]) {
        let state = self.app.state::<ShellState>();
        match state.history.lock() {
            Ok(mut guard) => *guard = history.to_vec(),
            Err(poisoned) => *poisoned.into_inner() = history.to_vec(),
        }

        let app = self.app.clone();
        if let Err(err) = self.app.run_on_main_thread(move || refresh_menu(&app)) {
            warn!("failed to schedule tray refresh: {err}");
        }
    }
}

fn history_snapshot(app: &AppHandle) -> Vec<HistoryEntry> {
    let state = app.state::<ShellState>();
    let guard = match state.history.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    guard.clone()
}

fn build_menu(app: &AppHandle) -> tauri::Result<Menu<tauri::Wry>> {
    let menu = Menu::new(app)?;
    let history = history_snapshot(app);

    if history.is_empty() {
        menu.append(&MenuItem::with_id(
            app,
            MENU_HISTORY_EMPTY,
            "暂无验证码",
            false,
            None::<&str>,
        )?)?;
    }
    for (idx, entry) in history.iter().enumerate() {
        let label = format!(
            "{}  ({})",
            entry.code,
            entry.extracted_at.with_timezone(&Local).format("%H:%M:%S")
        );
        menu.append(&MenuItem::with_id(
            app,
            format!("{HISTORY_PREFIX}{idx}"),
            label,
            true,
            None::<&str>,
        )?)?;
    }

    let autostart_enabled = app.autolaunch().is_enabled().unwrap_or(false);
    menu.append(&PredefinedMenuItem::separator(app)?)?;
    menu.append(&CheckMenuItem::with_id(
        app,
        MENU_AUTOSTART,
        "开机启动",
        true,
        autostart_enabled,
        None::<&str>,
    )?)?;
    menu.append(&MenuItem::with_id(app, MENU_QUIT, "退出", true, None::<&str>)?)?;

    Ok(menu)
}

fn refresh_menu(app: &AppHandle) {
    let Some(tray) = app.tray_by_id(TRAY_ID) else {
        return;
    };
    match build_menu(app) {
        Ok(menu) => {
            if let Err(err) = tray.set_menu(Some(menu)) {
                error!("failed to update tray menu: {err}");
            }
        }
        Err(err) => error!("failed to build tray menu: {err}"),
    }
}

fn on_menu_event(app: &AppHandle, event: MenuEvent) {
    match event.id().as_ref() {
        MENU_QUIT => {
            app.state::<ShellState>().cancel.cancel();
            app.exit(0);
        }
        MENU_AUTOSTART => toggle_autostart(app),
        id => {
            let Some(idx) = id
                .strip_prefix(HISTORY_PREFIX)
                .and_then(|raw| raw.parse::<usize>().ok())
            else {
                return;
            };
            if let Some(entry) = history_snapshot(app).get(idx) {
                if let Err(err) = app.clipboard().write_text(entry.code.clone()) {
                    warn!("failed to re-copy code: {err}");
                }
            }
        }
    }
}

fn toggle_autostart(app: &AppHandle) {
    let launcher = app.autolaunch();
    let result = match launcher.is_enabled() {
        Ok(true) => launcher.disable(),
        Ok(false) => launcher.enable(),
        Err(err) => Err(err),
    };

    match result {
        Ok(()) => info!(
            "autostart now {}",
            if launcher.is_enabled().unwrap_or(false) { "on" } else { "off" }
        ),
        Err(err) => {
            warn!("autostart registration failed: {err}");
            show_autostart_hint_once(app);
        }
    }

    refresh_menu(app);
}

/// The manual-setup dialog appears at most once per process.
fn show_autostart_hint_once(app: &AppHandle) {
    let state = app.state::<ShellState>();
    if state.autostart_hint_shown.swap(true, Ordering::SeqCst) {
        return;
    }
    app.dialog()
        .message(AUTOSTART_HINT)
        .title("开机启动")
        .kind(MessageDialogKind::Info)
        .show(|_| {});
}

fn show_fatal_and_exit(app: &AppHandle, message: String) {
    let handle = app.clone();
    app.dialog()
        .message(message)
        .title("错误")
        .kind(MessageDialogKind::Error)
        .show(move |_| handle.exit(1));
}

pub fn run() {
    crate::utils::logging::init();
    log::info!("SMS code watcher starting up...");

    tauri::Builder::default()
        .plugin(tauri_plugin_autostart::init(MacosLauncher::LaunchAgent, None))
        .plugin(tauri_plugin_clipboard_manager::init())
        .plugin(tauri_plugin_dialog::init())
        .plugin(tauri_plugin_notification::init())
        .setup(|app| {
            #[cfg(target_os = "macos")]
            app.set_activation_policy(tauri::ActivationPolicy::Accessory);

            let result = (|| -> anyhow::Result<()> {
                let config_dir = app
                    .path()
                    .app_config_dir()
                    .map_err(|err| anyhow::anyhow!(err))?;
                let settings =
                    SettingsStore::load_or_init(config_dir.join("settings.json"))?.effective();

                let cancel = CancellationToken::new();
                app.manage(ShellState {
                    history: Mutex::new(Vec::new()),
                    autostart_hint_shown: AtomicBool::new(false),
                    cancel: cancel.clone(),
                });

                let handle = app.handle().clone();
                let mut tray = TrayIconBuilder::with_id(TRAY_ID)
                    .tooltip("验证码助手")
                    .menu(&build_menu(&handle)?)
                    .on_menu_event(on_menu_event);
                if let Some(icon) = app.default_window_icon() {
                    tray = tray.icon(icon.clone()).icon_as_template(true);
                }
                tray.build(app)?;

                let sink = Arc::new(TauriSink {
                    app: handle.clone(),
                });
                match bootstrap(&settings, sink) {
                    Ok(Prepared {
                        pipeline,
                        detector,
                        changes,
                    }) => {
                        tauri::async_runtime::spawn(async move {
                            let _detector = detector;
                            pipeline.run(changes, cancel).await;
                        });
                        log::info!("Watching {}", settings.db_path.display());
                    }
                    Err(err) => {
                        error!("startup failed: {err:?}");
                        let message = match err.downcast_ref::<StoreAccessError>() {
                            Some(access) => access.user_message(),
                            None => format!("{PERMISSION_HINT}\n\n{err}"),
                        };
                        show_fatal_and_exit(&handle, message);
                    }
                }

                Ok(())
            })();

            result.map_err(|err| err.into())
        })
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}

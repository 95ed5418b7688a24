use std::{fs::File, io, path::Path};

use thiserror::Error;

/// Shown verbatim in the fatal dialog.
pub const PERMISSION_HINT: &str = "无法访问 Messages 数据库。请确保：\n\
    1. 已授予终端完全磁盘访问权限\n\
    2. 已授予应用完全磁盘访问权限\n\
    (系统设置 > 隐私与安全性 > 完全磁盘访问权限)";

#[derive(Debug, Error)]
pub enum StoreAccessError {
    #[error("message store not found at {path}")]
    Missing { path: String },
    #[error("permission denied reading {path}")]
    PermissionDenied { path: String },
    #[error("cannot read {path}: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl StoreAccessError {
    /// Text for the user, including what to grant.
    pub fn user_message(&self) -> String {
        format!("{PERMISSION_HINT}\n\n{self}")
    }
}

/// Blocking check that the primary store file can be opened for reading.
pub fn check_store_access(path: &Path) -> Result<(), StoreAccessError> {
    File::open(path).map(drop).map_err(|err| classify(path, err))
}

fn classify(path: &Path, err: io::Error) -> StoreAccessError {
    let display = path.display().to_string();
    match err.kind() {
        io::ErrorKind::NotFound => StoreAccessError::Missing { path: display },
        io::ErrorKind::PermissionDenied => StoreAccessError::PermissionDenied { path: display },
        _ => StoreAccessError::Unreadable {
            path: display,
            source: err,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readable_file_passes() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(check_store_access(file.path()).is_ok());
    }

    #[test]
    fn missing_file_is_reported_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = check_store_access(&dir.path().join("chat.db")).unwrap_err();

        assert!(matches!(err, StoreAccessError::Missing { .. }));
        assert!(err.user_message().contains("完全磁盘访问权限"));
    }

    #[test]
    fn permission_denied_is_reported_with_hint() {
        let path = Path::new("/Users/me/Library/Messages/chat.db");
        let err = classify(path, io::Error::from(io::ErrorKind::PermissionDenied));

        assert!(matches!(err, StoreAccessError::PermissionDenied { .. }));
        let message = err.user_message();
        assert!(message.starts_with(PERMISSION_HINT));
        assert!(message.contains("permission denied reading /Users/me/Library/Messages/chat.db"));
    }

    #[test]
    fn other_io_errors_keep_their_source() {
        let err = classify(
            Path::new("chat.db"),
            io::Error::new(io::ErrorKind::Other, "device busy"),
        );

        assert!(matches!(err, StoreAccessError::Unreadable { .. }));
        assert!(err.to_string().contains("device busy"));
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_mode_is_reported_as_permission_denied() {
        use std::os::unix::fs::PermissionsExt;

        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o000)).unwrap();
        // root ignores file modes
        if File::open(file.path()).is_ok() {
            return;
        }

        let err = check_store_access(file.path()).unwrap_err();
        assert!(matches!(err, StoreAccessError::PermissionDenied { .. }));
    }
}

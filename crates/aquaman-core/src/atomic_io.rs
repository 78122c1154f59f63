use std::path::Path;

use crate::error::AquamanError;
use crate::time_utils::current_unix_timestamp;

/// Writes text using a temp file + rename so readers never observe partial data.
pub fn write_text_atomic(path: &Path, content: &str) -> Result<(), AquamanError> {
    if path.as_os_str().is_empty() {
        return Err(AquamanError::bad_input("destination path cannot be empty"));
    }
    if path.exists() && path.is_dir() {
        return Err(AquamanError::bad_input(format!(
            "destination path '{}' is a directory",
            path.display()
        )));
    }

    let parent_dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent_dir)
        .map_err(|err| AquamanError::io(format!("failed to create {}", parent_dir.display()), err))?;

    let temp_name = format!(
        ".{}.tmp-{}-{}",
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("aquaman"),
        std::process::id(),
        current_unix_timestamp()
    );
    let temp_path = parent_dir.join(temp_name);
    std::fs::write(&temp_path, content)
        .map_err(|err| AquamanError::io(format!("failed to write {}", temp_path.display()), err))?;
    std::fs::rename(&temp_path, path).map_err(|err| {
        AquamanError::io(
            format!(
                "failed to rename {} to {}",
                temp_path.display(),
                path.display()
            ),
            err,
        )
    })?;
    Ok(())
}

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Writes `bytes` next to `path` first, then swaps the finished file into
/// place so readers never observe a partial save.
pub(crate) fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let staging = staging_path_for(path);
    let written = File::create(&staging).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });
    if let Err(error) = written {
        let _ = fs::remove_file(&staging);
        return Err(error);
    }
    swap_into_place(&staging, path)
}

fn swap_into_place(staging: &Path, target: &Path) -> io::Result<()> {
    if let Err(error) = fs::rename(staging, target) {
        // Windows refuses to rename over an existing file.
        if target.exists() {
            fs::remove_file(target)?;
            if fs::rename(staging, target).is_ok() {
                return Ok(());
            }
        }
        let _ = fs::remove_file(staging);
        return Err(error);
    }
    Ok(())
}

fn staging_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("save.json");
    let staging_name = format!(".{file_name}.{}.partial", std::process::id());
    match path.parent() {
        Some(parent) => parent.join(staging_name),
        None => PathBuf::from(staging_name),
    }
}

//! Append-only log files shared by the supervisor and the processes it launches.
use std::{
    fs::{self, File, OpenOptions},
    io,
    path::Path,
};

/// Opens `path` for appending, creating it and its parent directories if missing.
pub fn open_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

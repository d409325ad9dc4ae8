use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::{AppError, DisplayFallback, Result};

#[derive(Subcommand, Debug, Clone)]
pub enum FilesCommands {
    /// List files in the download directory, newest first
    List,
    /// Copy one downloaded file out by name
    Get(FilesGetArgs),
}

#[derive(Args, Debug, Clone)]
pub struct FilesGetArgs {
    /// Bare file name inside the download directory
    pub name: String,
    /// Destination path (defaults to the name in the current directory)
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
    pub in_progress: bool,
}

#[derive(Debug, Serialize)]
pub struct FileListing {
    pub directory: PathBuf,
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Serialize)]
pub struct CopiedFile {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub size_bytes: u64,
}

pub fn list(dir: &Path, partial_suffixes: &[String]) -> Result<FileListing> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Ok(FileListing {
                directory: dir.to_path_buf(),
                files: Vec::new(),
            })
        }
        Err(err) => return Err(err.into()),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        // A partial download can be renamed between listing and stat.
        let metadata = match fs::metadata(entry.path()) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => return Err(err.into()),
        };
        if !metadata.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let in_progress = partial_suffixes.iter().any(|suffix| name.ends_with(suffix.as_str()));
        files.push(FileEntry {
            name,
            size_bytes: metadata.len(),
            modified: DateTime::<Utc>::from(metadata.modified()?),
            in_progress,
        });
    }
    files.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.name.cmp(&b.name)));

    Ok(FileListing {
        directory: dir.to_path_buf(),
        files,
    })
}

/// Resolves a bare file name inside `dir`. Anything that could escape the
/// directory is rejected.
pub fn resolve_name(dir: &Path, name: &str) -> Result<PathBuf> {
    let mut components = Path::new(name).components();
    let bare = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !bare || name.contains(['/', '\\']) || name.contains("..") {
        return Err(AppError::InvalidFileName(name.to_string()));
    }
    let path = dir.join(name);
    if !path.is_file() {
        return Err(AppError::MissingFile(name.to_string()));
    }
    Ok(path)
}

pub fn get(dir: &Path, name: &str, output: Option<&Path>) -> Result<CopiedFile> {
    let source = resolve_name(dir, name)?;
    let destination = match output {
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(name),
    };
    let size_bytes = fs::copy(&source, &destination)?;
    Ok(CopiedFile {
        source,
        destination,
        size_bytes,
    })
}

impl DisplayFallback for FileListing {
    fn display(&self) -> String {
        if self.files.is_empty() {
            return format!("No files in {}", self.directory.display());
        }
        let mut lines = vec![format!("{} ({} files)", self.directory.display(), self.files.len())];
        for file in &self.files {
            lines.push(format!(
                "{:<40} {:>10} {}{}",
                file.name,
                file.size_bytes,
                file.modified.format("%Y-%m-%d %H:%M:%S"),
                if file.in_progress { "  [in progress]" } else { "" }
            ));
        }
        lines.join("\n")
    }
}

impl DisplayFallback for CopiedFile {
    fn display(&self) -> String {
        format!(
            "Copied {} -> {} ({} bytes)",
            self.source.display(),
            self.destination.display(),
            self.size_bytes
        )
    }
}

//! Local filesystem connector.
//!
//! Executes filesystem actions and answers the queries the filesystem
//! evaluator needs (existence, type, mode, content, metadata). Relative paths
//! resolve against an optional root directory.

use std::ffi::CStr;
use std::fs;
use std::io;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, TimeZone};
use serde_json::{json, Map, Value};
use tracing::debug;
use walkdir::WalkDir;

use super::Connector;
use crate::error::EvalError;
use crate::task::{EvalKind, FileKind, FsAction};

/// Snapshot of a filesystem entry's metadata.
#[derive(Debug, Clone)]
pub struct FileStat {
    /// `None` for entries that are neither a regular file nor a directory.
    pub kind: Option<FileKind>,
    /// Full `st_mode`, including the file type bits.
    pub mode: u32,
    pub size: u64,
    pub modified: DateTime<Local>,
    /// Inode change time, reported as creation time on Linux.
    pub changed: DateTime<Local>,
    pub owner: Option<String>,
    pub group: Option<String>,
}

impl FileStat {
    /// Permission bits only.
    pub fn permissions(&self) -> u32 {
        self.mode & 0o777
    }

    /// `ls -l` style rendering of the mode, e.g. `-rw-r--r--` or
    /// `drwxrwxrwt`. Setuid, setgid and sticky bits replace the matching
    /// execute slot with `s`/`S` or `t`/`T`.
    pub fn symbolic_mode(&self) -> String {
        let type_char = match self.mode & 0o170000 {
            0o040000 => 'd',
            0o100000 => '-',
            0o120000 => 'l',
            0o140000 => 's',
            0o060000 => 'b',
            0o020000 => 'c',
            0o010000 => 'p',
            _ => '?',
        };
        let special = [(0o4000, 's'), (0o2000, 's'), (0o1000, 't')];
        let mut out = String::with_capacity(10);
        out.push(type_char);
        for (shift, (special_bit, special_char)) in [6u32, 3, 0].into_iter().zip(special) {
            let bits = (self.mode >> shift) & 0o7;
            out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
            out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
            let executable = bits & 0o1 != 0;
            out.push(match (self.mode & special_bit != 0, executable) {
                (true, true) => special_char,
                (true, false) => special_char.to_ascii_uppercase(),
                (false, true) => 'x',
                (false, false) => '-',
            });
        }
        out
    }
}

/// Connector performing direct OS file operations.
#[derive(Debug, Clone, Default)]
pub struct FilesystemConnector {
    root: Option<PathBuf>,
}

impl FilesystemConnector {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Resolves a task path. Absolute paths are used as-is.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let candidate = PathBuf::from(path);
        match &self.root {
            Some(root) if candidate.is_relative() => root.join(candidate),
            _ => candidate,
        }
    }

    /// Executes one filesystem action.
    pub fn apply(&self, action: &FsAction) -> Result<(), EvalError> {
        debug!("Applying filesystem action {:?}", action);
        match action {
            FsAction::CreateFile { path, content } => {
                let target = self.resolve(path);
                fs::write(&target, content.as_deref().unwrap_or_default())
                    .map_err(|e| io_error(&target, e))
            }
            FsAction::Mkdir { path } => {
                let target = self.resolve(path);
                fs::create_dir_all(&target).map_err(|e| io_error(&target, e))
            }
            FsAction::Rm { path } => {
                let target = self.resolve(path);
                if target.is_file() {
                    fs::remove_file(&target).map_err(|e| io_error(&target, e))?;
                }
                Ok(())
            }
            FsAction::Rmdir { path } => {
                let target = self.resolve(path);
                if target.is_dir() {
                    fs::remove_dir_all(&target).map_err(|e| io_error(&target, e))?;
                }
                Ok(())
            }
            FsAction::Rename { old_name, new_name } => {
                let from = self.resolve(old_name);
                fs::rename(&from, self.resolve(new_name)).map_err(|e| io_error(&from, e))
            }
            FsAction::Copy { src, dest } => {
                let from = self.resolve(src);
                let to = self.resolve(dest);
                copy_entry(&from, &to)
            }
            FsAction::Move { src, dest } => {
                let from = self.resolve(src);
                let to = into_directory(&from, self.resolve(dest));
                match fs::rename(&from, &to) {
                    Ok(()) => Ok(()),
                    // Cross-device moves fall back to copy and remove.
                    Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
                        copy_entry(&from, &to)?;
                        if from.is_dir() {
                            fs::remove_dir_all(&from).map_err(|e| io_error(&from, e))
                        } else {
                            fs::remove_file(&from).map_err(|e| io_error(&from, e))
                        }
                    }
                    Err(e) => Err(io_error(&from, e)),
                }
            }
            FsAction::Chmod { path, mode } => {
                let target = self.resolve(path);
                let bits = parse_octal_mode(mode)?;
                fs::set_permissions(&target, fs::Permissions::from_mode(bits))
                    .map_err(|e| io_error(&target, e))
            }
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.resolve(path).exists()
    }

    pub fn is_file(&self, path: &str) -> bool {
        self.resolve(path).is_file()
    }

    pub fn is_dir(&self, path: &str) -> bool {
        self.resolve(path).is_dir()
    }

    pub fn read_to_string(&self, path: &str) -> Result<String, EvalError> {
        let target = self.resolve(path);
        fs::read_to_string(&target).map_err(|e| io_error(&target, e))
    }

    pub fn stat(&self, path: &str) -> Result<FileStat, EvalError> {
        let target = self.resolve(path);
        let meta = fs::metadata(&target).map_err(|e| io_error(&target, e))?;
        let kind = if meta.is_file() {
            Some(FileKind::File)
        } else if meta.is_dir() {
            Some(FileKind::Folder)
        } else {
            None
        };
        Ok(FileStat {
            kind,
            mode: meta.mode(),
            size: meta.len(),
            modified: local_time(meta.mtime(), meta.mtime_nsec()),
            changed: local_time(meta.ctime(), meta.ctime_nsec()),
            owner: user_name(meta.uid()),
            group: group_name(meta.gid()),
        })
    }
}

impl Connector for FilesystemConnector {
    fn kind(&self) -> EvalKind {
        EvalKind::Filesystem
    }

    fn env_settings(&self) -> Map<String, Value> {
        let mut settings = Map::new();
        if let Some(root) = &self.root {
            settings.insert("root".to_string(), json!(root.display().to_string()));
        }
        settings
    }
}

/// Parses an octal mode string such as `"644"` or `"0755"`.
pub fn parse_octal_mode(mode: &str) -> Result<u32, EvalError> {
    let trimmed = mode.trim();
    let digits = trimmed.strip_prefix("0o").unwrap_or(trimmed);
    u32::from_str_radix(digits, 8)
        .ok()
        .filter(|bits| *bits <= 0o7777)
        .ok_or_else(|| EvalError::InvalidMode(mode.to_string()))
}

fn io_error(path: &Path, source: io::Error) -> EvalError {
    EvalError::Filesystem {
        path: path.to_path_buf(),
        source,
    }
}

/// Moving or copying onto an existing directory places the source inside it.
fn into_directory(src: &Path, dest: PathBuf) -> PathBuf {
    match src.file_name() {
        Some(name) if dest.is_dir() => dest.join(name),
        _ => dest,
    }
}

fn copy_entry(src: &Path, dest: &Path) -> Result<(), EvalError> {
    let dest = into_directory(src, dest.to_path_buf());
    if !src.is_dir() {
        fs::copy(src, &dest).map_err(|e| io_error(src, e))?;
        return Ok(());
    }

    for entry in WalkDir::new(src) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(src).to_path_buf();
            io_error(&path, io::Error::other(e.to_string()))
        })?;
        let relative = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| io_error(&target, e))?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| io_error(entry.path(), e))?;
        }
    }
    Ok(())
}

fn local_time(secs: i64, nsecs: i64) -> DateTime<Local> {
    // Sub-microsecond precision is dropped so that ISO timestamps compare equal.
    let micros = (nsecs / 1_000) * 1_000;
    Local
        .timestamp_opt(secs, micros as u32)
        .single()
        .unwrap_or_else(|| DateTime::<Local>::from(std::time::UNIX_EPOCH))
}

fn user_name(uid: u32) -> Option<String> {
    let mut buf = vec![0 as libc::c_char; 4096];
    // SAFETY: passwd is plain data; getpwuid_r fills it with pointers into buf.
    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut result: *mut libc::passwd = std::ptr::null_mut();
    // SAFETY: all pointers are valid for the duration of the call.
    let rc = unsafe { libc::getpwuid_r(uid, &mut pwd, buf.as_mut_ptr(), buf.len(), &mut result) };
    if rc != 0 || result.is_null() {
        return None;
    }
    // SAFETY: pw_name points into buf, which outlives this borrow.
    let name = unsafe { CStr::from_ptr(pwd.pw_name) };
    Some(name.to_string_lossy().into_owned())
}

fn group_name(gid: u32) -> Option<String> {
    let mut buf = vec![0 as libc::c_char; 4096];
    // SAFETY: group is plain data; getgrgid_r fills it with pointers into buf.
    let mut grp: libc::group = unsafe { std::mem::zeroed() };
    let mut result: *mut libc::group = std::ptr::null_mut();
    // SAFETY: all pointers are valid for the duration of the call.
    let rc = unsafe { libc::getgrgid_r(gid, &mut grp, buf.as_mut_ptr(), buf.len(), &mut result) };
    if rc != 0 || result.is_null() {
        return None;
    }
    // SAFETY: gr_name points into buf, which outlives this borrow.
    let name = unsafe { CStr::from_ptr(grp.gr_name) };
    Some(name.to_string_lossy().into_owned())
}

//! Host paths to bind into the container, following the layout of the official WireMock image.
use crate::Error;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Home directory of WireMock inside the official image.
pub const ROOT_DIR: &str = "/home/wiremock";
/// Stub mappings are loaded from here on startup.
pub const MAPPINGS_DIR: &str = "/home/wiremock/mappings";
/// Response body files, referenced from stubs with `bodyFileName`.
pub const FILES_DIR: &str = "/home/wiremock/__files";
/// Extension jars are added to the classpath from here.
pub const EXTENSIONS_DIR: &str = "/var/wiremock/extensions";

/// What a configured host path is for. It determines where it lands inside the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountKind {
    /// A stub mapping JSON file, mounted as `<MAPPINGS_DIR>/<name>`.
    Mapping { name: String },
    /// A response body file, mounted as `<FILES_DIR>/<name>`.
    File { name: String },
    /// An extension jar, mounted as `<EXTENSIONS_DIR>/<file name of the jar>`.
    Extension,
    /// A directory with `mappings/` and `__files/` sub-directories, mounted as [`ROOT_DIR`].
    RootDir,
    /// Anything else, at an explicit container path.
    Custom {
        container_path: String,
        read_only: bool,
    },
}

/// A host path, as configured by the user, before planning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfiguredPath {
    pub host_path: PathBuf,
    pub kind: MountKind,
}

impl ConfiguredPath {
    pub fn new(host_path: impl Into<PathBuf>, kind: MountKind) -> Self {
        Self {
            host_path: host_path.into(),
            kind,
        }
    }
}

/// A planned bind mount: `host_path` will be visible at `container_path`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MountEntry {
    pub host_path: PathBuf,
    pub container_path: String,
    pub read_only: bool,
}

/// Turns [`ConfiguredPath`]s into [`MountEntry`]s.
///
/// Planning only reads the filesystem (to check that each host path exists and can be read):
/// planning the same configuration twice yields the same entries, in the same order as they were
/// configured. Order matters: later mounts shadow earlier ones when they overlap (e.g. a single
/// mapping file on top of a root directory).
#[derive(Debug, Default, Clone, Copy)]
pub struct MountPlanner;

impl MountPlanner {
    pub fn new() -> Self {
        Self
    }

    pub fn plan(&self, configured: &[ConfiguredPath]) -> Result<Vec<MountEntry>, Error> {
        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(configured.len());
        for path in configured {
            check_readable(&path.host_path)?;
            let entry = MountEntry {
                container_path: container_path(path)?,
                read_only: match &path.kind {
                    MountKind::Custom { read_only, .. } => *read_only,
                    _ => true,
                },
                host_path: absolute(&path.host_path)?,
            };
            if !seen.insert(entry.container_path.clone()) {
                return Err(Error::Configuration(format!(
                    "`{}` is mounted more than once",
                    entry.container_path
                )));
            }
            entries.push(entry);
        }
        Ok(entries)
    }
}

fn container_path(path: &ConfiguredPath) -> Result<String, Error> {
    let path = match &path.kind {
        MountKind::Mapping { name } => format!("{}/{}", MAPPINGS_DIR, relative_name(name)?),
        MountKind::File { name } => format!("{}/{}", FILES_DIR, relative_name(name)?),
        MountKind::Extension => {
            let file_name = path
                .host_path
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| {
                    Error::Configuration(format!(
                        "`{}` is not a valid extension jar path",
                        path.host_path.display()
                    ))
                })?;
            format!("{}/{}", EXTENSIONS_DIR, file_name)
        }
        MountKind::RootDir => ROOT_DIR.to_owned(),
        MountKind::Custom { container_path, .. } => {
            if !container_path.starts_with('/') {
                return Err(Error::Configuration(format!(
                    "Container paths must be absolute, got `{}`",
                    container_path
                )));
            }
            container_path.clone()
        }
    };
    Ok(path)
}

/// Names can contain sub-directories (`nested/hello.json`), but they cannot escape the
/// directory they are mounted into.
fn relative_name(name: &str) -> Result<&str, Error> {
    let name = name.trim_start_matches('/');
    if name.is_empty() || name.split('/').any(|segment| segment == "..") {
        return Err(Error::Configuration(format!(
            "`{}` is not a valid file name for the container",
            name
        )));
    }
    Ok(name)
}

fn check_readable(path: &Path) -> Result<(), Error> {
    let mount_error = |source| Error::Mount {
        path: path.to_owned(),
        source,
    };
    let metadata = fs::metadata(path).map_err(mount_error)?;
    if metadata.is_dir() {
        fs::read_dir(path).map_err(mount_error)?;
    } else {
        fs::File::open(path).map_err(mount_error)?;
    }
    Ok(())
}

// Bind mounts require absolute host paths.
fn absolute(path: &Path) -> Result<PathBuf, Error> {
    fs::canonicalize(path).map_err(|source| Error::Mount {
        path: path.to_owned(),
        source,
    })
}

/// All the `*.jar` files below `dir`, recursively, sorted by path. Symlinked jars are kept,
/// symlinked directories are skipped.
pub(crate) fn jars_in(dir: &Path) -> Result<Vec<PathBuf>, Error> {
    let mut jars = Vec::new();
    let mut pending = vec![dir.to_owned()];
    while let Some(current) = pending.pop() {
        let listing = fs::read_dir(&current).map_err(|source| Error::Mount {
            path: current.clone(),
            source,
        })?;
        for entry in listing {
            let entry = entry.map_err(|source| Error::Mount {
                path: current.clone(),
                source,
            })?;
            let path = entry.path();
            // Symlinks are not followed into directories, so a cycle cannot trap the walk.
            let file_type = entry.file_type().map_err(|source| Error::Mount {
                path: path.clone(),
                source,
            })?;
            if file_type.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|extension| extension == "jar")
                && (file_type.is_file() || path.is_file())
            {
                jars.push(path);
            }
        }
    }
    jars.sort();
    Ok(jars)
}

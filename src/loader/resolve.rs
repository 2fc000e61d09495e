//! Default path resolution and file reading

use std::path::{Component, Path, PathBuf};

use super::Capabilities;
use crate::error::TemplateError;

/// Resolve `path` as written in a template.
///
/// Paths starting with `/` are taken relative to the configured base directory,
/// all others relative to the directory of the referencing file.
pub fn default_resolve(
    path: &str,
    referencing: Option<&Path>,
    caps: &Capabilities,
) -> Result<PathBuf, TemplateError> {
    let path = path.trim();

    let joined = match path.strip_prefix('/') {
        Some(rooted) => {
            let Some(basedir) = &caps.basedir else {
                return Err(TemplateError::resolution(
                    path,
                    "the \"basedir\" option is required to use includes and extends with \"absolute\" paths",
                ));
            };
            basedir.join(rooted)
        }
        None => {
            let Some(referencing) = referencing else {
                return Err(TemplateError::resolution(
                    path,
                    "the \"filename\" option is required to use includes and extends with \"relative\" paths",
                ));
            };
            referencing.parent().unwrap_or(Path::new("")).join(path)
        }
    };

    Ok(normalize(&joined))
}

pub fn default_read(path: &Path) -> std::io::Result<Vec<u8>> {
    std::fs::read(path)
}

/// Collapse `.` and `..` without touching the file system
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

//! Job description rules applied before submission.
//!
//! [`normalize`] makes the standard streams and log directory explicit data
//! staging entries so the CE stages them without relying on implicit rules.
//! [`local_source`] decides which input files the client must upload itself.

use std::collections::BTreeMap;
use std::path::PathBuf;

use url::Url;

use crate::ports::{InputFile, JobDescription, OutputFile};
use crate::ArcError;

/// Adds missing staging entries for executable, standard streams, and log dir.
///
/// An executable with an absolute path lives on the compute node and is never
/// staged. The log directory counts as present whether or not the existing
/// output entry carries a trailing `/`; a new entry always gets one.
pub fn normalize<D: JobDescription + ?Sized>(description: &mut D) {
    let executable = description
        .executable()
        .filter(|path| !path.is_empty() && !path.starts_with('/'))
        .map(str::to_string);
    let stdin = non_empty(description.stdin());
    let stdout = non_empty(description.stdout());
    let stderr = non_empty(description.stderr());
    let log_dir = non_empty(description.log_dir());

    let has_input = |d: &D, name: &str| d.input_files().iter().any(|f| f.name == name);
    let has_output = |d: &D, name: &str| d.output_files().iter().any(|f| f.name == name);

    for name in [executable, stdin].into_iter().flatten() {
        if !has_input(&*description, &name) {
            description.input_files_mut().push(InputFile::new(name));
        }
    }

    for name in [stdout, stderr].into_iter().flatten() {
        if !has_output(&*description, &name) {
            description.output_files_mut().push(OutputFile::new(name));
        }
    }

    if let Some(log_dir) = log_dir {
        let bare = log_dir.trim_end_matches('/');
        let present = description
            .output_files()
            .iter()
            .any(|f| f.name.trim_end_matches('/') == bare);
        if !present {
            description
                .output_files_mut()
                .push(OutputFile::new(format!("{bare}/")));
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}

/// Collects a description's inputs as a name → source map.
pub fn input_map<D: JobDescription + ?Sized>(description: &D) -> BTreeMap<String, Option<String>> {
    description
        .input_files()
        .iter()
        .map(|f| (f.name.clone(), f.source.clone()))
        .collect()
}

/// Resolves where an input file comes from.
///
/// Returns the local path to upload, or `None` when the CE fetches the input
/// itself from a remote URL. An input without a source is a local file named
/// like the input.
pub fn local_source(name: &str, source: Option<&str>) -> Result<Option<PathBuf>, ArcError> {
    let Some(source) = source.filter(|s| !s.is_empty()) else {
        return Ok(Some(PathBuf::from(name)));
    };

    match Url::parse(source) {
        Ok(url) => {
            if url.scheme() == "file" && url.host_str().map_or(true, str::is_empty) {
                Ok(Some(PathBuf::from(url.path())))
            } else {
                Ok(None)
            }
        }
        // No scheme at all: a plain local path.
        Err(url::ParseError::RelativeUrlWithoutBase) => Ok(Some(PathBuf::from(source))),
        Err(e) => Err(ArcError::InputValidation {
            name: name.to_string(),
            message: format!("error parsing source {source}: {e}"),
        }),
    }
}

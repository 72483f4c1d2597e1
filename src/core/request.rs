use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Wire shape of `POST /run`'s request body.
#[derive(Debug, Clone, Deserialize)]
pub struct RunRequestBody {
    pub cmd: String,
    #[serde(default)]
    pub files: BTreeMap<String, String>,
    pub timeout_ms: Option<i64>,
}

/// Normalized, validated request. Every file name has already been checked
/// to resolve strictly under `/work`; nothing downstream needs to re-check.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub cmd: String,
    pub files: Vec<StagedFile>,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct StagedFile {
    /// Path relative to `/work`, already validated.
    pub relative_path: PathBuf,
    pub content: Vec<u8>,
}

impl StagedFile {
    /// Files whose content begins with a shebang are made executable.
    pub fn is_executable(&self) -> bool {
        self.content.starts_with(b"#!")
    }
}

/// Outcome of a single `POST /run`.
#[derive(Debug, Clone, Serialize)]
pub struct RunResponse {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl RunResponse {
    pub const TIMEOUT_EXIT_CODE: i32 = 124;

    pub fn timed_out() -> Self {
        Self {
            stdout: String::new(),
            stderr: "execution timed out".to_string(),
            exit_code: Self::TIMEOUT_EXIT_CODE,
        }
    }
}

/// Validate and normalize a raw request body (component A). Performs no I/O.
pub fn validate(body: RunRequestBody, default_timeout_ms: u64, max_timeout_ms: u64) -> Result<RunRequest> {
    if body.cmd.trim().is_empty() {
        return Err(Error::bad_request("cmd must not be empty"));
    }

    let mut files = Vec::with_capacity(body.files.len());
    for (name, content) in body.files {
        let relative_path = validate_work_relative_path(&name)?;
        files.push(StagedFile {
            relative_path,
            content: content.into_bytes(),
        });
    }

    let timeout_ms = match body.timeout_ms {
        Some(ms) if ms > 0 => (ms as u64).min(max_timeout_ms),
        Some(_) | None => default_timeout_ms,
    };

    Ok(RunRequest {
        cmd: body.cmd,
        files,
        timeout_ms,
    })
}

/// Reject absolute paths, `.`/`..` components, and any name whose lexically
/// cleaned join with the `/work` root would escape it.
fn validate_work_relative_path(name: &str) -> Result<PathBuf> {
    if name.is_empty() {
        return Err(Error::bad_request("file name must not be empty"));
    }

    let path = Path::new(name);
    if path.is_absolute() {
        return Err(Error::bad_request(format!(
            "file name {name:?} must be relative to /work"
        )));
    }

    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => cleaned.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::bad_request(format!(
                    "file name {name:?} escapes the work directory"
                )));
            }
        }
    }

    if cleaned.as_os_str().is_empty() {
        return Err(Error::bad_request(format!(
            "file name {name:?} does not resolve to a file"
        )));
    }

    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(cmd: &str, files: &[(&str, &str)], timeout_ms: Option<i64>) -> RunRequestBody {
        RunRequestBody {
            cmd: cmd.to_string(),
            files: files
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            timeout_ms,
        }
    }

    #[test]
    fn empty_cmd_is_rejected() {
        let err = validate(body("", &[], None), 5_000, 60_000).unwrap_err();
        assert!(err.is_bad_request());
    }

    #[test]
    fn whitespace_only_cmd_is_rejected() {
        let err = validate(body("   ", &[], None), 5_000, 60_000).unwrap_err();
        assert!(err.is_bad_request());
    }

    #[test]
    fn missing_timeout_defaults() {
        let req = validate(body("echo hi", &[], None), 5_000, 60_000).unwrap();
        assert_eq!(req.timeout_ms, 5_000);
    }

    #[test]
    fn non_positive_timeout_defaults() {
        let req = validate(body("echo hi", &[], Some(0)), 5_000, 60_000).unwrap();
        assert_eq!(req.timeout_ms, 5_000);
        let req = validate(body("echo hi", &[], Some(-10)), 5_000, 60_000).unwrap();
        assert_eq!(req.timeout_ms, 5_000);
    }

    #[test]
    fn timeout_is_clamped_to_max() {
        let req = validate(body("echo hi", &[], Some(1_000_000)), 5_000, 60_000).unwrap();
        assert_eq!(req.timeout_ms, 60_000);
    }

    #[test]
    fn absolute_path_is_rejected() {
        let err = validate(body("echo hi", &[("/etc/passwd", "x")], None), 5_000, 60_000).unwrap_err();
        assert!(err.is_bad_request());
    }

    #[test]
    fn dotdot_escape_is_rejected() {
        let err = validate(body("echo hi", &[("../escape.sh", "x")], None), 5_000, 60_000).unwrap_err();
        assert!(err.is_bad_request());
        let err = validate(body("echo hi", &[("a/../../escape.sh", "x")], None), 5_000, 60_000).unwrap_err();
        assert!(err.is_bad_request());
    }

    #[test]
    fn bare_dot_is_rejected() {
        let err = validate(body("echo hi", &[(".", "x")], None), 5_000, 60_000).unwrap_err();
        assert!(err.is_bad_request());
    }

    #[test]
    fn nested_relative_path_is_accepted() {
        let req = validate(body("echo hi", &[("a/b/main.sh", "x")], None), 5_000, 60_000).unwrap();
        assert_eq!(req.files.len(), 1);
        assert_eq!(req.files[0].relative_path, PathBuf::from("a/b/main.sh"));
    }

    #[test]
    fn shebang_content_is_marked_executable() {
        let req = validate(
            body("sh main.sh", &[("main.sh", "#!/bin/sh\necho hi")], None),
            5_000,
            60_000,
        )
        .unwrap();
        assert!(req.files[0].is_executable());
    }

    #[test]
    fn non_shebang_content_is_not_executable() {
        let req = validate(body("cat data.txt", &[("data.txt", "hello")], None), 5_000, 60_000).unwrap();
        assert!(!req.files[0].is_executable());
    }
}

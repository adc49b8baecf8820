//! Working directory lookup through a remote `pwd`.
//!
//! Best effort: a failed or garbled `pwd` falls back to a directory derived
//! from the username instead of failing the caller.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::SshError;

use super::transport::ExecOutput;

static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1B\[\??[0-9;]*[A-Za-z]|\x1B\][^\x07]*\x07").unwrap());

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WorkingDirectory {
    pub directory: String,
    /// `pwd` failed and `directory` is the username-derived default
    pub using_default: bool,
    /// `pwd` hit a stream error but its partial output was usable
    pub had_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// `/home/{username}/`, or `/` when the username is unknown
pub fn default_directory(username: &str) -> String {
    let username = username.trim();
    if username.is_empty() {
        "/".to_string()
    } else {
        format!("/home/{}/", username)
    }
}

pub fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").into_owned()
}

/// First non-empty line of the output, cleaned, with a trailing `/`
pub fn parse_pwd_output(raw: &str) -> Option<String> {
    let normalized = raw.replace("\r\n", "\n").replace('\r', "\n");
    let cleaned = strip_ansi(&normalized);

    let line = cleaned.lines().map(str::trim).find(|line| !line.is_empty())?;

    let mut directory = line.to_string();
    if !directory.ends_with('/') {
        directory.push('/');
    }
    Some(directory)
}

fn fallback(username: &str, message: String) -> WorkingDirectory {
    tracing::debug!("Using default working directory: {}", message);
    WorkingDirectory {
        directory: default_directory(username),
        using_default: true,
        had_error: false,
        message: Some(message),
    }
}

/// Turn the result of `pwd` into a directory, never an error.
pub fn resolve(result: Result<ExecOutput, SshError>, username: &str) -> WorkingDirectory {
    let output = match result {
        Ok(output) => output,
        Err(e) => return fallback(username, format!("pwd failed: {}", e)),
    };

    let directory = parse_pwd_output(&output.stdout);

    if let Some(stream_error) = &output.stream_error {
        return match directory {
            Some(directory) => WorkingDirectory {
                directory,
                using_default: false,
                had_error: true,
                message: Some(format!("partial output after error: {}", stream_error)),
            },
            None => fallback(username, format!("pwd stream error: {}", stream_error)),
        };
    }

    // Usable output wins over a non-zero exit or stderr noise
    match directory {
        Some(directory) => WorkingDirectory {
            directory,
            using_default: false,
            had_error: false,
            message: None,
        },
        None if !output.stderr.trim().is_empty() => {
            fallback(username, format!("pwd error: {}", output.stderr.trim()))
        }
        None => match output.exit_code.filter(|code| *code != 0) {
            Some(code) => fallback(username, format!("pwd exited with status {}", code)),
            None => fallback(username, "pwd produced no output".to_string()),
        },
    }
}

//! The deploy step: a user-supplied shell command run after each rebuild.
//!
//! The command is a template; `{pages}` is replaced with the path of the
//! assembled output directory. Only a bare `{word}` counts as a placeholder:
//! shell syntax such as `${HOST}`, `find -exec ... {} ;`, `{a,b}` or
//! `{ cmd; }` passes through untouched. Any placeholder other than `{pages}`
//! is rejected when the template is parsed, so typos surface at startup
//! rather than after the first rebuild.

use std::io;
use std::path::Path;
use std::process::{Command, ExitStatus};
use thiserror::Error;

/// Placeholder for the assembled output directory.
pub const PAGES_PLACEHOLDER: &str = "{pages}";

#[derive(Error, Debug)]
pub enum DeployError {
    #[error("invalid deploy command: {0}")]
    Template(String),
    #[error("failed to run deploy command: {0}")]
    Io(#[from] io::Error),
    #[error("deploy command exited with {0}")]
    Failed(ExitStatus),
}

/// A validated deploy command template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployCommand {
    template: String,
}

impl DeployCommand {
    pub fn parse(template: &str) -> Result<Self, DeployError> {
        if template.trim().is_empty() {
            return Err(DeployError::Template("command is empty".into()));
        }
        for (start, end) in placeholders(template) {
            let placeholder = &template[start..end];
            if placeholder != PAGES_PLACEHOLDER {
                return Err(DeployError::Template(format!(
                    "unknown placeholder {placeholder} (only {PAGES_PLACEHOLDER} is supported)"
                )));
            }
        }
        Ok(Self {
            template: template.to_string(),
        })
    }

    /// The shell command for a given output directory.
    pub fn render(&self, pages_dir: &Path) -> String {
        let path = pages_dir.to_string_lossy();
        let mut command = String::with_capacity(self.template.len() + path.len());
        let mut copied = 0;
        for (start, end) in placeholders(&self.template) {
            command.push_str(&self.template[copied..start]);
            command.push_str(&path);
            copied = end;
        }
        command.push_str(&self.template[copied..]);
        command
    }

    /// Run the command through `sh -c`, inheriting stdout and stderr.
    pub fn run(&self, pages_dir: &Path) -> Result<(), DeployError> {
        let command = self.render(pages_dir);
        log::info!("Running deploy command");
        log::debug!("Deploy command: {command}");
        let status = Command::new("sh").arg("-c").arg(&command).status()?;
        if !status.success() {
            return Err(DeployError::Failed(status));
        }
        Ok(())
    }
}

/// Byte spans of `{word}` placeholders, where a word starts with an ASCII
/// letter and continues with letters, digits or `_`. Braces opened by `$`
/// belong to the shell.
fn placeholders(template: &str) -> Vec<(usize, usize)> {
    let bytes = template.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' && (i == 0 || bytes[i - 1] != b'$') {
            let word = bytes[i + 1..]
                .iter()
                .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_')
                .count();
            let close = i + 1 + word;
            if word > 0 && bytes[i + 1].is_ascii_alphabetic() && bytes.get(close) == Some(&b'}') {
                spans.push((i, close + 1));
                i = close + 1;
                continue;
            }
        }
        i += 1;
    }
    spans
}

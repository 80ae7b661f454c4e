//! External command document converter
//!
//! Shells out to a converter program (pandoc unless configured otherwise)
//! once per document. Output is written under a temporary name and renamed
//! into place, so a crashed or timed-out run never leaves a half-written
//! artifact behind under the final name.

use async_trait::async_trait;
use bridge_traits::{
    convert::{DocumentConverter, TargetFormat},
    error::{BridgeError, Result},
};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Placeholder replaced by the source document path
pub const INPUT_PLACEHOLDER: &str = "{input}";
/// Placeholder replaced by the artifact path
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const STDERR_SNIPPET_LEN: usize = 512;

/// Runs a converter program for each document
///
/// # Example
///
/// ```ignore
/// use bridge_desktop::CommandConverter;
///
/// let converter = CommandConverter::pandoc("/vault/.vault-sync/artifacts")
///     .with_timeout(Duration::from_secs(30));
/// ```
#[derive(Debug, Clone)]
pub struct CommandConverter {
    program: String,
    args: Vec<String>,
    artifact_dir: PathBuf,
    timeout: Duration,
}

impl CommandConverter {
    /// Run `program` with `args`, substituting `{input}` and `{output}`
    pub fn new<I, S>(program: impl Into<String>, args: I, artifact_dir: impl Into<PathBuf>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            artifact_dir: artifact_dir.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// `pandoc {input} -o {output}`
    pub fn pandoc(artifact_dir: impl Into<PathBuf>) -> Self {
        Self::new(
            "pandoc",
            [INPUT_PLACEHOLDER, "-o", OUTPUT_PLACEHOLDER],
            artifact_dir,
        )
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    /// Final artifact location for `source`
    ///
    /// The name keeps the source stem and adds a short digest of the full
    /// source path so same-named notes in different folders do not collide.
    pub fn artifact_path(&self, source: &Path, target: TargetFormat) -> PathBuf {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        let digest = Sha256::digest(source.to_string_lossy().as_bytes());
        let tag: String = digest[..4].iter().map(|b| format!("{:02x}", b)).collect();

        self.artifact_dir
            .join(format!("{}-{}.{}", stem, tag, target.extension()))
    }

    fn expand_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        let output = output.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace(INPUT_PLACEHOLDER, &input)
                    .replace(OUTPUT_PLACEHOLDER, &output)
            })
            .collect()
    }
}

#[async_trait]
impl DocumentConverter for CommandConverter {
    async fn convert(&self, source: &Path, target: TargetFormat) -> Result<PathBuf> {
        if !tokio::fs::try_exists(source).await? {
            return Err(BridgeError::InvalidInput(format!(
                "Source does not exist: {}",
                source.display()
            )));
        }

        tokio::fs::create_dir_all(&self.artifact_dir).await?;

        let final_path = self.artifact_path(source, target);
        // Keep the real extension last; converters pick the format from it
        let temp_path = final_path.with_extension(format!(
            "partial-{}.{}",
            uuid::Uuid::new_v4().simple(),
            target.extension()
        ));

        let args = self.expand_args(source, &temp_path);
        debug!(program = %self.program, ?args, "Running converter");

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == ErrorKind::NotFound => {
                return Err(BridgeError::NotAvailable(format!(
                    "Converter program not found: {}",
                    self.program
                )));
            }
            Ok(Err(e)) => return Err(BridgeError::Io(e)),
            Err(_) => {
                remove_quietly(&temp_path).await;
                return Err(BridgeError::Transient(format!(
                    "{} timed out after {:?}",
                    self.program, self.timeout
                )));
            }
        };

        if !output.status.success() {
            remove_quietly(&temp_path).await;
            let stderr = String::from_utf8_lossy(&output.stderr);
            let snippet: String = stderr.trim().chars().take(STDERR_SNIPPET_LEN).collect();
            return Err(BridgeError::Permanent(format!(
                "{} exited with {}: {}",
                self.program, output.status, snippet
            )));
        }

        if !tokio::fs::try_exists(&temp_path).await? {
            return Err(BridgeError::Permanent(format!(
                "{} produced no output",
                self.program
            )));
        }

        tokio::fs::rename(&temp_path, &final_path).await?;
        debug!(artifact = %final_path.display(), "Conversion finished");
        Ok(final_path)
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove partial artifact");
        }
    }
}

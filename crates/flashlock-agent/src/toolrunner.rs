//! Tool supervisor.
//!
//! Runs the external flashing binary against decrypted firmware and leaves no
//! recoverable residue. Firmware buffers are materialized to exclusively
//! created, owner-only temp files under a per-run scratch directory; the tool
//! is spawned directly (never through a shell) with its output forwarded
//! line-by-line to the progress sink; and on every exit path each temp file
//! is overwritten with random bytes, pass by pass, before being unlinked.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use zeroize::Zeroize;

use flashlock_common::secret::SecretBytes;

use crate::config::ToolsConfig;
use crate::error::{AgentError, Result};
use crate::flasher::{FlashPhase, ProgressSink};

const WIPE_CHUNK: usize = 8192;

/// Verdict of one tool execution.
#[derive(Debug, Clone, Copy)]
pub struct ToolOutcome {
    /// Exit code 0.
    pub success: bool,
    pub exit_code: Option<i32>,
}

pub struct ToolRunner {
    tools_dir: PathBuf,
    enforce_integrity: bool,
    allowlist: Vec<String>,
    wipe_passes: u32,
    scratch_root: PathBuf,
}

impl ToolRunner {
    pub fn new(cfg: &ToolsConfig) -> Self {
        Self {
            tools_dir: PathBuf::from(&cfg.dir),
            enforce_integrity: cfg.enforce_integrity,
            allowlist: cfg.allowlist.iter().map(|h| h.to_lowercase()).collect(),
            wipe_passes: cfg.wipe_passes.max(1),
            scratch_root: std::env::temp_dir(),
        }
    }

    /// Override the scratch parent directory (tests).
    #[cfg(test)]
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = root.into();
        self
    }

    /// Run `tool` with `arg_template` against the given artifact buffers.
    /// Ownership of the buffers transfers here; they are zeroized once
    /// materialized, and the materializations are scrubbed on every path out.
    pub async fn run(
        &self,
        tool: &str,
        arg_template: &str,
        artifacts: Vec<(String, SecretBytes)>,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<ToolOutcome> {
        let tool_path = self.locate_and_verify(tool).await?;

        let scratch = self
            .scratch_root
            .join(format!("flashlock-{:016x}", OsRng.next_u64()));
        create_private_dir(&scratch)?;

        let outcome = self
            .run_in_scratch(&scratch, &tool_path, arg_template, artifacts, sink, cancel)
            .await;

        // Always scrub, success or not.
        self.scrub_dir(&scratch).await;
        outcome
    }

    async fn run_in_scratch(
        &self,
        scratch: &Path,
        tool_path: &Path,
        arg_template: &str,
        artifacts: Vec<(String, SecretBytes)>,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<ToolOutcome> {
        let mut paths = HashMap::new();
        for (name, buffer) in artifacts {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            let path = materialize(scratch, &name, &buffer).await?;
            // buffer zeroizes on drop at the end of this iteration
            paths.insert(name, path);
        }

        let args = substitute(arg_template, &paths);

        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        tracing::info!(tool = %tool_path.display(), "spawning flash tool");
        let mut child = Command::new(tool_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdout = BufReader::new(child.stdout.take().expect("stdout piped")).lines();
        let mut stderr = BufReader::new(child.stderr.take().expect("stderr piped")).lines();
        let (mut out_done, mut err_done) = (false, false);

        while !(out_done && err_done) {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    return Err(AgentError::Cancelled);
                }
                line = stdout.next_line(), if !out_done => match line? {
                    Some(line) => sink.report(FlashPhase::ToolOutput(line)),
                    None => out_done = true,
                },
                line = stderr.next_line(), if !err_done => match line? {
                    Some(line) => sink.report(FlashPhase::ToolOutput(line)),
                    None => err_done = true,
                },
            }
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(AgentError::Cancelled);
            }
            status = child.wait() => status?,
        };

        let exit_code = status.code();
        let success = status.success();
        if !success {
            tracing::warn!(?exit_code, "flash tool reported failure");
        }
        Ok(ToolOutcome { success, exit_code })
    }

    /// Locate the tool and check its hash against the allowlist. With
    /// enforcement off the hash is logged and the tool passes — an advisory
    /// mode suitable only for development.
    async fn locate_and_verify(&self, tool: &str) -> Result<PathBuf> {
        let path = self.tools_dir.join(tool);
        if !path.is_file() {
            return Err(AgentError::ToolMissing { tool: tool.to_owned() });
        }

        let bytes = tokio::fs::read(&path).await?;
        let hash = hex::encode(Sha256::digest(&bytes));

        if self.enforce_integrity {
            if !self.allowlist.contains(&hash) {
                tracing::error!(tool, %hash, "tool hash not on allowlist");
                return Err(AgentError::ToolUntrusted { tool: tool.to_owned() });
            }
        } else {
            tracing::info!(tool, %hash, "tool integrity advisory (enforcement off)");
        }
        Ok(path)
    }

    /// Overwrite every file in the scratch directory with random bytes,
    /// `wipe_passes` times with a flush between passes, then unlink. A failed
    /// overwrite degrades to a plain unlink.
    async fn scrub_dir(&self, scratch: &Path) {
        let Ok(mut entries) = tokio::fs::read_dir(scratch).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if let Err(e) = overwrite_file(&path, self.wipe_passes).await {
                tracing::warn!(path = %path.display(), error = %e, "secure overwrite failed; unlinking");
            }
            if let Err(e) = tokio::fs::remove_file(&path).await {
                tracing::warn!(path = %path.display(), error = %e, "failed to unlink temp file");
            }
        }
        let _ = tokio::fs::remove_dir(scratch).await;
    }
}

/// Write one firmware buffer to an exclusively created, owner-only file whose
/// name combines a random component with the logical artifact name.
async fn materialize(scratch: &Path, name: &str, buffer: &SecretBytes) -> Result<PathBuf> {
    // Artifact names come from the server manifest; refuse anything that is
    // not a bare file name.
    if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(AgentError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("unsafe artifact name: {name}"),
        )));
    }

    let path = scratch.join(format!("{:016x}-{name}", OsRng.next_u64()));

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        options.mode(0o600);
    }
    let mut file = options.open(&path).await?;
    file.write_all(buffer.expose()).await?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(path)
}

/// Replace `{logical-name}` placeholders in the whitespace-split template
/// with materialized paths.
fn substitute(template: &str, paths: &HashMap<String, PathBuf>) -> Vec<String> {
    template
        .split_whitespace()
        .map(|token| {
            let mut token = token.to_owned();
            for (name, path) in paths {
                let placeholder = format!("{{{name}}}");
                if token.contains(&placeholder) {
                    token = token.replace(&placeholder, &path.to_string_lossy());
                }
            }
            token
        })
        .collect()
}

fn create_private_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// Multi-pass random overwrite of a file's full length.
async fn overwrite_file(path: &Path, passes: u32) -> std::io::Result<()> {
    let len = tokio::fs::metadata(path).await?.len();
    let mut file = tokio::fs::OpenOptions::new().write(true).open(path).await?;
    let mut chunk = [0u8; WIPE_CHUNK];

    for _ in 0..passes {
        file.seek(std::io::SeekFrom::Start(0)).await?;
        let mut remaining = len as usize;
        while remaining > 0 {
            let take = remaining.min(WIPE_CHUNK);
            OsRng.fill_bytes(&mut chunk[..take]);
            file.write_all(&chunk[..take]).await?;
            remaining -= take;
        }
        file.flush().await?;
        file.sync_all().await?;
    }

    chunk.zeroize();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CollectSink(Mutex<Vec<String>>);

    impl CollectSink {
        fn new() -> Self {
            Self(Mutex::new(Vec::new()))
        }
        fn lines(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    impl ProgressSink for CollectSink {
        fn report(&self, phase: FlashPhase) {
            if let FlashPhase::ToolOutput(line) = phase {
                self.0.lock().unwrap().push(line);
            }
        }
    }

    fn runner(tools_dir: &Path, enforce: bool) -> ToolRunner {
        ToolRunner::new(&ToolsConfig {
            dir: tools_dir.to_string_lossy().into_owned(),
            enforce_integrity: enforce,
            allowlist: vec![],
            wipe_passes: 2,
        })
    }

    #[cfg(unix)]
    fn install_script(tools_dir: &Path, name: &str, body: &str) {
        use std::os::unix::fs::PermissionsExt as _;
        let path = tools_dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn scratch_is_empty(root: &Path) -> bool {
        std::fs::read_dir(root).unwrap().next().is_none()
    }

    #[test]
    fn substitute_replaces_known_placeholders() {
        let paths = HashMap::from([
            ("system.bin".to_owned(), PathBuf::from("/tmp/x-system.bin")),
            ("usbloader-5577.bin".to_owned(), PathBuf::from("/tmp/y-loader.bin")),
        ]);
        let args = substitute("-i {system.bin} -l {usbloader-5577.bin} -v", &paths);
        assert_eq!(args, ["-i", "/tmp/x-system.bin", "-l", "/tmp/y-loader.bin", "-v"]);
    }

    #[tokio::test]
    async fn missing_tool_is_reported() {
        let tools = tempfile::tempdir().unwrap();
        let sink = CollectSink::new();
        let result = runner(tools.path(), false)
            .run("mtk_flash", "", vec![], &sink, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(AgentError::ToolMissing { .. })));
    }

    #[tokio::test]
    async fn enforcement_rejects_unlisted_tool() {
        let tools = tempfile::tempdir().unwrap();
        std::fs::write(tools.path().join("mtk_flash"), b"binary").unwrap();
        let sink = CollectSink::new();
        let result = runner(tools.path(), true)
            .run("mtk_flash", "", vec![], &sink, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(AgentError::ToolUntrusted { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_run_forwards_output_and_scrubs() {
        let tools = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        install_script(tools.path(), "fake_flash", "cat \"$1\"");

        let sink = CollectSink::new();
        let outcome = runner(tools.path(), false)
            .with_scratch_root(scratch.path())
            .run(
                "fake_flash",
                "{system.bin}",
                vec![("system.bin".into(), SecretBytes::new(b"image-contents".to_vec()))],
                &sink,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.exit_code, Some(0));
        assert!(sink.lines().iter().any(|l| l.contains("image-contents")));
        assert!(scratch_is_empty(scratch.path()), "materializations must not survive");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_failure_and_still_scrubs() {
        let tools = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        install_script(tools.path(), "fake_flash", "exit 2");

        let sink = CollectSink::new();
        let outcome = runner(tools.path(), false)
            .with_scratch_root(scratch.path())
            .run(
                "fake_flash",
                "{system.bin}",
                vec![("system.bin".into(), SecretBytes::new(b"image".to_vec()))],
                &sink,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, Some(2));
        assert!(scratch_is_empty(scratch.path()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn pre_cancelled_token_aborts_before_spawn() {
        let tools = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        install_script(tools.path(), "fake_flash", "echo should-not-run");

        let cancel = CancellationToken::new();
        cancel.cancel();

        let sink = CollectSink::new();
        let result = runner(tools.path(), false)
            .with_scratch_root(scratch.path())
            .run(
                "fake_flash",
                "{system.bin}",
                vec![("system.bin".into(), SecretBytes::new(b"image".to_vec()))],
                &sink,
                &cancel,
            )
            .await;

        assert!(matches!(result, Err(AgentError::Cancelled)));
        assert!(sink.lines().is_empty());
        assert!(scratch_is_empty(scratch.path()), "partial materializations must be scrubbed");
    }

    #[tokio::test]
    async fn unsafe_artifact_names_are_refused() {
        let scratch = tempfile::tempdir().unwrap();
        let result = materialize(
            scratch.path(),
            "../escape.bin",
            &SecretBytes::new(b"x".to_vec()),
        )
        .await;
        assert!(result.is_err());
    }
}

//! External-process adapters: the static-site generator, the publish CLI and git.
//!
//! Every child is spawned with `kill_on_drop`, so cancelling a run's future
//! terminates whatever it was waiting on.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    process::Stdio,
    time::Instant,
};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::application::providers::{Publisher, SiteBuilder, SourceCheckout, StepError};

const STDERR_TAIL_BYTES: usize = 4096;

struct Invocation<'a> {
    program: &'a str,
    args: Vec<String>,
    cwd: Option<&'a Path>,
    envs: Vec<(&'static str, String)>,
}

impl Invocation<'_> {
    async fn run(self) -> Result<(), StepError> {
        let started_at = Instant::now();
        let mut command = Command::new(self.program);
        command
            .args(&self.args)
            .envs(self.envs.iter().map(|(key, value)| (*key, value.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = self.cwd {
            command.current_dir(cwd);
        }

        let output = command.output().await.map_err(|source| {
            warn!(
                target = "pageship::process",
                program = self.program,
                not_found = source.kind() == ErrorKind::NotFound,
                error = %source,
                "failed to spawn child process"
            );
            StepError::Spawn {
                program: self.program.to_string(),
                source,
            }
        })?;

        let elapsed_ms = started_at.elapsed().as_millis() as u64;
        debug!(
            target = "pageship::process",
            program = self.program,
            args = ?self.args,
            elapsed_ms,
            stdout = %String::from_utf8_lossy(&output.stdout),
            "child process exited"
        );

        if !output.status.success() {
            let exit_code = output.status.code();
            let stderr = stderr_tail(&output.stderr);
            warn!(
                target = "pageship::process",
                program = self.program,
                exit_code = exit_code.map(i64::from).unwrap_or(-1),
                elapsed_ms,
                stderr = %stderr,
                "child process failed"
            );
            return Err(StepError::Failed {
                program: self.program.to_string(),
                exit_code,
                stderr,
            });
        }
        Ok(())
    }
}

fn stderr_tail(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim_end();
    if trimmed.len() <= STDERR_TAIL_BYTES {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - STDERR_TAIL_BYTES;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    format!("…{}", &trimmed[start..])
}

/// Substitute `{name}` placeholders in each argument.
fn expand(args: &[String], vars: &[(&str, &str)]) -> Vec<String> {
    args.iter()
        .map(|arg| {
            vars.iter().fold(arg.clone(), |acc, (name, value)| {
                acc.replace(&format!("{{{name}}}"), value)
            })
        })
        .collect()
}

/// Runs the site generator inside the source tree.
#[derive(Clone, Debug)]
pub struct CommandSiteBuilder {
    command: String,
    args: Vec<String>,
    output_dir: PathBuf,
}

impl CommandSiteBuilder {
    pub fn new(command: &str, args: &[String], output_dir: &Path) -> Self {
        Self {
            command: command.to_string(),
            args: args.to_vec(),
            output_dir: output_dir.to_path_buf(),
        }
    }
}

#[async_trait]
impl SiteBuilder for CommandSiteBuilder {
    async fn build(&self, source_dir: &Path) -> Result<PathBuf, StepError> {
        let source = source_dir.to_string_lossy();
        Invocation {
            program: &self.command,
            args: expand(&self.args, &[("source_dir", &source)]),
            cwd: Some(source_dir),
            envs: Vec::new(),
        }
        .run()
        .await?;

        let output_dir = source_dir.join(&self.output_dir);
        match tokio::fs::metadata(&output_dir).await {
            Ok(meta) if meta.is_dir() => Ok(output_dir),
            _ => Err(StepError::MissingOutput(output_dir)),
        }
    }
}

/// Uploads a built tree with the provider's deploy CLI.
#[derive(Clone)]
pub struct CommandPublisher {
    command: String,
    args: Vec<String>,
    project: String,
    api_token: String,
    account_id: String,
}

impl CommandPublisher {
    pub fn new(
        command: &str,
        args: &[String],
        project: &str,
        api_token: &str,
        account_id: &str,
    ) -> Self {
        Self {
            command: command.to_string(),
            args: args.to_vec(),
            project: project.to_string(),
            api_token: api_token.to_string(),
            account_id: account_id.to_string(),
        }
    }
}

#[async_trait]
impl Publisher for CommandPublisher {
    async fn publish(&self, output_dir: &Path, branch: &str) -> Result<(), StepError> {
        let output = output_dir.to_string_lossy();
        Invocation {
            program: &self.command,
            args: expand(
                &self.args,
                &[
                    ("output_dir", &output),
                    ("project", &self.project),
                    ("branch", branch),
                ],
            ),
            cwd: None,
            envs: vec![
                ("CLOUDFLARE_API_TOKEN", self.api_token.clone()),
                ("CLOUDFLARE_ACCOUNT_ID", self.account_id.clone()),
            ],
        }
        .run()
        .await
    }
}

/// Shallow single-branch clone of the site repository.
#[derive(Clone, Debug)]
pub struct GitCheckout {
    repository: String,
}

impl GitCheckout {
    pub fn new(repository: &str) -> Self {
        Self {
            repository: repository.to_string(),
        }
    }
}

#[async_trait]
impl SourceCheckout for GitCheckout {
    async fn checkout(&self, branch: &str, into: &Path) -> Result<(), StepError> {
        Invocation {
            program: "git",
            args: vec![
                "clone".into(),
                "--quiet".into(),
                "--depth".into(),
                "1".into(),
                "--single-branch".into(),
                "--branch".into(),
                branch.to_string(),
                "--".into(),
                self.repository.clone(),
                into.to_string_lossy().into_owned(),
            ],
            cwd: None,
            envs: vec![("GIT_TERMINAL_PROMPT", "0".into())],
        }
        .run()
        .await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn placeholders_are_substituted() {
        let args = strings(&["deploy", "{output_dir}", "--branch={branch}", "{unknown}"]);
        let expanded = expand(&args, &[("output_dir", "/tmp/out"), ("branch", "main")]);
        assert_eq!(
            expanded,
            vec!["deploy", "/tmp/out", "--branch=main", "{unknown}"]
        );
    }

    #[test]
    fn long_stderr_keeps_the_tail() {
        let raw = "x".repeat(STDERR_TAIL_BYTES * 2) + "the actual error\n";
        let tail = stderr_tail(raw.as_bytes());
        assert!(tail.ends_with("the actual error"));
        assert!(tail.len() <= STDERR_TAIL_BYTES + "…".len());
    }

    #[tokio::test]
    async fn builder_returns_output_directory() {
        let source = tempfile::tempdir().expect("tempdir");
        let builder = CommandSiteBuilder::new(
            "sh",
            &strings(&["-c", "mkdir -p public && echo '<html></html>' > public/index.html"]),
            Path::new("public"),
        );

        let output = builder.build(source.path()).await.expect("build succeeds");
        assert_eq!(output, source.path().join("public"));
        assert!(output.join("index.html").is_file());
    }

    #[tokio::test]
    async fn builder_failure_carries_exit_code_and_stderr() {
        let source = tempfile::tempdir().expect("tempdir");
        let builder = CommandSiteBuilder::new(
            "sh",
            &strings(&["-c", "echo 'template broken' >&2; exit 3"]),
            Path::new("public"),
        );

        match builder.build(source.path()).await {
            Err(StepError::Failed {
                exit_code, stderr, ..
            }) => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(stderr, "template broken");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn builder_without_output_directory_fails() {
        let source = tempfile::tempdir().expect("tempdir");
        let builder = CommandSiteBuilder::new("true", &[], Path::new("public"));

        let err = builder.build(source.path()).await.expect_err("no output");
        assert!(matches!(err, StepError::MissingOutput(_)));
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let source = tempfile::tempdir().expect("tempdir");
        let builder =
            CommandSiteBuilder::new("pageship-no-such-generator", &[], Path::new("public"));

        let err = builder.build(source.path()).await.expect_err("spawn fails");
        assert!(matches!(err, StepError::Spawn { .. }));
    }

    #[tokio::test]
    async fn publisher_passes_credentials_and_arguments() {
        let output = tempfile::tempdir().expect("tempdir");
        let publisher = CommandPublisher::new(
            "sh",
            &strings(&[
                "-c",
                r#"test "$CLOUDFLARE_API_TOKEN" = secret && test "$CLOUDFLARE_ACCOUNT_ID" = acct && test "$0" = "--project-name=blog" && test "$1" = "--branch=develop""#,
                "--project-name={project}",
                "--branch={branch}",
            ]),
            "blog",
            "secret",
            "acct",
        );

        publisher
            .publish(output.path(), "develop")
            .await
            .expect("publish succeeds");
    }
}

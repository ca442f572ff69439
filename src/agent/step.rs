//! Agent-backed iteration step
//!
//! One iteration runs the configured agent command once against the first
//! ready story, then re-reads the backlog to see what changed.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use crate::agent::stream::StreamParser;
use crate::config::AgentConfig;
use crate::domain::{IterationReport, Project, Story};
use crate::error::{LoopError, Result};
use crate::runner::{BacklogSource, IterationStep};

const DEFAULT_PROMPT: &str = "Implement the story below. When its acceptance criteria are met, \
mark it as passing in the backlog file and commit your work.";

const STDERR_TAIL_CHARS: usize = 500;

pub struct AgentStep<B: BacklogSource> {
    config: AgentConfig,
    backlog: Arc<B>,
    logs_dir: PathBuf,
    echo: bool,
}

impl<B: BacklogSource> AgentStep<B> {
    pub fn new(config: AgentConfig, backlog: Arc<B>, logs_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            backlog,
            logs_dir: logs_dir.into(),
            echo: false,
        }
    }

    /// Print the agent's progress to stdout as it streams
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    fn transcript_base(&self, project: &Project, iteration: u32) -> PathBuf {
        self.logs_dir
            .join(project.id.as_str())
            .join(format!("iteration-{:03}", iteration))
    }

    async fn render_prompt(&self, project: &Project, story: &Story, iteration: u32) -> String {
        let path = project.root.join(&self.config.prompt_file);
        let template = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(_) => {
                log::debug!("No prompt file at {}, using built-in prompt", path.display());
                DEFAULT_PROMPT.to_string()
            }
        };
        format!(
            "{}\n\n## Current story\n\n{}: {}\n\n(iteration {})\n",
            template.trim_end(),
            story.id,
            story.title,
            iteration
        )
    }

    /// Spawn the agent, feed it the prompt and stream its output.
    ///
    /// Returns the extracted text on a zero exit.
    async fn run_agent(&self, project: &Project, prompt: &str, iteration: u32) -> Result<String> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.config.command)
            .current_dir(&project.root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| LoopError::Agent(format!("failed to spawn '{}': {}", self.config.command, e)))?;

        // Fed from its own task: an agent that never reads would otherwise
        // block the write before the timeout starts.
        let stdin = child.stdin.take();
        let prompt = prompt.to_string();
        let stdin_task = tokio::spawn(async move {
            if let Some(mut stdin) = stdin {
                // An agent that exits without reading its prompt closes the pipe early.
                if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                    log::warn!("Failed to write prompt to agent stdin: {}", e);
                }
            }
        });

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LoopError::Agent("agent stdout not captured".into()))?;
        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut buf).await;
            }
            buf
        });

        let mut transcript = if self.config.save_transcripts {
            let path = self.transcript_base(project, iteration).with_extension("jsonl");
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }
            Some(fs::File::create(&path).await?)
        } else {
            None
        };

        let mut parser = StreamParser::new();
        let echo = self.echo;
        let run = async {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                if let Some(file) = transcript.as_mut() {
                    file.write_all(line.as_bytes()).await?;
                    file.write_all(b"\n").await?;
                }
                for output in parser.parse_line(&line) {
                    if echo {
                        println!("{}", output);
                    }
                }
            }
            child.wait().await
        };

        let timeout = tokio::time::Duration::from_millis(self.config.timeout_ms);
        let waited = tokio::time::timeout(timeout, run).await;
        let status = match waited {
            Ok(status) => status?,
            Err(_) => {
                stdin_task.abort();
                stderr_task.abort();
                if let Err(e) = child.kill().await {
                    log::warn!("Failed to kill timed-out agent: {}", e);
                }
                return Err(LoopError::StepFailed(format!(
                    "agent timed out after {}ms",
                    self.config.timeout_ms
                )));
            }
        };

        if let Some(mut file) = transcript {
            file.flush().await?;
        }
        let text = parser.into_text();
        if self.config.save_transcripts {
            let path = self.transcript_base(project, iteration).with_extension("log");
            fs::write(&path, &text).await?;
        }

        if !status.success() {
            let stderr = stderr_task.await.unwrap_or_default();
            let tail: String = {
                let trimmed = stderr.trim();
                let skip = trimmed.chars().count().saturating_sub(STDERR_TAIL_CHARS);
                trimmed.chars().skip(skip).collect()
            };
            let mut reason = format!("agent exited with {}", status);
            if !tail.is_empty() {
                reason.push_str(&format!(": {}", tail));
            }
            return Err(LoopError::StepFailed(reason));
        }

        Ok(text)
    }
}

#[async_trait]
impl<B: BacklogSource + 'static> IterationStep for AgentStep<B> {
    async fn run_one_iteration(&self, project: &Project, iteration: u32) -> Result<IterationReport> {
        let before = self.backlog.compute_backlog(project)?;
        if before.is_done() {
            return Ok(IterationReport {
                story_attempted: None,
                story_completed: false,
                all_work_complete: true,
            });
        }
        let story = before.next_story().cloned().ok_or_else(|| {
            LoopError::StepFailed(format!(
                "{} incomplete stories but none ready; check dependencies",
                before.incomplete_count
            ))
        })?;

        log::info!("Iteration {} for {}: {} ({})", iteration, project.id, story.id, story.title);
        let prompt = self.render_prompt(project, &story, iteration).await;
        self.run_agent(project, &prompt, iteration).await?;

        // A story that is still ready after the run did not get marked passing.
        let after = self.backlog.compute_backlog(project)?;
        let story_completed = !after.ready_stories.iter().any(|s| s.id == story.id);

        Ok(IterationReport {
            story_attempted: Some(story.id),
            story_completed,
            all_work_complete: after.is_done(),
        })
    }
}

//! Build execution
//!
//! Runs one build job's script in a child process and turns its fate into a
//! [`ResultOutcome`]: completion (pass or fail), timeout, cooperative
//! cancellation, or an infrastructure failure when the process could not be
//! started at all.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crucible_core::domain::build::BuildResult;
use crucible_core::domain::job::BuildJob;
use crucible_core::dto::job::ResultOutcome;

/// Where a running build learns that it should stop.
///
/// The production implementation polls the orchestrator's assigned-jobs
/// endpoint; tests substitute fixed answers.
#[async_trait]
pub trait CancellationSignal: Send + Sync {
    async fn is_cancelled(&self, job_id: &str) -> bool;
}

/// Executes build scripts as local child processes.
#[derive(Debug, Clone)]
pub struct BuildExecutor {
    cancellation_poll_interval: Duration,
}

impl BuildExecutor {
    pub fn new(cancellation_poll_interval: Duration) -> Self {
        Self {
            cancellation_poll_interval,
        }
    }

    /// Runs the job's build script to a terminal outcome. Never panics and
    /// never returns early without killing the child.
    pub async fn execute(&self, job: &BuildJob, cancel: &dyn CancellationSignal) -> ResultOutcome {
        info!("Executing build script for job {}", job.id);

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&job.build_config.build_script)
            .env("CRUCIBLE_JOB_ID", &job.id)
            .env("CRUCIBLE_BRANCH", &job.build_config.branch)
            .env("CRUCIBLE_DOCKER_IMAGE", &job.build_config.docker_image)
            .env(
                "CRUCIBLE_ASSIGNMENT_REPOSITORY_URI",
                &job.repository_info.assignment_repository_uri,
            )
            .env(
                "CRUCIBLE_TEST_REPOSITORY_URI",
                &job.repository_info.test_repository_uri,
            )
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(commit) = &job.build_config.commit_hash_to_build {
            command.env("CRUCIBLE_COMMIT", commit);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                warn!("Failed to spawn build script for job {}: {}", job.id, err);
                return ResultOutcome::InfraFailure {
                    reason: format!("failed to spawn build script: {err}"),
                };
            }
        };

        let log_lines = Arc::new(Mutex::new(Vec::new()));
        let stdout_reader = child.stdout.take().map(|out| {
            tokio::spawn(collect_lines(out, Arc::clone(&log_lines)))
        });
        let stderr_reader = child.stderr.take().map(|err| {
            tokio::spawn(collect_lines(err, Arc::clone(&log_lines)))
        });

        let timeout = tokio::time::sleep(build_timeout(job.build_config.timeout_seconds));
        tokio::pin!(timeout);
        let mut cancel_ticker = tokio::time::interval(self.cancellation_poll_interval);
        cancel_ticker.tick().await; // first tick fires immediately

        let outcome = loop {
            tokio::select! {
                status = child.wait() => {
                    break match status {
                        Ok(status) => {
                            debug!("Build script for job {} exited: {}", job.id, status);
                            ResultOutcome::Finished(BuildResult {
                                successful: status.success(),
                                branch: job.build_config.branch.clone(),
                                assignment_commit_hash: job
                                    .build_config
                                    .assignment_commit_hash
                                    .clone(),
                                test_commit_hash: job.build_config.test_commit_hash.clone(),
                                exit_code: status.code(),
                                error_message: None,
                                log_lines: Vec::new(),
                            })
                        }
                        Err(err) => ResultOutcome::InfraFailure {
                            reason: format!("failed to await build script: {err}"),
                        },
                    };
                }
                _ = &mut timeout => {
                    warn!("Build script for job {} timed out", job.id);
                    kill_child(&mut child, &job.id).await;
                    break ResultOutcome::TimedOut;
                }
                _ = cancel_ticker.tick() => {
                    if cancel.is_cancelled(&job.id).await {
                        info!("Cancellation requested for job {}, stopping build", job.id);
                        kill_child(&mut child, &job.id).await;
                        break ResultOutcome::Cancelled;
                    }
                }
            }
        };

        for reader in [stdout_reader, stderr_reader].into_iter().flatten() {
            let _ = reader.await;
        }

        // Attach whatever output the script produced before it ended
        match outcome {
            ResultOutcome::Finished(mut result) => {
                result.log_lines = log_lines.lock().await.drain(..).collect();
                ResultOutcome::Finished(result)
            }
            other => other,
        }
    }
}

async fn collect_lines(source: impl AsyncRead + Unpin, sink: Arc<Mutex<Vec<String>>>) {
    let mut lines = BufReader::new(source).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        sink.lock().await.push(line);
    }
}

async fn kill_child(child: &mut tokio::process::Child, job_id: &str) {
    if let Err(err) = child.kill().await {
        warn!("Failed to kill build script for job {}: {}", job_id, err);
    }
}

/// 0 means "no timeout"; a day is far enough for a build job.
fn build_timeout(timeout_seconds: u64) -> Duration {
    if timeout_seconds == 0 {
        Duration::from_secs(24 * 60 * 60)
    } else {
        Duration::from_secs(timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crucible_core::domain::build::{BuildConfig, RepositoryInfo, RepositoryType};
    use crucible_core::domain::job::{JobTimingInfo, PRIORITY_NORMAL};

    struct NeverCancelled;

    #[async_trait]
    impl CancellationSignal for NeverCancelled {
        async fn is_cancelled(&self, _job_id: &str) -> bool {
            false
        }
    }

    struct AlwaysCancelled;

    #[async_trait]
    impl CancellationSignal for AlwaysCancelled {
        async fn is_cancelled(&self, _job_id: &str) -> bool {
            true
        }
    }

    fn job_with_script(script: &str, timeout_seconds: u64) -> BuildJob {
        BuildJob {
            id: "job-1".to_string(),
            name: "build".to_string(),
            participation_id: 1,
            course_id: 1,
            exercise_id: 1,
            retry_count: 0,
            priority: PRIORITY_NORMAL,
            status: None,
            build_agent: None,
            repository_info: RepositoryInfo {
                repository_name: "exercise".to_string(),
                repository_type: RepositoryType::User,
                triggered_by_push_to: RepositoryType::User,
                assignment_repository_uri: "http://git/assignment.git".to_string(),
                test_repository_uri: "http://git/tests.git".to_string(),
                solution_repository_uri: None,
                auxiliary_repository_uris: vec![],
                auxiliary_checkout_directories: vec![],
            },
            timing: JobTimingInfo::queued(Utc::now(), 10),
            build_config: BuildConfig {
                build_script: script.to_string(),
                docker_image: "busybox".to_string(),
                commit_hash_to_build: None,
                assignment_commit_hash: None,
                test_commit_hash: None,
                branch: "main".to_string(),
                programming_language: None,
                project_type: None,
                timeout_seconds,
                assignment_checkout_path: None,
                test_checkout_path: None,
                solution_checkout_path: None,
                result_paths: vec![],
                docker_flags: vec![],
            },
        }
    }

    #[tokio::test]
    async fn test_successful_script_captures_output() {
        let executor = BuildExecutor::new(Duration::from_millis(100));
        let outcome = executor
            .execute(&job_with_script("echo compiling; echo done", 30), &NeverCancelled)
            .await;

        match outcome {
            ResultOutcome::Finished(result) => {
                assert!(result.successful);
                assert_eq!(result.exit_code, Some(0));
                assert_eq!(result.log_lines, vec!["compiling", "done"]);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failing_script_reports_exit_code() {
        let executor = BuildExecutor::new(Duration::from_millis(100));
        let outcome = executor
            .execute(&job_with_script("exit 3", 30), &NeverCancelled)
            .await;

        match outcome {
            ResultOutcome::Finished(result) => {
                assert!(!result.successful);
                assert_eq!(result.exit_code, Some(3));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_script() {
        let executor = BuildExecutor::new(Duration::from_millis(100));
        let outcome = executor
            .execute(&job_with_script("sleep 30", 1), &NeverCancelled)
            .await;
        assert_eq!(outcome, ResultOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_cancellation_stops_script() {
        let executor = BuildExecutor::new(Duration::from_millis(50));
        let outcome = executor
            .execute(&job_with_script("sleep 30", 60), &AlwaysCancelled)
            .await;
        assert_eq!(outcome, ResultOutcome::Cancelled);
    }
}

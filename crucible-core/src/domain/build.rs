//! Build recipe and repository description types.
//!
//! These are fixed at submission time and never change for the life of a job.

use serde::{Deserialize, Serialize};

/// Which repository a URI or trigger refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepositoryType {
    User,
    Template,
    Solution,
    Tests,
    Auxiliary,
}

/// Static description of the repositories a build job has to check out,
/// plus which repository push triggered the job.
///
/// Immutable for the life of the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub repository_name: String,
    pub repository_type: RepositoryType,
    pub triggered_by_push_to: RepositoryType,
    pub assignment_repository_uri: String,
    pub test_repository_uri: String,
    pub solution_repository_uri: Option<String>,
    pub auxiliary_repository_uris: Vec<String>,
    pub auxiliary_checkout_directories: Vec<String>,
}

/// Build recipe: script, container image, commits to check out and where,
/// timeout and result collection.
///
/// Immutable for the life of the job. The container image is normalized
/// (trimmed) via [`BuildConfig::normalized`] before the job enters the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildConfig {
    pub build_script: String,
    pub docker_image: String,
    pub commit_hash_to_build: Option<String>,
    pub assignment_commit_hash: Option<String>,
    pub test_commit_hash: Option<String>,
    pub branch: String,
    pub programming_language: Option<String>,
    pub project_type: Option<String>,
    pub timeout_seconds: u64,
    pub assignment_checkout_path: Option<String>,
    pub test_checkout_path: Option<String>,
    pub solution_checkout_path: Option<String>,
    pub result_paths: Vec<String>,
    pub docker_flags: Vec<String>,
}

impl BuildConfig {
    /// Returns the config with the docker image trimmed of incidental whitespace.
    ///
    /// Image names copied out of exercise configuration regularly carry
    /// leading/trailing whitespace, which the container runtime rejects.
    pub fn normalized(mut self) -> Self {
        self.docker_image = self.docker_image.trim().to_string();
        self
    }
}

/// Result of one build execution, reported by the agent that ran it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildResult {
    pub successful: bool,
    pub branch: String,
    pub assignment_commit_hash: Option<String>,
    pub test_commit_hash: Option<String>,
    pub exit_code: Option<i32>,
    pub error_message: Option<String>,
    pub log_lines: Vec<String>,
}

impl BuildResult {
    /// Creates a failed result carrying only an error message.
    pub fn failed(branch: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            successful: false,
            branch: branch.into(),
            assignment_commit_hash: None,
            test_commit_hash: None,
            exit_code: None,
            error_message: Some(error_message.into()),
            log_lines: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(image: &str) -> BuildConfig {
        BuildConfig {
            build_script: "./gradlew test".to_string(),
            docker_image: image.to_string(),
            commit_hash_to_build: None,
            assignment_commit_hash: None,
            test_commit_hash: None,
            branch: "main".to_string(),
            programming_language: Some("java".to_string()),
            project_type: None,
            timeout_seconds: 120,
            assignment_checkout_path: None,
            test_checkout_path: None,
            solution_checkout_path: None,
            result_paths: vec!["build/test-results/test/*.xml".to_string()],
            docker_flags: vec![],
        }
    }

    #[test]
    fn test_normalized_trims_docker_image() {
        let config = config("  ls1tum/artemis-maven-template:java17 \n").normalized();
        assert_eq!(config.docker_image, "ls1tum/artemis-maven-template:java17");
    }

    #[test]
    fn test_normalized_keeps_clean_image() {
        let config = config("eclipse-temurin:21").normalized();
        assert_eq!(config.docker_image, "eclipse-temurin:21");
    }
}

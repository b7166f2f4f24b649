//! Shared fixtures for the orchestrator test suites.

use chrono::{DateTime, Utc};

use crucible_core::domain::agent::{AgentInfo, AgentRef, AgentStats, AgentStatus};
use crucible_core::domain::build::{BuildConfig, RepositoryInfo, RepositoryType};
use crucible_core::domain::job::{BuildJob, JobTimingInfo};

pub fn make_job(id: &str, priority: i32, submission_date: DateTime<Utc>) -> BuildJob {
    BuildJob {
        id: id.to_string(),
        name: format!("build-{id}"),
        participation_id: 100,
        course_id: 1,
        exercise_id: 2,
        retry_count: 0,
        priority,
        status: None,
        build_agent: None,
        repository_info: RepositoryInfo {
            repository_name: format!("exercise-{id}"),
            repository_type: RepositoryType::User,
            triggered_by_push_to: RepositoryType::User,
            assignment_repository_uri: "http://git/assignment.git".to_string(),
            test_repository_uri: "http://git/tests.git".to_string(),
            solution_repository_uri: None,
            auxiliary_repository_uris: vec![],
            auxiliary_checkout_directories: vec![],
        },
        timing: JobTimingInfo::queued(submission_date, 30),
        build_config: BuildConfig {
            build_script: "./gradlew test".to_string(),
            docker_image: "eclipse-temurin:21".to_string(),
            commit_hash_to_build: Some(format!("hash-{id}")),
            assignment_commit_hash: None,
            test_commit_hash: None,
            branch: "main".to_string(),
            programming_language: Some("java".to_string()),
            project_type: None,
            timeout_seconds: 120,
            assignment_checkout_path: None,
            test_checkout_path: None,
            solution_checkout_path: None,
            result_paths: vec![],
            docker_flags: vec![],
        },
    }
}

pub fn make_agent(name: &str, capacity: u32, heartbeat_at: DateTime<Utc>) -> AgentInfo {
    AgentInfo {
        agent: AgentRef {
            name: name.to_string(),
            member_address: format!("10.0.0.1:{}", 7000 + capacity),
            display_name: name.to_string(),
        },
        max_concurrent_builds: capacity,
        current_builds: 0,
        status: AgentStatus::Active,
        public_key_fingerprint: None,
        pause_after_consecutive_failures: 0,
        consecutive_failures: 0,
        stats: AgentStats::new(heartbeat_at, None),
        registered_at: heartbeat_at,
        last_heartbeat_at: heartbeat_at,
    }
}

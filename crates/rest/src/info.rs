//! Parsing of job info documents.

use ce::json::{as_i64, as_u64, one_or_many};
use ce::{ArcError, JobInfo, JobState, Timestamp};
use serde_json::Value;

/// Prefix of the state reported in the CE's own REST state model. The
/// `State` list also carries states of other models (e.g. `emies:`).
const STATE_PREFIX: &str = "arcrest:";

/// Parses the `info_document` of one job.
///
/// Unknown keys are ignored. A present but malformed number or timestamp is a
/// protocol error.
pub fn parse_job_info(document: &Value) -> Result<JobInfo, ArcError> {
    let Some(activity) = document.get("ComputingActivity") else {
        return Ok(JobInfo::default());
    };

    let string = |key: &str| activity.get(key).and_then(Value::as_str).map(str::to_string);
    let unsigned = |key: &str| -> Result<Option<u64>, ArcError> {
        activity
            .get(key)
            .map(|v| as_u64(v).ok_or_else(|| malformed(key, v)))
            .transpose()
    };
    let timestamp = |key: &str| -> Result<Option<Timestamp>, ArcError> {
        activity
            .get(key)
            .map(|v| v.as_str().and_then(Timestamp::parse_wire).ok_or_else(|| malformed(key, v)))
            .transpose()
    };
    let strings = |key: &str| -> Vec<String> {
        activity
            .get(key)
            .map(one_or_many)
            .unwrap_or_default()
            .into_iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    };
    let arcrest_state = |key: &str| -> Option<JobState> {
        strings(key)
            .iter()
            .filter_map(|s| s.strip_prefix(STATE_PREFIX))
            .last()
            .map(JobState::parse)
    };

    let exit_code = activity
        .get("ExitCode")
        .map(|v| as_i64(v).ok_or_else(|| malformed("ExitCode", v)))
        .transpose()?;

    Ok(JobInfo {
        name: string("Name"),
        job_type: string("Type"),
        local_id: string("LocalIDFromManager"),
        owner: string("Owner"),
        local_owner: string("LocalOwner"),
        stdin: string("StdIn"),
        stdout: string("StdOut"),
        stderr: string("StdErr"),
        log_dir: string("LogDir"),
        queue: string("Queue"),

        used_total_walltime: unsigned("UsedTotalWallTime")?,
        used_total_cputime: unsigned("UsedTotalCPUTime")?,
        requested_total_walltime: unsigned("RequestedTotalWallTime")?,
        requested_total_cputime: unsigned("RequestedTotalCPUTime")?,
        requested_slots: unsigned("RequestedSlots")?,
        exit_code,
        waiting_position: unsigned("WaitingPosition")?,
        used_main_memory: unsigned("UsedMainMemory")?,

        submission_time: timestamp("SubmissionTime")?,
        end_time: timestamp("EndTime")?,
        working_area_erase_time: timestamp("WorkingAreaEraseTime")?,
        proxy_expiration_time: timestamp("ProxyExpirationTime")?,

        errors: strings("Error"),
        execution_nodes: strings("ExecutionNode")
            .into_iter()
            .map(|node| node.chars().filter(char::is_ascii).collect())
            .collect(),

        state: arcrest_state("State"),
        restart_state: arcrest_state("RestartState"),
    })
}

fn malformed(key: &str, value: &Value) -> ArcError {
    ArcError::protocol(format!("malformed {key} in job info: {value}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn full_document_is_parsed() {
        let doc = json!({"ComputingActivity": {
            "Name": "test job",
            "Owner": "/DC=org/CN=user",
            "Queue": "grid",
            "UsedTotalWallTime": "120",
            "ExitCode": "0",
            "SubmissionTime": "2023-05-01T12:30:00Z",
            "Error": "Job failed",
            "ExecutionNode": ["wn01.example.org", "wn\u{00e9}02"],
            "State": ["emies:terminal", "arcrest:FINISHED"],
            "RestartState": "arcrest:RUNNING",
            "Unknown": "ignored"
        }});
        let info = parse_job_info(&doc).unwrap();
        assert_eq!(info.name.as_deref(), Some("test job"));
        assert_eq!(info.queue.as_deref(), Some("grid"));
        assert_eq!(info.used_total_walltime, Some(120));
        assert_eq!(info.exit_code, Some(0));
        assert_eq!(info.submission_time.unwrap().to_string(), "2023-05-01T12:30:00Z");
        assert_eq!(info.errors, vec!["Job failed"]);
        assert_eq!(info.execution_nodes, vec!["wn01.example.org", "wn02"]);
        assert_eq!(info.state, Some(JobState::Finished));
        assert_eq!(info.restart_state, Some(JobState::Running));
    }

    #[test]
    fn missing_activity_is_empty_info() {
        assert_eq!(parse_job_info(&json!({})).unwrap(), JobInfo::default());
    }

    #[test]
    fn malformed_values_are_protocol_errors() {
        let doc = json!({"ComputingActivity": {"UsedTotalCPUTime": "lots"}});
        assert!(matches!(parse_job_info(&doc), Err(ArcError::Protocol { .. })));

        let doc = json!({"ComputingActivity": {"EndTime": "tomorrow"}});
        assert!(matches!(parse_job_info(&doc), Err(ArcError::Protocol { .. })));
    }
}

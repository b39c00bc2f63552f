//! Pre-submission matchmaking against the CE capability document.
//!
//! The capability document is the GLUE2-shaped JSON returned by the CE's
//! `info` endpoint. Queues are `ComputingShare` entries; runtime environments
//! are `ApplicationEnvironment` entries of the `ComputingManager`.
//!
//! All functions here are pure. [`match_job`] runs every applicable check and
//! returns the full set of violations.

use serde_json::Value;

use crate::json::{as_u64, one_or_many, path};
use crate::MatchmakingError;

const SERVICE_PATH: [&str; 4] = ["Domains", "AdminDomain", "Services", "ComputingService"];

/// Finds the share describing `queue`.
///
/// A share carrying `MappingPolicy` is mapped onto another share and is never
/// a queue externally, so a name match on it yields `None`.
pub fn find_queue<'a>(ce_info: &'a Value, queue: &str) -> Option<&'a Value> {
    let shares = path(ce_info, &SERVICE_PATH)?.get("ComputingShare")?;
    let share = one_or_many(shares)
        .into_iter()
        .find(|share| share.get("Name").and_then(Value::as_str) == Some(queue))?;
    if share.get("MappingPolicy").is_some() {
        None
    } else {
        Some(share)
    }
}

/// Lists advertised runtime environments as `name` or `name-version`.
pub fn find_runtimes(ce_info: &Value) -> Vec<String> {
    let Some(envs) = path(ce_info, &SERVICE_PATH).and_then(|service| {
        path(
            service,
            &["ComputingManager", "ApplicationEnvironments", "ApplicationEnvironment"],
        )
    }) else {
        return Vec::new();
    };

    one_or_many(envs)
        .into_iter()
        .filter_map(|env| {
            let name = env.get("AppName").and_then(Value::as_str)?;
            Some(match env.get("AppVersion").and_then(Value::as_str) {
                Some(version) => format!("{name}-{version}"),
                None => name.to_string(),
            })
        })
        .collect()
}

pub fn match_queue(ce_info: &Value, queue: &str) -> Result<(), MatchmakingError> {
    find_queue(ce_info, queue)
        .map(|_| ())
        .ok_or_else(|| MatchmakingError::QueueNotFound {
            queue: queue.to_string(),
        })
}

/// Checks `walltime` (seconds) against the queue's `MaxWallTime`.
///
/// A queue without a maximum accepts any walltime. A maximum that is present
/// but not a number of seconds is itself a violation.
pub fn match_walltime(ce_info: &Value, queue: &str, walltime: u64) -> Result<(), MatchmakingError> {
    let share = find_queue(ce_info, queue).ok_or_else(|| MatchmakingError::WalltimeQueueNotFound {
        queue: queue.to_string(),
    })?;
    let Some(raw) = share.get("MaxWallTime").filter(|v| !v.is_null()) else {
        return Ok(());
    };
    let max = seconds(raw).ok_or_else(|| MatchmakingError::InvalidMaxWalltime {
        queue: queue.to_string(),
        value: raw.as_str().map_or_else(|| raw.to_string(), str::to_string),
    })?;
    if walltime > max {
        return Err(MatchmakingError::WalltimeExceeded {
            queue: queue.to_string(),
            requested: walltime,
            max,
        });
    }
    Ok(())
}

/// Whole seconds from an integer or a non-negative decimal like `3600.0`.
fn seconds(raw: &Value) -> Option<u64> {
    as_u64(raw).or_else(|| {
        let value = match raw {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }?;
        (value.is_finite() && value >= 0.0).then(|| value as u64)
    })
}

pub fn match_runtime(ce_info: &Value, runtime: &str) -> Result<(), MatchmakingError> {
    if find_runtimes(ce_info).iter().any(|r| r == runtime) {
        Ok(())
    } else {
        Err(MatchmakingError::RuntimeNotFound {
            runtime: runtime.to_string(),
        })
    }
}

/// Runs every applicable check and returns all violations.
///
/// Walltime is only checked when a queue is named, and is skipped when the
/// queue itself does not match (the queue violation already covers it).
pub fn match_job(
    ce_info: &Value,
    queue: Option<&str>,
    runtimes: &[String],
    walltime: Option<u64>,
) -> Vec<MatchmakingError> {
    let mut errors = Vec::new();

    if let Some(queue) = queue {
        match match_queue(ce_info, queue) {
            Err(e) => errors.push(e),
            Ok(()) => {
                if let Some(walltime) = walltime {
                    if let Err(e) = match_walltime(ce_info, queue, walltime) {
                        errors.push(e);
                    }
                }
            }
        }
    }

    errors.extend(
        runtimes
            .iter()
            .filter_map(|runtime| match_runtime(ce_info, runtime).err()),
    );

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ce_info(shares: Value, envs: Value) -> Value {
        json!({
            "Domains": {"AdminDomain": {"Services": {"ComputingService": {
                "ComputingShare": shares,
                "ComputingManager": {
                    "ApplicationEnvironments": {"ApplicationEnvironment": envs}
                }
            }}}}
        })
    }

    fn default_info() -> Value {
        ce_info(
            json!([
                {"Name": "Q", "MaxWallTime": "3600"},
                {"Name": "unbounded"},
                {"Name": "mapped", "MappingPolicy": {"Rule": "vo:atlas"}}
            ]),
            json!([
                {"AppName": "ENV/PROXY"},
                {"AppName": "PYTHON", "AppVersion": "3.11"}
            ]),
        )
    }

    #[test]
    fn walltime_over_maximum_is_the_only_violation() {
        let errors = match_job(&default_info(), Some("Q"), &[], Some(7200));
        assert_eq!(
            errors,
            vec![MatchmakingError::WalltimeExceeded {
                queue: "Q".into(),
                requested: 7200,
                max: 3600
            }]
        );
    }

    #[test]
    fn unknown_queue_skips_walltime_check() {
        let errors = match_job(&default_info(), Some("R"), &[], Some(7200));
        assert_eq!(errors, vec![MatchmakingError::QueueNotFound { queue: "R".into() }]);
    }

    #[test]
    fn mapped_share_is_never_a_queue() {
        assert!(find_queue(&default_info(), "mapped").is_none());
        let errors = match_job(&default_info(), Some("mapped"), &[], None);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn missing_maximum_is_unbounded() {
        assert!(match_job(&default_info(), Some("unbounded"), &[], Some(u64::MAX)).is_empty());
    }

    #[test]
    fn decimal_maximum_is_read_as_whole_seconds() {
        let info = ce_info(json!({"Name": "Q", "MaxWallTime": "3600.0"}), json!([]));
        assert!(match_walltime(&info, "Q", 3600).is_ok());
        assert_eq!(
            match_walltime(&info, "Q", 3601),
            Err(MatchmakingError::WalltimeExceeded {
                queue: "Q".into(),
                requested: 3601,
                max: 3600
            })
        );
    }

    #[test]
    fn unreadable_maximum_is_a_violation() {
        for raw in [json!("abc"), json!(-5), json!({"value": 1})] {
            let info = ce_info(json!({"Name": "Q", "MaxWallTime": raw.clone()}), json!([]));
            let errors = match_job(&info, Some("Q"), &[], Some(60));
            assert!(
                matches!(&errors[..], [MatchmakingError::InvalidMaxWalltime { queue, .. }] if queue == "Q"),
                "{raw} accepted"
            );
        }
        let info = ce_info(json!({"Name": "Q", "MaxWallTime": "abc"}), json!([]));
        assert_eq!(
            match_walltime(&info, "Q", 60).unwrap_err().to_string(),
            "Queue Q advertises unreadable max walltime \"abc\""
        );
    }

    #[test]
    fn walltime_without_queue_is_not_checked() {
        assert!(match_job(&default_info(), None, &[], Some(99999)).is_empty());
    }

    #[test]
    fn every_violation_is_reported() {
        let runtimes = vec![
            "ENV/PROXY".to_string(),
            "PYTHON-3.11".to_string(),
            "PYTHON-2.7".to_string(),
            "ROOT".to_string(),
        ];
        let errors = match_job(&default_info(), Some("Q"), &runtimes, Some(7200));
        assert_eq!(errors.len(), 3);
        assert!(matches!(errors[0], MatchmakingError::WalltimeExceeded { .. }));
        assert_eq!(
            errors[1],
            MatchmakingError::RuntimeNotFound {
                runtime: "PYTHON-2.7".into()
            }
        );
    }

    #[test]
    fn singleton_and_single_element_array_match_identically() {
        let single = ce_info(
            json!({"Name": "Q", "MaxWallTime": 3600}),
            json!({"AppName": "ENV/PROXY"}),
        );
        let array = ce_info(
            json!([{"Name": "Q", "MaxWallTime": 3600}]),
            json!([{"AppName": "ENV/PROXY"}]),
        );
        let runtimes = vec!["ENV/PROXY".to_string(), "ROOT".to_string()];
        for (queue, walltime) in [("Q", 60), ("Q", 7200), ("R", 60)] {
            assert_eq!(
                match_job(&single, Some(queue), &runtimes, Some(walltime)),
                match_job(&array, Some(queue), &runtimes, Some(walltime)),
            );
        }
    }

    #[test]
    fn empty_document_matches_nothing() {
        let info = json!({});
        assert!(find_queue(&info, "Q").is_none());
        assert!(find_runtimes(&info).is_empty());
    }
}

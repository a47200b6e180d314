//! Container-label contract: `HUMPBACK_*` keys recognized on create, parsed
//! into a `JobTask` at admission time.
//!
//! Grounded in the teacher's `environment/docker/container.rs` label-reading
//! idiom (scanning a `HashMap<String, String>` pulled off the inspect
//! response), retargeted from Wings' egg/variable labels to spec.md §6's
//! closed `HUMPBACK_*` key set.

use std::collections::HashMap;
use std::time::Duration;

use tracing::warn;

pub const JOB_RULES: &str = "HUMPBACK_JOB_RULES";
pub const JOB_ALWAYS_PULL: &str = "HUMPBACK_JOB_ALWAYS_PULL";
pub const JOB_MAX_TIMEOUT: &str = "HUMPBACK_JOB_MAX_TIMEOUT";
pub const JOB_IMAGE_AUTH: &str = "HUMPBACK_JOB_IMAGE_AUTH";
pub const SERVICE_ID: &str = "HUMPBACK_SERVICE_ID";
pub const GROUP_ID: &str = "HUMPBACK_GROUP_ID";
pub const SERVICE_NAME: &str = "HUMPBACK_SERVICE_NAME";

/// The literal value that disables auto-admission despite a present rules
/// label.
const MANUAL: &str = "Manual";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Everything derivable from a container's labels at admission time, prior
/// to being wrapped into a `JobTask` with the container's id/name/image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobLabels {
    pub rule_string: String,
    pub always_pull: bool,
    pub timeout: Duration,
    pub registry_auth_blob: Option<String>,
}

/// Returns `None` if the container is not a job container: the rules label
/// is absent, empty, or the literal `"Manual"`.
pub fn parse_job_labels(labels: &HashMap<String, String>) -> Option<JobLabels> {
    let rule_string = labels.get(JOB_RULES)?.trim();
    if rule_string.is_empty() || rule_string == MANUAL {
        return None;
    }

    let always_pull = labels
        .get(JOB_ALWAYS_PULL)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let timeout = labels
        .get(JOB_MAX_TIMEOUT)
        .and_then(|raw| match humantime_duration(raw) {
            Ok(d) => Some(d),
            Err(_) => {
                warn!(value = raw, "malformed {JOB_MAX_TIMEOUT}, falling back to default timeout");
                None
            }
        })
        .unwrap_or(DEFAULT_TIMEOUT);

    let registry_auth_blob = labels.get(JOB_IMAGE_AUTH).filter(|s| !s.is_empty()).cloned();

    Some(JobLabels { rule_string: rule_string.to_string(), always_pull, timeout, registry_auth_blob })
}

/// Minimal duration-string parser covering the spec's examples (`"30s"`,
/// `"5m"`, `"2h"`) without pulling in a dedicated crate for three suffixes.
fn humantime_duration(raw: &str) -> Result<Duration, ()> {
    let raw = raw.trim();
    let (number, suffix) = raw.split_at(raw.len().saturating_sub(1));
    let value: u64 = number.parse().map_err(|_| ())?;
    match suffix {
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        _ => Err(()),
    }
}

/// Pass-through identity labels, opaque to the agent beyond forwarding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityLabels {
    pub service_id: Option<String>,
    pub group_id: Option<String>,
    pub service_name: Option<String>,
}

pub fn parse_identity_labels(labels: &HashMap<String, String>) -> IdentityLabels {
    IdentityLabels {
        service_id: labels.get(SERVICE_ID).cloned(),
        group_id: labels.get(GROUP_ID).cloned(),
        service_name: labels.get(SERVICE_NAME).cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn absent_rules_label_is_not_a_job() {
        assert!(parse_job_labels(&labels(&[])).is_none());
    }

    #[test]
    fn manual_literal_disables_admission() {
        let l = labels(&[(JOB_RULES, "Manual")]);
        assert!(parse_job_labels(&l).is_none());
    }

    #[test]
    fn parses_rule_string_and_defaults() {
        let l = labels(&[(JOB_RULES, "* * * * *")]);
        let job = parse_job_labels(&l).unwrap();
        assert_eq!(job.rule_string, "* * * * *");
        assert!(!job.always_pull);
        assert_eq!(job.timeout, DEFAULT_TIMEOUT);
        assert!(job.registry_auth_blob.is_none());
    }

    #[test]
    fn parses_always_pull_and_timeout() {
        let l = labels(&[
            (JOB_RULES, "* * * * *"),
            (JOB_ALWAYS_PULL, "true"),
            (JOB_MAX_TIMEOUT, "2s"),
        ]);
        let job = parse_job_labels(&l).unwrap();
        assert!(job.always_pull);
        assert_eq!(job.timeout, Duration::from_secs(2));
    }

    #[test]
    fn malformed_timeout_falls_back_to_default() {
        let l = labels(&[(JOB_RULES, "* * * * *"), (JOB_MAX_TIMEOUT, "nonsense")]);
        let job = parse_job_labels(&l).unwrap();
        assert_eq!(job.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn identity_labels_pass_through() {
        let l = labels(&[(SERVICE_ID, "svc-1"), (GROUP_ID, "grp-1"), (SERVICE_NAME, "web")]);
        let identity = parse_identity_labels(&l);
        assert_eq!(identity.service_id.as_deref(), Some("svc-1"));
        assert_eq!(identity.group_id.as_deref(), Some("grp-1"));
        assert_eq!(identity.service_name.as_deref(), Some("web"));
    }
}

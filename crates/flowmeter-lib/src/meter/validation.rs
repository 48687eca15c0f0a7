//! Write-time checks for meter policies

use crate::error::{ConsoleError, ConsoleResult};
use crate::models::{ActivationPeriod, MeterPolicy, MeterPolicyDraft};
use std::net::IpAddr;

/// Field-level checks on a create/update payload
pub fn validate_draft(draft: &MeterPolicyDraft) -> ConsoleResult<()> {
    if draft.controller.trim().is_empty() {
        return Err(ConsoleError::validation("controller is required"));
    }
    if draft.switch_id.trim().is_empty() {
        return Err(ConsoleError::validation("switch_id is required"));
    }
    if draft.rate_kbps == 0 {
        return Err(ConsoleError::validation("rate_kbps must be greater than 0"));
    }
    if draft.meter_id == Some(0) {
        return Err(ConsoleError::validation("meter_id must be greater than 0"));
    }
    if draft.categories.is_empty() {
        return Err(ConsoleError::validation("at least one category is required"));
    }
    if draft.categories.iter().any(|c| c.trim().is_empty()) {
        return Err(ConsoleError::validation("category names must not be empty"));
    }
    if matches!(&draft.client, Some(c) if c.trim().is_empty()) {
        return Err(ConsoleError::validation("client must not be empty when set"));
    }

    match (draft.start_time, draft.end_time) {
        (Some(start), Some(end)) if start >= end => Err(ConsoleError::validation(format!(
            "start_time {} must be before end_time {}",
            start, end
        ))),
        (Some(_), None) | (None, Some(_)) => Err(ConsoleError::validation(
            "start_time and end_time must be set together",
        )),
        _ => Ok(()),
    }
}

/// Canonical client identity: IPs in their shortest textual form, anything
/// else (MACs) lowercased
pub fn normalize_client(client: &str) -> String {
    let client = client.trim();
    match client.parse::<IpAddr>() {
        Ok(ip) => ip.to_string(),
        Err(_) => client.to_ascii_lowercase(),
    }
}

fn same_client(a: &Option<String>, b: &Option<String>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => normalize_client(a) == normalize_client(b),
        (None, None) => true,
        _ => false,
    }
}

/// ALL_WEEK exclusivity: per controller, switch, category and client scope
/// at most one ALL_WEEK policy, and never alongside WEEKDAY or WEEKEND.
/// `candidate` is ignored in `existing` when ids match (updates).
pub fn check_exclusivity<'a>(
    existing: impl IntoIterator<Item = &'a MeterPolicy>,
    candidate: &MeterPolicy,
) -> ConsoleResult<()> {
    for other in existing {
        if other.id == candidate.id
            || other.controller != candidate.controller
            || other.switch_id != candidate.switch_id
            || !same_client(&other.client, &candidate.client)
        {
            continue;
        }
        if candidate.activation_period != ActivationPeriod::AllWeek
            && other.activation_period != ActivationPeriod::AllWeek
        {
            continue;
        }
        if let Some(category) = candidate.categories.intersection(&other.categories).next() {
            return Err(ConsoleError::conflict(format!(
                "category {} on {}/{} already has a {:?} policy (meter {}); ALL_WEEK cannot share a category with another period",
                category, candidate.controller, candidate.switch_id, other.activation_period, other.meter_id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use std::collections::BTreeSet;

    fn draft() -> MeterPolicyDraft {
        MeterPolicyDraft {
            controller: "10.0.0.5".into(),
            switch_id: "openflow:1".into(),
            meter_id: None,
            rate_kbps: 1000,
            burst_size: None,
            categories: BTreeSet::from(["Netflix".to_string()]),
            client: None,
            activation_period: ActivationPeriod::Weekday,
            start_time: None,
            end_time: None,
        }
    }

    #[test]
    fn test_valid_draft() {
        assert!(validate_draft(&draft()).is_ok());
    }

    #[test]
    fn test_window_rules() {
        let mut d = draft();
        d.start_time = NaiveTime::from_hms_opt(9, 0, 0);
        assert!(validate_draft(&d).is_err());

        d.end_time = NaiveTime::from_hms_opt(9, 0, 0);
        assert!(validate_draft(&d).is_err());

        d.end_time = NaiveTime::from_hms_opt(17, 0, 0);
        assert!(validate_draft(&d).is_ok());
    }

    #[test]
    fn test_field_rules() {
        let mut d = draft();
        d.rate_kbps = 0;
        assert!(validate_draft(&d).is_err());

        let mut d = draft();
        d.categories.clear();
        assert!(validate_draft(&d).is_err());

        let mut d = draft();
        d.meter_id = Some(0);
        assert!(validate_draft(&d).is_err());
    }

    #[test]
    fn test_normalize_client() {
        assert_eq!(normalize_client(" AA:BB:CC:DD:EE:01 "), "aa:bb:cc:dd:ee:01");
        assert_eq!(normalize_client("10.0.0.7"), "10.0.0.7");
        assert_eq!(normalize_client("2001:DB8:0:0::1"), "2001:db8::1");
    }
}

//! Policy selection for a classified flow

use super::period::is_active_at;
use crate::models::MeterPolicy;
use chrono::NaiveDateTime;

/// Who and where a flow is being metered
#[derive(Debug, Clone)]
pub struct SelectionKey<'a> {
    pub controller: &'a str,
    pub switch_id: &'a str,
    pub category: &'a str,
    /// Identities of the client device (IP, MAC); a policy scoped to a
    /// client matches if its client equals any of them
    pub client_ids: &'a [String],
}

/// Active policy for a flow, if any.
///
/// Candidates cover the category and either the client or no client.
/// Client-scoped policies are preferred, then lower meter ids. The first
/// candidate active at `at` wins.
pub fn select<'p>(
    policies: impl IntoIterator<Item = &'p MeterPolicy>,
    key: &SelectionKey<'_>,
    at: NaiveDateTime,
) -> Option<&'p MeterPolicy> {
    let mut candidates: Vec<&MeterPolicy> = policies
        .into_iter()
        .filter(|p| {
            p.controller == key.controller
                && p.switch_id == key.switch_id
                && p.categories.contains(key.category)
                && p.client.as_ref().map_or(true, |c| {
                    key.client_ids.iter().any(|id| id.eq_ignore_ascii_case(c))
                })
        })
        .collect();

    candidates.sort_by_key(|p| (p.client.is_none(), p.meter_id));
    candidates.into_iter().find(|p| is_active_at(p, at))
}

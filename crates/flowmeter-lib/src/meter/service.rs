//! Meter policy CRUD with controller synchronization

use super::repository::MeterRepository;
use super::selector::{select, SelectionKey};
use super::validation::{check_exclusivity, normalize_client, validate_draft};
use crate::controller::{meter_payload, ControllerApi};
use crate::error::{ConsoleError, ConsoleResult};
use crate::models::{MeterPolicy, MeterPolicyDraft};
use crate::observability::ConsoleMetrics;
use chrono::NaiveDateTime;
use std::sync::Arc;
use tracing::{info, warn};

pub struct MeterService {
    repository: MeterRepository,
    controller: Arc<dyn ControllerApi>,
    metrics: ConsoleMetrics,
}

impl MeterService {
    pub fn new(
        repository: MeterRepository,
        controller: Arc<dyn ControllerApi>,
        metrics: ConsoleMetrics,
    ) -> Self {
        Self {
            repository,
            controller,
            metrics,
        }
    }

    pub async fn list(&self) -> Vec<MeterPolicy> {
        self.repository.list()
    }

    pub async fn get(&self, id: u64) -> ConsoleResult<MeterPolicy> {
        self.repository
            .get(id)
            .ok_or_else(|| ConsoleError::not_found(format!("meter policy {}", id)))
    }

    /// Validate, allocate a meter id, push the meter and store the policy.
    /// Nothing is stored when the controller rejects the meter.
    pub async fn create(&self, draft: MeterPolicyDraft) -> ConsoleResult<MeterPolicy> {
        validate_draft(&draft)?;
        let mut txn = self.repository.begin().await;

        let meter_id = match draft.meter_id {
            Some(id) => id,
            None => txn.next_meter_id(&draft.controller, &draft.switch_id)?,
        };
        if let Some(existing) = txn.find_meter(&draft.controller, &draft.switch_id, meter_id) {
            return Err(ConsoleError::conflict(format!(
                "meter {} on {}/{} is used by policy {}",
                meter_id, draft.controller, draft.switch_id, existing.id
            )));
        }

        let policy = into_policy(draft, txn.next_record_id(), meter_id);
        check_exclusivity(txn.policies(), &policy)?;

        self.push_meter(&policy, "create").await?;
        txn.put(policy.clone());
        txn.commit()?;

        info!(
            id = policy.id,
            controller = %policy.controller,
            switch_id = %policy.switch_id,
            meter_id = policy.meter_id,
            "Meter policy created"
        );
        Ok(policy)
    }

    /// Replace a policy, re-validating and re-pushing its meter
    pub async fn update(&self, id: u64, draft: MeterPolicyDraft) -> ConsoleResult<MeterPolicy> {
        validate_draft(&draft)?;
        let mut txn = self.repository.begin().await;
        let previous = txn.get(id)?;

        let same_switch =
            previous.controller == draft.controller && previous.switch_id == draft.switch_id;
        let meter_id = match draft.meter_id {
            Some(meter_id) => meter_id,
            None if same_switch => previous.meter_id,
            None => txn.next_meter_id(&draft.controller, &draft.switch_id)?,
        };
        if let Some(existing) = txn
            .find_meter(&draft.controller, &draft.switch_id, meter_id)
            .filter(|p| p.id != id)
        {
            return Err(ConsoleError::conflict(format!(
                "meter {} on {}/{} is used by policy {}",
                meter_id, draft.controller, draft.switch_id, existing.id
            )));
        }

        let policy = into_policy(draft, id, meter_id);
        check_exclusivity(txn.policies(), &policy)?;

        self.push_meter(&policy, "update").await?;
        let moved = !same_switch || previous.meter_id != policy.meter_id;
        if moved {
            if let Err(e) = self
                .controller
                .delete_meter(&previous.controller, &previous.switch_id, previous.meter_id)
                .await
            {
                warn!(
                    id = id,
                    meter_id = previous.meter_id,
                    error = %e,
                    "Failed to remove the previous controller meter"
                );
            }
        }

        txn.put(policy.clone());
        txn.commit()?;
        info!(id = id, meter_id = policy.meter_id, "Meter policy updated");
        Ok(policy)
    }

    /// Remove the controller meter, then the policy
    pub async fn delete(&self, id: u64) -> ConsoleResult<MeterPolicy> {
        let mut txn = self.repository.begin().await;
        let policy = txn.get(id)?;

        let result = self
            .controller
            .delete_meter(&policy.controller, &policy.switch_id, policy.meter_id)
            .await;
        self.metrics.inc_meter_push("delete", result.is_ok());
        result?;

        txn.remove(id);
        txn.commit()?;
        info!(id = id, meter_id = policy.meter_id, "Meter policy deleted");
        Ok(policy)
    }

    /// Policy to apply for a flow at a wall-clock instant
    pub async fn select(&self, key: &SelectionKey<'_>, at: NaiveDateTime) -> Option<MeterPolicy> {
        let policies = self.repository.list();
        select(&policies, key, at).cloned()
    }

    async fn push_meter(&self, policy: &MeterPolicy, operation: &str) -> ConsoleResult<()> {
        let result = self
            .controller
            .put_meter(
                &policy.controller,
                &policy.switch_id,
                policy.meter_id,
                &meter_payload(policy),
            )
            .await;
        self.metrics.inc_meter_push(operation, result.is_ok());
        result.map(|_| ())
    }
}

fn into_policy(draft: MeterPolicyDraft, id: u64, meter_id: u32) -> MeterPolicy {
    MeterPolicy {
        id,
        controller: draft.controller,
        switch_id: draft.switch_id,
        meter_id,
        rate_kbps: draft.rate_kbps,
        burst_size: draft.burst_size,
        categories: draft.categories,
        client: draft.client.as_deref().map(normalize_client),
        activation_period: draft.activation_period,
        start_time: draft.start_time,
        end_time: draft.end_time,
    }
}

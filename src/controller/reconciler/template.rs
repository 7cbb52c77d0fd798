//! # Template Verifier
//!
//! Validates `ExecAccessTemplate` and `PodAccessTemplate` objects and records
//! the result as conditions:
//!
//! - `TargetRefExists`: the target workload controller exists and is a
//!   supported kind
//! - `DurationsValid`: both durations parse and `defaultDuration <= maxDuration`
//! - `MutationConfigValid` (pod templates): the mutation config can be applied
//!   to the target and stays within the resource caps
//!
//! `ready` is the AND of all conditions. Templates are requeued on a fixed
//! delay so drift in the target workload is picked up.

use crate::constants::TEMPLATE_REQUEUE_DELAY;
use crate::controller::builder::mutation::check_mutation_config;
use crate::controller::builder::quantity::ResourceCaps;
use crate::controller::builder::target::TargetWorkload;
use crate::controller::builder::BuildError;
use crate::controller::reconciler::status::publish_status;
use crate::controller::reconciler::types::{resource_key, Context, ReconcilerError};
use crate::controller::reconciler::validation::{validate_access_durations, validate_kubernetes_name};
use crate::controller::store::{ResourceStore, StoreObject};
use crate::crd::{
    AccessTemplate, Condition, ConditionStatus, ConditionType, ExecAccessTemplate, HasConditions,
    PodAccessTemplate,
};
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use tracing::{info, warn};

/// Check the target reference, recording `TargetRefExists`
///
/// Returns the resolved workload when it exists. Transient store failures abort
/// the reconcile.
async fn verify_target<S, T>(store: &S, template: &mut T) -> Result<Option<TargetWorkload>, ReconcilerError>
where
    S: ResourceStore,
    T: AccessTemplate + StoreObject,
{
    let namespace = template.namespace().unwrap_or_default();
    let generation = template.meta().generation;
    let target_ref = template.target_ref().clone();

    if let Err(e) = validate_kubernetes_name(&target_ref.name, "targetRef.name") {
        template.set_condition(Condition::new(
            ConditionType::TargetRefExists,
            ConditionStatus::False,
            "BadRequest",
            e.to_string(),
            generation,
        ));
        return Ok(None);
    }

    let (status, reason, message, workload) =
        match TargetWorkload::resolve(store, &namespace, &target_ref).await {
            Ok(workload) => (
                ConditionStatus::True,
                "Found",
                format!("{workload} found"),
                Some(workload),
            ),
            Err(BuildError::Store(e)) => return Err(e.into()),
            Err(e) => (ConditionStatus::False, e.reason(), e.to_string(), None),
        };

    if status == ConditionStatus::False {
        warn!(
            "Template {}/{} target {} rejected: {}",
            namespace,
            template.name_any(),
            target_ref,
            message
        );
    }

    template.set_condition(Condition::new(
        ConditionType::TargetRefExists,
        status,
        reason,
        message,
        generation,
    ));
    Ok(workload)
}

/// Check the duration bounds, recording `DurationsValid`
fn verify_durations<T: AccessTemplate + StoreObject>(template: &mut T) {
    let generation = template.meta().generation;
    let condition = match validate_access_durations(template.access_config()) {
        Ok(bounds) => Condition::new(
            ConditionType::DurationsValid,
            ConditionStatus::True,
            "Valid",
            bounds.message(),
            generation,
        ),
        Err(e) => Condition::new(
            ConditionType::DurationsValid,
            ConditionStatus::False,
            "NotAcceptable",
            e.to_string(),
            generation,
        ),
    };
    template.set_condition(condition);
}

/// Check the mutation config against the resolved target, recording `MutationConfigValid`
fn verify_mutation_config(template: &mut PodAccessTemplate, target: Option<&TargetWorkload>) {
    let generation = template.meta().generation;

    let condition = match (&template.spec.controller_target_mutation_config, target) {
        (None, _) => match ResourceCaps::from_template(&template.spec) {
            Ok(_) => Condition::new(
                ConditionType::MutationConfigValid,
                ConditionStatus::True,
                "Valid",
                "No mutation configured",
                generation,
            ),
            Err(e) => Condition::new(
                ConditionType::MutationConfigValid,
                ConditionStatus::False,
                "InvalidMutation",
                e.to_string(),
                generation,
            ),
        },
        (Some(_), None) => Condition::new(
            ConditionType::MutationConfigValid,
            ConditionStatus::Unknown,
            "TargetUnresolved",
            "Mutation config cannot be checked until the target resolves",
            generation,
        ),
        (Some(config), Some(target)) => {
            let checked = ResourceCaps::from_template(&template.spec)
                .map_err(|e| e.to_string())
                .and_then(|caps| check_mutation_config(config, target, &caps).map_err(|e| e.0));
            match checked {
                Ok(()) => Condition::new(
                    ConditionType::MutationConfigValid,
                    ConditionStatus::True,
                    "Valid",
                    format!("Mutation config applies to {target}"),
                    generation,
                ),
                Err(message) => Condition::new(
                    ConditionType::MutationConfigValid,
                    ConditionStatus::False,
                    "InvalidMutation",
                    message,
                    generation,
                ),
            }
        }
    };
    template.set_condition(condition);
}

async fn finish<S, T>(store: &S, template: &mut T, before: &T) -> Result<Action, ReconcilerError>
where
    S: ResourceStore,
    T: AccessTemplate + StoreObject,
{
    if template.refresh_ready() {
        info!(
            "📋 {} {}/{} ready={}",
            T::kind(&()),
            template.namespace().unwrap_or_default(),
            template.name_any(),
            template.is_ready()
        );
    }
    publish_status(store, template, before).await?;
    Ok(Action::requeue(TEMPLATE_REQUEUE_DELAY))
}

/// Verify an `ExecAccessTemplate`
pub async fn verify_exec_template<S: ResourceStore>(
    ctx: &Context<S>,
    namespace: &str,
    name: &str,
) -> Result<Action, ReconcilerError> {
    let Some(mut template) = ctx
        .store
        .get_consistent::<ExecAccessTemplate>(namespace, name)
        .await?
    else {
        ctx.reset_backoff(&resource_key(&ExecAccessTemplate::kind(&()), namespace, name));
        return Ok(Action::await_change());
    };
    let before = template.clone();

    verify_target(&ctx.store, &mut template).await?;
    verify_durations(&mut template);

    finish(&ctx.store, &mut template, &before).await
}

/// Verify a `PodAccessTemplate`
pub async fn verify_pod_template<S: ResourceStore>(
    ctx: &Context<S>,
    namespace: &str,
    name: &str,
) -> Result<Action, ReconcilerError> {
    let Some(mut template) = ctx
        .store
        .get_consistent::<PodAccessTemplate>(namespace, name)
        .await?
    else {
        ctx.reset_backoff(&resource_key(&PodAccessTemplate::kind(&()), namespace, name));
        return Ok(Action::await_change());
    };
    let before = template.clone();

    let target = verify_target(&ctx.store, &mut template).await?;
    verify_durations(&mut template);
    verify_mutation_config(&mut template, target.as_ref());

    finish(&ctx.store, &mut template, &before).await
}

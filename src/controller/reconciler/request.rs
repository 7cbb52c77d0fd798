//! # Request Reconciler
//!
//! Drives `ExecAccessRequest` and `PodAccessRequest` objects through their
//! lifecycle. One iteration runs these stages in order; a stage that cannot
//! continue records a condition and ends the iteration:
//!
//! 1. Fetch the request through the consistent reader
//! 2. Resolve the template (`TargetTemplateExists`)
//! 3. Make the template the request's controller, so template deletion cascades
//! 4. Resolve the effective duration (`DurationsValid`)
//! 5. Check expiry (`AccessStillValid`); an expired request is deleted
//! 6. Build the access resources (`AccessResourcesCreated`)
//! 7. Pod requests only: wait for the debug pod to run (`PodReady`)
//! 8. Roll the conditions into `ready` and publish the status
//! 9. Requeue so expiry is enforced without further events
//!
//! Recovery always happens in a later iteration; nothing here retries in place.

use crate::constants::{BUILD_ERROR_REQUEUE_DELAY, POD_NOT_READY_REQUEUE_DELAY};
use crate::controller::builder::{
    AccessBuilder, ExecAccessBuilder, PodAccessBuilder, PodVerification, VerifiesAccessResources,
};
use crate::controller::reconciler::duration::{
    check_expiry, creation_time, format_duration, resolve_effective_duration, AccessValidity,
    DurationDecision, DurationResolutionError,
};
use crate::controller::reconciler::status::publish_status;
use crate::controller::reconciler::types::{resource_key, Context, ReconcilerError};
use crate::controller::reconciler::validation::validate_kubernetes_name;
use crate::controller::store::{create_or_update, ResourceStore, StoreObject};
use crate::crd::{
    AccessRequest, AccessTemplate, Condition, ConditionStatus, ConditionType, ExecAccessRequest,
    HasConditions, PodAccessRequest,
};
use crate::observability::metrics;
use chrono::{DateTime, Utc};
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A request that made it through stages 1-5
struct ActiveRequest<R: AccessRequest> {
    request: R,
    /// Snapshot used to decide whether the status needs writing
    before: R,
    template: R::Template,
    expires_at: DateTime<Utc>,
}

/// Result of the shared stages
enum Stage<R: AccessRequest> {
    Stop(Action),
    Active(ActiveRequest<R>),
}

/// Result of running the builder
enum BuildStep {
    Built,
    /// Carries the requeue replacing the periodic one, if any
    Failed(Option<Action>),
}

fn condition<R: Resource>(
    obj: &R,
    type_: ConditionType,
    status: ConditionStatus,
    reason: &str,
    message: impl Into<String>,
) -> Condition {
    Condition::new(type_, status, reason, message, obj.meta().generation)
}

/// Publish the status as it stands and stop with `action`
async fn stop_with_status<S, R>(
    store: &S,
    mut request: R,
    before: &R,
    action: Action,
) -> Result<Stage<R>, ReconcilerError>
where
    S: ResourceStore,
    R: AccessRequest + StoreObject,
{
    request.refresh_ready();
    publish_status(store, &mut request, before).await?;
    Ok(Stage::Stop(action))
}

/// Make `template` the controller of `request`, replacing any earlier controller
async fn set_parent_reference<S, R>(store: &S, request: R, template: &R::Template) -> Result<R, ReconcilerError>
where
    S: ResourceStore,
    R: AccessRequest + StoreObject,
    R::Template: StoreObject,
{
    let Some(owner) = template.controller_owner_ref(&()) else {
        warn!(
            "Template {} has no uid; cannot own request {}",
            template.name_any(),
            request.name_any()
        );
        return Ok(request);
    };

    let already_owned = request
        .owner_references()
        .iter()
        .any(|o| o.uid == owner.uid && o.controller == Some(true));
    if already_owned {
        return Ok(request);
    }

    let (updated, result) = create_or_update(store, request, |r: &mut R| {
        let refs = r.meta_mut().owner_references.get_or_insert_with(Vec::new);
        refs.retain(|o| o.controller != Some(true) && o.uid != owner.uid);
        refs.push(owner.clone());
    })
    .await?;
    debug!(
        "Parent reference on {} {} {}",
        R::kind(&()),
        updated.name_any(),
        result.as_str()
    );
    Ok(updated)
}

/// Stages 1-5, shared by both request kinds
async fn prepare<S, R>(
    ctx: &Context<S>,
    namespace: &str,
    name: &str,
) -> Result<Stage<R>, ReconcilerError>
where
    S: ResourceStore,
    R: AccessRequest + StoreObject,
    R::Template: StoreObject,
{
    let store = &ctx.store;
    let kind = R::kind(&()).to_string();

    // 1. Fetch
    let Some(request) = store.get_consistent::<R>(namespace, name).await? else {
        debug!("{} {}/{} no longer exists", kind, namespace, name);
        ctx.reset_backoff(&resource_key(&kind, namespace, name));
        return Ok(Stage::Stop(Action::await_change()));
    };

    // 2. Resolve template
    let template_name = request.template_name().to_string();
    if let Err(e) = validate_kubernetes_name(&template_name, "spec.templateName") {
        let before = request.clone();
        let mut request = request;
        let invalid = condition(
            &request,
            ConditionType::TargetTemplateExists,
            ConditionStatus::False,
            "BadRequest",
            e.to_string(),
        );
        request.set_condition(invalid);
        return stop_with_status(store, request, &before, Action::await_change()).await;
    }
    let Some(template) = store
        .get_cached::<R::Template>(namespace, &template_name)
        .await?
    else {
        let before = request.clone();
        let mut request = request;
        let missing = condition(
            &request,
            ConditionType::TargetTemplateExists,
            ConditionStatus::False,
            "NotFound",
            format!("{} {namespace}/{template_name} not found", R::Template::kind(&())),
        );
        request.set_condition(missing);
        warn!(
            "{} {}/{} references missing template {}",
            kind, namespace, name, template_name
        );
        return stop_with_status(store, request, &before, Action::requeue(ctx.reconcile_interval))
            .await;
    };

    // 3. Parent reference
    let mut request = set_parent_reference(store, request, &template).await?;
    let before = request.clone();

    let found = condition(
        &request,
        ConditionType::TargetTemplateExists,
        ConditionStatus::True,
        "Found",
        format!("{} {template_name} found", R::Template::kind(&())),
    );
    request.set_condition(found);

    // 4. Duration
    let access_config = template.access_config();
    let effective = match resolve_effective_duration(
        request.requested_duration(),
        &access_config.default_duration,
        &access_config.max_duration,
    ) {
        Ok(effective) => effective,
        Err(e) => {
            let invalid = condition(
                &request,
                ConditionType::DurationsValid,
                ConditionStatus::False,
                e.reason(),
                e.to_string(),
            );
            request.set_condition(invalid);
            warn!("{} {}/{}: {}", kind, namespace, name, e);
            // A bad request waits for the user to edit it; a bad template is rechecked
            let action = match e {
                DurationResolutionError::BadRequest(_) => Action::await_change(),
                DurationResolutionError::TemplateError(_)
                | DurationResolutionError::DefaultExceedsMax { .. } => {
                    Action::requeue(ctx.reconcile_interval)
                }
            };
            return stop_with_status(store, request, &before, action).await;
        }
    };

    let valid = condition(
        &request,
        ConditionType::DurationsValid,
        ConditionStatus::True,
        effective.decision.reason(),
        effective.message(),
    );
    if request.set_condition(valid) && effective.decision == DurationDecision::Clamped {
        info!(
            "✂️  {} {}/{} duration {} clamped to {}",
            kind,
            namespace,
            name,
            format_duration(effective.requested),
            format_duration(effective.duration)
        );
        metrics::increment_access_durations_clamped(&kind);
    }

    // 5. Expiry
    let now = Utc::now();
    let created_at = creation_time(request.meta()).unwrap_or(now);
    match check_expiry(created_at, effective.duration, now) {
        AccessValidity::Expired { expired_at } => {
            let expired = condition(
                &request,
                ConditionType::AccessStillValid,
                ConditionStatus::False,
                "Timeout",
                format!("Access expired at {}", expired_at.to_rfc3339()),
            );
            request.set_condition(expired);
            info!(
                "⏰ {} {}/{} expired at {} (duration {}), deleting",
                kind,
                namespace,
                name,
                expired_at.to_rfc3339(),
                format_duration(effective.duration)
            );
            store.delete::<R>(namespace, name).await?;
            ctx.reset_backoff(&resource_key(&kind, namespace, name));
            metrics::increment_access_requests_expired(&kind);
            Ok(Stage::Stop(Action::await_change()))
        }
        AccessValidity::Valid { expires_at } => {
            let still_valid = condition(
                &request,
                ConditionType::AccessStillValid,
                ConditionStatus::True,
                "Valid",
                format!("Access valid until {}", expires_at.to_rfc3339()),
            );
            request.set_condition(still_valid);
            Ok(Stage::Active(ActiveRequest {
                request,
                before,
                template,
                expires_at,
            }))
        }
    }
}

/// Stage 6: run the builder, recording `AccessResourcesCreated`
async fn build<S, B>(store: &S, builder: &B, active: &mut ActiveRequest<B::Request>) -> BuildStep
where
    S: ResourceStore,
    B: AccessBuilder,
{
    let request = &mut active.request;
    let kind = B::Request::kind(&()).to_string();

    match builder
        .generate_access_resources(store, request, &active.template)
        .await
    {
        Ok(outcome) => {
            let created = condition(
                &*request,
                ConditionType::AccessResourcesCreated,
                ConditionStatus::True,
                "Created",
                outcome.status_message,
            );
            request.set_condition(created);
            request.set_access_message(outcome.access_message);
            BuildStep::Built
        }
        Err(e) => {
            let failed = condition(
                &*request,
                ConditionType::AccessResourcesCreated,
                ConditionStatus::False,
                e.reason(),
                e.to_string(),
            );
            request.set_condition(failed);
            if e.is_fatal() {
                warn!(
                    "🛑 {} {} cannot be built without operator intervention: {}",
                    kind,
                    request.name_any(),
                    e
                );
                BuildStep::Failed(None)
            } else {
                warn!(
                    "Building access for {} {} failed, retrying in {}s: {}",
                    kind,
                    request.name_any(),
                    BUILD_ERROR_REQUEUE_DELAY.as_secs(),
                    e
                );
                metrics::increment_requeues_total("build-error");
                BuildStep::Failed(Some(Action::requeue(BUILD_ERROR_REQUEUE_DELAY)))
            }
        }
    }
}

/// Periodic requeue, pulled in so an expiring grant is removed on time
fn periodic_requeue(interval: Duration, expires_at: DateTime<Utc>) -> Action {
    let until_expiry = (expires_at - Utc::now())
        .to_std()
        .unwrap_or(Duration::ZERO)
        + Duration::from_secs(1);
    metrics::increment_requeues_total("interval");
    Action::requeue(interval.min(until_expiry))
}

/// Stages 8-9
async fn finish<S, R>(
    ctx: &Context<S>,
    mut active: ActiveRequest<R>,
    override_action: Option<Action>,
) -> Result<Action, ReconcilerError>
where
    S: ResourceStore,
    R: AccessRequest + StoreObject,
{
    if active.request.refresh_ready() {
        info!(
            "✅ {} {}/{} ready={}",
            R::kind(&()),
            active.request.namespace().unwrap_or_default(),
            active.request.name_any(),
            active.request.is_ready()
        );
    }
    publish_status(&ctx.store, &mut active.request, &active.before).await?;

    Ok(override_action
        .unwrap_or_else(|| periodic_requeue(ctx.reconcile_interval, active.expires_at)))
}

/// Reconcile one `ExecAccessRequest`
pub async fn reconcile_exec_access_request<S: ResourceStore>(
    ctx: &Context<S>,
    namespace: &str,
    name: &str,
) -> Result<Action, ReconcilerError> {
    let mut active = match prepare::<S, ExecAccessRequest>(ctx, namespace, name).await? {
        Stage::Stop(action) => return Ok(action),
        Stage::Active(active) => active,
    };

    let builder = ExecAccessBuilder::new();
    let action = match build(&ctx.store, &builder, &mut active).await {
        BuildStep::Built => None,
        BuildStep::Failed(action) => action,
    };

    finish(ctx, active, action).await
}

/// Reconcile one `PodAccessRequest`
pub async fn reconcile_pod_access_request<S: ResourceStore>(
    ctx: &Context<S>,
    namespace: &str,
    name: &str,
) -> Result<Action, ReconcilerError> {
    let mut active = match prepare::<S, PodAccessRequest>(ctx, namespace, name).await? {
        Stage::Stop(action) => return Ok(action),
        Stage::Active(active) => active,
    };

    let builder = PodAccessBuilder::new();
    let mut action = None;

    match build(&ctx.store, &builder, &mut active).await {
        BuildStep::Failed(failed) => action = failed,
        // 7. Pod liveness, only meaningful once the pod was created
        BuildStep::Built => {
            let verification = builder
                .verify_access_resources(&ctx.store, &active.request)
                .await?;

            let status = ConditionStatus::from(verification == PodVerification::Running);
            let pod_ready = condition(
                &active.request,
                ConditionType::PodReady,
                status,
                verification.reason(),
                verification.message(),
            );
            active.request.set_condition(pod_ready);

            match verification {
                PodVerification::Running => {}
                PodVerification::NotRunning { phase } => {
                    debug!(
                        "Debug pod for PodAccessRequest {}/{} is {}, requeueing",
                        namespace, name, phase
                    );
                    metrics::increment_requeues_total("pod-not-ready");
                    action = Some(Action::requeue(POD_NOT_READY_REQUEUE_DELAY));
                }
                PodVerification::Missing => {
                    // podName is write-once, so only an operator can recover this request
                    warn!(
                        "🛑 Debug pod for PodAccessRequest {}/{} no longer exists",
                        namespace, name
                    );
                }
            }
        }
    }

    finish(ctx, active, action).await
}

use tracing::{info, warn};
use uuid::Uuid;

use super::{
    dto::{CreatePlanRequest, UpdatePlanRequest},
    repo_types::{EntriesChange, Party, Plan, PlanKind, PlanSummary},
    sync::{Owners, PlanSyncEngine},
};
use crate::{
    access::{MethodClass, Target},
    auth::repo_types::{Role, User},
    error::{AppError, AppResult, FieldError},
    state::AppState,
};

/// The side of `plan` the requester sits on, if any.
fn party_of(user: &User, plan: &Plan) -> Option<Party> {
    if user.id == plan.client_id {
        Some(Party::Client)
    } else if user.id == plan.specialist_id {
        Some(Party::Specialist)
    } else {
        None
    }
}

fn hidden_from(user: &User, plan: &Plan) -> bool {
    party_of(user, plan).is_some_and(|p| !plan.is_active_for(p))
}

fn owned(plan: &Plan) -> Target {
    Target::Owned {
        specialist_id: plan.specialist_id,
        client_id: plan.client_id,
    }
}

/// Load a plan of `kind`; wrong kind and soft-deleted-for-me read as missing.
async fn visible_plan(
    state: &AppState,
    requester: &User,
    kind: PlanKind,
    id: Uuid,
) -> AppResult<Plan> {
    match state.store.find_plan(id).await? {
        Some(p) if p.kind == kind && !hidden_from(requester, &p) => Ok(p),
        _ => Err(AppError::NotFound),
    }
}

/// Named owners must exist, be active and hold the matching role.
async fn check_owners(state: &AppState, owners: Owners) -> AppResult<()> {
    let mut errors = Vec::new();
    for (field, id, role) in [
        ("specialist", owners.specialist_id, Role::Specialist),
        ("client", owners.client_id, Role::Client),
    ] {
        match state.store.find_user(id).await? {
            Some(u) if u.is_active && u.role == role => {}
            _ => errors.push(FieldError::new(field, format!("no active {role} with this id"))),
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(AppError::Validation(errors))
    }
}

pub async fn create_plan(
    state: &AppState,
    requester: &User,
    kind: PlanKind,
    req: CreatePlanRequest,
) -> AppResult<Plan> {
    let owners = Owners::resolve(requester, req.client, req.specialist)?;
    state
        .policy
        .ensure(
            state.store.as_ref(),
            requester,
            MethodClass::Unsafe,
            Target::Client(owners.client_id),
        )
        .await?;
    check_owners(state, owners).await?;

    let new = PlanSyncEngine::new(kind).prepare_create(owners, req)?;
    let plan = state.store.insert_plan(new).await?;

    info!(
        plan_id = %plan.id,
        %kind,
        specialist_id = %plan.specialist_id,
        client_id = %plan.client_id,
        entries = plan.entries.len(),
        "plan created"
    );
    Ok(plan)
}

pub async fn get_plan(
    state: &AppState,
    requester: &User,
    kind: PlanKind,
    id: Uuid,
) -> AppResult<Plan> {
    let plan = visible_plan(state, requester, kind, id).await?;
    state
        .policy
        .ensure(state.store.as_ref(), requester, MethodClass::Safe, owned(&plan))
        .await?;
    Ok(plan)
}

pub async fn list_plans(
    state: &AppState,
    requester: &User,
    kind: PlanKind,
    client: Option<Uuid>,
) -> AppResult<Vec<PlanSummary>> {
    let target = Target::client_ref(client, None, "client")?;
    state
        .policy
        .ensure(state.store.as_ref(), requester, MethodClass::Safe, target)
        .await?;

    let plans = state
        .store
        .list_plans_for_client(target.client_id(), kind)
        .await?;
    Ok(plans
        .iter()
        .filter(|p| !hidden_from(requester, p))
        .map(PlanSummary::from)
        .collect())
}

pub async fn update_plan(
    state: &AppState,
    requester: &User,
    kind: PlanKind,
    id: Uuid,
    req: UpdatePlanRequest,
) -> AppResult<Plan> {
    let current = visible_plan(state, requester, kind, id).await?;
    state
        .policy
        .ensure(state.store.as_ref(), requester, MethodClass::Unsafe, owned(&current))
        .await?;

    let update = PlanSyncEngine::new(kind).prepare_update(&current, req)?;
    let replaced = match &update.entries {
        EntriesChange::Replace(e) => Some(e.len()),
        EntriesChange::Keep => None,
    };

    let plan = state
        .store
        .update_plan(id, update)
        .await?
        .ok_or(AppError::NotFound)?;

    if let Some(count) = replaced {
        info!(plan_id = %id, editor = %requester.id, count, "plan entries replaced");
    }
    info!(plan_id = %id, editor = %requester.id, "plan updated");
    Ok(plan)
}

/// Flip the acting party's active flag; the other party's view is untouched.
/// Admins act on behalf of the party they name.
pub async fn soft_delete_plan(
    state: &AppState,
    requester: &User,
    kind: PlanKind,
    id: Uuid,
    party: Option<Party>,
) -> AppResult<()> {
    let plan = visible_plan(state, requester, kind, id).await?;
    state
        .policy
        .ensure(state.store.as_ref(), requester, MethodClass::Unsafe, owned(&plan))
        .await?;

    let party = match requester.role {
        Role::Admin => party.ok_or(AppError::RequestShape { param: "party" })?,
        _ => party_of(requester, &plan).ok_or_else(|| {
            warn!(plan_id = %id, requester = %requester.id, "soft delete by non-owner");
            AppError::Forbidden
        })?,
    };

    state
        .store
        .deactivate_plan_for(id, party)
        .await?
        .ok_or(AppError::NotFound)?;
    info!(plan_id = %id, ?party, requester = %requester.id, "plan soft-deleted");
    Ok(())
}

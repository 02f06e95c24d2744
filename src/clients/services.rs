use tracing::{info, warn};
use uuid::Uuid;

use super::{
    dto::{ClientCard, CreateClientRequest, CreatedClient, UpdateClientRequest},
    repo_types::{ClientDraft, IntakeFields, LinkOutcome, Relationship},
};
use crate::{
    access::{MethodClass, Target},
    auth::{
        dto::PublicUser,
        password::{generate_placeholder_password, hash_password},
        repo_types::{Role, User},
        services::{check_profile, clean, email_taken, is_valid_email, normalize_email},
    },
    error::{AppError, AppResult, FieldError},
    state::AppState,
};

fn clean_intake(i: IntakeFields) -> IntakeFields {
    IntakeFields {
        diseases: clean(i.diseases),
        exp_diets: clean(i.exp_diets),
        exp_trainings: clean(i.exp_trainings),
        bad_habits: clean(i.bad_habits),
        food_preferences: clean(i.food_preferences),
        notes: clean(i.notes),
    }
}

async fn card(state: &AppState, relationship: Relationship) -> AppResult<ClientCard> {
    let client = state
        .store
        .find_user(relationship.client_id)
        .await?
        .ok_or_else(|| {
            anyhow::anyhow!(
                "relationship {} points at missing client {}",
                relationship.id,
                relationship.client_id
            )
        })?;
    Ok(ClientCard::new(relationship, PublicUser::from(client)))
}

/// Ownership is part of the lookup key: another specialist's relationship is
/// indistinguishable from a missing one.
async fn visible_relationship(
    state: &AppState,
    requester: &User,
    id: Uuid,
) -> AppResult<Relationship> {
    let found = match requester.role {
        Role::Specialist => state.store.find_owned_relationship(requester.id, id).await?,
        Role::Admin => state.store.find_relationship(id).await?,
        Role::Client => return Err(AppError::Forbidden),
    };
    found.ok_or(AppError::NotFound)
}

/// Find or create the client identity by email and link it to the requesting
/// specialist, in one atomic store call.
pub async fn create_client(
    state: &AppState,
    requester: &User,
    req: CreateClientRequest,
) -> AppResult<CreatedClient> {
    if requester.role != Role::Specialist {
        return Err(AppError::Forbidden);
    }

    let input = req.client;
    let email = normalize_email(&input.email);
    let first_name = clean(input.first_name);
    let last_name = clean(input.last_name);
    let middle_name = clean(input.middle_name);
    let phone_number = clean(input.phone_number);

    let mut errors = Vec::new();
    if !is_valid_email(&email) {
        errors.push(FieldError::new("client.email", "invalid email"));
    }
    check_profile(
        "client.",
        &first_name,
        &last_name,
        &middle_name,
        &phone_number,
        &mut errors,
    );
    if errors.is_empty() && state.store.find_user_by_email(&email).await?.is_none() {
        if first_name.is_none() {
            errors.push(FieldError::new("client.first_name", "required for a new client"));
        }
        if last_name.is_none() {
            errors.push(FieldError::new("client.last_name", "required for a new client"));
        }
    }
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    let placeholder = generate_placeholder_password();
    let draft = ClientDraft {
        email,
        password_hash: hash_password(&placeholder)?,
        first_name,
        last_name,
        middle_name,
        phone_number,
    };

    match state
        .store
        .link_client(requester.id, draft, clean_intake(req.intake))
        .await
        .map_err(email_taken)?
    {
        LinkOutcome::Linked {
            relationship,
            client,
            client_created,
        } => {
            info!(
                specialist_id = %requester.id,
                client_id = %client.id,
                relationship_id = %relationship.id,
                client_created,
                "client added"
            );
            Ok(CreatedClient {
                card: ClientCard::new(relationship, PublicUser::from(client)),
                client_created,
                temporary_password: client_created.then_some(placeholder),
            })
        }
        LinkOutcome::Duplicate => {
            warn!(specialist_id = %requester.id, "client already linked");
            Err(AppError::Conflict("Client already added".into()))
        }
        LinkOutcome::NotAClient => Err(AppError::field(
            "client.email",
            "belongs to an account that is not a client",
        )),
    }
}

pub async fn list_clients(
    state: &AppState,
    requester: &User,
    specialist: Option<Uuid>,
) -> AppResult<Vec<ClientCard>> {
    let specialist_id = match requester.role {
        Role::Specialist => requester.id,
        Role::Admin => specialist.ok_or(AppError::RequestShape { param: "specialist" })?,
        Role::Client => return Err(AppError::Forbidden),
    };

    let relationships = state.store.list_relationships(specialist_id).await?;
    let mut cards = Vec::with_capacity(relationships.len());
    for r in relationships {
        cards.push(card(state, r).await?);
    }
    Ok(cards)
}

pub async fn get_client(state: &AppState, requester: &User, id: Uuid) -> AppResult<ClientCard> {
    let relationship = visible_relationship(state, requester, id).await?;
    card(state, relationship).await
}

pub async fn update_client(
    state: &AppState,
    requester: &User,
    id: Uuid,
    req: UpdateClientRequest,
) -> AppResult<ClientCard> {
    let relationship = visible_relationship(state, requester, id).await?;
    state
        .policy
        .ensure(
            state.store.as_ref(),
            requester,
            MethodClass::Unsafe,
            Target::Owned {
                specialist_id: relationship.specialist_id,
                client_id: relationship.client_id,
            },
        )
        .await?;

    let mut patch = super::repo_types::IntakePatch::from(req);
    for slot in [
        &mut patch.diseases,
        &mut patch.exp_diets,
        &mut patch.exp_trainings,
        &mut patch.bad_habits,
        &mut patch.food_preferences,
        &mut patch.notes,
    ] {
        if let Some(v) = slot.take() {
            *slot = Some(clean(v));
        }
    }

    let updated = state
        .store
        .update_relationship(id, patch)
        .await?
        .ok_or(AppError::NotFound)?;
    info!(relationship_id = %id, editor = %requester.id, "client intake updated");
    card(state, updated).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        access::ReadPolicy,
        auth::repo_types::NewUser,
        clients::dto::ClientInput,
        store::MemoryStore,
    };

    async fn add_user(state: &AppState, email: &str, role: Role) -> User {
        state
            .store
            .create_user(NewUser {
                email: email.into(),
                password_hash: String::new(),
                first_name: None,
                last_name: None,
                middle_name: None,
                phone_number: None,
                role,
            })
            .await
            .unwrap()
    }

    fn request(email: &str) -> CreateClientRequest {
        CreateClientRequest {
            client: ClientInput {
                email: email.into(),
                first_name: Some("Cat".into()),
                last_name: Some("Stevens".into()),
                middle_name: None,
                phone_number: Some("+1 555 0100".into()),
            },
            intake: IntakeFields {
                notes: Some("n".into()),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn added_client_is_listed_for_its_specialist_only() {
        let state = AppState::fake();
        let s = add_user(&state, "s@x.com", Role::Specialist).await;
        let other = add_user(&state, "o@x.com", Role::Specialist).await;

        let created = create_client(&state, &s, request("C@x.com")).await.unwrap();
        assert!(created.client_created);
        assert_eq!(created.temporary_password.as_ref().map(|p| p.len()), Some(16));
        assert_eq!(created.card.intake.notes.as_deref(), Some("n"));

        let cards = list_clients(&state, &s, None).await.unwrap();
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].client.email, "c@x.com");
        assert_eq!(cards[0].client.role, Role::Client);

        assert!(list_clients(&state, &other, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn existing_client_is_reused_and_duplicates_conflict() {
        let store = Arc::new(MemoryStore::new());
        let state = AppState::fake_with(store.clone(), ReadPolicy::Open);
        let s1 = add_user(&state, "s1@x.com", Role::Specialist).await;
        let s2 = add_user(&state, "s2@x.com", Role::Specialist).await;
        let client = add_user(&state, "c@x.com", Role::Client).await;

        let mut req = request("c@x.com");
        req.client.first_name = None;
        req.client.last_name = None;
        let linked = create_client(&state, &s1, req).await.unwrap();
        assert!(!linked.client_created);
        assert!(linked.temporary_password.is_none());
        assert_eq!(linked.card.client.id, client.id);

        create_client(&state, &s2, request("c@x.com")).await.unwrap();
        assert_eq!(store.user_count().await, 3);

        let dup = create_client(&state, &s1, request("c@x.com")).await;
        assert!(matches!(dup, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn new_client_needs_names_and_persists_nothing_otherwise() {
        let store = Arc::new(MemoryStore::new());
        let state = AppState::fake_with(store.clone(), ReadPolicy::Open);
        let s = add_user(&state, "s@x.com", Role::Specialist).await;

        let mut req = request("new@x.com");
        req.client.last_name = Some("  ".into());
        req.client.phone_number = Some("12".into());
        match create_client(&state, &s, req).await {
            Err(AppError::Validation(fields)) => {
                let names: Vec<_> = fields.iter().map(|f| f.field.as_str()).collect();
                assert!(names.contains(&"client.phone_number"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }

        let mut req = request("new@x.com");
        req.client.last_name = None;
        match create_client(&state, &s, req).await {
            Err(AppError::Validation(fields)) => {
                assert_eq!(fields, vec![FieldError::new("client.last_name", "required for a new client")]);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
        assert_eq!(store.user_count().await, 1);
    }

    #[tokio::test]
    async fn specialist_email_cannot_be_added_as_client() {
        let state = AppState::fake();
        let s = add_user(&state, "s@x.com", Role::Specialist).await;
        add_user(&state, "peer@x.com", Role::Specialist).await;

        match create_client(&state, &s, request("peer@x.com")).await {
            Err(AppError::Validation(fields)) => assert_eq!(fields[0].field, "client.email"),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn foreign_card_is_not_found() {
        let state = AppState::fake();
        let s1 = add_user(&state, "s1@x.com", Role::Specialist).await;
        let s2 = add_user(&state, "s2@x.com", Role::Specialist).await;
        let theirs = create_client(&state, &s2, request("c@x.com")).await.unwrap();

        let err = get_client(&state, &s1, theirs.card.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound));
        let err = update_client(&state, &s1, theirs.card.id, UpdateClientRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound));

        assert!(get_client(&state, &s2, theirs.card.id).await.is_ok());
    }

    #[tokio::test]
    async fn update_merges_only_supplied_fields() {
        let state = AppState::fake();
        let s = add_user(&state, "s@x.com", Role::Specialist).await;
        let mut req = request("c@x.com");
        req.intake.diseases = Some("asthma".into());
        let created = create_client(&state, &s, req).await.unwrap();

        let patch = UpdateClientRequest {
            notes: Some(None),
            bad_habits: Some(Some(" smoking ".into())),
            ..Default::default()
        };
        let card = update_client(&state, &s, created.card.id, patch).await.unwrap();
        assert_eq!(card.intake.notes, None);
        assert_eq!(card.intake.bad_habits.as_deref(), Some("smoking"));
        assert_eq!(card.intake.diseases.as_deref(), Some("asthma"));
    }

    #[tokio::test]
    async fn admin_listing_requires_specialist_param() {
        let state = AppState::fake();
        let admin = add_user(&state, "root@x.com", Role::Admin).await;
        let client = add_user(&state, "c@x.com", Role::Client).await;

        let err = list_clients(&state, &admin, None).await.unwrap_err();
        assert!(matches!(err, AppError::RequestShape { param: "specialist" }));
        assert!(matches!(
            list_clients(&state, &client, None).await,
            Err(AppError::Forbidden)
        ));
        assert!(matches!(
            create_client(&state, &client, request("z@x.com")).await,
            Err(AppError::Forbidden)
        ));
    }
}

//! Repository interfaces over the persistence collaborator.
//!
//! Every method is one atomic unit of work: composite writes (client +
//! relationship, plan + entries, entry replacement) either land entirely or
//! not at all. Handlers depend on `Arc<dyn Store>`, never on a backend.

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    auth::repo_types::{NewUser, User},
    clients::repo_types::{ClientDraft, IntakeFields, IntakePatch, LinkOutcome, Relationship},
    plans::repo_types::{NewPlan, Party, Plan, PlanKind, PlanUpdate},
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// The email is already taken by another identity. Backends raise it from
/// `create_user` and `link_client` when an insert loses a uniqueness race.
#[derive(Debug, thiserror::Error)]
#[error("email already registered: {0}")]
pub struct DuplicateEmail(pub String);

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn find_user(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn create_user(&self, user: NewUser) -> anyhow::Result<User>;
    /// Flip `is_active` off. Returns `false` if the user does not exist.
    async fn deactivate_user(&self, id: Uuid) -> anyhow::Result<bool>;
    /// Returns `false` if the user does not exist.
    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> anyhow::Result<bool>;
}

#[async_trait]
pub trait RelationshipRepo: Send + Sync {
    /// Existence check consulted by the access policy.
    async fn relationship_exists(&self, specialist_id: Uuid, client_id: Uuid)
        -> anyhow::Result<bool>;

    /// Find the client identity by email or create it from `draft`, then link
    /// it to `specialist_id`.
    async fn link_client(
        &self,
        specialist_id: Uuid,
        draft: ClientDraft,
        intake: IntakeFields,
    ) -> anyhow::Result<LinkOutcome>;

    async fn list_relationships(&self, specialist_id: Uuid) -> anyhow::Result<Vec<Relationship>>;

    async fn find_relationship(&self, id: Uuid) -> anyhow::Result<Option<Relationship>>;

    /// Lookup keyed by both owner and id; another specialist's row is `None`.
    async fn find_owned_relationship(
        &self,
        specialist_id: Uuid,
        id: Uuid,
    ) -> anyhow::Result<Option<Relationship>>;

    async fn update_relationship(
        &self,
        id: Uuid,
        patch: IntakePatch,
    ) -> anyhow::Result<Option<Relationship>>;
}

#[async_trait]
pub trait PlanRepo: Send + Sync {
    /// Insert the plan and link its entries in payload order.
    async fn insert_plan(&self, plan: NewPlan) -> anyhow::Result<Plan>;

    async fn find_plan(&self, id: Uuid) -> anyhow::Result<Option<Plan>>;

    /// Newest first; includes plans soft-deleted by either party.
    async fn list_plans_for_client(
        &self,
        client_id: Uuid,
        kind: PlanKind,
    ) -> anyhow::Result<Vec<Plan>>;

    /// Apply scalar changes and, for `EntriesChange::Replace`, detach all
    /// current links before linking the new entries.
    async fn update_plan(&self, id: Uuid, update: PlanUpdate) -> anyhow::Result<Option<Plan>>;

    /// Clear the given party's active flag. Returns `None` if the plan is missing.
    async fn deactivate_plan_for(&self, id: Uuid, party: Party) -> anyhow::Result<Option<Plan>>;
}

pub trait Store: UserRepo + RelationshipRepo + PlanRepo {}

impl<T> Store for T where T: UserRepo + RelationshipRepo + PlanRepo {}

//! In-process store. A single mutex makes every trait call atomic.

use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{DuplicateEmail, PlanRepo, RelationshipRepo, UserRepo};
use crate::{
    auth::repo_types::{NewUser, Role, User},
    clients::repo_types::{ClientDraft, IntakeFields, IntakePatch, LinkOutcome, Relationship},
    plans::repo_types::{
        EntriesChange, NewEntry, NewPlan, Party, Plan, PlanEntry, PlanKind, PlanUpdate,
    },
};

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    relationships: Vec<Relationship>,
    // stored without entries; `load_plan` joins them in
    plans: HashMap<Uuid, Plan>,
    entries: HashMap<Uuid, PlanEntry>,
    // (plan_id, entry_id) in creation order
    links: Vec<(Uuid, Uuid)>,
}

impl Inner {
    fn insert_user(&mut self, user: NewUser) -> User {
        let u = User {
            id: Uuid::new_v4(),
            email: user.email,
            password_hash: user.password_hash,
            first_name: user.first_name,
            last_name: user.last_name,
            middle_name: user.middle_name,
            phone_number: user.phone_number,
            role: user.role,
            is_active: true,
            created_at: OffsetDateTime::now_utc(),
        };
        self.users.insert(u.id, u.clone());
        u
    }

    fn link_entries(&mut self, plan_id: Uuid, entries: Vec<NewEntry>) {
        for e in entries {
            let entry = PlanEntry {
                id: Uuid::new_v4(),
                weekday: e.weekday,
                spec_comment: e.spec_comment,
                user_comment: e.user_comment,
            };
            self.links.push((plan_id, entry.id));
            self.entries.insert(entry.id, entry);
        }
    }

    fn load_plan(&self, id: Uuid) -> Option<Plan> {
        let mut plan = self.plans.get(&id)?.clone();
        plan.entries = self
            .links
            .iter()
            .filter(|(p, _)| *p == id)
            .filter_map(|(_, e)| self.entries.get(e).cloned())
            .collect();
        Some(plan)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn plan_count(&self) -> usize {
        self.inner.lock().await.plans.len()
    }

    #[cfg(test)]
    /// All entry rows, linked or orphaned.
    pub async fn entry_count(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    #[cfg(test)]
    pub async fn user_count(&self) -> usize {
        self.inner.lock().await.users.len()
    }
}

#[async_trait]
impl UserRepo for MemoryStore {
    async fn find_user(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.inner.lock().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let inner = self.inner.lock().await;
        Ok(inner.users.values().find(|u| u.email == email).cloned())
    }

    async fn create_user(&self, user: NewUser) -> anyhow::Result<User> {
        let mut inner = self.inner.lock().await;
        if inner.users.values().any(|u| u.email == user.email) {
            return Err(DuplicateEmail(user.email).into());
        }
        Ok(inner.insert_user(user))
    }

    async fn deactivate_user(&self, id: Uuid) -> anyhow::Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.users.get_mut(&id) {
            Some(u) => {
                u.is_active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> anyhow::Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.users.get_mut(&id) {
            Some(u) => {
                u.password_hash = password_hash.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl RelationshipRepo for MemoryStore {
    async fn relationship_exists(
        &self,
        specialist_id: Uuid,
        client_id: Uuid,
    ) -> anyhow::Result<bool> {
        let inner = self.inner.lock().await;
        Ok(inner
            .relationships
            .iter()
            .any(|r| r.specialist_id == specialist_id && r.client_id == client_id))
    }

    async fn link_client(
        &self,
        specialist_id: Uuid,
        draft: ClientDraft,
        intake: IntakeFields,
    ) -> anyhow::Result<LinkOutcome> {
        let mut inner = self.inner.lock().await;

        let existing = inner.users.values().find(|u| u.email == draft.email).cloned();
        if let Some(ref u) = existing {
            if u.role != Role::Client {
                return Ok(LinkOutcome::NotAClient);
            }
            if inner
                .relationships
                .iter()
                .any(|r| r.specialist_id == specialist_id && r.client_id == u.id)
            {
                return Ok(LinkOutcome::Duplicate);
            }
        }

        let (client, client_created) = match existing {
            Some(u) => (u, false),
            None => {
                let u = inner.insert_user(NewUser {
                    email: draft.email,
                    password_hash: draft.password_hash,
                    first_name: draft.first_name,
                    last_name: draft.last_name,
                    middle_name: draft.middle_name,
                    phone_number: draft.phone_number,
                    role: Role::Client,
                });
                (u, true)
            }
        };

        let now = OffsetDateTime::now_utc();
        let relationship = Relationship {
            id: Uuid::new_v4(),
            specialist_id,
            client_id: client.id,
            intake,
            created_at: now,
            updated_at: now,
        };
        inner.relationships.push(relationship.clone());

        Ok(LinkOutcome::Linked {
            relationship,
            client,
            client_created,
        })
    }

    async fn list_relationships(&self, specialist_id: Uuid) -> anyhow::Result<Vec<Relationship>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .relationships
            .iter()
            .filter(|r| r.specialist_id == specialist_id)
            .cloned()
            .collect())
    }

    async fn find_relationship(&self, id: Uuid) -> anyhow::Result<Option<Relationship>> {
        let inner = self.inner.lock().await;
        Ok(inner.relationships.iter().find(|r| r.id == id).cloned())
    }

    async fn find_owned_relationship(
        &self,
        specialist_id: Uuid,
        id: Uuid,
    ) -> anyhow::Result<Option<Relationship>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .relationships
            .iter()
            .find(|r| r.id == id && r.specialist_id == specialist_id)
            .cloned())
    }

    async fn update_relationship(
        &self,
        id: Uuid,
        patch: IntakePatch,
    ) -> anyhow::Result<Option<Relationship>> {
        let mut inner = self.inner.lock().await;
        let Some(r) = inner.relationships.iter_mut().find(|r| r.id == id) else {
            return Ok(None);
        };
        patch.apply(&mut r.intake);
        r.updated_at = OffsetDateTime::now_utc();
        Ok(Some(r.clone()))
    }
}

#[async_trait]
impl PlanRepo for MemoryStore {
    async fn insert_plan(&self, new: NewPlan) -> anyhow::Result<Plan> {
        let mut inner = self.inner.lock().await;
        let now = OffsetDateTime::now_utc();
        let plan = Plan {
            id: Uuid::new_v4(),
            kind: new.kind,
            specialist_id: new.specialist_id,
            client_id: new.client_id,
            name: new.name,
            describe: new.describe,
            targets: new.targets,
            start_date: new.start_date,
            end_date: new.end_date,
            is_active_for_client: true,
            is_active_for_specialist: true,
            created_at: now,
            edited_at: now,
            entries: Vec::new(),
        };
        let id = plan.id;
        inner.plans.insert(id, plan);
        inner.link_entries(id, new.entries);
        inner
            .load_plan(id)
            .ok_or_else(|| anyhow::anyhow!("plan {id} vanished after insert"))
    }

    async fn find_plan(&self, id: Uuid) -> anyhow::Result<Option<Plan>> {
        Ok(self.inner.lock().await.load_plan(id))
    }

    async fn list_plans_for_client(
        &self,
        client_id: Uuid,
        kind: PlanKind,
    ) -> anyhow::Result<Vec<Plan>> {
        let inner = self.inner.lock().await;
        let mut plans: Vec<Plan> = inner
            .plans
            .values()
            .filter(|p| p.client_id == client_id && p.kind == kind)
            .filter_map(|p| inner.load_plan(p.id))
            .collect();
        plans.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(plans)
    }

    async fn update_plan(&self, id: Uuid, update: PlanUpdate) -> anyhow::Result<Option<Plan>> {
        let mut inner = self.inner.lock().await;
        let Some(plan) = inner.plans.get_mut(&id) else {
            return Ok(None);
        };
        plan.name = update.name;
        plan.describe = update.describe;
        plan.targets = update.targets;
        plan.start_date = update.start_date;
        plan.end_date = update.end_date;
        plan.edited_at = OffsetDateTime::now_utc();

        if let EntriesChange::Replace(entries) = update.entries {
            inner.links.retain(|(p, _)| *p != id);
            inner.link_entries(id, entries);
        }
        Ok(inner.load_plan(id))
    }

    async fn deactivate_plan_for(&self, id: Uuid, party: Party) -> anyhow::Result<Option<Plan>> {
        let mut inner = self.inner.lock().await;
        let Some(plan) = inner.plans.get_mut(&id) else {
            return Ok(None);
        };
        match party {
            Party::Client => plan.is_active_for_client = false,
            Party::Specialist => plan.is_active_for_specialist = false,
        }
        Ok(inner.load_plan(id))
    }
}

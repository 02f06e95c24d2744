use anyhow::Context;
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, Executor, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{DuplicateEmail, PlanRepo, RelationshipRepo, UserRepo};
use crate::{
    auth::repo_types::{NewUser, Role, User, UserRow},
    clients::repo_types::{
        ClientDraft, IntakeFields, IntakePatch, LinkOutcome, Relationship, RelationshipRow,
    },
    plans::repo_types::{
        EntriesChange, NewEntry, NewPlan, Party, Plan, PlanEntry, PlanEntryRow, PlanKind, PlanRow,
        PlanUpdate,
    },
};

const USER_COLUMNS: &str = "id, email, password_hash, first_name, last_name, middle_name, \
                            phone_number, role, is_active, created_at";

const RELATIONSHIP_COLUMNS: &str = "id, specialist_id, client_id, diseases, exp_diets, \
                                    exp_trainings, bad_habits, food_preferences, notes, \
                                    created_at, updated_at";

const PLAN_COLUMNS: &str = "id, kind, specialist_id, client_id, name, describe, kkal, protein, \
                            carbo, fat, start_date, end_date, is_active_for_client, \
                            is_active_for_specialist, created_at, edited_at";

#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let db = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("connect to database")?;
        Ok(Self { db })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.db)
            .await
            .context("run migrations")?;
        Ok(())
    }

    async fn load_entries<'e, E>(exec: E, plan_id: Uuid) -> anyhow::Result<Vec<PlanEntry>>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let rows = sqlx::query_as::<_, PlanEntryRow>(
            r#"
            SELECT e.id, e.weekday, e.specialist_comment, e.client_comment
              FROM plan_entry_links l
              JOIN plan_entries e ON e.id = l.entry_id
             WHERE l.plan_id = $1
             ORDER BY l.id ASC
            "#,
        )
        .bind(plan_id)
        .fetch_all(exec)
        .await
        .context("load plan entries")?;

        rows.into_iter().map(PlanEntry::try_from).collect()
    }
}

async fn insert_user_tx(tx: &mut Transaction<'_, Postgres>, user: NewUser) -> anyhow::Result<User> {
    let row = sqlx::query_as::<_, UserRow>(&format!(
        r#"
        INSERT INTO users (id, email, password_hash, first_name, last_name, middle_name,
                           phone_number, role)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(&user.first_name)
    .bind(&user.last_name)
    .bind(&user.middle_name)
    .bind(&user.phone_number)
    .bind(user.role.as_str())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| {
        let taken = matches!(
            &e,
            sqlx::Error::Database(db)
                if db.is_unique_violation() && db.constraint() == Some("users_email_key")
        );
        if taken {
            anyhow::Error::new(DuplicateEmail(user.email.clone()))
        } else {
            anyhow::Error::new(e).context("insert user")
        }
    })?;
    row.try_into()
}

/// Insert fresh entry rows and link them to `plan_id` in order.
async fn link_entries_tx(
    tx: &mut Transaction<'_, Postgres>,
    plan_id: Uuid,
    entries: Vec<NewEntry>,
) -> anyhow::Result<()> {
    for entry in entries {
        let entry_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO plan_entries (id, weekday, specialist_comment, client_comment)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(entry_id)
        .bind(entry.weekday.as_str())
        .bind(&entry.spec_comment)
        .bind(&entry.user_comment)
        .execute(&mut **tx)
        .await
        .context("insert plan entry")?;

        sqlx::query("INSERT INTO plan_entry_links (plan_id, entry_id) VALUES ($1, $2)")
            .bind(plan_id)
            .bind(entry_id)
            .execute(&mut **tx)
            .await
            .context("link plan entry")?;
    }
    Ok(())
}

#[async_trait]
impl UserRepo for PgStore {
    async fn find_user(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find user")?;
        row.map(User::try_from).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("find user by email")?;
        row.map(User::try_from).transpose()
    }

    async fn create_user(&self, user: NewUser) -> anyhow::Result<User> {
        let mut tx = self.db.begin().await.context("begin tx")?;
        let user = insert_user_tx(&mut tx, user).await?;
        tx.commit().await.context("commit tx")?;
        Ok(user)
    }

    async fn deactivate_user(&self, id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query("UPDATE users SET is_active = FALSE WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .context("deactivate user")?;
        Ok(res.rows_affected() > 0)
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> anyhow::Result<bool> {
        let res = sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(&self.db)
            .await
            .context("set password hash")?;
        Ok(res.rows_affected() > 0)
    }
}

#[async_trait]
impl RelationshipRepo for PgStore {
    async fn relationship_exists(
        &self,
        specialist_id: Uuid,
        client_id: Uuid,
    ) -> anyhow::Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM coaching_relationships
                 WHERE specialist_id = $1 AND client_id = $2
            )
            "#,
        )
        .bind(specialist_id)
        .bind(client_id)
        .fetch_one(&self.db)
        .await
        .context("relationship exists")?;
        Ok(exists)
    }

    async fn link_client(
        &self,
        specialist_id: Uuid,
        draft: ClientDraft,
        intake: IntakeFields,
    ) -> anyhow::Result<LinkOutcome> {
        let mut tx = self.db.begin().await.context("begin tx")?;

        let existing = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1 FOR UPDATE"
        ))
        .bind(&draft.email)
        .fetch_optional(&mut *tx)
        .await
        .context("find client by email")?
        .map(User::try_from)
        .transpose()?;

        let (client, client_created) = match existing {
            Some(u) if u.role != Role::Client => return Ok(LinkOutcome::NotAClient),
            Some(u) => (u, false),
            None => {
                let u = insert_user_tx(
                    &mut tx,
                    NewUser {
                        email: draft.email,
                        password_hash: draft.password_hash,
                        first_name: draft.first_name,
                        last_name: draft.last_name,
                        middle_name: draft.middle_name,
                        phone_number: draft.phone_number,
                        role: Role::Client,
                    },
                )
                .await?;
                (u, true)
            }
        };

        let row = sqlx::query_as::<_, RelationshipRow>(&format!(
            r#"
            INSERT INTO coaching_relationships
                (id, specialist_id, client_id, diseases, exp_diets, exp_trainings,
                 bad_habits, food_preferences, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (specialist_id, client_id) DO NOTHING
            RETURNING {RELATIONSHIP_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(specialist_id)
        .bind(client.id)
        .bind(&intake.diseases)
        .bind(&intake.exp_diets)
        .bind(&intake.exp_trainings)
        .bind(&intake.bad_habits)
        .bind(&intake.food_preferences)
        .bind(&intake.notes)
        .fetch_optional(&mut *tx)
        .await
        .context("insert relationship")?;

        // Dropping `tx` without commit rolls back.
        let Some(row) = row else {
            return Ok(LinkOutcome::Duplicate);
        };

        tx.commit().await.context("commit tx")?;
        Ok(LinkOutcome::Linked {
            relationship: row.into(),
            client,
            client_created,
        })
    }

    async fn list_relationships(&self, specialist_id: Uuid) -> anyhow::Result<Vec<Relationship>> {
        let rows = sqlx::query_as::<_, RelationshipRow>(&format!(
            r#"
            SELECT {RELATIONSHIP_COLUMNS}
              FROM coaching_relationships
             WHERE specialist_id = $1
             ORDER BY created_at ASC
            "#
        ))
        .bind(specialist_id)
        .fetch_all(&self.db)
        .await
        .context("list relationships")?;
        Ok(rows.into_iter().map(Relationship::from).collect())
    }

    async fn find_relationship(&self, id: Uuid) -> anyhow::Result<Option<Relationship>> {
        let row = sqlx::query_as::<_, RelationshipRow>(&format!(
            "SELECT {RELATIONSHIP_COLUMNS} FROM coaching_relationships WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find relationship")?;
        Ok(row.map(Relationship::from))
    }

    async fn find_owned_relationship(
        &self,
        specialist_id: Uuid,
        id: Uuid,
    ) -> anyhow::Result<Option<Relationship>> {
        let row = sqlx::query_as::<_, RelationshipRow>(&format!(
            r#"
            SELECT {RELATIONSHIP_COLUMNS}
              FROM coaching_relationships
             WHERE id = $1 AND specialist_id = $2
            "#
        ))
        .bind(id)
        .bind(specialist_id)
        .fetch_optional(&self.db)
        .await
        .context("find owned relationship")?;
        Ok(row.map(Relationship::from))
    }

    async fn update_relationship(
        &self,
        id: Uuid,
        patch: IntakePatch,
    ) -> anyhow::Result<Option<Relationship>> {
        let mut tx = self.db.begin().await.context("begin tx")?;

        let Some(current) = sqlx::query_as::<_, RelationshipRow>(&format!(
            "SELECT {RELATIONSHIP_COLUMNS} FROM coaching_relationships WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .context("lock relationship")?
        else {
            return Ok(None);
        };

        let mut intake = Relationship::from(current).intake;
        patch.apply(&mut intake);

        let row = sqlx::query_as::<_, RelationshipRow>(&format!(
            r#"
            UPDATE coaching_relationships
               SET diseases = $2, exp_diets = $3, exp_trainings = $4, bad_habits = $5,
                   food_preferences = $6, notes = $7, updated_at = now()
             WHERE id = $1
            RETURNING {RELATIONSHIP_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&intake.diseases)
        .bind(&intake.exp_diets)
        .bind(&intake.exp_trainings)
        .bind(&intake.bad_habits)
        .bind(&intake.food_preferences)
        .bind(&intake.notes)
        .fetch_one(&mut *tx)
        .await
        .context("update relationship")?;

        tx.commit().await.context("commit tx")?;
        Ok(Some(row.into()))
    }
}

#[async_trait]
impl PlanRepo for PgStore {
    async fn insert_plan(&self, plan: NewPlan) -> anyhow::Result<Plan> {
        let mut tx = self.db.begin().await.context("begin tx")?;
        let targets = plan.targets.unwrap_or_default();
        let has_targets = plan.targets.is_some();

        let row = sqlx::query_as::<_, PlanRow>(&format!(
            r#"
            INSERT INTO plans (id, kind, specialist_id, client_id, name, describe,
                               kkal, protein, carbo, fat, start_date, end_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {PLAN_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(plan.kind.as_str())
        .bind(plan.specialist_id)
        .bind(plan.client_id)
        .bind(&plan.name)
        .bind(&plan.describe)
        .bind(has_targets.then_some(targets.kkal))
        .bind(has_targets.then_some(targets.protein))
        .bind(has_targets.then_some(targets.carbo))
        .bind(has_targets.then_some(targets.fat))
        .bind(plan.start_date)
        .bind(plan.end_date)
        .fetch_one(&mut *tx)
        .await
        .context("insert plan")?;

        let plan_id = row.id;
        link_entries_tx(&mut tx, plan_id, plan.entries).await?;
        let entries = Self::load_entries(&mut *tx, plan_id).await?;
        tx.commit().await.context("commit tx")?;

        row.into_plan(entries)
    }

    async fn find_plan(&self, id: Uuid) -> anyhow::Result<Option<Plan>> {
        let Some(row) = sqlx::query_as::<_, PlanRow>(&format!(
            "SELECT {PLAN_COLUMNS} FROM plans WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find plan")?
        else {
            return Ok(None);
        };
        let entries = Self::load_entries(&self.db, id).await?;
        row.into_plan(entries).map(Some)
    }

    async fn list_plans_for_client(
        &self,
        client_id: Uuid,
        kind: PlanKind,
    ) -> anyhow::Result<Vec<Plan>> {
        let rows = sqlx::query_as::<_, PlanRow>(&format!(
            r#"
            SELECT {PLAN_COLUMNS}
              FROM plans
             WHERE client_id = $1 AND kind = $2
             ORDER BY created_at DESC
            "#
        ))
        .bind(client_id)
        .bind(kind.as_str())
        .fetch_all(&self.db)
        .await
        .context("list plans for client")?;

        let mut plans = Vec::with_capacity(rows.len());
        for row in rows {
            let entries = Self::load_entries(&self.db, row.id).await?;
            plans.push(row.into_plan(entries)?);
        }
        Ok(plans)
    }

    async fn update_plan(&self, id: Uuid, update: PlanUpdate) -> anyhow::Result<Option<Plan>> {
        let mut tx = self.db.begin().await.context("begin tx")?;

        // Serializes clear-then-recreate against concurrent writers of this plan.
        let locked: Option<Uuid> = sqlx::query_scalar("SELECT id FROM plans WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .context("lock plan")?;
        if locked.is_none() {
            return Ok(None);
        }

        let targets = update.targets.unwrap_or_default();
        let has_targets = update.targets.is_some();
        let row = sqlx::query_as::<_, PlanRow>(&format!(
            r#"
            UPDATE plans
               SET name = $2, describe = $3, kkal = $4, protein = $5, carbo = $6, fat = $7,
                   start_date = $8, end_date = $9, edited_at = now()
             WHERE id = $1
            RETURNING {PLAN_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&update.name)
        .bind(&update.describe)
        .bind(has_targets.then_some(targets.kkal))
        .bind(has_targets.then_some(targets.protein))
        .bind(has_targets.then_some(targets.carbo))
        .bind(has_targets.then_some(targets.fat))
        .bind(update.start_date)
        .bind(update.end_date)
        .fetch_one(&mut *tx)
        .await
        .context("update plan")?;

        if let EntriesChange::Replace(entries) = update.entries {
            // Detach only; the entry rows themselves are kept.
            sqlx::query("DELETE FROM plan_entry_links WHERE plan_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await
                .context("detach plan entries")?;
            link_entries_tx(&mut tx, id, entries).await?;
        }

        let entries = Self::load_entries(&mut *tx, id).await?;
        tx.commit().await.context("commit tx")?;
        row.into_plan(entries).map(Some)
    }

    async fn deactivate_plan_for(&self, id: Uuid, party: Party) -> anyhow::Result<Option<Plan>> {
        let column = match party {
            Party::Client => "is_active_for_client",
            Party::Specialist => "is_active_for_specialist",
        };
        let Some(row) = sqlx::query_as::<_, PlanRow>(&format!(
            "UPDATE plans SET {column} = FALSE WHERE id = $1 RETURNING {PLAN_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("soft delete plan")?
        else {
            return Ok(None);
        };
        let entries = Self::load_entries(&self.db, id).await?;
        row.into_plan(entries).map(Some)
    }
}

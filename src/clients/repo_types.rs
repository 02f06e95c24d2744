use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::User;

/// Free-text intake data a specialist keeps about a client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeFields {
    pub diseases: Option<String>,
    pub exp_diets: Option<String>,
    pub exp_trainings: Option<String>,
    pub bad_habits: Option<String>,
    pub food_preferences: Option<String>,
    pub notes: Option<String>,
}

/// Partial intake update: `None` leaves a field alone, `Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct IntakePatch {
    pub diseases: Option<Option<String>>,
    pub exp_diets: Option<Option<String>>,
    pub exp_trainings: Option<Option<String>>,
    pub bad_habits: Option<Option<String>>,
    pub food_preferences: Option<Option<String>>,
    pub notes: Option<Option<String>>,
}

impl IntakePatch {
    pub fn apply(self, to: &mut IntakeFields) {
        fn merge(slot: &mut Option<String>, v: Option<Option<String>>) {
            if let Some(v) = v {
                *slot = v;
            }
        }
        merge(&mut to.diseases, self.diseases);
        merge(&mut to.exp_diets, self.exp_diets);
        merge(&mut to.exp_trainings, self.exp_trainings);
        merge(&mut to.bad_habits, self.bad_habits);
        merge(&mut to.food_preferences, self.food_preferences);
        merge(&mut to.notes, self.notes);
    }
}

/// "Specialist S coaches client C".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Relationship {
    pub id: Uuid,
    pub specialist_id: Uuid,
    pub client_id: Uuid,
    #[serde(flatten)]
    pub intake: IntakeFields,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, FromRow)]
pub struct RelationshipRow {
    pub id: Uuid,
    pub specialist_id: Uuid,
    pub client_id: Uuid,
    pub diseases: Option<String>,
    pub exp_diets: Option<String>,
    pub exp_trainings: Option<String>,
    pub bad_habits: Option<String>,
    pub food_preferences: Option<String>,
    pub notes: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl From<RelationshipRow> for Relationship {
    fn from(r: RelationshipRow) -> Self {
        Self {
            id: r.id,
            specialist_id: r.specialist_id,
            client_id: r.client_id,
            intake: IntakeFields {
                diseases: r.diseases,
                exp_diets: r.exp_diets,
                exp_trainings: r.exp_trainings,
                bad_habits: r.bad_habits,
                food_preferences: r.food_preferences,
                notes: r.notes,
            },
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

/// Natural-key description of the client a specialist is adding.
///
/// Used only when no identity with `email` exists yet; `password_hash` is the
/// hash of a generated placeholder password.
#[derive(Debug, Clone)]
pub struct ClientDraft {
    pub email: String,
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub middle_name: Option<String>,
    pub phone_number: Option<String>,
}

/// Result of the atomic find-or-create-client + link step.
#[derive(Debug, Clone)]
pub enum LinkOutcome {
    Linked {
        relationship: Relationship,
        client: User,
        client_created: bool,
    },
    /// The pair already exists; nothing was written.
    Duplicate,
    /// The email belongs to an identity that is not a client; nothing was written.
    NotAClient,
}

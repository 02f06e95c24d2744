use serde::{Deserialize, Deserializer, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::{IntakeFields, IntakePatch, Relationship};
use crate::auth::dto::PublicUser;

/// The person a specialist is adding; `email` is the natural key.
#[derive(Debug, Deserialize)]
pub struct ClientInput {
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub middle_name: Option<String>,
    pub phone_number: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateClientRequest {
    pub client: ClientInput,
    #[serde(flatten)]
    pub intake: IntakeFields,
}

/// Absent keys stay untouched, explicit `null` clears.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateClientRequest {
    #[serde(default, deserialize_with = "deserialize_some")]
    pub diseases: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub exp_diets: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub exp_trainings: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub bad_habits: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub food_preferences: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub notes: Option<Option<String>>,
}

pub(crate) fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl From<UpdateClientRequest> for IntakePatch {
    fn from(r: UpdateClientRequest) -> Self {
        Self {
            diseases: r.diseases,
            exp_diets: r.exp_diets,
            exp_trainings: r.exp_trainings,
            bad_habits: r.bad_habits,
            food_preferences: r.food_preferences,
            notes: r.notes,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListClientsQuery {
    pub specialist: Option<Uuid>,
}

/// Relationship as shown on the specialist's "my clients" screens.
#[derive(Debug, Clone, Serialize)]
pub struct ClientCard {
    pub id: Uuid,
    pub specialist: Uuid,
    pub client: PublicUser,
    #[serde(flatten)]
    pub intake: IntakeFields,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl ClientCard {
    pub fn new(relationship: Relationship, client: PublicUser) -> Self {
        Self {
            id: relationship.id,
            specialist: relationship.specialist_id,
            client,
            intake: relationship.intake,
            created_at: relationship.created_at,
            updated_at: relationship.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreatedClient {
    #[serde(flatten)]
    pub card: ClientCard,
    pub client_created: bool,
    /// Initial password of a freshly created identity; shown once.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temporary_password: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_distinguishes_absent_from_null() {
        let req: UpdateClientRequest =
            serde_json::from_str(r#"{"notes": null, "diseases": "asthma"}"#).unwrap();
        assert_eq!(req.notes, Some(None));
        assert_eq!(req.diseases, Some(Some("asthma".into())));
        assert_eq!(req.bad_habits, None);
    }

    #[test]
    fn create_request_flattens_intake() {
        let req: CreateClientRequest = serde_json::from_str(
            r#"{"client": {"email": "c@x.com", "first_name": "Cat"}, "notes": "n"}"#,
        )
        .unwrap();
        assert_eq!(req.client.email, "c@x.com");
        assert_eq!(req.intake.notes.as_deref(), Some("n"));
        assert_eq!(req.intake.diseases, None);
    }
}

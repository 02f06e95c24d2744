use serde::{Deserialize, Deserializer};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    repo_types::Party,
    sync::{CARBO_MAX_PER_DAY, FAT_MAX_PER_DAY, KKAL_MAX_PER_DAY, PROTEIN_MAX_PER_DAY},
};
use crate::clients::dto::deserialize_some;

/// One weekday entry as sent by the caller; the weekday is checked by the
/// sync engine so a bad value can be reported per index.
#[derive(Debug, Clone, Deserialize)]
pub struct EntryInput {
    #[serde(deserialize_with = "weekday_text")]
    pub weekday: String,
    pub spec_comment: Option<String>,
    pub user_comment: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WeekdayValue {
    Text(String),
    Number(i64),
}

/// Weekdays arrive as `"3"` or `3`.
fn weekday_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match WeekdayValue::deserialize(deserializer)? {
        WeekdayValue::Text(s) => s,
        WeekdayValue::Number(n) => n.to_string(),
    })
}

/// Daily targets as sent; wide enough that an oversized value still
/// reaches the ceiling check.
#[derive(Debug, Clone, Copy, Default)]
pub struct NutritionInput {
    pub kkal: Option<i64>,
    pub protein: Option<i64>,
    pub carbo: Option<i64>,
    pub fat: Option<i64>,
}

impl NutritionInput {
    /// `(field, value, inclusive ceiling)`
    pub fn fields(&self) -> [(&'static str, Option<i64>, i64); 4] {
        [
            ("kkal", self.kkal, KKAL_MAX_PER_DAY),
            ("protein", self.protein, PROTEIN_MAX_PER_DAY),
            ("carbo", self.carbo, CARBO_MAX_PER_DAY),
            ("fat", self.fat, FAT_MAX_PER_DAY),
        ]
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CreatePlanRequest {
    pub client: Option<Uuid>,
    pub specialist: Option<Uuid>,
    pub name: Option<String>,
    pub describe: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub start_date: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub end_date: Option<OffsetDateTime>,
    pub kkal: Option<i64>,
    pub protein: Option<i64>,
    pub carbo: Option<i64>,
    pub fat: Option<i64>,
    /// Absent and `[]` differ: only a present key is synced.
    #[serde(default, alias = "training", alias = "diet")]
    pub entries: Option<Vec<EntryInput>>,
}

impl CreatePlanRequest {
    pub fn nutrition(&self) -> NutritionInput {
        NutritionInput {
            kkal: self.kkal,
            protein: self.protein,
            carbo: self.carbo,
            fat: self.fat,
        }
    }
}

/// Partial update. Owners are fixed at creation and ignored here.
#[derive(Debug, Default, Deserialize)]
pub struct UpdatePlanRequest {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub describe: Option<Option<String>>,
    #[serde(default, deserialize_with = "some_rfc3339")]
    pub start_date: Option<Option<OffsetDateTime>>,
    #[serde(default, deserialize_with = "some_rfc3339")]
    pub end_date: Option<Option<OffsetDateTime>>,
    pub kkal: Option<i64>,
    pub protein: Option<i64>,
    pub carbo: Option<i64>,
    pub fat: Option<i64>,
    #[serde(default, alias = "training", alias = "diet")]
    pub entries: Option<Vec<EntryInput>>,
}

impl UpdatePlanRequest {
    pub fn nutrition(&self) -> NutritionInput {
        NutritionInput {
            kkal: self.kkal,
            protein: self.protein,
            carbo: self.carbo,
            fat: self.fat,
        }
    }
}

fn some_rfc3339<'de, D>(deserializer: D) -> Result<Option<Option<OffsetDateTime>>, D::Error>
where
    D: Deserializer<'de>,
{
    time::serde::rfc3339::option::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize)]
pub struct ListPlansQuery {
    #[serde(alias = "user")]
    pub client: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct DeletePlanQuery {
    pub party: Option<Party>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_alias_and_absence() {
        let req: CreatePlanRequest =
            serde_json::from_str(r#"{"diet": [{"weekday": "3"}], "kkal": 1800}"#).unwrap();
        let entries = req.entries.as_ref().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].weekday, "3");
        assert_eq!(req.nutrition().kkal, Some(1800));

        let req: CreatePlanRequest = serde_json::from_str(r#"{"name": "x"}"#).unwrap();
        assert!(req.entries.is_none());

        let req: UpdatePlanRequest = serde_json::from_str(r#"{"training": []}"#).unwrap();
        assert_eq!(req.entries.map(|e| e.len()), Some(0));
    }

    #[test]
    fn weekday_accepts_text_or_number() {
        let req: CreatePlanRequest = serde_json::from_str(
            r#"{"training": [{"weekday": 1}, {"weekday": "7"}], "kkal": 20000000000}"#,
        )
        .unwrap();
        let days: Vec<_> = req
            .entries
            .unwrap()
            .into_iter()
            .map(|e| e.weekday)
            .collect();
        assert_eq!(days, vec!["1", "7"]);
        assert_eq!(req.kkal, Some(20_000_000_000));

        assert!(serde_json::from_str::<EntryInput>(r#"{"weekday": true}"#).is_err());
    }

    #[test]
    fn update_dates_distinguish_null_from_absent() {
        let req: UpdatePlanRequest = serde_json::from_str(
            r#"{"start_date": null, "end_date": "2024-03-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(req.start_date, Some(None));
        assert!(matches!(req.end_date, Some(Some(_))));
        assert_eq!(req.describe, None);
    }

    #[test]
    fn list_query_accepts_user_alias() {
        let id = Uuid::new_v4();
        let q: ListPlansQuery = serde_json::from_value(serde_json::json!({ "user": id })).unwrap();
        assert_eq!(q.client, Some(id));
    }
}

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// The two structurally identical plan aggregates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PlanKind {
    Training,
    Diet,
}

impl PlanKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanKind::Training => "training",
            PlanKind::Diet => "diet",
        }
    }
}

impl fmt::Display for PlanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "training" => Ok(PlanKind::Training),
            "diet" => Ok(PlanKind::Diet),
            other => anyhow::bail!("unknown plan kind {other:?}"),
        }
    }
}

/// Day of week, serialized as "1" (Monday) through "7" (Sunday).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Weekday {
    #[serde(rename = "1")]
    Monday,
    #[serde(rename = "2")]
    Tuesday,
    #[serde(rename = "3")]
    Wednesday,
    #[serde(rename = "4")]
    Thursday,
    #[serde(rename = "5")]
    Friday,
    #[serde(rename = "6")]
    Saturday,
    #[serde(rename = "7")]
    Sunday,
}

impl Weekday {
    pub const ALL: [Weekday; 7] = [
        Weekday::Monday,
        Weekday::Tuesday,
        Weekday::Wednesday,
        Weekday::Thursday,
        Weekday::Friday,
        Weekday::Saturday,
        Weekday::Sunday,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Weekday::Monday => "1",
            Weekday::Tuesday => "2",
            Weekday::Wednesday => "3",
            Weekday::Thursday => "4",
            Weekday::Friday => "5",
            Weekday::Saturday => "6",
            Weekday::Sunday => "7",
        }
    }
}

impl FromStr for Weekday {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Weekday::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("weekday must be one of 1..7, got {s:?}"))
    }
}

/// Which owner is acting on a plan's soft-delete flag.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Party {
    Client,
    Specialist,
}

/// Daily nutrition ceilings; diet plans only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NutritionTargets {
    pub kkal: i32,
    pub protein: i32,
    pub carbo: i32,
    pub fat: i32,
}

/// One weekday's prescription inside a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanEntry {
    pub id: Uuid,
    pub weekday: Weekday,
    pub spec_comment: Option<String>,
    pub user_comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub id: Uuid,
    pub kind: PlanKind,
    #[serde(rename = "specialist")]
    pub specialist_id: Uuid,
    #[serde(rename = "client")]
    pub client_id: Uuid,
    pub name: String,
    pub describe: Option<String>,
    #[serde(flatten)]
    pub targets: Option<NutritionTargets>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub start_date: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub end_date: Option<OffsetDateTime>,
    pub is_active_for_client: bool,
    pub is_active_for_specialist: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub edited_at: OffsetDateTime,
    pub entries: Vec<PlanEntry>,
}

impl Plan {
    pub fn is_active_for(&self, party: Party) -> bool {
        match party {
            Party::Client => self.is_active_for_client,
            Party::Specialist => self.is_active_for_specialist,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub id: Uuid,
    pub kind: PlanKind,
    pub name: String,
    #[serde(rename = "specialist")]
    pub specialist_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub entries: usize,
}

impl From<&Plan> for PlanSummary {
    fn from(p: &Plan) -> Self {
        Self {
            id: p.id,
            kind: p.kind,
            name: p.name.clone(),
            specialist_id: p.specialist_id,
            created_at: p.created_at,
            entries: p.entries.len(),
        }
    }
}

#[derive(Debug, FromRow)]
pub struct PlanRow {
    pub id: Uuid,
    pub kind: String,
    pub specialist_id: Uuid,
    pub client_id: Uuid,
    pub name: String,
    pub describe: Option<String>,
    pub kkal: Option<i32>,
    pub protein: Option<i32>,
    pub carbo: Option<i32>,
    pub fat: Option<i32>,
    pub start_date: Option<OffsetDateTime>,
    pub end_date: Option<OffsetDateTime>,
    pub is_active_for_client: bool,
    pub is_active_for_specialist: bool,
    pub created_at: OffsetDateTime,
    pub edited_at: OffsetDateTime,
}

impl PlanRow {
    pub fn into_plan(self, entries: Vec<PlanEntry>) -> anyhow::Result<Plan> {
        let kind: PlanKind = self.kind.parse()?;
        let targets = match kind {
            PlanKind::Diet => Some(NutritionTargets {
                kkal: self.kkal.unwrap_or(0),
                protein: self.protein.unwrap_or(0),
                carbo: self.carbo.unwrap_or(0),
                fat: self.fat.unwrap_or(0),
            }),
            PlanKind::Training => None,
        };
        Ok(Plan {
            id: self.id,
            kind,
            specialist_id: self.specialist_id,
            client_id: self.client_id,
            name: self.name,
            describe: self.describe,
            targets,
            start_date: self.start_date,
            end_date: self.end_date,
            is_active_for_client: self.is_active_for_client,
            is_active_for_specialist: self.is_active_for_specialist,
            created_at: self.created_at,
            edited_at: self.edited_at,
            entries,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct PlanEntryRow {
    pub id: Uuid,
    pub weekday: String,
    pub specialist_comment: Option<String>,
    pub client_comment: Option<String>,
}

impl TryFrom<PlanEntryRow> for PlanEntry {
    type Error = anyhow::Error;

    fn try_from(r: PlanEntryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            weekday: r.weekday.parse()?,
            spec_comment: r.specialist_comment,
            user_comment: r.client_comment,
        })
    }
}

/// A validated entry ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub weekday: Weekday,
    pub spec_comment: Option<String>,
    pub user_comment: Option<String>,
}

/// A validated plan ready to be written together with its entries.
#[derive(Debug, Clone)]
pub struct NewPlan {
    pub kind: PlanKind,
    pub specialist_id: Uuid,
    pub client_id: Uuid,
    pub name: String,
    pub describe: Option<String>,
    pub targets: Option<NutritionTargets>,
    pub start_date: Option<OffsetDateTime>,
    pub end_date: Option<OffsetDateTime>,
    pub entries: Vec<NewEntry>,
}

/// What happens to a plan's entry links during an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntriesChange {
    /// The payload had no entries key.
    Keep,
    /// Detach every current link, then link these fresh entries in order.
    Replace(Vec<NewEntry>),
}

/// A validated update. Scalar fields hold the merged (final) values.
#[derive(Debug, Clone)]
pub struct PlanUpdate {
    pub name: String,
    pub describe: Option<String>,
    pub targets: Option<NutritionTargets>,
    pub start_date: Option<OffsetDateTime>,
    pub end_date: Option<OffsetDateTime>,
    pub entries: EntriesChange,
}

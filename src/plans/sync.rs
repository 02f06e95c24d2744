//! Plan create/update reconciliation.
//!
//! Everything here is pure: a request is validated in full and turned into a
//! [`NewPlan`] or [`PlanUpdate`] before any store call. The store then applies
//! it in one atomic unit, so a bad entry can never leave a half-written plan.

use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    dto::{CreatePlanRequest, EntryInput, NutritionInput, UpdatePlanRequest},
    repo_types::{
        EntriesChange, NewEntry, NewPlan, NutritionTargets, Plan, PlanKind, PlanUpdate, Weekday,
    },
};
use crate::{
    auth::{
        repo_types::{Role, User},
        services::clean,
    },
    error::{AppError, AppResult, FieldError},
};

pub const NAME_MAX_LENGTH: usize = 128;
pub const TEXT_MAX_LENGTH: usize = 300;

pub const KKAL_MAX_PER_DAY: i64 = 10_000;
pub const PROTEIN_MAX_PER_DAY: i64 = 500;
pub const CARBO_MAX_PER_DAY: i64 = 1_000;
pub const FAT_MAX_PER_DAY: i64 = 300;

/// Every ceiling fits in `i32`, so a checked value always narrows.
fn narrow(v: Option<i64>) -> Option<i32> {
    v.and_then(|v| i32::try_from(v).ok())
}

/// The two owners of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owners {
    pub specialist_id: Uuid,
    pub client_id: Uuid,
}

impl Owners {
    /// Pick the owner fields by the requester's role: the requester fills its
    /// own side and must name the other one.
    pub fn resolve(
        requester: &User,
        client: Option<Uuid>,
        specialist: Option<Uuid>,
    ) -> AppResult<Self> {
        let missing = |param| AppError::RequestShape { param };
        match requester.role {
            Role::Specialist => Ok(Self {
                specialist_id: requester.id,
                client_id: client.ok_or_else(|| missing("client"))?,
            }),
            Role::Client => Ok(Self {
                specialist_id: specialist.ok_or_else(|| missing("specialist"))?,
                client_id: requester.id,
            }),
            Role::Admin => Ok(Self {
                specialist_id: specialist.ok_or_else(|| missing("specialist"))?,
                client_id: client.ok_or_else(|| missing("client"))?,
            }),
        }
    }
}

fn check_len(field: &str, value: Option<&str>, max: usize, errors: &mut Vec<FieldError>) {
    if value.is_some_and(|v| v.chars().count() > max) {
        errors.push(FieldError::new(
            field,
            format!("must be at most {max} characters"),
        ));
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PlanSyncEngine {
    kind: PlanKind,
}

impl PlanSyncEngine {
    pub fn new(kind: PlanKind) -> Self {
        Self { kind }
    }

    fn check_nutrition(&self, input: NutritionInput, errors: &mut Vec<FieldError>) {
        for (field, value, max) in input.fields() {
            let Some(v) = value else { continue };
            match self.kind {
                PlanKind::Training => {
                    errors.push(FieldError::new(field, "not allowed on a training plan"))
                }
                PlanKind::Diet => {
                    if !(0..=max).contains(&v) {
                        errors.push(FieldError::new(field, format!("must be between 0 and {max}")));
                    }
                }
            }
        }
    }

    fn merge_targets(
        &self,
        base: Option<NutritionTargets>,
        input: NutritionInput,
    ) -> Option<NutritionTargets> {
        match self.kind {
            PlanKind::Training => None,
            PlanKind::Diet => {
                let base = base.unwrap_or_default();
                Some(NutritionTargets {
                    kkal: narrow(input.kkal).unwrap_or(base.kkal),
                    protein: narrow(input.protein).unwrap_or(base.protein),
                    carbo: narrow(input.carbo).unwrap_or(base.carbo),
                    fat: narrow(input.fat).unwrap_or(base.fat),
                })
            }
        }
    }

    fn check_dates(
        start: Option<OffsetDateTime>,
        end: Option<OffsetDateTime>,
        errors: &mut Vec<FieldError>,
    ) {
        if let (Some(start), Some(end)) = (start, end) {
            if end < start {
                errors.push(FieldError::new("end_date", "must not precede start_date"));
            }
        }
    }

    /// Validate every entry, reporting failures by index.
    fn entries(&self, input: Vec<EntryInput>, errors: &mut Vec<FieldError>) -> Vec<NewEntry> {
        let mut out = Vec::with_capacity(input.len());
        for (i, e) in input.into_iter().enumerate() {
            let spec_comment = clean(e.spec_comment);
            let user_comment = clean(e.user_comment);
            check_len(
                &format!("entries[{i}].spec_comment"),
                spec_comment.as_deref(),
                TEXT_MAX_LENGTH,
                errors,
            );
            check_len(
                &format!("entries[{i}].user_comment"),
                user_comment.as_deref(),
                TEXT_MAX_LENGTH,
                errors,
            );
            match e.weekday.trim().parse::<Weekday>() {
                Ok(weekday) => out.push(NewEntry {
                    weekday,
                    spec_comment,
                    user_comment,
                }),
                Err(_) => errors.push(FieldError::new(
                    format!("entries[{i}].weekday"),
                    "must be one of 1..7",
                )),
            }
        }
        out
    }

    pub fn prepare_create(&self, owners: Owners, req: CreatePlanRequest) -> AppResult<NewPlan> {
        let mut errors = Vec::new();
        let nutrition = req.nutrition();

        let name = clean(req.name).unwrap_or_default();
        let describe = clean(req.describe);
        check_len("name", Some(name.as_str()), NAME_MAX_LENGTH, &mut errors);
        check_len("describe", describe.as_deref(), TEXT_MAX_LENGTH, &mut errors);
        self.check_nutrition(nutrition, &mut errors);
        Self::check_dates(req.start_date, req.end_date, &mut errors);
        let entries = self.entries(req.entries.unwrap_or_default(), &mut errors);

        if !errors.is_empty() {
            return Err(AppError::Validation(errors));
        }

        Ok(NewPlan {
            kind: self.kind,
            specialist_id: owners.specialist_id,
            client_id: owners.client_id,
            name,
            describe,
            targets: self.merge_targets(None, nutrition),
            start_date: req.start_date,
            end_date: req.end_date,
            entries,
        })
    }

    /// Merge the request over `current`. An absent entries key keeps the
    /// current links; a present one (even empty) replaces them all.
    pub fn prepare_update(&self, current: &Plan, req: UpdatePlanRequest) -> AppResult<PlanUpdate> {
        let mut errors = Vec::new();
        let nutrition = req.nutrition();

        let name = match req.name {
            Some(n) => clean(Some(n)).unwrap_or_default(),
            None => current.name.clone(),
        };
        let describe = match req.describe {
            Some(d) => clean(d),
            None => current.describe.clone(),
        };
        let start_date = req.start_date.unwrap_or(current.start_date);
        let end_date = req.end_date.unwrap_or(current.end_date);

        check_len("name", Some(name.as_str()), NAME_MAX_LENGTH, &mut errors);
        check_len("describe", describe.as_deref(), TEXT_MAX_LENGTH, &mut errors);
        self.check_nutrition(nutrition, &mut errors);
        Self::check_dates(start_date, end_date, &mut errors);
        let entries = match req.entries {
            Some(list) => EntriesChange::Replace(self.entries(list, &mut errors)),
            None => EntriesChange::Keep,
        };

        if !errors.is_empty() {
            return Err(AppError::Validation(errors));
        }

        Ok(PlanUpdate {
            name,
            describe,
            targets: self.merge_targets(current.targets, nutrition),
            start_date,
            end_date,
            entries,
        })
    }
}

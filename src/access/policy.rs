use std::str::FromStr;

use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    auth::repo_types::{Role, User},
    error::{AppError, AppResult},
    store::RelationshipRepo,
};

/// Read-only vs mutating request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodClass {
    Safe,
    Unsafe,
}

/// How `Safe` requests are gated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadPolicy {
    /// Any authenticated identity may read.
    #[default]
    Open,
    /// Reads go through the same ownership rules as writes.
    Relationship,
}

impl FromStr for ReadPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(ReadPolicy::Open),
            "relationship" => Ok(ReadPolicy::Relationship),
            other => anyhow::bail!("unknown PLAN_READ_POLICY {other:?}, expected open or relationship"),
        }
    }
}

/// What the requester wants to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// A loaded relationship or plan with both owners resolved.
    Owned { specialist_id: Uuid, client_id: Uuid },
    /// A client id supplied out-of-band by the request.
    Client(Uuid),
}

impl Target {
    pub fn client_id(&self) -> Uuid {
        match *self {
            Target::Owned { client_id, .. } => client_id,
            Target::Client(id) => id,
        }
    }

    /// Resolve a raw client reference from the query string or the payload.
    ///
    /// Absence is a request-shape problem, not a denial.
    pub fn client_ref(
        query: Option<Uuid>,
        payload: Option<Uuid>,
        param: &'static str,
    ) -> AppResult<Self> {
        query
            .or(payload)
            .map(Target::Client)
            .ok_or(AppError::RequestShape { param })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    NotOwner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    /// Denials surface as a bare `Forbidden`; the reason stays in the logs.
    pub fn into_result(self) -> AppResult<()> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny(_) => Err(AppError::Forbidden),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AccessPolicy {
    pub reads: ReadPolicy,
}

impl AccessPolicy {
    pub fn new(reads: ReadPolicy) -> Self {
        Self { reads }
    }

    /// First matching rule wins:
    /// admin; open reads; client acting on itself; specialist coaching the
    /// target client. At most one relationship lookup is issued.
    pub async fn authorize<R>(
        &self,
        relationships: &R,
        requester: &User,
        method: MethodClass,
        target: Target,
    ) -> anyhow::Result<Decision>
    where
        R: RelationshipRepo + ?Sized,
    {
        if requester.is_admin() {
            return Ok(Decision::Allow);
        }
        if method == MethodClass::Safe && self.reads == ReadPolicy::Open {
            return Ok(Decision::Allow);
        }

        let client_id = target.client_id();
        let decision = match requester.role {
            Role::Client if client_id == requester.id => Decision::Allow,
            Role::Specialist => {
                if relationships
                    .relationship_exists(requester.id, client_id)
                    .await?
                {
                    Decision::Allow
                } else {
                    Decision::Deny(DenyReason::NotOwner)
                }
            }
            _ => Decision::Deny(DenyReason::NotOwner),
        };

        match decision {
            Decision::Allow => debug!(requester = %requester.id, %client_id, ?method, "access allowed"),
            Decision::Deny(reason) => warn!(
                requester = %requester.id,
                role = %requester.role,
                %client_id,
                ?method,
                ?reason,
                "access denied"
            ),
        }
        Ok(decision)
    }

    /// [`authorize`](Self::authorize) collapsed into the request error type.
    pub async fn ensure<R>(
        &self,
        relationships: &R,
        requester: &User,
        method: MethodClass,
        target: Target,
    ) -> AppResult<()>
    where
        R: RelationshipRepo + ?Sized,
    {
        self.authorize(relationships, requester, method, target)
            .await?
            .into_result()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use time::OffsetDateTime;

    use super::*;
    use crate::clients::repo_types::{
        ClientDraft, IntakeFields, IntakePatch, LinkOutcome, Relationship,
    };

    /// Relationship store with a fixed answer that counts lookups.
    struct Fixed {
        pairs: Vec<(Uuid, Uuid)>,
        lookups: AtomicUsize,
    }

    impl Fixed {
        fn new(pairs: Vec<(Uuid, Uuid)>) -> Self {
            Self {
                pairs,
                lookups: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RelationshipRepo for Fixed {
        async fn relationship_exists(&self, s: Uuid, c: Uuid) -> anyhow::Result<bool> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.pairs.contains(&(s, c)))
        }
        async fn link_client(
            &self,
            _: Uuid,
            _: ClientDraft,
            _: IntakeFields,
        ) -> anyhow::Result<LinkOutcome> {
            unreachable!()
        }
        async fn list_relationships(&self, _: Uuid) -> anyhow::Result<Vec<Relationship>> {
            unreachable!()
        }
        async fn find_relationship(&self, _: Uuid) -> anyhow::Result<Option<Relationship>> {
            unreachable!()
        }
        async fn find_owned_relationship(
            &self,
            _: Uuid,
            _: Uuid,
        ) -> anyhow::Result<Option<Relationship>> {
            unreachable!()
        }
        async fn update_relationship(
            &self,
            _: Uuid,
            _: IntakePatch,
        ) -> anyhow::Result<Option<Relationship>> {
            unreachable!()
        }
    }

    fn user(role: Role) -> User {
        User {
            id: Uuid::new_v4(),
            email: format!("{}@example.com", Uuid::new_v4()),
            password_hash: String::new(),
            first_name: None,
            last_name: None,
            middle_name: None,
            phone_number: None,
            role,
            is_active: true,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn admin_is_always_allowed() {
        let repo = Fixed::new(vec![]);
        let admin = user(Role::Admin);
        let policy = AccessPolicy::new(ReadPolicy::Relationship);
        for method in [MethodClass::Safe, MethodClass::Unsafe] {
            for target in [
                Target::Client(Uuid::new_v4()),
                Target::Owned {
                    specialist_id: Uuid::new_v4(),
                    client_id: Uuid::new_v4(),
                },
            ] {
                let d = policy.authorize(&repo, &admin, method, target).await.unwrap();
                assert_eq!(d, Decision::Allow);
            }
        }
        assert_eq!(repo.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn open_reads_skip_ownership() {
        let repo = Fixed::new(vec![]);
        let stranger = user(Role::Specialist);
        let d = AccessPolicy::default()
            .authorize(&repo, &stranger, MethodClass::Safe, Target::Client(Uuid::new_v4()))
            .await
            .unwrap();
        assert_eq!(d, Decision::Allow);
        assert_eq!(repo.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn strict_reads_require_relationship() {
        let specialist = user(Role::Specialist);
        let client = user(Role::Client);
        let policy = AccessPolicy::new(ReadPolicy::Relationship);

        let repo = Fixed::new(vec![]);
        let d = policy
            .authorize(&repo, &specialist, MethodClass::Safe, Target::Client(client.id))
            .await
            .unwrap();
        assert_eq!(d, Decision::Deny(DenyReason::NotOwner));

        let repo = Fixed::new(vec![(specialist.id, client.id)]);
        let d = policy
            .authorize(&repo, &specialist, MethodClass::Safe, Target::Client(client.id))
            .await
            .unwrap();
        assert_eq!(d, Decision::Allow);
    }

    #[tokio::test]
    async fn client_may_write_own_resources_only() {
        let repo = Fixed::new(vec![]);
        let client = user(Role::Client);
        let policy = AccessPolicy::default();

        let own = Target::Owned {
            specialist_id: Uuid::new_v4(),
            client_id: client.id,
        };
        assert_eq!(
            policy
                .authorize(&repo, &client, MethodClass::Unsafe, own)
                .await
                .unwrap(),
            Decision::Allow
        );

        let other = Target::Client(Uuid::new_v4());
        assert_eq!(
            policy
                .authorize(&repo, &client, MethodClass::Unsafe, other)
                .await
                .unwrap(),
            Decision::Deny(DenyReason::NotOwner)
        );
        assert_eq!(repo.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn specialist_writes_need_relationship() {
        let specialist = user(Role::Specialist);
        let coached = user(Role::Client);
        let stranger = user(Role::Client);
        let repo = Fixed::new(vec![(specialist.id, coached.id)]);
        let policy = AccessPolicy::default();

        let allowed = policy
            .authorize(&repo, &specialist, MethodClass::Unsafe, Target::Client(coached.id))
            .await
            .unwrap();
        assert_eq!(allowed, Decision::Allow);

        let denied = policy
            .authorize(&repo, &specialist, MethodClass::Unsafe, Target::Client(stranger.id))
            .await
            .unwrap();
        assert_eq!(denied, Decision::Deny(DenyReason::NotOwner));
        assert_eq!(repo.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn specialist_acting_as_client_target_is_not_self() {
        // a specialist whose own id is the target is not a client owner
        let repo = Fixed::new(vec![]);
        let specialist = user(Role::Specialist);
        let d = AccessPolicy::default()
            .authorize(&repo, &specialist, MethodClass::Unsafe, Target::Client(specialist.id))
            .await
            .unwrap();
        assert_eq!(d, Decision::Deny(DenyReason::NotOwner));
    }

    #[test]
    fn missing_client_reference_is_request_shape_error() {
        let err = Target::client_ref(None, None, "client").unwrap_err();
        assert!(matches!(err, AppError::RequestShape { param: "client" }));

        let id = Uuid::new_v4();
        assert_eq!(
            Target::client_ref(None, Some(id), "client").unwrap(),
            Target::Client(id)
        );
        let q = Uuid::new_v4();
        assert_eq!(
            Target::client_ref(Some(q), Some(id), "client").unwrap(),
            Target::Client(q)
        );
    }

    #[test]
    fn read_policy_parses() {
        assert_eq!("open".parse::<ReadPolicy>().unwrap(), ReadPolicy::Open);
        assert_eq!(
            "relationship".parse::<ReadPolicy>().unwrap(),
            ReadPolicy::Relationship
        );
        assert!("strict".parse::<ReadPolicy>().is_err());
    }
}

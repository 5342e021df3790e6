//! User provisioning and role management
//!
//! Users are created on first successful IdP login. Bootstrap rule: when
//! the users table is empty, the first provisioned user becomes admin
//! atomically; every later user starts as a regular user. Role changes
//! after that require an admin actor and are audited by the caller.

use std::sync::Arc;

use chrono::Utc;
use mnema_core::{
    AccessError, EntityIdType, MnemaError, MnemaResult, Principal, Role, StorageError, User,
    UserId,
};
use mnema_storage::{backend::tables, MemoryBackend, Query};
use serde_json::json;

/// Profile attributes delivered by the identity provider.
#[derive(Debug, Clone)]
pub struct NewUserProfile {
    pub external_subject: String,
    pub email: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

/// Store for user rows.
pub struct UserStore {
    backend: Arc<dyn MemoryBackend>,
}

impl UserStore {
    pub fn new(backend: Arc<dyn MemoryBackend>) -> Self {
        Self { backend }
    }

    fn decode(row: serde_json::Value) -> MnemaResult<User> {
        crate::codec::decode_row(tables::USERS, row)
    }

    /// Fetch a user by id.
    pub async fn get(&self, user_id: UserId) -> MnemaResult<Option<User>> {
        let row = self.backend.get(tables::USERS, user_id.as_uuid()).await?;
        row.map(Self::decode).transpose()
    }

    /// Fetch a user by the IdP subject identifier.
    pub async fn get_by_subject(&self, subject: &str) -> MnemaResult<Option<User>> {
        let query = Query::filtered(mnema_core::FilterExpr::eq(
            "external_subject",
            json!(subject),
        ))
        .with_limit(1);
        let mut rows = self.backend.query(tables::USERS, &query).await?;
        rows.pop().map(Self::decode).transpose()
    }

    /// Whether a user row exists. Memory writes for unknown owners are
    /// rejected upstream with this check.
    pub async fn exists(&self, user_id: UserId) -> MnemaResult<bool> {
        Ok(self.get(user_id).await?.is_some())
    }

    /// Look up or create the user for a successful IdP login.
    ///
    /// Returns the user plus whether it was created by this call. The
    /// first-ever user is promoted to admin through the backend's atomic
    /// insert-if-empty primitive; losing that race demotes the insert to a
    /// plain user row.
    pub async fn provision(&self, profile: NewUserProfile) -> MnemaResult<(User, bool)> {
        if let Some(mut existing) = self.get_by_subject(&profile.external_subject).await? {
            // Refresh mutable profile fields on every login.
            let mut dirty = false;
            if existing.email != profile.email {
                existing.email = profile.email;
                dirty = true;
            }
            if existing.display_name != profile.display_name {
                existing.display_name = profile.display_name;
                dirty = true;
            }
            if existing.avatar_url != profile.avatar_url {
                existing.avatar_url = profile.avatar_url;
                dirty = true;
            }
            if dirty {
                existing.updated_at = Utc::now();
                self.backend
                    .upsert(
                        tables::USERS,
                        existing.user_id.as_uuid(),
                        crate::codec::encode_row(tables::USERS, &existing)?,
                    )
                    .await?;
            }
            return Ok((existing, false));
        }

        let now = Utc::now();
        let user_id = UserId::now_v7();
        let mut user = User {
            user_id,
            external_subject: profile.external_subject.clone(),
            email: profile.email.clone(),
            display_name: profile.display_name.clone(),
            avatar_url: profile.avatar_url.clone(),
            role: Role::Admin,
            created_at: now,
            updated_at: now,
        };

        // First user ever becomes admin, atomically with the emptiness check.
        let became_admin = self
            .backend
            .put_if_table_empty(
                tables::USERS,
                user_id.as_uuid(),
                crate::codec::encode_row(tables::USERS, &user)?,
            )
            .await?;

        if became_admin {
            tracing::info!(user_id = %user_id, email = %user.email, "bootstrap admin provisioned");
            return Ok((user, true));
        }

        // Lost the bootstrap race (or table already populated): plain user.
        user.role = Role::User;
        match self
            .backend
            .put(
                tables::USERS,
                user_id.as_uuid(),
                crate::codec::encode_row(tables::USERS, &user)?,
            )
            .await
        {
            Ok(()) => Ok((user, true)),
            // Concurrent login with the same subject: fall back to lookup.
            Err(MnemaError::Storage(StorageError::Conflict { .. })) => {
                match self.get_by_subject(&profile.external_subject).await? {
                    Some(existing) => Ok((existing, false)),
                    None => Err(MnemaError::Storage(StorageError::Conflict {
                        table: tables::USERS.to_string(),
                        reason: "concurrent provisioning".to_string(),
                    })),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Change a user's role. Admin-only; the caller audits the change.
    /// Returns `(old_role, updated_user)`.
    pub async fn set_role(
        &self,
        actor: Principal,
        target: UserId,
        role: Role,
    ) -> MnemaResult<(Role, User)> {
        if actor.role != Role::Admin {
            return Err(MnemaError::Access(AccessError::InsufficientRole {
                role: actor.role,
                required: Role::Admin,
            }));
        }

        let mut user = self.get(target).await?.ok_or_else(|| {
            MnemaError::Storage(StorageError::NotFound {
                table: tables::USERS.to_string(),
                id: target.to_string(),
            })
        })?;

        let old_role = user.role;
        user.role = role;
        user.updated_at = Utc::now();
        self.backend
            .upsert(
                tables::USERS,
                user.user_id.as_uuid(),
                crate::codec::encode_row(tables::USERS, &user)?,
            )
            .await?;
        Ok((old_role, user))
    }

    /// List all users (admin surfaces).
    pub async fn list(&self) -> MnemaResult<Vec<User>> {
        let rows = self
            .backend
            .query(tables::USERS, &Query::default())
            .await?;
        rows.into_iter().map(Self::decode).collect()
    }
}

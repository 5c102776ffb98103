//! Boundary to the external identity provider.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::id::new_uuid_v7;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The provider has no such identity. Deletes treat this as success.
    #[error("identity not present at provider")]
    AlreadyAbsent,
    #[error("identity provider error: {0}")]
    Failed(String),
}

pub trait IdentityGateway: Send + Sync {
    fn delete_user<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<(), GatewayError>>;

    /// Register `email` at the provider and return the identity id to use as
    /// the local user id.
    fn invite_user<'a>(
        &'a self,
        email: &'a str,
        metadata: &'a Value,
    ) -> BoxFuture<'a, Result<String, GatewayError>>;
}

/// Used when no provider is configured, e.g. the operator CLI.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedIdentityGateway;

impl IdentityGateway for DetachedIdentityGateway {
    fn delete_user<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<(), GatewayError>> {
        async move {
            info!(target: "bizledger", event = "identity_detached_delete", user_id);
            Err(GatewayError::AlreadyAbsent)
        }
        .boxed()
    }

    fn invite_user<'a>(
        &'a self,
        email: &'a str,
        _metadata: &'a Value,
    ) -> BoxFuture<'a, Result<String, GatewayError>> {
        async move {
            let id = new_uuid_v7();
            info!(target: "bizledger", event = "identity_detached_invite", email, id = %id);
            Ok(id)
        }
        .boxed()
    }
}

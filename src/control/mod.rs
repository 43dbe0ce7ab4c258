//! Control plane for realm and scope allocation
//!
//! Commands and replies are JSON objects tagged by `type`, one per line when
//! carried over a byte stream.

use crate::auth::{AuthorizationToken, RealmRegistry};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Commands from the control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlCommand {
    /// Allocate bits for a realm, claim constraints and roles
    Resolve {
        correlation_id: u64,
        realm: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        issuer: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        audience: Option<String>,
        #[serde(default)]
        roles: Vec<String>,
    },
    /// Release the claim-variant that owns the token's realm bit
    Unresolve {
        correlation_id: u64,
        authorization: AuthorizationToken,
    },
}

impl ControlCommand {
    pub fn correlation_id(&self) -> u64 {
        match self {
            ControlCommand::Resolve { correlation_id, .. } => *correlation_id,
            ControlCommand::Unresolve { correlation_id, .. } => *correlation_id,
        }
    }
}

/// Replies to the control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlReply {
    Resolved {
        correlation_id: u64,
        authorization: AuthorizationToken,
    },
    Unresolved { correlation_id: u64 },
    Error { correlation_id: u64 },
}

/// Applies control commands to a shared [`RealmRegistry`]
#[derive(Debug, Clone)]
pub struct Controller {
    realms: Arc<RealmRegistry>,
}

impl Controller {
    pub fn new(realms: Arc<RealmRegistry>) -> Self {
        Self { realms }
    }

    pub fn realms(&self) -> &Arc<RealmRegistry> {
        &self.realms
    }

    pub fn handle(&self, command: ControlCommand) -> ControlReply {
        match command {
            ControlCommand::Resolve {
                correlation_id,
                realm,
                issuer,
                audience,
                roles,
            } => {
                let authorization =
                    self.realms
                        .resolve(&realm, issuer.as_deref(), audience.as_deref(), &roles);

                if authorization.is_none() {
                    warn!(correlation_id, realm = %realm, "Resolve failed");
                    return ControlReply::Error { correlation_id };
                }

                info!(correlation_id, realm = %realm, authorization = %authorization, "Resolved");
                ControlReply::Resolved {
                    correlation_id,
                    authorization,
                }
            }
            ControlCommand::Unresolve {
                correlation_id,
                authorization,
            } => {
                if !self.realms.unresolve(authorization) {
                    debug!(correlation_id, authorization = %authorization, "Unresolve rejected");
                    return ControlReply::Error { correlation_id };
                }

                info!(correlation_id, authorization = %authorization, "Unresolved");
                ControlReply::Unresolved { correlation_id }
            }
        }
    }
}

//! Route selection for accept streams

use crate::auth::AuthorizationToken;
use parking_lot::RwLock;
use tracing::debug;

/// Where an accepted stream is proxied to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    pub name: String,
    pub target_ref: u64,
}

/// Picks a target for a newly accepted stream
pub trait Router: Send + Sync {
    fn resolve(&self, source: &str, source_ref: u64, authorization: AuthorizationToken) -> Option<RouteTarget>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub source: String,
    pub source_ref: u64,
    pub target: String,
    pub target_ref: u64,
    /// Bits a stream's token must carry to use this route
    pub authorization: AuthorizationToken,
}

impl Route {
    fn matches(&self, source: &str, source_ref: u64, authorization: AuthorizationToken) -> bool {
        self.source_ref == source_ref && self.source == source && authorization.satisfies(self.authorization)
    }
}

/// In-memory route table, first match wins
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: RwLock<Vec<Route>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, route: Route) {
        debug!(
            source = %route.source,
            source_ref = route.source_ref,
            target = %route.target,
            authorization = %route.authorization,
            "Route added"
        );
        self.routes.write().push(route);
    }

    /// Remove an identical route; returns whether one was present
    pub fn remove(&self, route: &Route) -> bool {
        let mut routes = self.routes.write();
        let before = routes.len();
        if let Some(index) = routes.iter().position(|r| r == route) {
            routes.remove(index);
        }
        routes.len() != before
    }

    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }
}

impl Router for RouteTable {
    fn resolve(&self, source: &str, source_ref: u64, authorization: AuthorizationToken) -> Option<RouteTarget> {
        let target = self
            .routes
            .read()
            .iter()
            .find(|r| r.matches(source, source_ref, authorization))
            .map(|r| RouteTarget {
                name: r.target.clone(),
                target_ref: r.target_ref,
            });

        if target.is_none() {
            debug!(source = source, source_ref = source_ref, authorization = %authorization, "No route");
        }

        target
    }
}

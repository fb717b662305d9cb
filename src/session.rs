//! Where store sessions come from.
//!
//! Authentication and connection pooling live outside this crate. The
//! handler asks a [`SessionProvider`] for a session once per request,
//! passing the principal (user) the request runs as.
use std::fmt::Debug;
use std::sync::Arc;

use crate::errors::DavError;
use crate::store::StoreSession;
use crate::DavResult;

/// Hands out authenticated store sessions.
pub trait SessionProvider: Send + Sync {
    /// Get a session for `principal`. `None` means anonymous, or whatever
    /// the provider considers the default user.
    fn get_session(&self, principal: Option<&str>) -> DavResult<Arc<dyn StoreSession>>;
}

/// A single pre-authenticated session shared by every request.
///
/// Requests for a principal other than the session's own user are refused.
#[derive(Clone)]
pub struct StaticSession {
    session: Arc<dyn StoreSession>,
}

impl StaticSession {
    pub fn new(session: Arc<dyn StoreSession>) -> Arc<StaticSession> {
        Arc::new(StaticSession { session })
    }
}

impl Debug for StaticSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticSession")
            .field("env", self.session.env())
            .finish()
    }
}

impl SessionProvider for StaticSession {
    fn get_session(&self, principal: Option<&str>) -> DavResult<Arc<dyn StoreSession>> {
        match principal {
            Some(p) if p != self.session.env().user => {
                debug!("StaticSession: refusing principal {}", p);
                Err(DavError::Status(http::StatusCode::FORBIDDEN))
            }
            _ => Ok(self.session.clone()),
        }
    }
}

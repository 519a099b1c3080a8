//! Block decision flow
//!
//! Reacts to block signals reported by the host engine. The controller only
//! tracks state; every side effect (navigation, popups, whitelisting) is
//! returned as a [`DecisionEffect`] for the coordinator to carry out.

use std::collections::{HashMap, HashSet};
use std::time::SystemTime;

use log::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::host::{SurfaceId, CONTENT_BLOCKER_ERROR_CODE};
use crate::whitelist::{normalize_whitelist_input, WhitelistSet};

/// A navigation blocked by a rule list, waiting for the user's decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedSession {
    pub id: Uuid,
    pub surface: SurfaceId,
    pub blocked_url: String,
    pub created_at: SystemTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionEffect {
    /// Detach the surface's rule lists, navigate, reattach after the grace delay.
    ReloadWithoutBlocking { surface: SurfaceId, url: String },
    PresentDecision(BlockedSession),
    DismissDecision { session_id: Uuid, surface: SurfaceId },
    /// Persist the domain and recompile.
    Whitelist(String),
    GoBackOrBlank(SurfaceId),
}

/// Per-surface block decision state. At most one session per surface.
#[derive(Debug, Default)]
pub struct BlockDecisionController {
    sessions: HashMap<SurfaceId, BlockedSession>,
    bypass: HashSet<String>,
}

impl BlockDecisionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_for(&self, surface: SurfaceId) -> Option<&BlockedSession> {
        self.sessions.get(&surface)
    }

    pub fn session(&self, id: Uuid) -> Option<&BlockedSession> {
        self.sessions.values().find(|s| s.id == id)
    }

    pub fn pending(&self) -> usize {
        self.sessions.len()
    }

    pub fn has_bypass(&self, url: &str) -> bool {
        self.bypass.contains(url)
    }

    pub fn on_block_signal(
        &mut self,
        surface: SurfaceId,
        url: &str,
        error_code: i64,
        whitelist: &WhitelistSet,
    ) -> Vec<DecisionEffect> {
        if error_code != CONTENT_BLOCKER_ERROR_CODE {
            debug!("{surface}: ignoring navigation error {error_code} for {url}");
            return Vec::new();
        }

        if let Some(current) = self.sessions.get(&surface) {
            if current.blocked_url == url {
                debug!("{surface}: duplicate block signal for {url}");
                return Vec::new();
            }
        }

        let mut effects = Vec::new();
        if let Some(previous) = self.sessions.remove(&surface) {
            effects.push(DecisionEffect::DismissDecision {
                session_id: previous.id,
                surface,
            });
        }

        if self.bypass.remove(url) {
            debug!("{surface}: one-time bypass consumed for {url}");
            effects.push(DecisionEffect::ReloadWithoutBlocking {
                surface,
                url: url.to_string(),
            });
            return effects;
        }

        if whitelist.contains_url(url) {
            debug!("{surface}: {url} is whitelisted");
            effects.push(DecisionEffect::ReloadWithoutBlocking {
                surface,
                url: url.to_string(),
            });
            return effects;
        }

        let session = BlockedSession {
            id: Uuid::new_v4(),
            surface,
            blocked_url: url.to_string(),
            created_at: SystemTime::now(),
        };
        info!("{surface}: blocked navigation to {url} (session {})", session.id);
        self.sessions.insert(surface, session.clone());
        effects.push(DecisionEffect::PresentDecision(session));
        effects
    }

    /// Allow the blocked URL exactly once.
    pub fn continue_once(&mut self, session_id: Uuid) -> Result<Vec<DecisionEffect>> {
        let session = self.take(session_id)?;
        self.bypass.insert(session.blocked_url.clone());
        Ok(vec![
            DecisionEffect::DismissDecision {
                session_id,
                surface: session.surface,
            },
            DecisionEffect::ReloadWithoutBlocking {
                surface: session.surface,
                url: session.blocked_url,
            },
        ])
    }

    /// Whitelist the blocked URL's domain. Fails without touching the
    /// session when the URL has no whitelistable host.
    pub fn whitelist_permanently(&mut self, session_id: Uuid) -> Result<Vec<DecisionEffect>> {
        let url = &self
            .session(session_id)
            .ok_or(Error::UnknownSession(session_id))?
            .blocked_url;
        let domain = normalize_whitelist_input(url)?;

        let session = self.take(session_id)?;
        Ok(vec![
            DecisionEffect::DismissDecision {
                session_id,
                surface: session.surface,
            },
            DecisionEffect::Whitelist(domain),
            DecisionEffect::ReloadWithoutBlocking {
                surface: session.surface,
                url: session.blocked_url,
            },
        ])
    }

    pub fn cancel(&mut self, session_id: Uuid) -> Result<Vec<DecisionEffect>> {
        let session = self.take(session_id)?;
        Ok(vec![
            DecisionEffect::DismissDecision {
                session_id,
                surface: session.surface,
            },
            DecisionEffect::GoBackOrBlank(session.surface),
        ])
    }

    pub fn surface_closed(&mut self, surface: SurfaceId) -> Vec<DecisionEffect> {
        match self.sessions.remove(&surface) {
            Some(session) => vec![DecisionEffect::DismissDecision {
                session_id: session.id,
                surface,
            }],
            None => Vec::new(),
        }
    }

    fn take(&mut self, session_id: Uuid) -> Result<BlockedSession> {
        let surface = self
            .session(session_id)
            .map(|s| s.surface)
            .ok_or(Error::UnknownSession(session_id))?;
        self.sessions
            .remove(&surface)
            .ok_or(Error::UnknownSession(session_id))
    }
}

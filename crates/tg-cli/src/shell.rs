use log::info;
use tg_runtime::{BlockedSession, BrowserShell, SurfaceId};
use uuid::Uuid;

/// Browser shell for headless runs: every request is logged and nothing
/// has history.
pub struct LoggingShell;

impl BrowserShell for LoggingShell {
    fn navigate(&self, surface: SurfaceId, url: &str) {
        info!("{surface}: navigate to {url}");
    }

    fn go_back(&self, _surface: SurfaceId) -> bool {
        false
    }

    fn load_blank(&self, surface: SurfaceId) {
        info!("{surface}: load about:blank");
    }

    fn present_block_decision(&self, session: &BlockedSession) {
        info!(
            "{}: {} was blocked (session {})",
            session.surface, session.blocked_url, session.id
        );
    }

    fn dismiss_block_decision(&self, session_id: Uuid, surface: SurfaceId) {
        info!("{surface}: session {session_id} closed");
    }

    fn attach_observer(&self, surface: SurfaceId) {
        info!("{surface}: observing navigation");
    }

    fn detach_observer(&self, surface: SurfaceId) {
        info!("{surface}: stopped observing navigation");
    }
}

use crate::codegen::session::JobSessions;
use crate::db::database::Database;
use crate::entitlements::cache::EntitlementCache;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub entitlements: EntitlementCache,
    pub sessions: JobSessions,
}

impl AppState {
    pub fn new(db: Database) -> Self {
        AppState {
            db,
            entitlements: EntitlementCache::new(),
            sessions: JobSessions::new(),
        }
    }
}

use std::sync::Arc;

use ksana_core::{JobStore, Scheduler};
use ksana_health::HealthRegistry;

/// Shared handles every handler needs: the durable record, the live
/// scheduler (to push heap mutations immediately instead of waiting for the
/// next coordinator tick), and the health registry the `/health` endpoint
/// reads from.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub scheduler: Arc<Scheduler>,
    pub health: HealthRegistry,
}

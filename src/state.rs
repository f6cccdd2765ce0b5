use crate::config::Config;
use crate::db::Database;
use crate::health::HealthRegistry;

pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub health: HealthRegistry,
}

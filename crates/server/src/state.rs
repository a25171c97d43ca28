use concierge_core::Config;
use concierge_gateway::Gateway;

pub struct AppState {
    pub gateway: Gateway,
    pub config: Config,
}

use crate::service::{Kinded, Service, ServiceKind, kind};
use crate::json::FlatJson;

/// Holds a runner's configuration as a flat key-value map, readable by
/// collocated services (the TCP server takes its `port` from here).
pub struct ConfigService {
    config: FlatJson,
}

impl ConfigService {
    pub fn new(config: FlatJson) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FlatJson {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut FlatJson {
        &mut self.config
    }
}

impl Kinded for ConfigService {
    const KIND: ServiceKind = kind::CONFIG;
}

impl Service for ConfigService {
    fn kind(&self) -> ServiceKind {
        kind::CONFIG
    }
}

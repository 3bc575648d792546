use crate::types::RmountConfig;

impl RmountConfig {
    /// Apply default inference rules to the configuration.
    /// This mutates the config in place.
    pub fn apply_defaults(&mut self) {
        // Implicit backend when exactly one is defined
        if self.mount.backend.is_none() && self.backends.len() == 1 {
            self.mount.backend = self.backends.keys().next().cloned();
        }

        // Ceiling never below the floor
        if self.retry.max_delay.as_duration() < self.retry.min_delay.as_duration() {
            self.retry.max_delay = self.retry.min_delay.clone();
        }
    }

    /// Returns a new config with all defaults applied.
    pub fn effective(&self) -> RmountConfig {
        let mut config = self.clone();
        config.apply_defaults();
        config
    }
}

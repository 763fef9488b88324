use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikerMetrics {
    pub cycles: u64,
    pub reloads: u64,
    pub reload_failures: u64,
    pub retried_attempts: u64,
    pub likes: u64,
    pub expiries: u64,
    pub reauthentications: u64,
}

impl LikerMetrics {
    pub fn record_cycle(&mut self) {
        self.cycles = self.cycles.saturating_add(1);
    }

    pub fn record_reload(&mut self, attempts: usize) {
        self.reloads = self.reloads.saturating_add(1);
        self.retried_attempts = self
            .retried_attempts
            .saturating_add(attempts.saturating_sub(1) as u64);
    }

    pub fn record_reload_failure(&mut self) {
        self.reload_failures = self.reload_failures.saturating_add(1);
    }

    pub fn record_likes(&mut self, count: u64) {
        self.likes = self.likes.saturating_add(count);
    }

    pub fn record_expiry(&mut self) {
        self.expiries = self.expiries.saturating_add(1);
    }

    pub fn record_reauthentication(&mut self) {
        self.reauthentications = self.reauthentications.saturating_add(1);
    }

    pub fn reload_success_rate(&self) -> f64 {
        let total = self.reloads + self.reload_failures;
        if total == 0 {
            0.0
        } else {
            (self.reloads as f64 / total as f64) * 100.0
        }
    }
}

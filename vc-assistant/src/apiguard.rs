//! Rate and budget accounting for external lookups (TMDb, OpenSubtitles,
//! ...). Grounded on `assistant/apiguard.py`: a fixed per-minute token
//! bucket plus a daily call ceiling, both keyed by provider name, so one
//! noisy provider can't starve another's budget.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use vc_core::error::CatalogError;

#[derive(Debug, Clone)]
pub struct ProviderLimits {
    pub per_minute: u32,
    pub per_day: u32,
}

impl Default for ProviderLimits {
    fn default() -> Self {
        Self { per_minute: 20, per_day: 1000 }
    }
}

struct ProviderState {
    limits: ProviderLimits,
    minute_window_started: Instant,
    calls_this_minute: u32,
    day_window_started: Instant,
    calls_today: u32,
}

impl ProviderState {
    fn new(limits: ProviderLimits) -> Self {
        let now = Instant::now();
        Self {
            limits,
            minute_window_started: now,
            calls_this_minute: 0,
            day_window_started: now,
            calls_today: 0,
        }
    }

    fn try_consume(&mut self, now: Instant) -> Result<(), CatalogError> {
        if now.duration_since(self.minute_window_started) >= Duration::from_secs(60) {
            self.minute_window_started = now;
            self.calls_this_minute = 0;
        }
        if now.duration_since(self.day_window_started) >= Duration::from_secs(86_400) {
            self.day_window_started = now;
            self.calls_today = 0;
        }

        if self.calls_this_minute >= self.limits.per_minute {
            return Err(CatalogError::Conflict(
                "external lookup rate limit exceeded for this minute".to_string(),
            ));
        }
        if self.calls_today >= self.limits.per_day {
            return Err(CatalogError::Conflict(
                "external lookup daily budget exhausted".to_string(),
            ));
        }

        self.calls_this_minute += 1;
        self.calls_today += 1;
        Ok(())
    }
}

/// Guards calls to external metadata providers. One instance is shared
/// across the whole assistant subsystem; each provider gets its own
/// independent budget registered via [`ApiGuard::register`].
pub struct ApiGuard {
    providers: Mutex<HashMap<String, ProviderState>>,
    default_limits: ProviderLimits,
}

impl ApiGuard {
    pub fn new(default_limits: ProviderLimits) -> Self {
        Self {
            providers: Mutex::new(HashMap::new()),
            default_limits,
        }
    }

    pub fn register(&self, provider: &str, limits: ProviderLimits) {
        self.providers
            .lock()
            .insert(provider.to_string(), ProviderState::new(limits));
    }

    /// Consume one call's worth of budget for `provider`, registering it
    /// with the default limits on first use if not already registered.
    pub fn check(&self, provider: &str) -> Result<(), CatalogError> {
        let mut providers = self.providers.lock();
        let state = providers
            .entry(provider.to_string())
            .or_insert_with(|| ProviderState::new(self.default_limits.clone()));
        state.try_consume(Instant::now())
    }

    pub fn remaining_today(&self, provider: &str) -> u32 {
        let providers = self.providers.lock();
        providers
            .get(provider)
            .map(|s| s.limits.per_day.saturating_sub(s.calls_today))
            .unwrap_or(self.default_limits.per_day)
    }
}

impl Default for ApiGuard {
    fn default() -> Self {
        Self::new(ProviderLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_minute_limit_trips_after_threshold() {
        let guard = ApiGuard::new(ProviderLimits { per_minute: 2, per_day: 100 });
        assert!(guard.check("tmdb").is_ok());
        assert!(guard.check("tmdb").is_ok());
        assert!(guard.check("tmdb").is_err());
    }

    #[test]
    fn providers_have_independent_budgets() {
        let guard = ApiGuard::new(ProviderLimits { per_minute: 1, per_day: 100 });
        assert!(guard.check("tmdb").is_ok());
        assert!(guard.check("tmdb").is_err());
        assert!(guard.check("opensubtitles").is_ok());
    }

    #[test]
    fn remaining_today_reflects_consumed_calls() {
        let guard = ApiGuard::new(ProviderLimits { per_minute: 100, per_day: 5 });
        guard.check("tmdb").unwrap();
        guard.check("tmdb").unwrap();
        assert_eq!(guard.remaining_today("tmdb"), 3);
    }
}

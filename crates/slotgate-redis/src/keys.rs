use slotgate_model::{
    GLOBAL_BACKOFF_ID, IN_FLIGHT_COUNTER_ID, JOB_RECORD_PREFIX, JobToken, MinuteKey,
    RPM_WINDOW_PREFIX,
};

const SETTINGS_ID: &str = "settings";

/// Maps record ids onto namespaced Redis keys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedisKeys {
    prefix: String,
}

impl RedisKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn counter(&self) -> String {
        self.key(IN_FLIGHT_COUNTER_ID)
    }

    pub fn window(&self, minute: &MinuteKey) -> String {
        self.key(&minute.record_id())
    }

    pub fn job(&self, token: &JobToken) -> String {
        self.key(&token.record_id())
    }

    pub fn backoff(&self) -> String {
        self.key(GLOBAL_BACKOFF_ID)
    }

    /// Shared settings document.
    pub fn settings(&self) -> String {
        self.key(SETTINGS_ID)
    }

    /// SCAN pattern matching every job record.
    pub fn job_pattern(&self) -> String {
        self.pattern(JOB_RECORD_PREFIX)
    }

    /// SCAN pattern matching every RPM window.
    pub fn window_pattern(&self) -> String {
        self.pattern(RPM_WINDOW_PREFIX)
    }

    /// Glob metacharacters in the prefix are escaped.
    fn pattern(&self, record_prefix: &str) -> String {
        let mut pattern = String::with_capacity(self.prefix.len() + record_prefix.len() + 1);
        for c in self.prefix.chars() {
            if matches!(c, '*' | '?' | '[' | ']' | '\\') {
                pattern.push('\\');
            }
            pattern.push(c);
        }
        pattern.push_str(record_prefix);
        pattern.push('*');
        pattern
    }

    /// Record id of a key produced by this mapping.
    pub fn record_id<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.prefix.as_str())
    }

    /// Key of an arbitrary record id.
    pub fn record_key(&self, id: &str) -> String {
        self.key(id)
    }

    fn key(&self, id: &str) -> String {
        format!("{}{}", self.prefix, id)
    }
}

impl Default for RedisKeys {
    fn default() -> Self {
        Self::new(crate::DEFAULT_KEY_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn keys_carry_record_ids() {
        let keys = RedisKeys::default();
        let minute = MinuteKey::at(datetime!(2024-03-07 09:05:00 UTC));
        let token = JobToken::new();

        assert_eq!(keys.counter(), "slotgate:in_flight");
        assert_eq!(keys.backoff(), "slotgate:global_backoff");
        assert_eq!(keys.settings(), "slotgate:settings");
        assert_eq!(keys.window(&minute), "slotgate:rpm_window_20240307_0905");
        assert_eq!(keys.job(&token), format!("slotgate:{token}"));
        assert_eq!(keys.record_id(&keys.job(&token)), Some(token.record_id().as_str()));
        assert_eq!(keys.record_id("other:in_flight"), None);
    }

    #[test]
    fn job_pattern_escapes_glob_characters() {
        assert_eq!(RedisKeys::default().job_pattern(), "slotgate:job_*");
        assert_eq!(RedisKeys::new("a*[b]:").job_pattern(), "a\\*\\[b\\]:job_*");
        assert_eq!(RedisKeys::default().window_pattern(), "slotgate:rpm_window_*");
    }
}

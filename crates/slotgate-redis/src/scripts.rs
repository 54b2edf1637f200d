//! Lua scripts behind the conditional store operations.
//!
//! Each script reads and rewrites a single JSON record. A negative integer reply means
//! the condition did not hold.
use std::sync::LazyLock;

use redis::Script;

/// KEYS[1] counter. ARGV: max, last_updated, id.
pub(crate) static INCREMENT_IN_FLIGHT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
local raw = redis.call('GET', KEYS[1])
local value = 0
if raw then value = tonumber(cjson.decode(raw).value) or 0 end
if value >= tonumber(ARGV[1]) then return -1 end
value = value + 1
redis.call('SET', KEYS[1], cjson.encode({id = ARGV[3], value = value, last_updated = ARGV[2]}))
return value
"#,
    )
});

/// KEYS[1] counter. ARGV: last_updated, id.
pub(crate) static DECREMENT_IN_FLIGHT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
local raw = redis.call('GET', KEYS[1])
local value = 0
if raw then value = tonumber(cjson.decode(raw).value) or 0 end
if value <= 0 then return -1 end
value = value - 1
redis.call('SET', KEYS[1], cjson.encode({id = ARGV[2], value = value, last_updated = ARGV[1]}))
return value
"#,
    )
});

/// KEYS[1] counter. ARGV: expected, new, last_updated, id. Replies 1 when swapped.
pub(crate) static COMPARE_AND_SET_IN_FLIGHT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
local raw = redis.call('GET', KEYS[1])
local value = 0
if raw then value = tonumber(cjson.decode(raw).value) or 0 end
if value ~= tonumber(ARGV[1]) then return 0 end
redis.call('SET', KEYS[1], cjson.encode({id = ARGV[4], value = tonumber(ARGV[2]), last_updated = ARGV[3]}))
return 1
"#,
    )
});

/// KEYS[1] counter. ARGV: last_updated, id. Replies the previous value.
pub(crate) static RESET_IN_FLIGHT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
local raw = redis.call('GET', KEYS[1])
local value = 0
if raw then value = tonumber(cjson.decode(raw).value) or 0 end
redis.call('SET', KEYS[1], cjson.encode({id = ARGV[2], value = 0, last_updated = ARGV[1]}))
return value
"#,
    )
});

/// KEYS[1] window. ARGV: max, expires_at, id.
///
/// An existing window keeps its original expiry.
pub(crate) static INCREMENT_RPM: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
local raw = redis.call('GET', KEYS[1])
local count = 0
local expires = tonumber(ARGV[2])
if raw then
  local w = cjson.decode(raw)
  count = tonumber(w.request_count) or 0
  expires = tonumber(w.expires_at) or expires
end
if count >= tonumber(ARGV[1]) then return -1 end
count = count + 1
redis.call('SET', KEYS[1], cjson.encode({id = ARGV[3], request_count = count, expires_at = expires}))
redis.call('EXPIREAT', KEYS[1], expires)
return count
"#,
    )
});

/// KEYS[1] job record. Replies 0 missing, 1 released, 2 already released.
pub(crate) static MARK_RELEASED: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
local raw = redis.call('GET', KEYS[1])
if not raw then return 0 end
local rec = cjson.decode(raw)
if rec.released then return 2 end
rec.released = true
redis.call('SET', KEYS[1], cjson.encode(rec), 'KEEPTTL')
return 1
"#,
    )
});

/// KEYS[1] backoff. ARGV: until, id. Replies the stored record.
pub(crate) static EXTEND_BACKOFF: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
local raw = redis.call('GET', KEYS[1])
if raw then
  local cur = cjson.decode(raw)
  if (tonumber(cur.backoff_until) or 0) >= tonumber(ARGV[1]) then return raw end
end
local rec = cjson.encode({id = ARGV[2], backoff_until = tonumber(ARGV[1])})
redis.call('SET', KEYS[1], rec)
return rec
"#,
    )
});

/// Interpret a script reply where negative means "condition failed".
pub(crate) fn conditional(reply: i64) -> Option<u64> {
    u64::try_from(reply).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_replies_are_refusals() {
        assert_eq!(conditional(-1), None);
        assert_eq!(conditional(0), Some(0));
        assert_eq!(conditional(7), Some(7));
    }

    #[test]
    fn scripts_have_distinct_hashes() {
        let hashes = [
            INCREMENT_IN_FLIGHT.get_hash(),
            DECREMENT_IN_FLIGHT.get_hash(),
            COMPARE_AND_SET_IN_FLIGHT.get_hash(),
            RESET_IN_FLIGHT.get_hash(),
            INCREMENT_RPM.get_hash(),
            MARK_RELEASED.get_hash(),
            EXTEND_BACKOFF.get_hash(),
        ];
        let unique: std::collections::HashSet<_> = hashes.iter().collect();
        assert_eq!(unique.len(), hashes.len());
    }
}

/// Lua script for fixed window counting in Redis
///
/// Redis runs scripts one at a time, so the read, window reset and increment
/// below happen as a single step for every instance sharing the server.
///
/// KEYS[1] = the counter key
/// ARGV[1] = start of the current window (epoch milliseconds)
/// ARGV[2] = window duration (milliseconds)
/// ARGV[3] = key time-to-live (milliseconds)
///
/// Returns: [window_start, window, count]
pub const FIXED_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local window_start = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local ttl = tonumber(ARGV[3])

-- Get current state
local state = redis.call('HMGET', key, 'window_start', 'window', 'count')
local stored_start = tonumber(state[1])
local stored_window = tonumber(state[2])
local count = tonumber(state[3])

-- Start a new window if the record is missing or stale
if stored_start == nil or stored_window == nil or count == nil or stored_start < window_start then
    stored_start = window_start
    stored_window = window
    count = 0
end

count = count + 1

-- Update state
redis.call('HSET', key, 'window_start', stored_start, 'window', stored_window, 'count', count)
redis.call('PEXPIRE', key, ttl)

return {stored_start, stored_window, count}
"#;

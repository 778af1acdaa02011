// Lua sources for the built-in compare primitives.
//
// Function forms receive every key as a plain argument (FCALL is issued with
// numkeys = 0), so ARGV[1] is the key. Script forms use KEYS/ARGV.
// All forms return 1 on success and 0 on mismatch.

use super::registry::{OpId, ScriptMeta};

pub const CAS_NAME: &str = "keylatch_CAS";
pub const CAD_NAME: &str = "keylatch_CAD";
pub const CAE_NAME: &str = "keylatch_CAE";

/// ARGV=[key, expected, new_value]
pub const FUNCTION_CAS: &str = r#"#!lua name=keylatch_CAS
local function keylatch_CAS(keys, args)
    local key = args[1]
    local expected = args[2]
    local new_value = args[3]

    local current_value = redis.pcall('GET', key)
    if current_value == expected then
        redis.pcall('SET', key, new_value)
        return 1
    else
        return 0
    end
end
redis.register_function{function_name='keylatch_CAS', callback=keylatch_CAS, description='Compare and swap: set key to new_value if it equals expected; ARGV=[key, expected, new_value]; returns 1 on success'}"#;

/// ARGV=[key, expected]; an absent key counts as deleted
pub const FUNCTION_CAD: &str = r#"#!lua name=keylatch_CAD
local function keylatch_CAD(keys, args)
    local key = args[1]
    local expected = args[2]

    local current_value = redis.pcall('GET', key)
    if current_value == expected then
        redis.pcall('DEL', key)
        return 1
    elseif current_value == false then
        return 1
    else
        return 0
    end
end
redis.register_function{function_name='keylatch_CAD', callback=keylatch_CAD, description='Compare and delete: delete key if it equals expected; returns 1 when deleted or already absent'}"#;

/// ARGV=[key, expected, ttl_seconds]
pub const FUNCTION_CAE: &str = r#"#!lua name=keylatch_CAE
local function keylatch_CAE(keys, args)
    local key = args[1]
    local expected = args[2]
    local ttl = tonumber(args[3])

    local current_value = redis.pcall('GET', key)
    if current_value == expected then
        redis.pcall('EXPIRE', key, ttl)
        return 1
    else
        return 0
    end
end
redis.register_function{function_name='keylatch_CAE', callback=keylatch_CAE, description='Compare and expire: reset key expiry if it equals expected; ARGV=[key, expected, ttl_seconds]; returns 1 on success'}"#;

/// KEYS=[key] ARGV=[expected, new_value]
pub const SCRIPT_CAS: &str = r#"
local v = redis.pcall("get", KEYS[1])
if (v == ARGV[1]) then
    redis.pcall("set", KEYS[1], ARGV[2])
    return 1
end
return 0
"#;

/// KEYS=[key] ARGV=[expected]
pub const SCRIPT_CAD: &str = r#"
local v = redis.pcall("get", KEYS[1])
if (v == ARGV[1]) then
    redis.pcall("del", KEYS[1])
    return 1
end
if (v == false) then
    return 1
end
return 0
"#;

/// KEYS=[key] ARGV=[expected, ttl_seconds]
pub const SCRIPT_CAE: &str = r#"
local v = redis.pcall("get", KEYS[1])
if (v == ARGV[1]) then
    redis.pcall("expire", KEYS[1], tonumber(ARGV[2]))
    return 1
end
return 0
"#;

pub(crate) fn builtin_meta(op: OpId) -> ScriptMeta {
    match op {
        OpId::CompareAndSwap => ScriptMeta::new(CAS_NAME, FUNCTION_CAS, SCRIPT_CAS),
        OpId::CompareAndDelete => ScriptMeta::new(CAD_NAME, FUNCTION_CAD, SCRIPT_CAD),
        OpId::CompareAndExpire => ScriptMeta::new(CAE_NAME, FUNCTION_CAE, SCRIPT_CAE),
    }
}

/// Library name declared in a function source's `#!lua name=` header.
pub fn library_name(code: &str) -> Option<&str> {
    let header = code.lines().next()?.strip_prefix("#!lua")?;
    header
        .split_whitespace()
        .find_map(|part| part.strip_prefix("name="))
}

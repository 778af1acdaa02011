//! Lua execution for the in-memory store
//!
//! Each call runs in a fresh Lua 5.1 state whose `redis.call` and
//! `redis.pcall` act on the key space. Every command in one call sees the
//! same clock reading, and the store serializes calls, so a script is atomic
//! with respect to every other command.
//!
//! Replies follow the store's Lua conversion rules: nil bulk replies become
//! `false`, status replies become `{ok = ...}` and errors `{err = ...}`.

use std::sync::Arc;

use keylatch_store::{KeyTtl, StoreError, StoreResult, StoreValue};
use mlua::{Function, Lua, Table, Value, Variadic};
use tokio::time::Instant;

use super::keyspace::{Keyspace, SetCondition};
use crate::script::definitions;

const FUNCTIONS: &str = "__keylatch_functions";

const PRELUDE: &str = r#"
__keylatch_functions = {}
redis.register_function = function(name, callback)
    if type(name) == 'table' then
        callback = name.callback
        name = name.function_name
    end
    if type(name) ~= 'string' or type(callback) ~= 'function' then
        error('wrong arguments to redis.register_function')
    end
    __keylatch_functions[name] = callback
end
redis.status_reply = function(msg) return { ok = msg } end
redis.error_reply = function(msg) return { err = msg } end
"#;

/// Run a plain script with `KEYS` and `ARGV` bound.
pub(crate) fn eval(
    keyspace: &Arc<Keyspace>,
    source: &str,
    keys: &[String],
    args: &[String],
) -> StoreResult<StoreValue> {
    let lua = session(Some(keyspace.clone()), Instant::now()).map_err(runtime_error)?;
    let globals = lua.globals();
    globals
        .set("KEYS", sequence(&lua, keys)?)
        .map_err(runtime_error)?;
    globals
        .set("ARGV", sequence(&lua, args)?)
        .map_err(runtime_error)?;

    let reply: Value = lua
        .load(source)
        .set_name("user_script")
        .eval()
        .map_err(runtime_error)?;
    from_lua(reply)
}

/// Compile a function library. Returns its name and the functions it registers.
pub(crate) fn load_library(code: &str) -> StoreResult<(String, Vec<String>)> {
    let library = definitions::library_name(code)
        .ok_or_else(|| StoreError::command("Missing library metadata"))?;
    let lua = session(None, Instant::now()).map_err(runtime_error)?;
    let functions = register(&lua, library, code)?;

    let mut names = Vec::new();
    for pair in functions.pairs::<String, Function>() {
        let (name, _) = pair.map_err(runtime_error)?;
        names.push(name);
    }
    if names.is_empty() {
        return Err(StoreError::command("No functions registered"));
    }
    names.sort();
    Ok((library.to_string(), names))
}

/// Call `function` from library `code`, passing keys and args as tables.
pub(crate) fn call_function(
    keyspace: &Arc<Keyspace>,
    code: &str,
    function: &str,
    keys: &[String],
    args: &[String],
) -> StoreResult<StoreValue> {
    let lua = session(Some(keyspace.clone()), Instant::now()).map_err(runtime_error)?;
    let library = definitions::library_name(code).unwrap_or("library");
    let functions = register(&lua, library, code)?;

    let callback: Option<Function> = functions.get(function).map_err(runtime_error)?;
    let Some(callback) = callback else {
        return Err(StoreError::command("Function not found"));
    };
    let reply: Value = callback
        .call((sequence(&lua, keys)?, sequence(&lua, args)?))
        .map_err(runtime_error)?;
    from_lua(reply)
}

fn register(lua: &Lua, library: &str, code: &str) -> StoreResult<Table> {
    // the shebang line is metadata, not Lua; keep line numbers intact
    let body = match code.split_once('\n') {
        Some((_, rest)) => format!("\n{}", rest),
        None => String::new(),
    };
    lua.load(body)
        .set_name(library)
        .exec()
        .map_err(runtime_error)?;
    lua.globals().get(FUNCTIONS).map_err(runtime_error)
}

fn session(keyspace: Option<Arc<Keyspace>>, now: Instant) -> mlua::Result<Lua> {
    let lua = Lua::new();
    let redis = lua.create_table()?;

    let ks = keyspace.clone();
    redis.set(
        "call",
        lua.create_function(move |lua, args: Variadic<Value>| {
            let reply = dispatch(ks.as_deref(), &args, now).map_err(mlua::Error::RuntimeError)?;
            to_lua(lua, reply)
        })?,
    )?;
    redis.set(
        "pcall",
        lua.create_function(move |lua, args: Variadic<Value>| {
            match dispatch(keyspace.as_deref(), &args, now) {
                Ok(reply) => to_lua(lua, reply),
                Err(message) => {
                    let table = lua.create_table()?;
                    table.set("err", message)?;
                    Ok(Value::Table(table))
                }
            }
        })?,
    )?;

    lua.globals().set("redis", redis)?;
    lua.load(PRELUDE).set_name("prelude").exec()?;
    Ok(lua)
}

fn sequence(lua: &Lua, items: &[String]) -> StoreResult<Table> {
    lua.create_sequence_from(items.iter().map(String::as_str))
        .map_err(runtime_error)
}

fn command_args(args: &[Value]) -> Result<Vec<String>, String> {
    args.iter()
        .map(|arg| match arg {
            Value::String(s) => Ok(s.to_string_lossy().to_string()),
            Value::Integer(n) => Ok(n.to_string()),
            Value::Number(n) if n.fract() == 0.0 && n.is_finite() => Ok((*n as i64).to_string()),
            Value::Number(n) => Ok(n.to_string()),
            _ => Err("ERR Lua redis lib command arguments must be strings or integers".to_string()),
        })
        .collect()
}

fn parse_int(value: &str) -> Result<i64, String> {
    value
        .parse()
        .map_err(|_| "ERR value is not an integer or out of range".to_string())
}

fn dispatch(keyspace: Option<&Keyspace>, args: &[Value], now: Instant) -> Result<StoreValue, String> {
    let Some(keyspace) = keyspace else {
        return Err("ERR redis.call is not allowed while loading a library".to_string());
    };
    let args = command_args(args)?;
    let Some((name, rest)) = args.split_first() else {
        return Err("ERR Please specify at least one argument for this redis lib call".to_string());
    };
    let command = name.to_ascii_lowercase();

    match (command.as_str(), rest) {
        ("ping", []) => Ok(StoreValue::Status("PONG".to_string())),
        ("get", [key]) => Ok(keyspace
            .get(key, now)
            .map_or(StoreValue::Nil, StoreValue::Bulk)),
        ("set", [key, value, options @ ..]) => set(keyspace, key, value, options, now),
        ("del", keys) if !keys.is_empty() => Ok(StoreValue::Int(
            keys.iter().filter(|key| keyspace.delete(key, now)).count() as i64,
        )),
        ("exists", keys) if !keys.is_empty() => Ok(StoreValue::Int(
            keys.iter()
                .filter(|key| keyspace.get(key, now).is_some())
                .count() as i64,
        )),
        ("expire", [key, seconds]) => {
            let ttl_ms = parse_int(seconds)?.saturating_mul(1000);
            Ok(StoreValue::Int(i64::from(keyspace.expire(key, ttl_ms, now))))
        }
        ("pexpire", [key, millis]) => {
            let ttl_ms = parse_int(millis)?;
            Ok(StoreValue::Int(i64::from(keyspace.expire(key, ttl_ms, now))))
        }
        ("pttl", [key]) => Ok(StoreValue::Int(match keyspace.ttl(key, now) {
            KeyTtl::Missing => -2,
            KeyTtl::Persistent => -1,
            KeyTtl::Expires(d) => i64::try_from(d.as_millis()).unwrap_or(i64::MAX),
        })),
        ("ping" | "get" | "set" | "del" | "exists" | "expire" | "pexpire" | "pttl", _) => Err(
            format!("ERR wrong number of arguments for '{}' command", command),
        ),
        (other, _) => Err(format!("ERR unknown command '{}'", other)),
    }
}

fn set(
    keyspace: &Keyspace,
    key: &str,
    value: &str,
    options: &[String],
    now: Instant,
) -> Result<StoreValue, String> {
    let mut condition = SetCondition::Always;
    let mut ttl_ms = None;
    let mut options = options.iter();
    while let Some(option) = options.next() {
        match option.to_ascii_uppercase().as_str() {
            "NX" => condition = SetCondition::IfAbsent,
            "XX" => condition = SetCondition::IfPresent,
            unit @ ("EX" | "PX") => {
                let amount = parse_int(options.next().ok_or("ERR syntax error")?)?;
                let millis = if unit == "EX" {
                    amount.saturating_mul(1000)
                } else {
                    amount
                };
                if millis <= 0 {
                    return Err("ERR invalid expire time in 'set' command".to_string());
                }
                ttl_ms = Some(millis.unsigned_abs());
            }
            _ => return Err("ERR syntax error".to_string()),
        }
    }

    let ttl = ttl_ms.map(std::time::Duration::from_millis);
    if keyspace.set(key, value, ttl, condition, now) {
        Ok(StoreValue::Status("OK".to_string()))
    } else {
        Ok(StoreValue::Nil)
    }
}

fn to_lua(lua: &Lua, reply: StoreValue) -> mlua::Result<Value> {
    Ok(match reply {
        StoreValue::Nil => Value::Boolean(false),
        StoreValue::Int(n) => Value::Number(n as f64),
        StoreValue::Bulk(s) => Value::String(lua.create_string(&s)?),
        StoreValue::Status(s) => {
            let table = lua.create_table()?;
            table.set("ok", s)?;
            Value::Table(table)
        }
        StoreValue::Array(items) => {
            let table = lua.create_table()?;
            for (i, item) in items.into_iter().enumerate() {
                table.raw_set(i + 1, to_lua(lua, item)?)?;
            }
            Value::Table(table)
        }
    })
}

fn from_lua(value: Value) -> StoreResult<StoreValue> {
    Ok(match value {
        Value::Boolean(true) => StoreValue::Int(1),
        Value::Integer(n) => StoreValue::Int(n as i64),
        Value::Number(n) => StoreValue::Int(n as i64),
        Value::String(s) => StoreValue::Bulk(s.to_string_lossy().to_string()),
        Value::Table(table) => return from_table(table),
        _ => StoreValue::Nil,
    })
}

fn from_table(table: Table) -> StoreResult<StoreValue> {
    let err: Value = table.raw_get("err").map_err(runtime_error)?;
    if let Value::String(message) = err {
        let message = message.to_string_lossy().to_string();
        return Err(match message.split_once(' ') {
            Some((kind, rest)) if kind.chars().all(|c| c.is_ascii_uppercase()) => {
                StoreError::from_reply(kind, rest)
            }
            _ => StoreError::from_reply("ERR", message),
        });
    }
    let ok: Value = table.raw_get("ok").map_err(runtime_error)?;
    if let Value::String(status) = ok {
        return Ok(StoreValue::Status(status.to_string_lossy().to_string()));
    }

    let mut items = Vec::new();
    for i in 1..=table.raw_len() {
        let item: Value = table.raw_get(i).map_err(runtime_error)?;
        if item.is_nil() {
            break;
        }
        items.push(from_lua(item)?);
    }
    Ok(StoreValue::Array(items))
}

fn error_message(e: &mlua::Error) -> String {
    match e {
        mlua::Error::CallbackError { cause, .. } => error_message(cause),
        mlua::Error::RuntimeError(message) => message.clone(),
        mlua::Error::SyntaxError { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

fn runtime_error(e: mlua::Error) -> StoreError {
    let context = match &e {
        mlua::Error::SyntaxError { .. } => "Error compiling script",
        _ => "Error running script",
    };
    StoreError::command(format!("{}: {}", context, error_message(&e)))
}

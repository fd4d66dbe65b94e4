// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Script conditions evaluated in a sandboxed Lua interpreter.
//!
//! The user script sees `target` and every sibling/related resource of the data
//! context as Lua tables named by their logical names:
//!
//! ```lua
//! target.data.replicas == configMap1.data.expected
//! ```
//!
//! The script may be a single expression or a chunk ending in `return`. Each
//! evaluation runs in a fresh interpreter with only the `table`, `string` and
//! `math` libraries, a memory limit and a wall-clock deadline checked every
//! thousand instructions. `print` and the loaders are removed; the only way out
//! is `emit`, which the wrapper uses to return the result as text.

use super::parse_bool;
use crate::constants::{SCRIPT_HOOK_INSTRUCTION_INTERVAL, TARGET_KEY};
use crate::glue_errors::GlueError;
use mlua::{HookTriggers, Lua, LuaOptions, StdLib, VmState};
use serde_json::Value as JsonValue;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

/// Globals removed from every interpreter.
const BLOCKED_GLOBALS: &[&str] = &[
    "dofile",
    "loadfile",
    "load",
    "require",
    "collectgarbage",
    "print",
];

const LUA_KEYWORDS: &[&str] = &[
    "and", "break", "do", "else", "elseif", "end", "false", "for", "function", "goto", "if", "in",
    "local", "nil", "not", "or", "repeat", "return", "then", "true", "until", "while",
];

/// Runs a complete script and returns everything it emitted.
pub trait ScriptSandbox: Send + Sync {
    /// # Errors
    ///
    /// Returns [`GlueError::Sandbox`] on compile errors, runtime errors, memory
    /// exhaustion or timeout.
    fn execute(&self, script: &str) -> Result<String, GlueError>;
}

/// Lua 5.4 sandbox with memory and time bounds.
#[derive(Clone, Debug)]
pub struct LuaSandbox {
    memory_limit_bytes: usize,
    timeout: Duration,
}

impl LuaSandbox {
    #[must_use]
    pub fn new(memory_limit_bytes: usize, timeout: Duration) -> Self {
        Self {
            memory_limit_bytes,
            timeout,
        }
    }

    fn interpreter(&self, output: Arc<Mutex<String>>) -> mlua::Result<Lua> {
        let lua = Lua::new_with(
            StdLib::TABLE | StdLib::STRING | StdLib::MATH,
            LuaOptions::default(),
        )?;
        lua.set_memory_limit(self.memory_limit_bytes)?;

        let globals = lua.globals();
        for name in BLOCKED_GLOBALS {
            globals.set(*name, mlua::Nil)?;
        }
        let emit = lua.create_function(move |_, value: String| {
            output
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push_str(&value);
            Ok(())
        })?;
        globals.set("emit", emit)?;

        let deadline = Instant::now() + self.timeout;
        lua.set_hook(
            HookTriggers::new().every_nth_instruction(SCRIPT_HOOK_INSTRUCTION_INTERVAL),
            move |_lua, _debug| {
                if Instant::now() > deadline {
                    Err(mlua::Error::runtime("script exceeded its time budget"))
                } else {
                    Ok(VmState::Continue)
                }
            },
        );
        Ok(lua)
    }
}

impl ScriptSandbox for LuaSandbox {
    fn execute(&self, script: &str) -> Result<String, GlueError> {
        let output = Arc::new(Mutex::new(String::new()));
        let lua = self.interpreter(output.clone())?;
        lua.load(script).set_name("condition").exec()?;
        let emitted = output.lock().unwrap_or_else(PoisonError::into_inner).clone();
        Ok(emitted)
    }
}

/// Evaluate a script condition.
///
/// # Errors
///
/// Returns [`GlueError::Sandbox`] if the script fails to compile or run.
pub fn is_met(
    sandbox: &dyn ScriptSandbox,
    script: &str,
    target: Option<&JsonValue>,
    data: &JsonValue,
) -> Result<bool, GlueError> {
    let program = build_program(script, target, data);
    let output = sandbox.execute(&program)?;
    debug!("Script condition emitted '{}'", output.trim());
    Ok(parse_bool(&output))
}

/// Preamble binding the context as globals, followed by the wrapped user script.
///
/// The wrapper keeps its own references to `emit` and `tostring`, so a resource
/// named after a builtin only hides it from the user script.
#[must_use]
pub fn build_program(script: &str, target: Option<&JsonValue>, data: &JsonValue) -> String {
    let mut program = String::from("local __glue_emit, __glue_tostring = emit, tostring\n");
    let _ = writeln!(
        program,
        "{TARGET_KEY} = {}",
        to_lua_literal(target.unwrap_or(&JsonValue::Null))
    );
    if let JsonValue::Object(bindings) = data {
        for (name, value) in bindings {
            if name != TARGET_KEY && is_lua_identifier(name) {
                let _ = writeln!(program, "{name} = {}", to_lua_literal(value));
            }
        }
    }

    let body = if is_expression(script) {
        format!("return {}", script.trim())
    } else {
        script.to_string()
    };
    let _ = write!(
        program,
        "__glue_emit(__glue_tostring((function()\n{body}\nend)()))"
    );
    program
}

/// True when `script` compiles as `return <script>`.
fn is_expression(script: &str) -> bool {
    Lua::new_with(StdLib::NONE, LuaOptions::default())
        .map(|lua| {
            lua.load(format!("return {}", script.trim()))
                .into_function()
                .is_ok()
        })
        .unwrap_or(false)
}

fn is_lua_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !LUA_KEYWORDS.contains(&name)
}

/// Render a JSON value as a Lua table constructor / literal.
#[must_use]
pub fn to_lua_literal(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "nil".to_string(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) => lua_string(s),
        JsonValue::Array(items) => {
            let items: Vec<String> = items.iter().map(to_lua_literal).collect();
            format!("{{{}}}", items.join(", "))
        }
        JsonValue::Object(map) => {
            let fields: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("[{}] = {}", lua_string(k), to_lua_literal(v)))
                .collect();
            format!("{{{}}}", fields.join(", "))
        }
    }
}

fn lua_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{{{:x}}}", u32::from(c));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

//! Named commands, their enablement predicates and the key bindings that
//! trigger them.

use crate::error::{NotebookError, Result};
use crate::lock;
use crate::settings::KeyBindingConfig;
use futures::future::BoxFuture;
use futures::FutureExt;
use log::debug;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

pub mod command_ids {
    pub const RUN_SELECTED_CODECELL: &str = "run-selected-codecell";
    pub const CONVERT_TO_CODE: &str = "convert-to-code";
    pub const CONVERT_TO_MARKDOWN: &str = "convert-to-markdown";
    pub const CONVERT_TO_RAW: &str = "convert-to-raw";
    pub const CHANGE_CELL_TYPE: &str = "change-cell-type";
    pub const UNDO: &str = "undo";
    pub const REDO: &str = "redo";
    pub const INTERRUPT_KERNEL: &str = "interrupt-kernel";
    pub const RESTART_KERNEL: &str = "restart-kernel";
    pub const INVOKE_COMPLETER: &str = "invoke-completer";
}

pub type CommandArgs = Map<String, Value>;

type ExecuteFn = Box<dyn Fn(CommandArgs) -> BoxFuture<'static, Result<Value>> + Send + Sync>;
type EnabledFn = Box<dyn Fn() -> bool + Send + Sync>;

pub struct Command {
    label: String,
    execute: ExecuteFn,
    is_enabled: EnabledFn,
}

impl Command {
    pub fn new<E, Fut, P>(label: &str, execute: E, is_enabled: P) -> Self
    where
        E: Fn(CommandArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
        P: Fn() -> bool + Send + Sync + 'static,
    {
        Command {
            label: label.to_string(),
            execute: Box::new(move |args| execute(args).boxed()),
            is_enabled: Box::new(is_enabled),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_enabled(&self) -> bool {
        (self.is_enabled)()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Executed(Value),
    /// The command exists but its predicate said no; nothing ran.
    Disabled,
}

/// A key press as reported by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: String,
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub meta: bool,
}

impl KeyEvent {
    pub fn new(key: &str) -> Self {
        KeyEvent {
            key: key.to_string(),
            ..Default::default()
        }
    }

    pub fn with_ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    pub fn with_alt(mut self) -> Self {
        self.alt = true;
        self
    }

    pub fn with_shift(mut self) -> Self {
        self.shift = true;
        self
    }

    pub fn with_meta(mut self) -> Self {
        self.meta = true;
        self
    }

    /// Canonical keystroke string, e.g. `"Ctrl Shift Enter"`.
    pub fn keystroke(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if self.ctrl {
            parts.push("Ctrl".into());
        }
        if self.alt {
            parts.push("Alt".into());
        }
        if self.shift {
            parts.push("Shift".into());
        }
        if self.meta {
            parts.push("Cmd".into());
        }
        parts.push(normalize_key(&self.key));
        parts.join(" ")
    }
}

fn normalize_key(key: &str) -> String {
    if key.chars().count() == 1 {
        key.to_uppercase()
    } else {
        key.to_string()
    }
}

/// Normalize a binding such as `"shift  ctrl enter"` to `"Ctrl Shift enter"`.
/// Modifier order and spelling are canonicalized; single-character keys are
/// upper-cased.
pub fn normalize_keystroke(keys: &str) -> String {
    let mut event = KeyEvent::default();
    for token in keys.split_whitespace() {
        match token.to_ascii_lowercase().as_str() {
            "ctrl" | "control" => event.ctrl = true,
            "alt" | "option" => event.alt = true,
            "shift" => event.shift = true,
            "cmd" | "meta" | "accel" => event.meta = true,
            _ => event.key = token.to_string(),
        }
    }
    event.keystroke()
}

#[derive(Default)]
pub struct CommandRegistry {
    commands: Mutex<HashMap<String, Arc<Command>>>,
    key_bindings: Mutex<Vec<KeyBindingConfig>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `command` under `name`, replacing any earlier registration.
    pub fn add_command(&self, name: &str, command: Command) {
        let replaced = lock(&self.commands)
            .insert(name.to_string(), Arc::new(command))
            .is_some();
        if replaced {
            debug!("[commands] Replaced command {}", name);
        }
    }

    pub fn has_command(&self, name: &str) -> bool {
        lock(&self.commands).contains_key(name)
    }

    pub fn command_names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.commands).keys().cloned().collect();
        names.sort();
        names
    }

    fn get(&self, name: &str) -> Result<Arc<Command>> {
        lock(&self.commands)
            .get(name)
            .cloned()
            .ok_or_else(|| NotebookError::UnknownCommand(name.to_string()))
    }

    pub fn label(&self, name: &str) -> Result<String> {
        Ok(self.get(name)?.label().to_string())
    }

    pub fn is_enabled(&self, name: &str) -> Result<bool> {
        Ok(self.get(name)?.is_enabled())
    }

    /// Run a command if its predicate allows it.
    pub async fn invoke(&self, name: &str, args: CommandArgs) -> Result<CommandOutcome> {
        let command = self.get(name)?;
        if !command.is_enabled() {
            debug!("[commands] {} is disabled", name);
            return Ok(CommandOutcome::Disabled);
        }
        debug!("[commands] Executing {}", name);
        let value = (command.execute)(args).await?;
        Ok(CommandOutcome::Executed(value))
    }

    pub fn add_key_binding(&self, keys: &str, command: &str) {
        let keys = normalize_keystroke(keys);
        let mut bindings = lock(&self.key_bindings);
        bindings.retain(|b| b.keys != keys);
        bindings.push(KeyBindingConfig {
            keys,
            command: command.to_string(),
        });
    }

    pub fn set_key_bindings(&self, bindings: &[KeyBindingConfig]) {
        lock(&self.key_bindings).clear();
        for binding in bindings {
            self.add_key_binding(&binding.keys, &binding.command);
        }
    }

    pub fn key_bindings(&self) -> Vec<KeyBindingConfig> {
        lock(&self.key_bindings).clone()
    }

    /// Dispatch a key press. Returns `None` when no binding matches.
    pub async fn process_key_event(&self, event: &KeyEvent) -> Option<Result<CommandOutcome>> {
        let stroke = event.keystroke();
        let command = lock(&self.key_bindings)
            .iter()
            .find(|b| b.keys == stroke)
            .map(|b| b.command.clone())?;
        Some(self.invoke(&command, CommandArgs::new()).await)
    }
}

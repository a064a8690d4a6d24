//! Line-oriented administrative commands
//!
//! The host's interactive surface: one command per line, e.g.
//! `load Greeter`, `unload Bar --tenant 7`, `load-all`, `deps ./staged.wasm`.

use std::path::PathBuf;

use crate::module::{ModuleAdmin, ModuleManager, Scope};

/// One parsed admin command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    Load { scope: Scope, name: String },
    Unload { scope: Scope, name: String },
    Reload { scope: Scope, name: String },
    List { scope: Scope },
    LoadAll { scope: Scope },
    UnloadAll { scope: Scope },
    Deps { path: PathBuf },
    Quit,
}

impl AdminCommand {
    /// Parse a command line; blank lines yield `Ok(None)`
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let mut words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            return Ok(None);
        }

        let scope = match words.iter().position(|w| *w == "--tenant") {
            Some(at) => {
                let id = words
                    .get(at + 1)
                    .ok_or("--tenant needs a tenant id")?
                    .parse::<u64>()
                    .map_err(|e| format!("invalid tenant id: {}", e))?;
                words.drain(at..at + 2);
                Scope::Tenant(id)
            }
            None => Scope::Global,
        };

        let Some(&verb) = words.first() else {
            return Err("missing command".to_string());
        };
        let argument = |what: &str| -> Result<String, String> {
            match words.as_slice() {
                [_, arg] => Ok(arg.to_string()),
                _ => Err(format!("usage: {} <{}> [--tenant <id>]", verb, what)),
            }
        };
        let bare = || -> Result<(), String> {
            if words.len() == 1 {
                Ok(())
            } else {
                Err(format!("usage: {} [--tenant <id>]", verb))
            }
        };

        let command = match verb {
            "load" => AdminCommand::Load {
                scope,
                name: argument("name")?,
            },
            "unload" => AdminCommand::Unload {
                scope,
                name: argument("name")?,
            },
            "reload" => AdminCommand::Reload {
                scope,
                name: argument("name")?,
            },
            "list" => {
                bare()?;
                AdminCommand::List { scope }
            }
            "load-all" => {
                bare()?;
                AdminCommand::LoadAll { scope }
            }
            "unload-all" => {
                bare()?;
                AdminCommand::UnloadAll { scope }
            }
            "deps" => AdminCommand::Deps {
                path: PathBuf::from(argument("path")?),
            },
            "quit" | "exit" => AdminCommand::Quit,
            other => return Err(format!("unknown command `{}`", other)),
        };
        Ok(Some(command))
    }

    /// Run a command against the manager and render the reply
    pub async fn execute(&self, manager: &ModuleManager) -> String {
        match self {
            AdminCommand::Load { scope, name } => {
                if manager.load_module(*scope, name).await {
                    format!("loaded {} ({})", name, scope)
                } else {
                    format!("failed to load {} ({})", name, scope)
                }
            }
            AdminCommand::Unload { scope, name } => {
                if manager.unload_module(*scope, name).await {
                    format!("unloaded {} ({})", name, scope)
                } else {
                    format!("failed to unload {} ({})", name, scope)
                }
            }
            AdminCommand::Reload { scope, name } => {
                match manager.reload_module(*scope, name).await {
                    Ok(_) => format!("reloaded {} ({})", name, scope),
                    Err(e) => format!("failed to reload {} ({}): {}", name, scope, e),
                }
            }
            AdminCommand::List { scope } => {
                let names = manager.list_modules(*scope).await;
                if names.is_empty() {
                    format!("no modules loaded ({})", scope)
                } else {
                    format!("{} ({}): {}", names.len(), scope, names.join(", "))
                }
            }
            AdminCommand::LoadAll { scope } => {
                let (loaded, total) = manager.load_all_modules(*scope).await;
                format!("loaded {}/{} modules ({})", loaded, total, scope)
            }
            AdminCommand::UnloadAll { scope } => {
                let (unloaded, total) = manager.unload_all_modules(*scope).await;
                format!("unloaded {}/{} modules ({})", unloaded, total, scope)
            }
            AdminCommand::Deps { path } => match manager.check_dependencies(path) {
                Ok(report) if report.is_clean() => {
                    format!("{}: no restricted dependencies", path.display())
                }
                Ok(report) => format!(
                    "{}: restricted dependencies: {}",
                    path.display(),
                    report.into_vec().join(", ")
                ),
                Err(e) => format!("{}: scan failed: {}", path.display(), e),
            },
            AdminCommand::Quit => "bye".to_string(),
        }
    }
}

//! # Shell - per-session protocol state machine.
//!
//! One [`Shell`] exists per accepted session. It owns the session's
//! authentication state and configure-mode flag, handles the built-in
//! commands, routes configure-mode lines to the config store, and forwards
//! everything else to the command dispatcher.
//!
//! ## Line processing order
//! ```text
//! "hello"            always answered, regardless of auth state
//! AwaitingPassword?  line consumed as the password attempt
//! built-ins          version / reboot [-h] / webrepl [--update] /
//!                    conf / noconf / help [lm]
//! configure mode?    key → get, key value... → set, dump → list all
//! otherwise          Command Dispatcher
//! ```
//!
//! The caller re-emits [`Shell::prompt`] after every processed line; the
//! prompt text encodes the current auth/configure state.
//!
//! ## Failure semantics
//! Dispatcher and config errors become reply strings and the session
//! continues. A failed password attempt terminates the session.

use std::sync::Arc;

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::store::ConfigStore;

/// Session authentication progress. Transitions are one-way.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthState {
    /// No shared secret configured; commands accepted immediately.
    NoAuthRequired,
    /// First line must be the password.
    AwaitingPassword,
    /// Password accepted.
    Authenticated,
}

/// What the session loop must do after a processed line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShellAction {
    /// Keep the session open.
    Continue,
    /// Close this session (auth failure or fatal protocol condition).
    Terminate,
    /// Reboot the runtime; `hard` exits the process for the watchdog.
    Reboot {
        /// Hard reboot flag (`reboot -h`).
        hard: bool,
    },
}

/// Per-session shell state machine.
pub struct Shell {
    device_id: String,
    hwuid: String,
    version: String,
    password: String,
    auth: AuthState,
    conf_mode: bool,
    dispatcher: Arc<Dispatcher>,
    store: Arc<ConfigStore>,
}

impl Shell {
    /// Creates the shell for a fresh session.
    pub fn new(cfg: &Config, dispatcher: Arc<Dispatcher>, store: Arc<ConfigStore>) -> Self {
        let auth = if cfg.auth && !cfg.password.is_empty() {
            AuthState::AwaitingPassword
        } else {
            AuthState::NoAuthRequired
        };
        let hwuid = store.get_str("hwuid").unwrap_or_else(|| "n/a".into());
        Self {
            device_id: cfg.device_id.clone(),
            hwuid,
            version: cfg.version.clone(),
            password: cfg.password.clone(),
            auth,
            conf_mode: false,
            dispatcher,
            store,
        }
    }

    /// Prompt string encoding the current auth/configure state.
    pub fn prompt(&self) -> String {
        let auth = if self.auth == AuthState::AwaitingPassword {
            "[password] "
        } else {
            ""
        };
        let conf = if self.conf_mode { "[configure] " } else { "" };
        format!("{auth}{conf}{} $ ", self.device_id)
    }

    /// Current auth state.
    pub fn auth_state(&self) -> AuthState {
        self.auth
    }

    /// Processes one received line; returns the replies and the follow-up
    /// action for the session loop.
    pub async fn handle_line(&mut self, line: &str) -> (Vec<String>, ShellAction) {
        let line = line.trim();
        if line.is_empty() {
            return (Vec::new(), ShellAction::Continue);
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();

        // Low-level device identification answers before anything else.
        if tokens[0] == "hello" {
            return (
                vec![format!("hello:{}:{}", self.device_id, self.hwuid)],
                ShellAction::Continue,
            );
        }

        if self.auth == AuthState::AwaitingPassword {
            return if tokens[0] == self.password {
                self.auth = AuthState::Authenticated;
                (vec!["AuthOk".into()], ShellAction::Continue)
            } else {
                (vec!["AuthFailed\nBye!".into()], ShellAction::Terminate)
            };
        }

        match tokens[0] {
            "version" => (vec![self.version.clone()], ShellAction::Continue),
            "reboot" => {
                let hard = tokens.get(1).map(|t| t.contains("-h")).unwrap_or(false);
                let label = if hard { "[HARD] " } else { "" };
                (
                    vec![format!("{label}Reboot node.\nBye!")],
                    ShellAction::Reboot { hard },
                )
            }
            t if t.starts_with("webrepl") => {
                let update = tokens.get(1).map(|t| t.contains("-u")).unwrap_or(false);
                let mut replies = vec![
                    " Start update/file-transfer channel".to_string(),
                    format!("  [!] channel password: {}", self.password),
                ];
                if update {
                    replies.push(" Reboot node then start the update channel...".into());
                    replies.push(" Bye!".into());
                    return (replies, ShellAction::Reboot { hard: true });
                }
                (replies, ShellAction::Continue)
            }
            t if t.starts_with("noconf") => {
                self.conf_mode = false;
                (Vec::new(), ShellAction::Continue)
            }
            t if t.starts_with("conf") => {
                self.conf_mode = true;
                (Vec::new(), ShellAction::Continue)
            }
            "help" => {
                let all = tokens.get(1).map(|t| *t == "lm").unwrap_or(false);
                (self.help(all), ShellAction::Continue)
            }
            _ => {
                if self.conf_mode {
                    (self.configure(&tokens), ShellAction::Continue)
                } else {
                    let (_state, reply) = self.dispatcher.execute_line(line).await;
                    (vec![reply], ShellAction::Continue)
                }
            }
        }
    }

    /// Configure-mode handling: `key` → get, `key value...` → set,
    /// `dump [filter]` → list.
    fn configure(&self, tokens: &[&str]) -> Vec<String> {
        if tokens[0] == "dump" {
            let filter = tokens.get(1).copied();
            return self
                .store
                .dump()
                .into_iter()
                .filter(|(key, _)| filter.map(|f| key.contains(f)).unwrap_or(true))
                .map(|(key, value)| format!("  {key}{}:       {value}", " ".repeat(10usize.saturating_sub(key.len()))))
                .collect();
        }
        if tokens.len() == 1 {
            return match self.store.get_str(tokens[0]) {
                Some(value) => vec![value],
                None => vec!["Invalid key".into()],
            };
        }
        // Set: the value is the rest of the line, joined by spaces.
        let value = tokens[1..].join(" ");
        match self.store.put(tokens[0], &value) {
            Ok(()) => vec!["Saved".into()],
            Err(e) if matches!(e, crate::error::ExecError::NotFound { .. }) => {
                vec!["Invalid key".into()]
            }
            Err(e) => vec![format!("Failed to save: {e}")],
        }
    }

    fn help(&self, all_modules: bool) -> Vec<String> {
        let mut lines: Vec<String> = [
            "[SHELL]   - built-in commands",
            "   hello   - device identification",
            "   modules - show loaded command modules",
            "   version - runtime version",
            "   exit    - leave the shell prompt",
            "   reboot  - soft reboot; hard (watchdog) reboot: reboot -h",
            "   webrepl - update/file-transfer channel, use with --update",
            "[CONF] Configure mode",
            "  conf       - enter configure mode",
            "    dump       - dump all key/value pairs",
            "    key        - get value",
            "    key value  - set value",
            "  noconf     - leave configure mode",
            "[TASK] postfix: &x - one-shot, &&x - looped, x: delay ms [min 20ms]",
            "  task list         - list tasks with <tag>s",
            "  task kill <tag>   - cancel task (tag or module.*)",
            "  task show <tag>   - show task output",
            "[EXEC] Command mode:",
            "   help lm  - list ALL module functions",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        lines.extend(self.dispatcher.help_lines(all_modules));
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ModuleRegistry;
    use crate::events::Bus;
    use crate::tasks::TaskManager;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn shell(auth: bool) -> Shell {
        let store = Arc::new(ConfigStore::with_defaults());
        let cfg = Config {
            auth,
            password: "secret1".into(),
            ..Config::default()
        };
        let tasks = TaskManager::new(Bus::new(16), CancellationToken::new(), 4);
        let dispatcher = Dispatcher::new(
            Arc::new(ModuleRegistry::new()),
            tasks,
            Duration::from_millis(20),
        );
        Shell::new(&cfg, dispatcher, store)
    }

    #[tokio::test]
    async fn test_configure_mode_roundtrip() {
        let mut sh = shell(false);
        assert_eq!(sh.prompt(), "node01 $ ");

        let (_, action) = sh.handle_line("conf").await;
        assert_eq!(action, ShellAction::Continue);
        assert_eq!(sh.prompt(), "[configure] node01 $ ");

        let (replies, _) = sh.handle_line("devfid kitchen").await;
        assert_eq!(replies, vec!["Saved".to_string()]);

        sh.handle_line("noconf").await;
        assert_eq!(sh.prompt(), "node01 $ ");

        sh.handle_line("conf").await;
        let (replies, _) = sh.handle_line("devfid").await;
        assert_eq!(replies, vec!["kitchen".to_string()]);
    }

    #[tokio::test]
    async fn test_configure_unknown_key_and_dump() {
        let mut sh = shell(false);
        sh.handle_line("conf").await;

        let (replies, _) = sh.handle_line("nosuchkey 42").await;
        assert_eq!(replies, vec!["Invalid key".to_string()]);

        let (replies, _) = sh.handle_line("dump soc").await;
        assert!(replies.iter().any(|l| l.contains("socport")));
        assert!(replies.iter().all(|l| !l.contains("devfid")), "filter applies");
    }

    #[tokio::test]
    async fn test_auth_gate_consumes_first_line() {
        let mut sh = shell(true);
        assert_eq!(sh.auth_state(), AuthState::AwaitingPassword);
        assert_eq!(sh.prompt(), "[password] node01 $ ");

        // hello answers even before authentication.
        let (replies, action) = sh.handle_line("hello").await;
        assert_eq!(action, ShellAction::Continue);
        assert!(replies[0].starts_with("hello:node01:"));

        // Any other line is the password attempt; a builtin is not exempt.
        let (replies, action) = sh.handle_line("version").await;
        assert_eq!(action, ShellAction::Terminate);
        assert!(replies[0].contains("AuthFailed"));
    }

    #[tokio::test]
    async fn test_auth_success_unlocks_builtins() {
        let mut sh = shell(true);
        let (replies, action) = sh.handle_line("secret1").await;
        assert_eq!(action, ShellAction::Continue);
        assert_eq!(replies, vec!["AuthOk".to_string()]);
        assert_eq!(sh.auth_state(), AuthState::Authenticated);
        assert_eq!(sh.prompt(), "node01 $ ");

        let (replies, _) = sh.handle_line("version").await;
        assert_eq!(replies, vec![Config::default().version]);
    }

    #[tokio::test]
    async fn test_reboot_variants() {
        let mut sh = shell(false);
        let (_, action) = sh.handle_line("reboot").await;
        assert_eq!(action, ShellAction::Reboot { hard: false });

        let (_, action) = sh.handle_line("reboot -h").await;
        assert_eq!(action, ShellAction::Reboot { hard: true });
    }

    #[tokio::test]
    async fn test_unknown_command_reports_and_continues() {
        let mut sh = shell(false);
        let (replies, action) = sh.handle_line("ghost do").await;
        assert_eq!(action, ShellAction::Continue, "dispatch errors are not fatal");
        assert!(replies[0].contains("[ERR]"), "got: {:?}", replies);
    }
}

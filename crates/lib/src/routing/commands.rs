//! Command interception: natural-language aliases and prefix commands.

use std::collections::{BTreeMap, HashMap};

/// Commands forwarded to the agent in canonical `/<name> [args]` form.
const TRANSFORMED: &[(&str, &str)] = &[
    ("new", "start a new session"),
    ("reset", "reset the current session"),
    ("status", "show session status"),
    ("stop", "stop the current reply"),
    ("model", "show or switch the model"),
];

const BUILTIN_ALIASES: &[(&str, &str)] = &[
    ("help", "help"),
    ("commands", "help"),
    ("what can you do", "help"),
    ("new session", "new"),
    ("start over", "new"),
    ("new chat", "new"),
    ("reset session", "reset"),
    ("status", "status"),
    ("stop", "stop"),
    ("cancel", "stop"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Answered by the router; the agent is not contacted.
    LocalReply(String),
    /// Forward `body` instead of the original text.
    Transform { command: String, body: String },
    /// Not a command.
    Passthrough,
}

pub struct CommandTable {
    prefix: char,
    aliases: HashMap<String, String>,
}

fn fold(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

impl CommandTable {
    /// Built-in aliases plus `extra` (phrase -> canonical name); extra entries win.
    pub fn new(prefix: char, extra: &BTreeMap<String, String>) -> Self {
        let mut aliases: HashMap<String, String> = BUILTIN_ALIASES
            .iter()
            .map(|(phrase, name)| (phrase.to_string(), name.to_string()))
            .collect();
        for (phrase, name) in extra {
            let phrase = fold(phrase);
            let name = name.trim().trim_start_matches(prefix).to_lowercase();
            if !phrase.is_empty() && !name.is_empty() {
                aliases.insert(phrase, name);
            }
        }
        Self { prefix, aliases }
    }

    pub fn resolve(&self, body: &str) -> CommandOutcome {
        if let Some(name) = self.aliases.get(&fold(body)) {
            return self.outcome(name, "");
        }
        let Some(rest) = body.trim().strip_prefix(self.prefix) else {
            return CommandOutcome::Passthrough;
        };
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            return self.outcome("help", "");
        }
        let (name, args) = match rest.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (rest, ""),
        };
        self.outcome(&name.to_lowercase(), args)
    }

    fn outcome(&self, name: &str, args: &str) -> CommandOutcome {
        if name == "help" {
            return CommandOutcome::LocalReply(self.help_text());
        }
        if TRANSFORMED.iter().any(|(n, _)| *n == name) {
            let body = if args.is_empty() {
                format!("/{}", name)
            } else {
                format!("/{} {}", name, args)
            };
            return CommandOutcome::Transform {
                command: name.to_string(),
                body,
            };
        }
        CommandOutcome::Passthrough
    }

    pub fn help_text(&self) -> String {
        let mut lines = vec!["Available commands:".to_string()];
        lines.push(format!("{}help - show this list", self.prefix));
        for (name, about) in TRANSFORMED {
            lines.push(format!("{}{} - {}", self.prefix, name, about));
        }
        lines.join("\n")
    }
}

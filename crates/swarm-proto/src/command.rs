//! Commands: follow-up actions requested by trigger handlers.

use crate::{AttrValue, Attributes};
use serde::{Deserialize, Serialize};

/// How a command is carried out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    /// The dispatcher appends the command span to the log itself.
    #[default]
    Log,
    /// The command is handed to an external executor, which appends its own
    /// result span when the real-world effect finishes.
    External,
}

/// A handler's side-effect request.
///
/// Commands are never persisted directly: the dispatcher turns each one into
/// exactly one span whose `parent_id` is the span that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Fully-qualified target name; becomes the new span's name.
    pub fq_name: String,

    /// CLI-style arguments (`--motion-id m1 --urgent extra`).
    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub delivery: Delivery,
}

impl Command {
    pub fn new(fq_name: impl Into<String>) -> Self {
        Self {
            fq_name: fq_name.into(),
            args: Vec::new(),
            description: String::new(),
            delivery: Delivery::Log,
        }
    }

    /// Appends a `--key value` argument pair.
    #[must_use]
    pub fn arg(mut self, key: &str, value: impl ToString) -> Self {
        self.args.push(format!("--{key}"));
        self.args.push(value.to_string());
        self
    }

    /// Appends raw argument tokens.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn external(mut self) -> Self {
        self.delivery = Delivery::External;
        self
    }

    /// Converts the argument list into span attributes.
    ///
    /// - `--motion-id m1` becomes `motion_id = "m1"` (dashes become underscores)
    /// - `--urgent` with no value becomes `urgent = true`
    /// - positional tokens become `arg.0`, `arg.1`, ...
    pub fn to_attributes(&self) -> Attributes {
        let mut attributes = Attributes::new();
        let mut positional = 0usize;
        let mut tokens = self.args.iter().peekable();

        while let Some(token) = tokens.next() {
            if let Some(key) = token.strip_prefix("--").filter(|k| !k.is_empty()) {
                let key = key.replace('-', "_");
                let value = match tokens.next_if(|next| !next.starts_with("--")) {
                    Some(next) => AttrValue::Str(next.clone()),
                    None => AttrValue::Bool(true),
                };
                attributes.insert(key, value);
            } else {
                attributes.insert(format!("arg.{positional}"), AttrValue::Str(token.clone()));
                positional += 1;
            }
        }

        attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_value_args_become_attributes() {
        let cmd = Command::new("governance.motion.vote")
            .arg("motion-id", "m1")
            .arg("meeting-id", "board");
        let attrs = cmd.to_attributes();
        assert_eq!(attrs.get("motion_id"), Some(&AttrValue::Str("m1".into())));
        assert_eq!(attrs.get("meeting_id"), Some(&AttrValue::Str("board".into())));
    }

    #[test]
    fn test_flags_and_positionals() {
        let cmd = Command::new("scrum.blockers.escalate").with_args(["api", "--urgent", "--team", "alpha", "db"]);
        let attrs = cmd.to_attributes();
        assert_eq!(attrs.get("urgent"), Some(&AttrValue::Bool(true)));
        assert_eq!(attrs.get("team"), Some(&AttrValue::Str("alpha".into())));
        assert_eq!(attrs.get("arg.0"), Some(&AttrValue::Str("api".into())));
        assert_eq!(attrs.get("arg.1"), Some(&AttrValue::Str("db".into())));
    }

    #[test]
    fn test_trailing_flag_is_true() {
        let attrs = Command::new("x").with_args(["--dry-run"]).to_attributes();
        assert_eq!(attrs.get("dry_run"), Some(&AttrValue::Bool(true)));
    }

    #[test]
    fn test_delivery_defaults_to_log() {
        let cmd: Command = serde_json::from_str(r#"{"fq_name":"a.b"}"#).unwrap();
        assert_eq!(cmd.delivery, Delivery::Log);
        assert_eq!(Command::new("a.b").external().delivery, Delivery::External);
    }
}

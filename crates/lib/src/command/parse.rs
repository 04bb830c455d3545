//! Command grammar: `<verb> <resource> <namespace> [<identifier>]`.

use crate::allowlist::{AllowList, CommandField};
use std::fmt;

/// A command whose verb, resource and namespace have passed the allow-list.
///
/// The only constructor is [`Command::parse`]; the caller's literal tokens are kept as typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    verb: String,
    resource: String,
    namespace: String,
    identifier: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unable to parse command: expected 3 or 4 space-separated tokens, got {tokens}")]
    MalformedCommand { tokens: usize },

    #[error("unsupported {field}: {value}")]
    UnsupportedValue { field: CommandField, value: String },
}

impl Command {
    /// Split `raw` on single spaces and validate verb, resource and namespace, in that order.
    /// The first field that is not allow-listed is reported; later fields are not checked.
    pub fn parse(raw: &str, allowlist: &AllowList) -> Result<Self, ParseError> {
        let tokens: Vec<&str> = raw.split(' ').collect();
        let identifier = match tokens.len() {
            3 => None,
            // an empty fourth token (trailing space) means no identifier
            4 => Some(tokens[3]).filter(|s| !s.is_empty()).map(str::to_string),
            n => return Err(ParseError::MalformedCommand { tokens: n }),
        };

        let verb = check(allowlist, CommandField::Verb, tokens[0])?;
        let resource = check(allowlist, CommandField::Resource, tokens[1])?;
        let namespace = check(allowlist, CommandField::Namespace, tokens[2])?;

        Ok(Self {
            verb,
            resource,
            namespace,
            identifier,
        })
    }

    pub fn verb(&self) -> &str {
        &self.verb
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }
}

fn check(allowlist: &AllowList, field: CommandField, value: &str) -> Result<String, ParseError> {
    if allowlist.contains(field, value) {
        Ok(value.to_string())
    } else {
        Err(ParseError::UnsupportedValue {
            field,
            value: value.to_string(),
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.verb, self.resource, self.namespace)?;
        if let Some(id) = &self.identifier {
            write!(f, " {}", id)?;
        }
        Ok(())
    }
}

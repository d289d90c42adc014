//! Query parsing
//!
//! Turns a request line such as `SET key value` into a typed query.
//! Commands are case-insensitive; arguments are whitespace separated.

use crate::error::{Error, Result};

/// Commands understood by the query layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandId {
    Get,
    Set,
    Del,
}

impl CommandId {
    fn from_token(token: &str) -> Result<Self> {
        let upper = token.to_ascii_uppercase();
        match upper.as_str() {
            "GET" => Ok(CommandId::Get),
            "SET" => Ok(CommandId::Set),
            "DEL" => Ok(CommandId::Del),
            _ => Err(Error::Query(format!("invalid command {}", upper))),
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            CommandId::Get | CommandId::Del => 1,
            CommandId::Set => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandId::Get => "GET",
            CommandId::Set => "SET",
            CommandId::Del => "DEL",
        }
    }
}

impl std::fmt::Display for CommandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub command: CommandId,
    pub args: Vec<String>,
}

impl Query {
    /// First argument; always present after a successful parse
    pub fn key(&self) -> &str {
        self.args.first().map(String::as_str).unwrap_or_default()
    }

    /// Second argument of a SET
    pub fn value(&self) -> &str {
        self.args.get(1).map(String::as_str).unwrap_or_default()
    }
}

/// Parse a request line
pub fn parse(request: &str) -> Result<Query> {
    let mut tokens = request.split_whitespace();
    let command = match tokens.next() {
        Some(token) => CommandId::from_token(token)?,
        None => return Err(Error::Query("invalid query length (0)".into())),
    };

    let args: Vec<String> = tokens.map(str::to_string).collect();
    let expected = command.arity();
    if args.len() != expected {
        let noun = if expected == 1 { "argument" } else { "arguments" };
        return Err(Error::Query(format!(
            "for command {} expected {} {}, got {}",
            command,
            expected,
            noun,
            args.len()
        )));
    }

    Ok(Query { command, args })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_err(input: &str) -> String {
        parse(input).unwrap_err().to_string()
    }

    #[test]
    fn test_parse_valid_queries() {
        assert_eq!(
            parse("GET key").unwrap(),
            Query {
                command: CommandId::Get,
                args: vec!["key".into()],
            }
        );

        let set = parse("  set   key   value ").unwrap();
        assert_eq!(set.command, CommandId::Set);
        assert_eq!(set.key(), "key");
        assert_eq!(set.value(), "value");

        assert_eq!(parse("Del key").unwrap().command, CommandId::Del);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse_err(""), "invalid query length (0)");
        assert_eq!(parse_err("   "), "invalid query length (0)");
        assert_eq!(parse_err("somecmd"), "invalid command SOMECMD");
        assert_eq!(parse_err("GET"), "for command GET expected 1 argument, got 0");
        assert_eq!(
            parse_err("GET key value"),
            "for command GET expected 1 argument, got 2"
        );
        assert_eq!(parse_err("SET"), "for command SET expected 2 arguments, got 0");
        assert_eq!(parse_err("SET key"), "for command SET expected 2 arguments, got 1");
        assert_eq!(
            parse_err("SET key key key"),
            "for command SET expected 2 arguments, got 3"
        );
        assert_eq!(parse_err("DEL"), "for command DEL expected 1 argument, got 0");
        assert_eq!(
            parse_err("DEL key value"),
            "for command DEL expected 1 argument, got 2"
        );
    }
}

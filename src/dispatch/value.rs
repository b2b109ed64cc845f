//! # Tagged argument values for command binding.
//!
//! Command lines arrive as text; handlers receive typed values. [`ArgValue`]
//! is the small tagged type (string / int / float / bool / sequence) each
//! token is parsed into, and [`CallArgs`] binds them positionally and by
//! name against a handler's signature. No code is ever generated or
//! evaluated at runtime.
//!
//! ## Token grammar
//! - `true` / `false` → Bool
//! - decimal integer → Int, decimal with `.` → Float
//! - `'quoted'` or `"quoted"` → Str (quotes stripped, commas/spaces kept)
//! - `[a, b, c]` → List of parsed elements
//! - `key=value` → named argument (value parsed by the same rules)
//! - anything else → Str

use crate::error::ExecError;

/// One parsed argument.
#[derive(Clone, Debug, PartialEq)]
pub enum ArgValue {
    /// Free-form string.
    Str(String),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// Boolean.
    Bool(bool),
    /// Sequence of values.
    List(Vec<ArgValue>),
}

impl ArgValue {
    /// Parses a single token.
    pub fn parse(raw: &str) -> ArgValue {
        let raw = raw.trim();
        if (raw.starts_with('\'') && raw.ends_with('\'') && raw.len() >= 2)
            || (raw.starts_with('"') && raw.ends_with('"') && raw.len() >= 2)
        {
            return ArgValue::Str(raw[1..raw.len() - 1].to_string());
        }
        if raw.starts_with('[') && raw.ends_with(']') {
            let inner = &raw[1..raw.len() - 1];
            let items = split_top_level(inner, ',')
                .into_iter()
                .filter(|piece| !piece.trim().is_empty())
                .map(|piece| ArgValue::parse(&piece))
                .collect();
            return ArgValue::List(items);
        }
        match raw {
            "true" | "True" => return ArgValue::Bool(true),
            "false" | "False" => return ArgValue::Bool(false),
            _ => {}
        }
        if let Ok(i) = raw.parse::<i64>() {
            return ArgValue::Int(i);
        }
        if raw.contains('.') {
            if let Ok(f) = raw.parse::<f64>() {
                return ArgValue::Float(f);
            }
        }
        ArgValue::Str(raw.to_string())
    }

    /// Integer view; Int directly, Bool as 0/1.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ArgValue::Int(i) => Some(*i),
            ArgValue::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Float view; Int widens.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ArgValue::Float(f) => Some(*f),
            ArgValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Bool view.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ArgValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl std::fmt::Display for ArgValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArgValue::Str(s) => write!(f, "{s}"),
            ArgValue::Int(i) => write!(f, "{i}"),
            ArgValue::Float(x) => write!(f, "{x}"),
            ArgValue::Bool(b) => write!(f, "{b}"),
            ArgValue::List(items) => {
                let rendered: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", rendered.join(", "))
            }
        }
    }
}

/// Positional and named arguments bound to one call.
#[derive(Clone, Debug, Default)]
pub struct CallArgs {
    /// Positional values, in order.
    pub pos: Vec<ArgValue>,
    /// `key=value` pairs, in order of appearance.
    pub named: Vec<(String, ArgValue)>,
}

impl CallArgs {
    /// Parses an argument string. `comma_separated` selects the
    /// parenthesized form (`a, b, key=v`); otherwise tokens split on
    /// whitespace (the bare shell form).
    pub fn parse(raw: &str, comma_separated: bool) -> Result<CallArgs, ExecError> {
        let pieces: Vec<String> = if comma_separated {
            split_top_level(raw, ',')
        } else {
            split_top_level(raw, ' ')
        };

        let mut args = CallArgs::default();
        for piece in pieces {
            let piece = piece.trim();
            if piece.is_empty() {
                continue;
            }
            match find_top_level_eq(piece) {
                Some(at) => {
                    let key = piece[..at].trim();
                    if key.is_empty() || key.chars().any(char::is_whitespace) {
                        return Err(ExecError::Parse(format!("bad named argument '{piece}'")));
                    }
                    if args.named.iter().any(|(k, _)| k == key) {
                        return Err(ExecError::Parse(format!("duplicate argument '{key}'")));
                    }
                    args.named
                        .push((key.to_string(), ArgValue::parse(piece[at + 1..].trim())));
                }
                None => {
                    if !args.named.is_empty() {
                        return Err(ExecError::Parse(format!(
                            "positional argument '{piece}' after named"
                        )));
                    }
                    args.pos.push(ArgValue::parse(piece));
                }
            }
        }
        Ok(args)
    }

    /// Positional value at `idx`.
    pub fn at(&self, idx: usize) -> Option<&ArgValue> {
        self.pos.get(idx)
    }

    /// Value bound at `idx` positionally, or under `key` by name.
    pub fn bind(&self, idx: usize, key: &str) -> Option<&ArgValue> {
        self.pos
            .get(idx)
            .or_else(|| self.named.iter().find(|(k, _)| k == key).map(|(_, v)| v))
    }

    /// Total argument count.
    pub fn len(&self) -> usize {
        self.pos.len() + self.named.len()
    }

    /// True when no argument was supplied.
    pub fn is_empty(&self) -> bool {
        self.pos.is_empty() && self.named.is_empty()
    }
}

/// Splits on `sep` at depth zero: quotes and brackets shield separators.
fn split_top_level(raw: &str, sep: char) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for ch in raw.chars() {
        match quote {
            Some(q) => {
                current.push(ch);
                if ch == q {
                    quote = None;
                }
            }
            None => match ch {
                '\'' | '"' => {
                    quote = Some(ch);
                    current.push(ch);
                }
                '[' => {
                    depth += 1;
                    current.push(ch);
                }
                ']' => {
                    depth = depth.saturating_sub(1);
                    current.push(ch);
                }
                c if c == sep && depth == 0 => {
                    pieces.push(std::mem::take(&mut current));
                }
                _ => current.push(ch),
            },
        }
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// Position of a `=` outside quotes/brackets, if any.
fn find_top_level_eq(piece: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (i, ch) in piece.char_indices() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None => match ch {
                '\'' | '"' => quote = Some(ch),
                '[' => depth += 1,
                ']' => depth = depth.saturating_sub(1),
                '=' if depth == 0 => return Some(i),
                _ => {}
            },
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_token_parsing() {
        assert_eq!(ArgValue::parse("42"), ArgValue::Int(42));
        assert_eq!(ArgValue::parse("-7"), ArgValue::Int(-7));
        assert_eq!(ArgValue::parse("0.5"), ArgValue::Float(0.5));
        assert_eq!(ArgValue::parse("true"), ArgValue::Bool(true));
        assert_eq!(ArgValue::parse("False"), ArgValue::Bool(false));
        assert_eq!(ArgValue::parse("'hello world'"), ArgValue::Str("hello world".into()));
        assert_eq!(ArgValue::parse("plain"), ArgValue::Str("plain".into()));
    }

    #[test]
    fn test_list_parsing_nested_commas() {
        let v = ArgValue::parse("[1, 2, 'a,b']");
        assert_eq!(
            v,
            ArgValue::List(vec![
                ArgValue::Int(1),
                ArgValue::Int(2),
                ArgValue::Str("a,b".into())
            ])
        );
    }

    #[test]
    fn test_call_args_positional_and_named() {
        let args = CallArgs::parse("10, 'soft', speed=0.5, loop=true", true).expect("parse");
        assert_eq!(args.pos.len(), 2);
        assert_eq!(args.at(0).and_then(ArgValue::as_int), Some(10));
        assert_eq!(args.bind(2, "speed").and_then(ArgValue::as_float), Some(0.5));
        assert_eq!(args.bind(3, "loop").and_then(ArgValue::as_bool), Some(true));
    }

    #[test]
    fn test_call_args_space_form() {
        let args = CallArgs::parse("true 50 'two words'", false).expect("parse");
        assert_eq!(args.pos.len(), 3);
        assert_eq!(args.at(2), Some(&ArgValue::Str("two words".into())));
    }

    #[test]
    fn test_call_args_rejects_positional_after_named() {
        let err = CallArgs::parse("speed=1, 10", true);
        assert!(matches!(err, Err(ExecError::Parse(_))));
        let dup = CallArgs::parse("speed=1, speed=2", true);
        assert!(matches!(dup, Err(ExecError::Parse(_))));
    }
}

//! Command grammar: parsing, escaping and construction.
//!
//! A command on the wire is a code followed by zero or more parameters,
//! each wrapped in `<...>` and separated by single spaces:
//!
//! ```text
//! M00 <#general> <hello\> world> <>
//! ```
//!
//! Parsing is forgiving: text outside `<...>` is ignored and an
//! unterminated trailing parameter is still returned. Construction is
//! strict and validates the code.

use crate::args::{ArgValue, Arguments};
use crate::error::ProtocolError;
use crate::COMMAND_CODE_LENGTH_MAX;

/// A parsed or outbound command.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub code: String,
    pub parameters: Vec<String>,
    /// Typed view of `parameters`, attached by a PARSE-stage handler.
    pub args: Option<Arguments>,
}

impl Command {
    pub fn new(code: impl Into<String>, parameters: Vec<String>) -> Self {
        Self {
            code: code.into(),
            parameters,
            args: None,
        }
    }

    /// Parses a raw command string.
    ///
    /// Returns `None` for empty or whitespace-only input, and when the text
    /// before the first space is empty. The code is kept verbatim and is
    /// not validated.
    pub fn parse(raw: &str) -> Option<Command> {
        if raw.trim().is_empty() {
            return None;
        }

        match raw.find(' ') {
            None => Some(Command::new(raw, Vec::new())),
            Some(0) => None,
            Some(idx) => Some(Command::new(&raw[..idx], parse_parameters(&raw[idx + 1..]))),
        }
    }

    /// Attaches typed arguments.
    pub fn with_args(mut self, args: Arguments) -> Self {
        self.args = Some(args);
        self
    }

    /// Returns a typed argument by name, if arguments are attached.
    pub fn arg(&self, name: &str) -> Option<&ArgValue> {
        self.args.as_ref().and_then(|args| args.get(name))
    }

    /// Returns a string argument by name.
    ///
    /// `None` covers missing arguments, untyped commands and non-text values.
    pub fn arg_str(&self, name: &str) -> Option<&str> {
        self.arg(name).and_then(ArgValue::as_str)
    }

    /// Renders this command back to wire text.
    pub fn to_wire(&self) -> Result<String, ProtocolError> {
        create_command(&self.code, &self.parameters)
    }
}

/// An outbound parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Parameter {
    Text(String),
    Number(f64),
    Int(i64),
    Null,
}

impl From<&str> for Parameter {
    fn from(value: &str) -> Self {
        Parameter::Text(value.to_string())
    }
}

impl From<String> for Parameter {
    fn from(value: String) -> Self {
        Parameter::Text(value)
    }
}

impl From<&String> for Parameter {
    fn from(value: &String) -> Self {
        Parameter::Text(value.clone())
    }
}

impl From<i32> for Parameter {
    fn from(value: i32) -> Self {
        Parameter::Int(value.into())
    }
}

impl From<i64> for Parameter {
    fn from(value: i64) -> Self {
        Parameter::Int(value)
    }
}

impl From<u16> for Parameter {
    fn from(value: u16) -> Self {
        Parameter::Int(value.into())
    }
}

impl From<u32> for Parameter {
    fn from(value: u32) -> Self {
        Parameter::Int(value.into())
    }
}

impl From<f64> for Parameter {
    fn from(value: f64) -> Self {
        Parameter::Number(value)
    }
}

impl From<&Parameter> for Parameter {
    fn from(value: &Parameter) -> Self {
        value.clone()
    }
}

impl<T: Into<Parameter>> From<Option<T>> for Parameter {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Parameter::Null)
    }
}

/// Splits parameter text into unescaped parameters.
///
/// Inside a parameter `\0` decodes to NUL and `\` followed by any other
/// character yields that character. `<` inside a parameter is literal.
pub fn parse_parameters(text: &str) -> Vec<String> {
    let mut parameters = Vec::new();
    let mut current: Option<String> = None;
    let mut escaping = false;

    for ch in text.chars() {
        let Some(param) = current.as_mut() else {
            if ch == '<' {
                current = Some(String::new());
            }
            continue;
        };

        if escaping {
            escaping = false;
            param.push(if ch == '0' { '\0' } else { ch });
        } else if ch == '\\' {
            escaping = true;
        } else if ch == '>' {
            if let Some(done) = current.take() {
                parameters.push(done);
            }
        } else {
            param.push(ch);
        }
    }

    if let Some(param) = current {
        parameters.push(param);
    }

    parameters
}

/// Escapes a parameter value for the wire.
///
/// Backslashes are escaped first so the escapes introduced for NUL and `>`
/// are not doubled.
pub fn escape_parameter(value: impl Into<Parameter>) -> String {
    let text = match value.into() {
        Parameter::Text(text) => text,
        Parameter::Number(n) => format_number(n),
        Parameter::Int(n) => n.to_string(),
        Parameter::Null => return String::new(),
    };

    text.replace('\\', "\\\\")
        .replace('\0', "\\0")
        .replace('>', "\\>")
}

/// Formats a float the way every squabble peer writes numbers: shortest
/// round-trip digits, `Infinity`/`NaN` spelled out, and exponent notation
/// only below 1e-6 or from 1e21 up.
fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }

    let magnitude = n.abs();
    if (1e-6..1e21).contains(&magnitude) {
        return n.to_string();
    }
    let formatted = format!("{:e}", n);
    match formatted.split_once('e') {
        Some((mantissa, exponent)) if !exponent.starts_with('-') => {
            format!("{}e+{}", mantissa, exponent)
        }
        _ => formatted,
    }
}

/// Checks that `code` is usable on an outbound command.
pub fn validate_command_code(code: &str) -> Result<(), ProtocolError> {
    if code.len() > COMMAND_CODE_LENGTH_MAX {
        return Err(ProtocolError::InvalidCommandCode {
            code: code.to_string(),
            reason: format!("must be <={} characters long", COMMAND_CODE_LENGTH_MAX),
        });
    }

    let valid = !code.is_empty()
        && code
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'.');
    if !valid {
        return Err(ProtocolError::InvalidCommandCode {
            code: code.to_string(),
            reason: "must match [A-Z0-9.]+".to_string(),
        });
    }

    Ok(())
}

/// Builds the wire text for a command.
///
/// A single parameter can be passed as `[value]` or `Some(value)`; no
/// parameters as `None::<&str>` or an empty array.
pub fn create_command<I, P>(code: &str, parameters: I) -> Result<String, ProtocolError>
where
    I: IntoIterator<Item = P>,
    P: Into<Parameter>,
{
    validate_command_code(code)?;

    let mut out = String::from(code);
    for param in parameters {
        out.push_str(" <");
        out.push_str(&escape_parameter(param));
        out.push('>');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cmd(code: &str, params: &[&str]) -> Command {
        Command::new(code, params.iter().map(|p| p.to_string()).collect())
    }

    #[test]
    fn test_parse_empty_and_whitespace() {
        assert_eq!(Command::parse(""), None);
        assert_eq!(Command::parse(" "), None);
        assert_eq!(Command::parse("  "), None);
        assert_eq!(Command::parse(" XYZ"), None);
        assert_eq!(Command::parse("  XYZ"), None);
    }

    #[test]
    fn test_parse_code_only() {
        assert_eq!(Command::parse("XYZ"), Some(cmd("XYZ", &[])));
        assert_eq!(Command::parse("012"), Some(cmd("012", &[])));
        assert_eq!(Command::parse("XYZ "), Some(cmd("XYZ", &[])));
        assert_eq!(Command::parse("XYZ     "), Some(cmd("XYZ", &[])));
        assert_ne!(Command::parse("XYZ"), Some(cmd("ABC", &[])));
    }

    #[test]
    fn test_parse_keeps_oversized_code() {
        let long = "XYZABC".repeat(12);
        assert!(long.len() > COMMAND_CODE_LENGTH_MAX);

        let parsed = Command::parse(&long).unwrap();
        assert_eq!(parsed.code, long);
        assert!(parsed.parameters.is_empty());

        assert!(create_command(&long, None::<&str>).is_err());
    }

    #[test]
    fn test_parse_malformed_parameters() {
        let expected = Some(cmd("XYZ", &["a", "b", "c"]));
        assert_eq!(Command::parse("XYZ <a> <b> <c>"), expected);
        assert_eq!(Command::parse("XYZ <a><b><c"), expected);
        assert_eq!(Command::parse("XYZ <a>   <b>abcdefg<c>"), expected);
        assert_eq!(Command::parse("XYZ <a>   <b>abcdefg<c"), expected);
    }

    #[test]
    fn test_parse_escaped_parameters() {
        assert_eq!(
            Command::parse("XYZ <a\\0> <b\\>> <c\\\\"),
            Some(cmd("XYZ", &["a\0", "b>", "c\\"]))
        );
    }

    #[test]
    fn test_parse_less_than_is_literal() {
        assert_eq!(
            Command::parse("XYZ <a> <b<> <c\\>>"),
            Some(cmd("XYZ", &["a", "b<", "c>"]))
        );
    }

    #[test]
    fn test_parse_bracketed_first_token_is_code() {
        assert_eq!(
            Command::parse("<a> <b> <c>"),
            Some(cmd("<a>", &["b", "c"]))
        );
    }

    #[test]
    fn test_parse_empty_parameter() {
        assert_eq!(
            Command::parse("M01 <1> <#general> <bob> <hi> <>"),
            Some(cmd("M01", &["1", "#general", "bob", "hi", ""]))
        );
    }

    #[test]
    fn test_escape_parameter() {
        assert_eq!(escape_parameter(""), "");
        assert_eq!(escape_parameter(None::<&str>), "");
        assert_eq!(escape_parameter(Parameter::Null), "");
        assert_eq!(escape_parameter(42), "42");
        assert_eq!(escape_parameter(2.5), "2.5");
        assert_eq!(escape_parameter(42.0), "42");
        assert_eq!(escape_parameter(-0.0), "0");
        assert_eq!(escape_parameter(f64::INFINITY), "Infinity");
        assert_eq!(escape_parameter(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(escape_parameter(f64::NAN), "NaN");
        assert_eq!(escape_parameter(1e21), "1e+21");
        assert_eq!(escape_parameter(1.5e-7), "1.5e-7");
        assert_eq!(escape_parameter(1_700_000_000_000.0), "1700000000000");
        assert_eq!(escape_parameter("\0"), "\\0");
        assert_eq!(escape_parameter(">"), "\\>");
        assert_eq!(escape_parameter("\\"), "\\\\");
        assert_eq!(escape_parameter("\\0"), "\\\\0");
    }

    #[test]
    fn test_escape_is_not_idempotent() {
        let once = escape_parameter("a>b");
        let twice = escape_parameter(once.as_str());
        assert_ne!(once, twice);
    }

    #[test]
    fn test_create_command() {
        assert_eq!(create_command("X00", None::<&str>).unwrap(), "X00");
        assert_eq!(
            create_command("X01", Some("bad-auth")).unwrap(),
            "X01 <bad-auth>"
        );
        assert_eq!(
            create_command(
                "V01",
                [Parameter::from("squabble-client"), Parameter::from(1)]
            )
            .unwrap(),
            "V01 <squabble-client> <1>"
        );
        assert_eq!(
            create_command("M00", ["#general", "a>b", ""]).unwrap(),
            "M00 <#general> <a\\>b> <>"
        );
    }

    #[test]
    fn test_validate_command_code() {
        assert!(validate_command_code("V01").is_ok());
        assert!(validate_command_code("EXT.V1").is_ok());
        assert!(validate_command_code(&"A".repeat(32)).is_ok());

        assert!(validate_command_code("").is_err());
        assert!(validate_command_code("v01").is_err());
        assert!(validate_command_code("V 1").is_err());
        assert!(validate_command_code("*").is_err());
        assert!(validate_command_code(&"A".repeat(33)).is_err());
    }

    #[test]
    fn test_command_to_wire() {
        let command = cmd("M00", &["#general", "hi\0there"]);
        let wire = command.to_wire().unwrap();
        assert_eq!(wire, "M00 <#general> <hi\\0there>");
        assert_eq!(Command::parse(&wire), Some(command));
    }

    proptest! {
        #[test]
        fn prop_parameters_round_trip(params in proptest::collection::vec(".*", 0..6)) {
            let wire = create_command("XYZ", &params).unwrap();
            let parsed = Command::parse(&wire).unwrap();
            prop_assert_eq!(parsed.code, "XYZ");
            prop_assert_eq!(parsed.parameters, params);
        }

        #[test]
        fn prop_single_escape_recovers_value(value in ".*") {
            let escaped = escape_parameter(value.as_str());
            let recovered = parse_parameters(&format!("<{}>", escaped));
            prop_assert_eq!(recovered, vec![value]);
        }
    }
}

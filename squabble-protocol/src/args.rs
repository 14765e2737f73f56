//! Schema-typed argument extraction.

/// Declared type of a positional argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    String,
    Number,
    Int,
}

/// One entry of an argument schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgSpec {
    pub name: &'static str,
    pub ty: ArgType,
}

impl ArgSpec {
    pub const fn string(name: &'static str) -> Self {
        Self {
            name,
            ty: ArgType::String,
        }
    }

    pub const fn number(name: &'static str) -> Self {
        Self {
            name,
            ty: ArgType::Number,
        }
    }

    pub const fn int(name: &'static str) -> Self {
        Self {
            name,
            ty: ArgType::Int,
        }
    }
}

/// A converted argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    /// The parameter was not present.
    Null,
    Text(String),
    Number(f64),
    Int(i64),
    /// The parameter was present but could not be converted; the raw text
    /// is kept for diagnostics.
    Unconvertible(String),
}

impl ArgValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ArgValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ArgValue::Number(n) => Some(*n),
            ArgValue::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ArgValue::Int(n) => Some(*n),
            _ => None,
        }
    }
}

/// Ordered mapping from argument name to value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    entries: Vec<(&'static str, ArgValue)>,
}

impl Arguments {
    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.entries
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(ArgValue::as_str)
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(ArgValue::as_f64)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(ArgValue::as_i64)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &ArgValue)> {
        self.entries.iter().map(|(key, value)| (*key, value))
    }
}

fn convert(raw: &str, ty: ArgType) -> ArgValue {
    let value = match ty {
        ArgType::String => return ArgValue::Text(raw.to_string()),
        ArgType::Number => leading_number(raw).map(ArgValue::Number),
        ArgType::Int => leading_int(raw).map(ArgValue::Int),
    };
    value.unwrap_or_else(|| ArgValue::Unconvertible(raw.to_string()))
}

fn split_sign(text: &str) -> (bool, &str) {
    match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    }
}

/// Reads the decimal number at the start of `raw`, ignoring whatever
/// follows it: `"42px"` is 42 and `" 1.5e3x"` is 1500.
fn leading_number(raw: &str) -> Option<f64> {
    let (negative, rest) = split_sign(raw.trim_start());
    let magnitude = if rest.starts_with("Infinity") {
        f64::INFINITY
    } else {
        let bytes = rest.as_bytes();
        let digits_from = |start: usize| {
            bytes[start..]
                .iter()
                .take_while(|b| b.is_ascii_digit())
                .count()
        };

        let mut end = digits_from(0);
        let mut digits = end;
        if bytes.get(end) == Some(&b'.') {
            let fraction = digits_from(end + 1);
            end += 1 + fraction;
            digits += fraction;
        }
        if digits == 0 {
            return None;
        }
        if matches!(bytes.get(end), Some(b'e' | b'E')) {
            let mut exponent = end + 1;
            if matches!(bytes.get(exponent), Some(b'+' | b'-')) {
                exponent += 1;
            }
            let exponent_digits = digits_from(exponent);
            if exponent_digits > 0 {
                end = exponent + exponent_digits;
            }
        }
        rest[..end].parse::<f64>().ok()?
    };
    Some(if negative { -magnitude } else { magnitude })
}

/// Reads the integer at the start of `raw`, ignoring whatever follows it:
/// `"1.5"` is 1. A `0x` prefix reads hexadecimal.
fn leading_int(raw: &str) -> Option<i64> {
    let (negative, rest) = split_sign(raw.trim_start());
    let (radix, digits) = match rest.get(..2) {
        Some("0x" | "0X") => (16, &rest[2..]),
        _ => (10, rest),
    };
    let end = digits
        .find(|c: char| !c.is_digit(radix))
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    let magnitude = i64::from_str_radix(&digits[..end], radix).ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

/// Converts positional parameters into named arguments.
///
/// Positions beyond the end of `parameters` become [`ArgValue::Null`];
/// extra parameters beyond the schema are ignored.
pub fn parameters_to_arguments(parameters: &[String], schema: &[ArgSpec]) -> Arguments {
    let entries = schema
        .iter()
        .enumerate()
        .map(|(idx, spec)| {
            let value = match parameters.get(idx) {
                Some(raw) => convert(raw, spec.ty),
                None => ArgValue::Null,
            };
            (spec.name, value)
        })
        .collect();
    Arguments { entries }
}

/// Argument schemas for the commands that carry typed parameters.
pub mod schema {
    use super::ArgSpec;

    pub const CONNECTION_TERMINATE: &[ArgSpec] = &[ArgSpec::string("reason")];

    pub const VERSION: &[ArgSpec] = &[
        ArgSpec::string("app_name"),
        ArgSpec::int("protocol_version"),
    ];

    pub const BAD_COMMAND: &[ArgSpec] = &[ArgSpec::string("command"), ArgSpec::string("reason")];

    pub const AUTH_APPROVED: &[ArgSpec] = &[ArgSpec::string("reason")];

    pub const AUTH_WITH_ANONYMOUS: &[ArgSpec] = &[ArgSpec::string("handle")];

    pub const AUTH_WITH_TOKEN: &[ArgSpec] = &[ArgSpec::string("token")];

    pub const MESSAGE_SEND: &[ArgSpec] = &[
        ArgSpec::string("channel"),
        ArgSpec::string("message"),
        ArgSpec::string("flags"),
    ];

    pub const MESSAGE_RECEIVED: &[ArgSpec] = &[
        ArgSpec::number("time"),
        ArgSpec::string("channel"),
        ArgSpec::string("user"),
        ArgSpec::string("message"),
        ArgSpec::string("flags"),
    ];
}

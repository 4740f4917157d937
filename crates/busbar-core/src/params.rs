//! Typed, bounded command parameters.
//!
//! Every command in the table declares up to [`PARAMETERS_MAX`] parameter
//! specs. Tokens are parsed with the C numeric conventions (base 0: `0x`
//! prefix is hex, a leading `0` is octal, otherwise decimal) and checked
//! against the declared bounds before a handler ever runs. Error texts are part
//! of the wire contract and match the original firmware byte for byte.

use thiserror::Error;

/// Hard cap on parameters per command.
pub const PARAMETERS_MAX: usize = 16;

/// Parameter type plus its bounds.
///
/// Numeric bounds are value bounds; string bounds are length bounds. A
/// `RawStr` consumes the rest of the line verbatim (leading spaces trimmed)
/// and can only appear as the final spec.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamKind {
    /// Unsigned 32-bit integer.
    Uint {
        /// Numeric base; 0 selects the C auto conventions.
        base: u32,
        /// Inclusive lower bound.
        lower: Option<u32>,
        /// Inclusive upper bound.
        upper: Option<u32>,
    },
    /// Signed 32-bit integer.
    Int {
        /// Numeric base; 0 selects the C auto conventions.
        base: u32,
        /// Inclusive lower bound.
        lower: Option<i32>,
        /// Inclusive upper bound.
        upper: Option<i32>,
    },
    /// 32-bit float.
    Float {
        /// Inclusive lower bound.
        lower: Option<f32>,
        /// Inclusive upper bound.
        upper: Option<f32>,
    },
    /// Single whitespace-delimited token.
    Str {
        /// Minimum length in bytes.
        lower: Option<u32>,
        /// Maximum length in bytes.
        upper: Option<u32>,
    },
    /// The remainder of the line, whitespace preserved.
    RawStr {
        /// Minimum length in bytes.
        lower: Option<u32>,
        /// Maximum length in bytes.
        upper: Option<u32>,
    },
}

impl ParamKind {
    /// Type tag rendered by `help`.
    #[must_use]
    pub fn type_name(self) -> &'static str {
        match self {
            Self::Uint { .. } => "u_int",
            Self::Int { .. } => "s_int",
            Self::Float { .. } => "float",
            Self::Str { .. } => "string",
            Self::RawStr { .. } => "raw string",
        }
    }
}

/// One table entry describing a parameter.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    /// Type and bounds.
    pub kind: ParamKind,
    /// Absence of a required parameter is an error; absence of an optional
    /// one stops parameter consumption.
    pub required: bool,
    /// Shown by `help <command>`.
    pub description: &'static str,
}

impl ParamSpec {
    /// Required unsigned integer, base 0, unbounded.
    #[must_use]
    pub const fn uint(description: &'static str) -> Self {
        Self { kind: ParamKind::Uint { base: 0, lower: None, upper: None }, required: true, description }
    }

    /// Required unsigned integer within `[lower, upper]`.
    #[must_use]
    pub const fn uint_range(description: &'static str, lower: u32, upper: u32) -> Self {
        Self {
            kind: ParamKind::Uint { base: 0, lower: Some(lower), upper: Some(upper) },
            required: true,
            description,
        }
    }

    /// Required signed integer, base 0, unbounded.
    #[must_use]
    pub const fn int(description: &'static str) -> Self {
        Self { kind: ParamKind::Int { base: 0, lower: None, upper: None }, required: true, description }
    }

    /// Required float within `[lower, upper]`.
    #[must_use]
    pub const fn float_range(description: &'static str, lower: f32, upper: f32) -> Self {
        Self {
            kind: ParamKind::Float { lower: Some(lower), upper: Some(upper) },
            required: true,
            description,
        }
    }

    /// Required token, any length.
    #[must_use]
    pub const fn string(description: &'static str) -> Self {
        Self { kind: ParamKind::Str { lower: None, upper: None }, required: true, description }
    }

    /// Required token with length bounds.
    #[must_use]
    pub const fn string_len(description: &'static str, lower: u32, upper: u32) -> Self {
        Self {
            kind: ParamKind::Str { lower: Some(lower), upper: Some(upper) },
            required: true,
            description,
        }
    }

    /// Required rest-of-line capture.
    #[must_use]
    pub const fn raw(description: &'static str) -> Self {
        Self { kind: ParamKind::RawStr { lower: None, upper: None }, required: true, description }
    }

    /// Make the parameter optional.
    #[must_use]
    pub const fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// A parsed parameter, tagged to match its spec.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// From [`ParamKind::Uint`].
    Uint(u32),
    /// From [`ParamKind::Int`].
    Int(i32),
    /// From [`ParamKind::Float`].
    Float(f32),
    /// From [`ParamKind::Str`] or [`ParamKind::RawStr`].
    Str(String),
}

/// Wire-visible parameter errors; the dispatcher prepends `ERROR: `.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParamError {
    /// Required spec with no token left.
    #[error("missing required parameter {0}")]
    MissingRequired(usize),

    /// Token is not an unsigned integer.
    #[error("invalid unsigned integer value: {0}")]
    BadUint(String),

    /// Unsigned value under the bound.
    #[error("invalid unsigned integer value: {value}, smaller than lower bound: {bound}")]
    UintBelow {
        /// Parsed value.
        value: u32,
        /// Offended bound.
        bound: u32,
    },

    /// Unsigned value over the bound.
    #[error("invalid unsigned integer value: {value}, larger than upper bound: {bound}")]
    UintAbove {
        /// Parsed value.
        value: u32,
        /// Offended bound.
        bound: u32,
    },

    /// Token is not a signed integer.
    #[error("invalid signed integer value: {0}")]
    BadInt(String),

    /// Signed value under the bound.
    #[error("invalid signed integer value: {value}, smaller than lower bound: {bound}")]
    IntBelow {
        /// Parsed value.
        value: i32,
        /// Offended bound.
        bound: i32,
    },

    /// Signed value over the bound.
    #[error("invalid signed integer value: {value}, larger than upper bound: {bound}")]
    IntAbove {
        /// Parsed value.
        value: i32,
        /// Offended bound.
        bound: i32,
    },

    /// Token is not a float.
    #[error("invalid float value: {0}")]
    BadFloat(String),

    /// Float under the bound.
    #[error("invalid float value: {value:.6}, smaller than lower bound: {bound:.6}")]
    FloatBelow {
        /// Parsed value.
        value: f32,
        /// Offended bound.
        bound: f32,
    },

    /// Float over the bound.
    #[error("invalid float value: {value:.6}, larger than upper bound: {bound:.6}")]
    FloatAbove {
        /// Parsed value.
        value: f32,
        /// Offended bound.
        bound: f32,
    },

    /// String shorter than its bound.
    #[error("invalid string length: {length}, smaller than lower bound: {bound}")]
    StringShort {
        /// Token length.
        length: usize,
        /// Offended bound.
        bound: u32,
    },

    /// String longer than its bound.
    #[error("invalid string length: {length}, larger than upper bound: {bound}")]
    StringLong {
        /// Token length.
        length: usize,
        /// Offended bound.
        bound: u32,
    },

    /// Tokens left over after every spec was satisfied.
    #[error("too many parameters")]
    TooMany,

    /// Handler asked for a parameter the specs cannot have produced.
    #[error("parameter {0} missing or mistyped")]
    Internal(usize),
}

/// Parsed parameter vector handed to the handler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    values: Vec<ParamValue>,
}

impl Params {
    /// Number of parameters actually supplied.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when no parameter was supplied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Required unsigned integer by position.
    pub fn uint(&self, index: usize) -> Result<u32, ParamError> {
        match self.values.get(index) {
            Some(ParamValue::Uint(v)) => Ok(*v),
            _ => Err(ParamError::Internal(index)),
        }
    }

    /// Required signed integer by position.
    pub fn int(&self, index: usize) -> Result<i32, ParamError> {
        match self.values.get(index) {
            Some(ParamValue::Int(v)) => Ok(*v),
            _ => Err(ParamError::Internal(index)),
        }
    }

    /// Required float by position.
    pub fn float(&self, index: usize) -> Result<f32, ParamError> {
        match self.values.get(index) {
            Some(ParamValue::Float(v)) => Ok(*v),
            _ => Err(ParamError::Internal(index)),
        }
    }

    /// Required string by position.
    pub fn string(&self, index: usize) -> Result<&str, ParamError> {
        match self.values.get(index) {
            Some(ParamValue::Str(v)) => Ok(v),
            _ => Err(ParamError::Internal(index)),
        }
    }

    /// Optional unsigned integer by position.
    #[must_use]
    pub fn opt_uint(&self, index: usize) -> Option<u32> {
        match self.values.get(index) {
            Some(ParamValue::Uint(v)) => Some(*v),
            _ => None,
        }
    }

    /// Optional string by position.
    #[must_use]
    pub fn opt_string(&self, index: usize) -> Option<&str> {
        match self.values.get(index) {
            Some(ParamValue::Str(v)) => Some(v.as_str()),
            _ => None,
        }
    }
}

/// Whitespace tokenizer with a rewindable offset, so a trailing raw-string
/// spec can recapture everything after the previous token.
#[derive(Debug)]
pub struct Tokenizer<'a> {
    line: &'a str,
    offset: usize,
}

const DELIMITERS: [char; 3] = [' ', '\r', '\n'];

impl<'a> Tokenizer<'a> {
    /// Tokenize one command line.
    #[must_use]
    pub fn new(line: &'a str) -> Self {
        Self { line, offset: 0 }
    }

    /// Next whitespace-delimited token, or `None` at end of line.
    pub fn next_token(&mut self) -> Option<&'a str> {
        let rest = &self.line[self.offset..];
        let start = rest.find(|c| !DELIMITERS.contains(&c))?;
        let rest = &rest[start..];

        let len = rest.find(|c| DELIMITERS.contains(&c)).unwrap_or(rest.len());
        let token = &rest[..len];

        self.offset += start + len;
        Some(token)
    }

    /// Capture from just after the previous token to end of line, trimming
    /// leading spaces, and exhaust the tokenizer.
    fn take_rest(&mut self) -> &'a str {
        let rest = self.line[self.offset..].trim_start_matches(' ');
        self.offset = self.line.len();
        rest.trim_end_matches(['\r', '\n'])
    }
}

/// Parse the remainder of a command line against the parameter specs.
///
/// Stops consuming specs at the first absent optional parameter; rejects
/// leftover tokens once every spec is satisfied.
pub fn parse_parameters(
    tokenizer: &mut Tokenizer<'_>,
    specs: &[ParamSpec],
) -> Result<Params, ParamError> {
    let mut values = Vec::new();

    for (index, spec) in specs.iter().enumerate().take(PARAMETERS_MAX) {
        if let ParamKind::RawStr { lower, upper } = spec.kind {
            let rest = tokenizer.take_rest();

            if rest.is_empty() {
                if spec.required {
                    return Err(ParamError::MissingRequired(index + 1));
                }
                break;
            }

            check_length(rest.len(), lower, upper)?;
            values.push(ParamValue::Str(rest.to_string()));
            continue;
        }

        let Some(token) = tokenizer.next_token() else {
            if spec.required {
                return Err(ParamError::MissingRequired(index + 1));
            }
            break;
        };

        values.push(parse_one(token, spec.kind)?);
    }

    if tokenizer.next_token().is_some() {
        return Err(ParamError::TooMany);
    }

    Ok(Params { values })
}

fn parse_one(token: &str, kind: ParamKind) -> Result<ParamValue, ParamError> {
    match kind {
        ParamKind::Uint { base, lower, upper } => {
            let value =
                parse_u32(token, base).ok_or_else(|| ParamError::BadUint(token.to_string()))?;

            if let Some(bound) = lower {
                if value < bound {
                    return Err(ParamError::UintBelow { value, bound });
                }
            }
            if let Some(bound) = upper {
                if value > bound {
                    return Err(ParamError::UintAbove { value, bound });
                }
            }

            Ok(ParamValue::Uint(value))
        },

        ParamKind::Int { base, lower, upper } => {
            let value =
                parse_i32(token, base).ok_or_else(|| ParamError::BadInt(token.to_string()))?;

            if let Some(bound) = lower {
                if value < bound {
                    return Err(ParamError::IntBelow { value, bound });
                }
            }
            if let Some(bound) = upper {
                if value > bound {
                    return Err(ParamError::IntAbove { value, bound });
                }
            }

            Ok(ParamValue::Int(value))
        },

        ParamKind::Float { lower, upper } => {
            let value: f32 =
                token.parse().map_err(|_| ParamError::BadFloat(token.to_string()))?;

            if let Some(bound) = lower {
                if value < bound {
                    return Err(ParamError::FloatBelow { value, bound });
                }
            }
            if let Some(bound) = upper {
                if value > bound {
                    return Err(ParamError::FloatAbove { value, bound });
                }
            }

            Ok(ParamValue::Float(value))
        },

        ParamKind::Str { lower, upper } => {
            check_length(token.len(), lower, upper)?;
            Ok(ParamValue::Str(token.to_string()))
        },

        // Handled in parse_parameters; a raw spec never reaches here.
        ParamKind::RawStr { lower, upper } => {
            check_length(token.len(), lower, upper)?;
            Ok(ParamValue::Str(token.to_string()))
        },
    }
}

fn check_length(length: usize, lower: Option<u32>, upper: Option<u32>) -> Result<(), ParamError> {
    if let Some(bound) = lower {
        if (length as u32) < bound {
            return Err(ParamError::StringShort { length, bound });
        }
    }
    if let Some(bound) = upper {
        if (length as u32) > bound {
            return Err(ParamError::StringLong { length, bound });
        }
    }
    Ok(())
}

/// `strtoul` conventions: base 0 detects `0x` hex and leading-`0` octal.
fn parse_u32(token: &str, base: u32) -> Option<u32> {
    let (digits, radix) = split_radix(token, base)?;
    u32::from_str_radix(digits, radix).ok()
}

/// `strtol` conventions, with an optional sign in front of the prefix.
fn parse_i32(token: &str, base: u32) -> Option<i32> {
    let (negative, magnitude) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token.strip_prefix('+').unwrap_or(token)),
    };

    let (digits, radix) = split_radix(magnitude, base)?;
    let value = i64::from(u32::from_str_radix(digits, radix).ok()?);
    let signed = if negative { -value } else { value };

    i32::try_from(signed).ok()
}

fn split_radix(token: &str, base: u32) -> Option<(&str, u32)> {
    if token.is_empty() {
        return None;
    }

    if base == 0 {
        if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
            return Some((hex, 16));
        }
        if token.len() > 1 && token.starts_with('0') {
            return Some((&token[1..], 8));
        }
        return Some((token, 10));
    }

    if base == 16 {
        let stripped =
            token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")).unwrap_or(token);
        return Some((stripped, 16));
    }

    Some((token, base))
}

//! Job model: what sits in the queue and what a claim hands back.
//!
//! - `NewJob`: submission shape (procedure + JSON arguments + priority)
//! - `QueuedJob`: a stored row, ordered by `(priority, id)`
//! - `ClaimedJob`: the projection returned by one claim, arguments already rendered

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ids::JobId;

/// One positional argument, stored as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Argument(String);

impl Argument {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Text form of one JSON array element, as `jsonb_array_elements_text` yields it.
    ///
    /// `null` has no text form and is skipped by the rendered list.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::String(s) => Some(Self(s.clone())),
            other => {
                let mut text = String::new();
                write_jsonb(other, &mut text);
                Some(Self(text))
            }
        }
    }

    /// `true` when the text is one or more ASCII decimal digits.
    pub fn is_numeric_token(&self) -> bool {
        !self.0.is_empty() && self.0.bytes().all(|b| b.is_ascii_digit())
    }

    /// Bare token for pure digits, quoted literal otherwise.
    pub fn render(&self) -> String {
        if self.is_numeric_token() {
            self.0.clone()
        } else {
            quote_literal(&self.0)
        }
    }
}

impl From<&str> for Argument {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// SQL string literal for `text`.
///
/// Quotes and backslashes are doubled; a backslash anywhere switches to the
/// `E'...'` form so the doubling is read back literally.
pub fn quote_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 3);
    if text.contains('\\') {
        out.push('E');
    }
    out.push('\'');
    for ch in text.chars() {
        if ch == '\'' || ch == '\\' {
            out.push(ch);
        }
        out.push(ch);
    }
    out.push('\'');
    out
}

/// JSON text the way a `jsonb` column prints it: `", "` and `": "`
/// separators, object keys ordered by length then bytes, numbers in
/// `numeric` form.
fn write_jsonb(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&numeric_text(&n.to_string())),
        Value::String(s) => write_json_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_jsonb(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| {
                a.len().cmp(&b.len()).then_with(|| a.as_bytes().cmp(b.as_bytes()))
            });
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_json_string(key, out);
                out.push_str(": ");
                write_jsonb(item, out);
            }
            out.push('}');
        }
    }
}

fn write_json_string(text: &str, out: &mut String) {
    out.push('"');
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Exponents beyond this are left as written.
const MAX_NUMERIC_EXPONENT: i64 = 1000;

/// A JSON number literal in `numeric` output form.
///
/// The exponent is folded in and the scale is the literal's fraction length
/// minus its exponent, never below zero: `1e2` → `100`, `1.50` → `1.50`,
/// `120e-1` → `12.0`. Negative zero loses its sign.
fn numeric_text(literal: &str) -> String {
    let (negative, unsigned) = match literal.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, literal),
    };
    let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
        Some(at) => (&unsigned[..at], &unsigned[at + 1..]),
        None => (unsigned, "0"),
    };
    let Ok(exponent) = exponent.parse::<i64>() else {
        return literal.to_string();
    };
    if exponent.abs() > MAX_NUMERIC_EXPONENT {
        return literal.to_string();
    }
    let (whole, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if whole.is_empty() || !whole.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit()) {
        return literal.to_string();
    }

    let digits = format!("{whole}{fraction}");
    let point = whole.len() as i64 + exponent;
    let scale = (fraction.len() as i64 - exponent).max(0) as usize;

    let (int_digits, frac_digits) = if point <= 0 {
        (String::new(), format!("{}{digits}", "0".repeat(point.unsigned_abs() as usize)))
    } else if point as usize >= digits.len() {
        (format!("{digits}{}", "0".repeat(point as usize - digits.len())), String::new())
    } else {
        (digits[..point as usize].to_string(), digits[point as usize..].to_string())
    };

    let int_digits = int_digits.trim_start_matches('0');
    let mut out = String::new();
    let is_zero = int_digits.is_empty() && frac_digits.bytes().all(|b| b == b'0');
    if negative && !is_zero {
        out.push('-');
    }
    out.push_str(if int_digits.is_empty() { "0" } else { int_digits });
    if scale > 0 {
        out.push('.');
        out.push_str(&frac_digits);
    }
    out
}

/// Comma-joined rendered list, or `None` when nothing is left to render.
pub fn render_arguments<'a, I>(arguments: I) -> Option<String>
where
    I: IntoIterator<Item = &'a Argument>,
{
    let rendered: Vec<String> = arguments.into_iter().map(Argument::render).collect();
    if rendered.is_empty() {
        None
    } else {
        Some(rendered.join(","))
    }
}

/// A job submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    /// Name of the procedure to invoke.
    #[serde(alias = "proc")]
    pub procedure: String,

    /// Positional arguments (JSON array elements).
    #[serde(default, alias = "args")]
    pub arguments: Vec<Value>,

    /// Lower runs first.
    #[serde(default)]
    pub priority: i32,
}

impl NewJob {
    pub fn new(procedure: impl Into<String>) -> Self {
        Self {
            procedure: procedure.into(),
            arguments: Vec::new(),
            priority: 0,
        }
    }

    pub fn with_arguments<I, V>(mut self, arguments: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.arguments = arguments.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// A pending row of the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedJob {
    pub id: JobId,
    pub procedure: String,
    pub arguments: Vec<Value>,
    pub priority: i32,
}

impl QueuedJob {
    pub fn from_new(id: JobId, job: NewJob) -> Self {
        Self {
            id,
            procedure: job.procedure,
            arguments: job.arguments,
            priority: job.priority,
        }
    }

    /// Position in the queue: `(priority ASC, id ASC)`.
    pub fn order_key(&self) -> (i32, JobId) {
        (self.priority, self.id)
    }

    /// Arguments in text form, `null` elements dropped.
    pub fn text_arguments(&self) -> Vec<Argument> {
        self.arguments.iter().filter_map(Argument::from_json).collect()
    }

    /// The projection a claim produces for this row.
    pub fn to_claimed(&self) -> ClaimedJob {
        ClaimedJob {
            id: self.id,
            procedure: self.procedure.clone(),
            rendered_arguments: render_arguments(&self.text_arguments()),
        }
    }
}

/// Result of a successful claim. Owned by exactly one drain cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimedJob {
    pub id: JobId,
    pub procedure: String,
    /// Comma-joined rendered argument list; `None` for no arguments.
    pub rendered_arguments: Option<String>,
}

impl ClaimedJob {
    /// `procedure(args)` as logged, whether or not the name is a valid identifier.
    pub fn call_text(&self) -> String {
        format!(
            "{}({})",
            self.procedure,
            self.rendered_arguments.as_deref().unwrap_or_default()
        )
    }
}

/// Read a rendered list back into arguments.
///
/// Accepts exactly what [`render_arguments`] produces: bare digit tokens,
/// `'...'` literals with doubled quotes and `E'...'` literals with doubled
/// backslashes, separated by single commas.
pub fn parse_rendered_arguments(rendered: &str) -> Result<Vec<Argument>, String> {
    let mut arguments = Vec::new();
    let mut chars = rendered.chars().peekable();

    if rendered.is_empty() {
        return Ok(arguments);
    }

    loop {
        let mut text = String::new();
        match chars.peek().copied() {
            Some(c) if c.is_ascii_digit() => {
                while let Some(&c) = chars.peek() {
                    if !c.is_ascii_digit() {
                        break;
                    }
                    text.push(c);
                    chars.next();
                }
            }
            Some('E') | Some('\'') => {
                let escaped = chars.peek() == Some(&'E');
                if escaped {
                    chars.next();
                }
                if chars.next() != Some('\'') {
                    return Err(format!("expected quote in {rendered:?}"));
                }
                loop {
                    match chars.next() {
                        Some('\'') if chars.peek() == Some(&'\'') => {
                            chars.next();
                            text.push('\'');
                        }
                        Some('\'') => break,
                        Some('\\') if escaped => match chars.next() {
                            Some(c) => text.push(c),
                            None => return Err(format!("dangling escape in {rendered:?}")),
                        },
                        Some(c) => text.push(c),
                        None => return Err(format!("unterminated literal in {rendered:?}")),
                    }
                }
            }
            Some(c) => return Err(format!("unexpected {c:?} in {rendered:?}")),
            None => return Err(format!("missing argument in {rendered:?}")),
        }
        arguments.push(Argument(text));

        match chars.next() {
            None => return Ok(arguments),
            Some(',') => continue,
            Some(c) => return Err(format!("expected ',' but found {c:?} in {rendered:?}")),
        }
    }
}

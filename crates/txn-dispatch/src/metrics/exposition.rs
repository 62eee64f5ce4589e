//! Line-oriented parser for the plaintext metrics exposition format.
//!
//! A document is a sequence of lines shaped like
//!
//! ```text
//! # HELP ledger_blockchain_height Height of the chain in blocks.
//! # TYPE ledger_blockchain_height gauge
//! ledger_blockchain_height{channel="mychannel"} 42
//! ```
//!
//! Every non-comment line is tokenized into a [`Sample`] up front, so
//! lookups match on parsed label sets instead of raw substrings and are not
//! sensitive to label order. A single malformed line rejects the whole
//! document.

use crate::error::ParseError;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Largest integer an `f64` can represent exactly.
const MAX_EXACT_FLOAT: f64 = 9_007_199_254_740_992.0;

/// One `name{labels} value [timestamp]` line.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    /// Raw value token, validated as a float at parse time.
    pub value: String,
    pub timestamp_ms: Option<i64>,
}

impl Sample {
    #[must_use]
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// The value as a non-negative integer.
    ///
    /// Integral floats such as `4.2e+06` are accepted as long as they are
    /// exactly representable.
    pub fn integer_value(&self) -> Result<u64, ParseError> {
        if let Ok(value) = self.value.parse::<u64>() {
            return Ok(value);
        }
        match self.value.parse::<f64>() {
            Ok(v) if v.is_finite() && v >= 0.0 && v.fract() == 0.0 && v <= MAX_EXACT_FLOAT => {
                Ok(v as u64)
            }
            _ => Err(ParseError::InvalidValue {
                metric: self.name.clone(),
                value: self.value.clone(),
            }),
        }
    }
}

/// A fully tokenized metrics document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsDocument {
    samples: Vec<Sample>,
}

impl MetricsDocument {
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let mut samples = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let sample = parse_sample(line).map_err(|reason| ParseError::MalformedLine {
                line: idx + 1,
                reason,
            })?;
            samples.push(sample);
        }
        Ok(Self { samples })
    }

    #[must_use]
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// All samples of the metric family `name`, in document order.
    pub fn samples_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Sample> + 'a {
        self.samples.iter().filter(move |s| s.name == name)
    }
}

impl FromStr for MetricsDocument {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

struct Cursor<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, expected: char) -> Result<(), String> {
        match self.bump() {
            Some(c) if c == expected => Ok(()),
            Some(c) => Err(format!("expected `{expected}`, found `{c}`")),
            None => Err(format!("expected `{expected}`, found end of line")),
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
        &self.input[start..self.pos]
    }

    fn skip_whitespace(&mut self) {
        self.take_while(|c| c == ' ' || c == '\t');
    }
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == ':'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}

fn is_label_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn parse_sample(line: &str) -> Result<Sample, String> {
    let mut cursor = Cursor::new(line);

    if !cursor.peek().is_some_and(is_name_start) {
        return Err("missing metric name".to_string());
    }
    let name = cursor.take_while(is_name_char).to_string();

    cursor.skip_whitespace();
    let labels = if cursor.peek() == Some('{') {
        cursor.bump();
        parse_labels(&mut cursor)?
    } else {
        BTreeMap::new()
    };

    let mut tokens = cursor.rest().split_whitespace();
    let value = tokens
        .next()
        .ok_or_else(|| format!("`{name}` has no value"))?
        .to_string();
    if value.parse::<f64>().is_err() {
        return Err(format!("`{name}` has invalid value `{value}`"));
    }
    let timestamp_ms = tokens
        .next()
        .map(|ts| {
            ts.parse::<i64>()
                .map_err(|_| format!("`{name}` has invalid timestamp `{ts}`"))
        })
        .transpose()?;
    if let Some(extra) = tokens.next() {
        return Err(format!("unexpected trailing token `{extra}`"));
    }

    Ok(Sample {
        name,
        labels,
        value,
        timestamp_ms,
    })
}

fn parse_labels(cursor: &mut Cursor<'_>) -> Result<BTreeMap<String, String>, String> {
    let mut labels = BTreeMap::new();
    loop {
        cursor.skip_whitespace();
        if cursor.peek() == Some('}') {
            cursor.bump();
            return Ok(labels);
        }

        let key = cursor.take_while(is_label_char);
        if key.is_empty() {
            return Err("expected label name".to_string());
        }
        cursor.skip_whitespace();
        cursor.eat('=')?;
        cursor.skip_whitespace();
        cursor.eat('"')?;
        let value = parse_quoted(cursor)?;
        if labels.insert(key.to_string(), value).is_some() {
            return Err(format!("duplicate label `{key}`"));
        }

        cursor.skip_whitespace();
        match cursor.bump() {
            Some(',') => continue,
            Some('}') => return Ok(labels),
            Some(c) => return Err(format!("expected `,` or `}}`, found `{c}`")),
            None => return Err("unterminated label set".to_string()),
        }
    }
}

/// Reads a label value after its opening quote, consuming the closing one.
fn parse_quoted(cursor: &mut Cursor<'_>) -> Result<String, String> {
    let mut value = String::new();
    loop {
        match cursor.bump() {
            Some('"') => return Ok(value),
            Some('\\') => match cursor.bump() {
                Some('n') => value.push('\n'),
                Some('\\') => value.push('\\'),
                Some('"') => value.push('"'),
                Some(c) => return Err(format!("invalid escape `\\{c}`")),
                None => return Err("unterminated label value".to_string()),
            },
            Some(c) => value.push(c),
            None => return Err("unterminated label value".to_string()),
        }
    }
}

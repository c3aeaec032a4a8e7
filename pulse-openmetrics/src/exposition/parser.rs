// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./parser_test.rs"]
mod parser_test;

use super::{ContentType, Entry, Exemplar, Label, MetricType, ParseError, Sample};
use itertools::Itertools;
use memchr::{memchr, memchr2};
use nom::bytes::complete::take_while1;
use nom::character::complete::{char, space0, space1};
use nom::combinator::{map, opt, verify};
use nom::error::ErrorKind;
use nom::multi::separated_list0;
use nom::sequence::{delimited, preceded, terminated};
use nom::{IResult, Parser};
use pulse_common::LossyFloatToInt;

const fn is_metric_name_start(c: char) -> bool {
  c.is_ascii_alphabetic() || c == '_' || c == ':'
}

const fn is_metric_name_char(c: char) -> bool {
  c.is_ascii_alphanumeric() || c == '_' || c == ':'
}

const fn is_label_name_char(c: char) -> bool {
  c.is_ascii_alphanumeric() || c == '_'
}

const fn is_blank(c: char) -> bool {
  c == ' ' || c == '\t'
}

fn metric_name(input: &str) -> IResult<&str, &str> {
  verify(take_while1(is_metric_name_char), |name: &str| {
    name.starts_with(is_metric_name_start)
  })
  .parse(input)
}

fn label_name(input: &str) -> IResult<&str, &str> {
  verify(take_while1(is_label_name_char), |name: &str| {
    !name.starts_with(|c: char| c.is_ascii_digit())
  })
  .parse(input)
}

// A double quoted label value. \\, \" and \n are decoded, any other escape is kept verbatim.
fn quoted_value(input: &str) -> IResult<&str, String> {
  let fail = || nom::Err::Error(nom::error::Error::new(input, ErrorKind::Char));
  let Some(body) = input.strip_prefix('"') else {
    return Err(fail());
  };

  let bytes = body.as_bytes();
  let mut value = String::new();
  let mut start = 0;
  loop {
    let index = start + memchr2(b'\\', b'"', &bytes[start ..]).ok_or_else(fail)?;
    value.push_str(&body[start .. index]);
    if bytes[index] == b'"' {
      return Ok((&body[index + 1 ..], value));
    }

    match bytes.get(index + 1) {
      Some(b'\\') => value.push('\\'),
      Some(b'"') => value.push('"'),
      Some(b'n') => value.push('\n'),
      Some(_) => {
        value.push('\\');
        start = index + 1;
        continue;
      },
      None => return Err(fail()),
    }
    start = index + 2;
  }
}

fn label(input: &str) -> IResult<&str, Label> {
  map(
    (
      preceded(space0, label_name),
      preceded(space0, char('=')),
      preceded(space0, quoted_value),
    ),
    |(name, _, value)| Label {
      name: name.to_string(),
      value,
    },
  )
  .parse(input)
}

// {name="value", ...} with optional blanks and an optional trailing comma.
fn label_set(input: &str) -> IResult<&str, Vec<Label>> {
  delimited(
    char('{'),
    terminated(
      separated_list0(preceded(space0, char(',')), label),
      opt(preceded(space0, char(','))),
    ),
    preceded(space0, char('}')),
  )
  .parse(input)
}

fn token(input: &str) -> IResult<&str, &str> {
  take_while1(|c: char| !is_blank(c)).parse(input)
}

// Split off the first blank separated word, returning it and the remainder with leading blanks
// removed.
fn split_word(input: &str) -> (&str, &str) {
  input.find(is_blank).map_or((input, ""), |index| {
    (&input[.. index], input[index ..].trim_start_matches(is_blank))
  })
}

fn unescape_help(text: &str) -> String {
  if memchr(b'\\', text.as_bytes()).is_none() {
    return text.to_string();
  }

  let mut result = String::with_capacity(text.len());
  let mut chars = text.chars();
  while let Some(c) = chars.next() {
    if c != '\\' {
      result.push(c);
      continue;
    }
    match chars.next() {
      Some('\\') => result.push('\\'),
      Some('n') => result.push('\n'),
      Some('"') => result.push('"'),
      Some(other) => {
        result.push('\\');
        result.push(other);
      },
      None => result.push('\\'),
    }
  }
  result
}

fn ensure_unique(labels: &[Label]) -> Result<(), ParseError> {
  if labels.iter().map(|l| &l.name).all_unique() {
    return Ok(());
  }
  let duplicate = labels
    .iter()
    .map(|l| &l.name)
    .duplicates()
    .next()
    .cloned()
    .unwrap_or_default();
  Err(ParseError::DuplicateLabel(duplicate))
}

// Parse a sample value or a label carrying a float ("le", "quantile"). Accepts the special
// NaN/Inf spellings used by the exposition formats.
#[must_use]
pub fn parse_float(token: &str) -> Option<f64> {
  match token {
    "NaN" => Some(f64::NAN),
    "+Inf" | "Inf" => Some(f64::INFINITY),
    "-Inf" => Some(f64::NEG_INFINITY),
    _ => token.parse().ok(),
  }
}

//
// ExpositionParser
//

// Pull parser over an exposition payload. Every meaningful line yields one item. A malformed line
// yields an error and parsing resumes on the following line.
pub struct ExpositionParser<'a> {
  input: &'a [u8],
  position: usize,
  content_type: ContentType,
  done: bool,
}

#[must_use]
pub const fn parse(input: &[u8], content_type: ContentType) -> ExpositionParser<'_> {
  ExpositionParser {
    input,
    position: 0,
    content_type,
    done: false,
  }
}

impl<'a> ExpositionParser<'a> {
  fn next_line(&mut self) -> Option<&'a [u8]> {
    let input = self.input;
    if self.done || self.position >= input.len() {
      return None;
    }
    let rest = &input[self.position ..];
    let length = memchr(b'\n', rest).unwrap_or(rest.len());
    self.position += length + 1;
    let line = &rest[.. length];
    Some(line.strip_suffix(b"\r").unwrap_or(line))
  }

  fn parse_timestamp(&self, token: &str) -> Result<i64, ParseError> {
    if self.content_type.is_openmetrics() {
      parse_float(token)
        .filter(|seconds| seconds.is_finite())
        .map(|seconds| (seconds * 1000.0).round().lossy_to_i64())
        .ok_or(ParseError::InvalidTimestamp)
    } else {
      token.parse().map_err(|_| ParseError::InvalidTimestamp)
    }
  }

  fn parse_metadata(&mut self, comment: &str) -> Result<Option<Entry>, ParseError> {
    let openmetrics = self.content_type.is_openmetrics();
    let (keyword, rest) = split_word(comment.trim_start_matches(is_blank));
    match keyword {
      "HELP" | "TYPE" => {},
      "UNIT" if openmetrics => {},
      "EOF" if openmetrics && rest.is_empty() => {
        self.done = true;
        return Ok(None);
      },
      _ => return Ok(None),
    }

    let (name, rest) = split_word(rest);
    if !matches!(metric_name(name), Ok(("", _))) {
      return Err(ParseError::InvalidMetricName);
    }
    let name = name.to_string();

    match keyword {
      "HELP" => Ok(Some(Entry::Help {
        name,
        text: unescape_help(rest),
      })),
      "TYPE" => match MetricType::from_token(rest, self.content_type) {
        Some(metric_type) => Ok(Some(Entry::Type { name, metric_type })),
        None => Err(ParseError::InvalidMetricType {
          name,
          metric_type: rest.to_string(),
        }),
      },
      _ => Ok(Some(Entry::Unit {
        name,
        unit: rest.to_string(),
      })),
    }
  }

  fn parse_exemplar(&self, input: &str) -> Result<Exemplar, ParseError> {
    let parsed: IResult<&str, (Vec<Label>, &str, Option<&str>)> = (
      preceded(space0, label_set),
      preceded(space1, token),
      opt(preceded(space1, token)),
    )
      .parse(input);
    let (rest, (labels, value, timestamp)) = parsed.map_err(|_| ParseError::InvalidExemplar)?;
    if !rest.is_empty() {
      return Err(ParseError::InvalidExemplar);
    }
    ensure_unique(&labels).map_err(|_| ParseError::InvalidExemplar)?;

    Ok(Exemplar {
      labels,
      value: parse_float(value).ok_or(ParseError::InvalidExemplar)?,
      timestamp_ms: timestamp
        .map(|t| self.parse_timestamp(t))
        .transpose()
        .map_err(|_| ParseError::InvalidExemplar)?,
    })
  }

  fn parse_sample(&self, line: &str) -> Result<Sample, ParseError> {
    let (rest, name) = metric_name(line).map_err(|_| ParseError::InvalidMetricName)?;
    let (rest, labels) = if rest.starts_with('{') {
      label_set(rest).map_err(|_| ParseError::InvalidLabels)?
    } else {
      (rest, Vec::new())
    };
    ensure_unique(&labels)?;

    let (rest, value) = preceded(space1, token)
      .parse(rest)
      .map_err(|_| ParseError::InvalidValue)?;
    let value = parse_float(value).ok_or(ParseError::InvalidValue)?;

    let mut rest = rest.trim_start_matches(is_blank);
    let mut timestamp_ms = None;
    if !rest.is_empty() && !rest.starts_with('#') {
      let (remaining, timestamp) = token(rest).map_err(|_| ParseError::InvalidTimestamp)?;
      timestamp_ms = Some(self.parse_timestamp(timestamp)?);
      rest = remaining.trim_start_matches(is_blank);
    }

    let mut exemplar = None;
    if let Some(exemplar_text) = rest.strip_prefix('#') {
      if !self.content_type.is_openmetrics() {
        return Err(ParseError::TrailingData);
      }
      exemplar = Some(self.parse_exemplar(exemplar_text)?);
      rest = "";
    }
    if !rest.is_empty() {
      return Err(ParseError::TrailingData);
    }

    Ok(Sample {
      name: name.to_string(),
      labels,
      value,
      timestamp_ms,
      exemplar,
    })
  }
}

impl Iterator for ExpositionParser<'_> {
  type Item = Result<Entry, ParseError>;

  fn next(&mut self) -> Option<Self::Item> {
    while let Some(line) = self.next_line() {
      let Ok(line) = std::str::from_utf8(line) else {
        return Some(Err(ParseError::InvalidUtf8));
      };
      let line = line.trim_matches(is_blank);
      if line.is_empty() {
        continue;
      }

      if let Some(comment) = line.strip_prefix('#') {
        match self.parse_metadata(comment) {
          Ok(None) => continue,
          Ok(Some(entry)) => return Some(Ok(entry)),
          Err(e) => return Some(Err(e)),
        }
      }

      return Some(self.parse_sample(line).map(Entry::Sample));
    }
    None
  }
}

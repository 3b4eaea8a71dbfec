// ── Structured query filters ──
//
// Filters are an AST that renders to (and parses from) the LDAP-style
// text the store speaks: `(&(owner_uuid=x)(|(state=running)(!(state=stopped))))`.
// The same AST is evaluated against JSON records by in-process backends.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::Error;
use crate::store::IndexSpec;

/// A boolean query over a bucket's fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// `(field=*)`
    Present(String),
    /// `(field=value)`; `*` in `value` is a wildcard.
    Eq(String, String),
    /// `(field>=value)`
    Ge(String, String),
    /// `(field<=value)`
    Le(String, String),
    Not(Box<Filter>),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn present(field: impl Into<String>) -> Self {
        Self::Present(field.into())
    }

    pub fn eq(field: impl Into<String>, value: impl ToString) -> Self {
        Self::Eq(field.into(), value.to_string())
    }

    pub fn ge(field: impl Into<String>, value: impl ToString) -> Self {
        Self::Ge(field.into(), value.to_string())
    }

    pub fn le(field: impl Into<String>, value: impl ToString) -> Self {
        Self::Le(field.into(), value.to_string())
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(inner: Filter) -> Self {
        Self::Not(Box::new(inner))
    }

    /// Evaluate the filter against a record value.
    pub fn matches(&self, record: &Value) -> bool {
        match self {
            Self::Present(field) => field_text(record, field).is_some(),
            Self::Eq(field, pattern) => {
                field_text(record, field).is_some_and(|text| glob_match(pattern, &text))
            }
            Self::Ge(field, bound) => field_text(record, field)
                .is_some_and(|text| compare(&text, bound) != Ordering::Less),
            Self::Le(field, bound) => field_text(record, field)
                .is_some_and(|text| compare(&text, bound) != Ordering::Greater),
            Self::Not(inner) => !inner.matches(record),
            Self::And(all) => all.iter().all(|f| f.matches(record)),
            Self::Or(any) => any.iter().any(|f| f.matches(record)),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Present(field) => write!(f, "({field}=*)"),
            Self::Eq(field, value) => write!(f, "({field}={value})"),
            Self::Ge(field, value) => write!(f, "({field}>={value})"),
            Self::Le(field, value) => write!(f, "({field}<={value})"),
            Self::Not(inner) => write!(f, "(!{inner})"),
            Self::And(all) => {
                f.write_str("(&")?;
                for term in all {
                    write!(f, "{term}")?;
                }
                f.write_str(")")
            }
            Self::Or(any) => {
                f.write_str("(|")?;
                for term in any {
                    write!(f, "{term}")?;
                }
                f.write_str(")")
            }
        }
    }
}

impl FromStr for Filter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parser = Parser { input: s.trim(), pos: 0 };
        let filter = parser.filter()?;
        if parser.pos != parser.input.len() {
            return Err(parser.error("trailing input"));
        }
        Ok(filter)
    }
}

// ── Construction from request parameters ────────────────────────────

/// Where a query's filter comes from.
#[derive(Debug, Clone)]
pub enum FilterInput<'a> {
    /// A prebuilt filter, used as is.
    Filter(Filter),
    /// Filter text, parsed verbatim.
    Text(&'a str),
    /// A field→value(s) mapping to translate.
    Params(&'a Map<String, Value>),
}

/// Translate `input` into a filter restricted to `index`.
///
/// Fields that are not indexed are silently dropped. Returns `None` when
/// nothing restricts the query, so the caller can apply its own default.
pub fn filter_for(
    input: FilterInput<'_>,
    index: &BTreeMap<String, IndexSpec>,
) -> Result<Option<Filter>, Error> {
    let params = match input {
        FilterInput::Filter(filter) => return Ok(Some(filter)),
        FilterInput::Text(text) if text.trim().is_empty() => return Ok(None),
        FilterInput::Text(text) => return text.parse().map(Some),
        FilterInput::Params(params) => params,
    };

    if let Some(Value::String(text)) = params.get("filter") {
        if !text.trim().is_empty() {
            return text.parse().map(Some);
        }
    }

    let mut terms: Vec<Filter> = params
        .iter()
        .filter(|(field, _)| index.contains_key(field.as_str()))
        .filter_map(|(field, value)| field_terms(field, value))
        .collect();

    let filter = match terms.len() {
        0 => None,
        1 => terms.pop(),
        _ => Some(Filter::And(terms)),
    };

    if let Some(ref f) = filter {
        debug!(filter = %f, "built filter from params");
    }
    Ok(filter)
}

fn field_terms(field: &str, value: &Value) -> Option<Filter> {
    match value {
        Value::String(s) if s.contains(',') => {
            let list: Vec<Value> = s
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(|item| Value::String(item.to_owned()))
                .collect();
            disjunction(field, &list)
        }
        Value::Array(list) => disjunction(field, list),
        other => scalar_text(other).map(|text| Filter::Eq(field.to_owned(), text)),
    }
}

fn disjunction(field: &str, list: &[Value]) -> Option<Filter> {
    let terms: Vec<Filter> = list
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(match s.strip_prefix('!') {
                Some(negated) => Filter::not(Filter::eq(field, negated)),
                None => Filter::eq(field, s),
            }),
            other => scalar_text(other).map(|text| Filter::Eq(field.to_owned(), text)),
        })
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(Filter::Or(terms))
    }
}

pub(crate) fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

// ── Evaluation helpers ──────────────────────────────────────────────

fn field_text(record: &Value, field: &str) -> Option<String> {
    record.get(field).and_then(scalar_text)
}

/// Numeric comparison when both sides are integers, text otherwise.
pub(crate) fn compare(text: &str, bound: &str) -> Ordering {
    match (text.parse::<i128>(), bound.parse::<i128>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => text.cmp(bound),
    }
}

fn glob_match(pattern: &str, text: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == text;
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    let (first, rest) = match parts.split_first() {
        Some(split) => split,
        None => return true,
    };
    let Some(mut remaining) = text.strip_prefix(first) else {
        return false;
    };

    let (last, middle) = match rest.split_last() {
        Some(split) => split,
        None => return remaining.is_empty(),
    };
    for part in middle {
        match remaining.find(part) {
            Some(at) => remaining = &remaining[at + part.len()..],
            None => return false,
        }
    }
    remaining.ends_with(last)
}

// ── Parser ──────────────────────────────────────────────────────────

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn filter(&mut self) -> Result<Filter, Error> {
        self.expect('(')?;
        let filter = match self.peek() {
            Some('&') => {
                self.bump();
                Filter::And(self.list()?)
            }
            Some('|') => {
                self.bump();
                Filter::Or(self.list()?)
            }
            Some('!') => {
                self.bump();
                Filter::not(self.filter()?)
            }
            Some(_) => self.item()?,
            None => return Err(self.error("unexpected end of filter")),
        };
        self.expect(')')?;
        Ok(filter)
    }

    fn list(&mut self) -> Result<Vec<Filter>, Error> {
        let mut terms = Vec::new();
        while self.peek() == Some('(') {
            terms.push(self.filter()?);
        }
        if terms.is_empty() {
            return Err(self.error("empty filter list"));
        }
        Ok(terms)
    }

    fn item(&mut self) -> Result<Filter, Error> {
        let rest = &self.input[self.pos..];
        let end = rest
            .find(')')
            .ok_or_else(|| self.error("unterminated comparison"))?;
        let body = &rest[..end];
        let eq = body
            .find('=')
            .ok_or_else(|| self.error("comparison without '='"))?;

        let (attr, op) = match body[..eq].chars().last() {
            Some('>') => (&body[..eq - 1], '>'),
            Some('<') => (&body[..eq - 1], '<'),
            _ => (&body[..eq], '='),
        };
        let value = &body[eq + 1..];

        if attr.is_empty() || attr.contains(['(', '&', '|', '!']) {
            return Err(self.error("invalid attribute name"));
        }

        self.pos += end;
        Ok(match op {
            '>' => Filter::ge(attr, value),
            '<' => Filter::le(attr, value),
            _ if value == "*" => Filter::present(attr),
            _ => Filter::eq(attr, value),
        })
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += c.len_utf8();
        }
    }

    fn expect(&mut self, want: char) -> Result<(), Error> {
        if self.peek() == Some(want) {
            self.bump();
            Ok(())
        } else {
            Err(self.error(&format!("expected '{want}'")))
        }
    }

    fn error(&self, reason: &str) -> Error {
        Error::InvalidFilter {
            filter: self.input.to_owned(),
            reason: format!("{reason} at offset {}", self.pos),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn index() -> BTreeMap<String, IndexSpec> {
        [
            ("belongs_to_uuid", IndexSpec::string()),
            ("ip", IndexSpec::number().unique()),
            ("state", IndexSpec::string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v))
        .collect()
    }

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!("test params must be an object"),
        }
    }

    #[test]
    fn single_field_is_a_bare_equality() {
        let p = params(json!({ "state": "running" }));
        let filter = filter_for(FilterInput::Params(&p), &index()).unwrap().unwrap();
        assert_eq!(filter.to_string(), "(state=running)");
    }

    #[test]
    fn multiple_fields_are_conjoined_and_lists_disjoined() {
        let p = params(json!({ "ip": 5, "state": ["running", "!stopped"] }));
        let filter = filter_for(FilterInput::Params(&p), &index()).unwrap().unwrap();
        assert_eq!(filter.to_string(), "(&(ip=5)(|(state=running)(!(state=stopped))))");
    }

    #[test]
    fn comma_separated_string_becomes_a_list() {
        let p = params(json!({ "state": "running, stopped" }));
        let filter = filter_for(FilterInput::Params(&p), &index()).unwrap().unwrap();
        assert_eq!(filter.to_string(), "(|(state=running)(state=stopped))");
    }

    #[test]
    fn unindexed_fields_are_dropped() {
        let p = params(json!({ "model": "virtio" }));
        assert_eq!(filter_for(FilterInput::Params(&p), &index()).unwrap(), None);

        let p = params(json!({ "model": "virtio", "state": "running" }));
        let filter = filter_for(FilterInput::Params(&p), &index()).unwrap().unwrap();
        assert_eq!(filter.to_string(), "(state=running)");
    }

    #[test]
    fn empty_params_yield_no_filter() {
        let p = Map::new();
        assert_eq!(filter_for(FilterInput::Params(&p), &index()).unwrap(), None);
    }

    #[test]
    fn explicit_filter_text_is_used_verbatim() {
        let p = params(json!({ "filter": "(model=e1000)", "state": "running" }));
        let filter = filter_for(FilterInput::Params(&p), &index()).unwrap().unwrap();
        assert_eq!(filter, Filter::eq("model", "e1000"));

        let filter = filter_for(FilterInput::Text("(ip=*)"), &index()).unwrap().unwrap();
        assert_eq!(filter, Filter::present("ip"));
    }

    #[test]
    fn blank_filter_text_falls_back_to_the_other_fields() {
        let p = params(json!({ "filter": "  " }));
        assert_eq!(filter_for(FilterInput::Params(&p), &index()).unwrap(), None);

        let p = params(json!({ "filter": "", "state": "running" }));
        let filter = filter_for(FilterInput::Params(&p), &index()).unwrap().unwrap();
        assert_eq!(filter.to_string(), "(state=running)");
    }

    #[test]
    fn parse_renders_back_to_the_same_text() {
        let text = "(&(ip>=10)(ip<=20)(|(state=run*)(!(owner_uuid=*))))";
        let filter: Filter = text.parse().unwrap();
        assert_eq!(filter.to_string(), text);
    }

    #[test]
    fn parse_rejects_malformed_text() {
        assert!("(ip=5".parse::<Filter>().is_err());
        assert!("(&)".parse::<Filter>().is_err());
        assert!("ip=5".parse::<Filter>().is_err());
        assert!("(ip=5)(x=1)".parse::<Filter>().is_err());
    }

    #[test]
    fn matching_covers_ranges_wildcards_and_negation() {
        let record = json!({ "ip": 15, "state": "running", "tags": ",a,b," });

        assert!(Filter::ge("ip", 10).matches(&record));
        assert!(!Filter::le("ip", 10).matches(&record));
        assert!(Filter::eq("state", "run*").matches(&record));
        assert!(Filter::eq("tags", "*,b,*").matches(&record));
        assert!(!Filter::eq("tags", "*,c,*").matches(&record));
        assert!(Filter::not(Filter::present("owner_uuid")).matches(&record));
        assert!(Filter::eq("ip", 15).matches(&record));
    }
}

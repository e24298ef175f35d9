//! JSON path selectors: the subset of JSONPath that rules use to address document nodes.
//!
//! ```text
//! $                     root
//! .name  ['name']       child by name (quoted names may contain any character)
//! ['a','b']             several children by name
//! .*  [*]               every child of an object or array
//! [0]  [-1]  [0,2]      array elements by index (negative counts from the end)
//! ..name  ..*  ..[0]    the same, applied to the node and every descendant
//! [?(@.x)]              elements having `x`
//! [?(@.x == 'v')]       elements where `x` equals a literal (also `!=`)
//! [?(@.x in ['a','b'])] elements where `x` equals one of several literals (also `nin`)
//! ```
//!
//! Evaluation yields concrete [`Location`]s, so callers can edit the document in place.

use std::collections::HashSet;
use std::fmt;

use serde_json::Value;

use crate::error::{GatewayError, Result};

/// One step of a concrete path into a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathElement {
    Key(String),
    Index(usize),
}

pub type Location = Vec<PathElement>;

#[derive(Debug, Clone, PartialEq)]
enum Step {
    Child(Matcher),
    Descendant(Matcher),
}

#[derive(Debug, Clone, PartialEq)]
enum Matcher {
    Names(Vec<String>),
    Wildcard,
    Indices(Vec<i64>),
    Filter(Predicate),
}

#[derive(Debug, Clone, PartialEq)]
struct Predicate {
    path: Vec<String>,
    test: Test,
}

#[derive(Debug, Clone, PartialEq)]
enum Test {
    Exists,
    Eq(Value),
    Ne(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
}

/// A parsed selector such as `$.users[*].email`.
#[derive(Clone, PartialEq)]
pub struct Selector {
    source: String,
    steps: Vec<Step>,
}

impl Selector {
    pub fn parse(source: &str) -> Result<Self> {
        let steps = Parser::new(source).parse()?;
        Ok(Self {
            source: source.to_string(),
            steps,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Locations of every node the selector matches, in document order, without duplicates.
    pub fn select(&self, doc: &Value) -> Vec<Location> {
        let mut current: Vec<(Location, &Value)> = vec![(Vec::new(), doc)];
        for step in &self.steps {
            let mut next = Vec::new();
            for (location, node) in &current {
                let node: &Value = *node;
                match step {
                    Step::Child(matcher) => apply_matcher(matcher, location, node, &mut next),
                    Step::Descendant(matcher) => {
                        for (d_location, d_node) in descendants_and_self(location.clone(), node) {
                            apply_matcher(matcher, &d_location, d_node, &mut next);
                        }
                    }
                }
            }
            current = next;
        }

        let mut seen = HashSet::new();
        current
            .into_iter()
            .map(|(location, _)| location)
            .filter(|location| seen.insert(location.clone()))
            .collect()
    }

    /// Removes every matched node. Returns how many were removed.
    ///
    /// Locations are removed deepest and highest-index first, so earlier removals never shift
    /// the positions of later ones. The root itself is never removed.
    pub fn delete(&self, doc: &mut Value) -> usize {
        let mut locations = self.select(doc);
        locations.sort_unstable_by(|a, b| b.cmp(a));
        locations
            .iter()
            .filter(|location| !location.is_empty())
            .filter(|location| remove_at(doc, location).is_some())
            .count()
    }

    /// Applies `f` to every matched node in place. Returns how many nodes were visited.
    pub fn map<F>(&self, doc: &mut Value, mut f: F) -> Result<usize>
    where
        F: FnMut(&mut Value) -> Result<()>,
    {
        let locations = self.select(doc);
        let mut visited = 0;
        for location in &locations {
            if let Some(node) = get_mut(doc, location) {
                f(node)?;
                visited += 1;
            }
        }
        Ok(visited)
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Selector").field(&self.source).finish()
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn apply_matcher<'a>(
    matcher: &Matcher,
    location: &Location,
    node: &'a Value,
    out: &mut Vec<(Location, &'a Value)>,
) {
    let child = |element: PathElement| {
        let mut child = location.clone();
        child.push(element);
        child
    };
    match (matcher, node) {
        (Matcher::Names(names), Value::Object(map)) => {
            for name in names {
                if let Some(value) = map.get(name) {
                    out.push((child(PathElement::Key(name.clone())), value));
                }
            }
        }
        (Matcher::Wildcard, Value::Object(map)) => {
            for (key, value) in map {
                out.push((child(PathElement::Key(key.clone())), value));
            }
        }
        (Matcher::Wildcard, Value::Array(items)) => {
            for (i, value) in items.iter().enumerate() {
                out.push((child(PathElement::Index(i)), value));
            }
        }
        (Matcher::Indices(indices), Value::Array(items)) => {
            for &index in indices {
                if let Some(i) = resolve_index(index, items.len()) {
                    out.push((child(PathElement::Index(i)), &items[i]));
                }
            }
        }
        (Matcher::Filter(predicate), Value::Array(items)) => {
            for (i, value) in items.iter().enumerate() {
                if predicate.matches(value) {
                    out.push((child(PathElement::Index(i)), value));
                }
            }
        }
        (Matcher::Filter(predicate), Value::Object(_)) => {
            if predicate.matches(node) {
                out.push((location.clone(), node));
            }
        }
        _ => {}
    }
}

fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let resolved = if index < 0 { len + index } else { index };
    if (0..len).contains(&resolved) {
        usize::try_from(resolved).ok()
    } else {
        None
    }
}

/// The node and all nodes below it, parents before children.
fn descendants_and_self(location: Location, node: &Value) -> Vec<(Location, &Value)> {
    let mut out = Vec::new();
    let mut stack = vec![(location, node)];
    while let Some((location, node)) = stack.pop() {
        let children: Vec<(Location, &Value)> = match node {
            Value::Object(map) => map
                .iter()
                .map(|(key, value)| {
                    let mut child = location.clone();
                    child.push(PathElement::Key(key.clone()));
                    (child, value)
                })
                .collect(),
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, value)| {
                    let mut child = location.clone();
                    child.push(PathElement::Index(i));
                    (child, value)
                })
                .collect(),
            _ => Vec::new(),
        };
        out.push((location, node));
        stack.extend(children.into_iter().rev());
    }
    out
}

impl Predicate {
    fn matches(&self, node: &Value) -> bool {
        let mut target = node;
        for key in &self.path {
            match target.get(key) {
                Some(value) => target = value,
                None => return false,
            }
        }
        match &self.test {
            Test::Exists => true,
            Test::Eq(literal) => values_equal(target, literal),
            Test::Ne(literal) => !values_equal(target, literal),
            Test::In(literals) => literals.iter().any(|l| values_equal(target, l)),
            Test::Nin(literals) => !literals.iter().any(|l| values_equal(target, l)),
        }
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

pub fn get_mut<'a>(doc: &'a mut Value, location: &[PathElement]) -> Option<&'a mut Value> {
    location.iter().try_fold(doc, |node, element| match element {
        PathElement::Key(key) => node.as_object_mut()?.get_mut(key),
        PathElement::Index(i) => node.as_array_mut()?.get_mut(*i),
    })
}

/// Removes the node at `location`, keeping the order of its siblings.
pub fn remove_at(doc: &mut Value, location: &[PathElement]) -> Option<Value> {
    let (last, parent_location) = location.split_last()?;
    let parent = get_mut(doc, parent_location)?;
    match (last, parent) {
        (PathElement::Key(key), Value::Object(map)) => map.shift_remove(key),
        (PathElement::Index(i), Value::Array(items)) if *i < items.len() => Some(items.remove(*i)),
        _ => None,
    }
}

struct Parser<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.trim().chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, reason: impl Into<String>) -> GatewayError {
        GatewayError::InvalidSelector {
            selector: self.source.to_string(),
            reason: format!("{} (at {})", reason.into(), self.pos),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> Result<()> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{c}'")))
        }
    }

    fn eat_str(&mut self, s: &str) -> bool {
        let len = s.chars().count();
        let matches = s.chars().enumerate().all(|(i, c)| self.peek_at(i) == Some(c));
        if matches {
            self.pos += len;
        }
        matches
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn parse(mut self) -> Result<Vec<Step>> {
        if !self.eat('$') {
            return Err(self.error("selector must start with '$'"));
        }
        let mut steps = Vec::new();
        while let Some(c) = self.peek() {
            let step = match c {
                '.' if self.peek_at(1) == Some('.') => {
                    self.pos += 2;
                    let matcher = if self.peek() == Some('[') {
                        self.parse_bracket()?
                    } else {
                        self.parse_dot_member()?
                    };
                    Step::Descendant(matcher)
                }
                '.' => {
                    self.pos += 1;
                    Step::Child(self.parse_dot_member()?)
                }
                '[' => Step::Child(self.parse_bracket()?),
                other => return Err(self.error(format!("unexpected '{other}'"))),
            };
            steps.push(step);
        }
        Ok(steps)
    }

    fn parse_dot_member(&mut self) -> Result<Matcher> {
        if self.eat('*') {
            return Ok(Matcher::Wildcard);
        }
        let name = self.parse_name();
        if name.is_empty() {
            return Err(self.error("expected a member name"));
        }
        Ok(Matcher::Names(vec![name]))
    }

    fn parse_name(&mut self) -> String {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| !matches!(c, '.' | '[' | ']' | '(' | ')' | '\'' | '"' | '=' | '!') && !c.is_whitespace())
        {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn parse_bracket(&mut self) -> Result<Matcher> {
        self.expect('[')?;
        self.skip_whitespace();
        let matcher = match self.peek() {
            Some('*') => {
                self.pos += 1;
                Matcher::Wildcard
            }
            Some('\'' | '"') => {
                let mut names = vec![self.parse_quoted()?];
                while self.eat_separator() {
                    names.push(self.parse_quoted()?);
                }
                Matcher::Names(names)
            }
            Some('?') => {
                self.pos += 1;
                self.expect('(')?;
                let predicate = self.parse_predicate()?;
                self.skip_whitespace();
                self.expect(')')?;
                Matcher::Filter(predicate)
            }
            Some(c) if c == '-' || c.is_ascii_digit() => {
                let mut indices = vec![self.parse_integer()?];
                while self.eat_separator() {
                    indices.push(self.parse_integer()?);
                }
                Matcher::Indices(indices)
            }
            _ => return Err(self.error("expected '*', a quoted name, an index or a filter")),
        };
        self.skip_whitespace();
        self.expect(']')?;
        Ok(matcher)
    }

    fn eat_separator(&mut self) -> bool {
        self.skip_whitespace();
        let found = self.eat(',');
        self.skip_whitespace();
        found
    }

    fn parse_quoted(&mut self) -> Result<String> {
        let quote = match self.peek() {
            Some(q @ ('\'' | '"')) => q,
            _ => return Err(self.error("expected a quoted string")),
        };
        self.pos += 1;
        let mut out = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated string")),
                Some('\\') => {
                    let escaped = self
                        .peek_at(1)
                        .ok_or_else(|| self.error("unterminated escape"))?;
                    out.push(escaped);
                    self.pos += 2;
                }
                Some(c) if c == quote => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some(c) => {
                    out.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    fn parse_integer(&mut self) -> Result<i64> {
        let start = self.pos;
        self.eat('-');
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse()
            .map_err(|_| self.error(format!("invalid index '{text}'")))
    }

    fn parse_predicate(&mut self) -> Result<Predicate> {
        self.skip_whitespace();
        self.expect('@')?;
        let mut path = Vec::new();
        loop {
            if self.peek() == Some('.') {
                self.pos += 1;
                let name = self.parse_name();
                if name.is_empty() {
                    return Err(self.error("expected a member name in filter"));
                }
                path.push(name);
            } else if self.peek() == Some('[') && matches!(self.peek_at(1), Some('\'' | '"')) {
                self.pos += 1;
                path.push(self.parse_quoted()?);
                self.expect(']')?;
            } else {
                break;
            }
        }
        if path.is_empty() {
            return Err(self.error("filter must test a member of '@'"));
        }

        self.skip_whitespace();
        let test = if self.eat_str("==") {
            self.skip_whitespace();
            Test::Eq(self.parse_literal()?)
        } else if self.eat_str("!=") {
            self.skip_whitespace();
            Test::Ne(self.parse_literal()?)
        } else if self.eat_str("nin") {
            self.skip_whitespace();
            Test::Nin(self.parse_literal_list()?)
        } else if self.eat_str("in") {
            self.skip_whitespace();
            Test::In(self.parse_literal_list()?)
        } else {
            Test::Exists
        };
        Ok(Predicate { path, test })
    }

    fn parse_literal_list(&mut self) -> Result<Vec<Value>> {
        self.expect('[')?;
        self.skip_whitespace();
        let mut literals = vec![self.parse_literal()?];
        while self.eat_separator() {
            literals.push(self.parse_literal()?);
        }
        self.skip_whitespace();
        self.expect(']')?;
        Ok(literals)
    }

    fn parse_literal(&mut self) -> Result<Value> {
        match self.peek() {
            Some('\'' | '"') => Ok(Value::String(self.parse_quoted()?)),
            Some(c) if c == '-' || c.is_ascii_digit() => {
                let start = self.pos;
                while self
                    .peek()
                    .is_some_and(|c| c == '-' || c == '.' || c == 'e' || c == 'E' || c == '+' || c.is_ascii_digit())
                {
                    self.pos += 1;
                }
                let text: String = self.chars[start..self.pos].iter().collect();
                serde_json::from_str::<serde_json::Number>(&text)
                    .map(Value::Number)
                    .map_err(|_| self.error(format!("invalid number '{text}'")))
            }
            _ if self.eat_str("true") => Ok(Value::Bool(true)),
            _ if self.eat_str("false") => Ok(Value::Bool(false)),
            _ if self.eat_str("null") => Ok(Value::Null),
            _ => Err(self.error("expected a literal")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(k: &str) -> PathElement {
        PathElement::Key(k.to_string())
    }

    fn selected(selector: &str, doc: &Value) -> Vec<Value> {
        let selector = Selector::parse(selector).unwrap();
        let mut doc = doc.clone();
        selector
            .select(&doc.clone())
            .iter()
            .map(|location| get_mut(&mut doc, location).unwrap().clone())
            .collect()
    }

    #[test]
    fn test_parse_errors() {
        for bad in ["", "users", "$.", "$[", "$['a'", "$[?(@.x == )]", "$[abc]", "$.a b"] {
            assert!(Selector::parse(bad).is_err(), "{bad:?} parsed");
        }
    }

    #[test]
    fn test_child_and_index() {
        let doc = json!({"a": {"b": [10, 20, 30]}});
        assert_eq!(selected("$.a.b[0]", &doc), vec![json!(10)]);
        assert_eq!(selected("$['a']['b'][-1]", &doc), vec![json!(30)]);
        assert_eq!(selected("$.a.b[0,2]", &doc), vec![json!(10), json!(30)]);
        assert!(selected("$.a.b[5]", &doc).is_empty());
        assert!(selected("$.missing.b", &doc).is_empty());
    }

    #[test]
    fn test_wildcards_and_unions() {
        let doc = json!({"users": [{"name": "a", "id": 1}, {"name": "b", "id": 2}]});
        assert_eq!(selected("$.users[*].name", &doc), vec![json!("a"), json!("b")]);
        assert_eq!(selected("$.users.*.id", &doc), vec![json!(1), json!(2)]);
        assert_eq!(
            selected("$.users[0]['name','id']", &doc),
            vec![json!("a"), json!(1)]
        );
    }

    #[test]
    fn test_recursive_descent() {
        let doc = json!({"email": "x", "nested": {"email": "y", "list": [{"email": "z"}]}});
        assert_eq!(
            selected("$..email", &doc),
            vec![json!("x"), json!("y"), json!("z")]
        );
    }

    #[test]
    fn test_filters() {
        let doc = json!({"headers": [
            {"name": "From", "value": "a"},
            {"name": "Subject", "value": "b"},
            {"name": "To", "value": "c"},
            {"value": "d"}
        ]});
        assert_eq!(
            selected("$.headers[?(@.name == 'From')].value", &doc),
            vec![json!("a")]
        );
        assert_eq!(
            selected("$.headers[?(@.name in ['From','To'])].value", &doc),
            vec![json!("a"), json!("c")]
        );
        assert_eq!(
            selected("$.headers[?(@.name)].value", &doc),
            vec![json!("a"), json!("b"), json!("c")]
        );
        assert_eq!(
            selected("$.headers[?(@.name != 'Subject')].value", &doc),
            vec![json!("a"), json!("c"), json!("d")]
        );
    }

    #[test]
    fn test_select_locations() {
        let doc = json!({"a": [{"b": 1}]});
        let selector = Selector::parse("$.a[0].b").unwrap();
        assert_eq!(
            selector.select(&doc),
            vec![vec![key("a"), PathElement::Index(0), key("b")]]
        );
    }

    #[test]
    fn test_delete_array_elements_and_nested() {
        let mut doc = json!({"items": [{"x": 1}, {"x": 2}, {"x": 3}], "keep": true});
        let removed = Selector::parse("$.items[0,2]").unwrap().delete(&mut doc);
        assert_eq!(removed, 2);
        assert_eq!(doc, json!({"items": [{"x": 2}], "keep": true}));

        let mut doc = json!({"a": {"b": {"c": 1}}});
        Selector::parse("$..*").unwrap().delete(&mut doc);
        assert_eq!(doc, json!({}));
    }

    #[test]
    fn test_delete_preserves_key_order() {
        let mut doc = json!({"z": 1, "a": 2, "m": 3});
        Selector::parse("$.a").unwrap().delete(&mut doc);
        let keys: Vec<&String> = doc.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["z", "m"]);

        let mut nested = json!({"b": {"secret": 1, "y": 2}, "secret": 3, "a": {"x": 4, "secret": 5}});
        assert_eq!(Selector::parse("$..secret").unwrap().delete(&mut nested), 3);
        assert_eq!(nested.to_string(), r#"{"b":{"y":2},"a":{"x":4}}"#);
    }

    #[test]
    fn test_map_in_place() {
        let mut doc = json!({"users": [{"email": "a"}, {"email": "b"}]});
        let visited = Selector::parse("$.users[*].email")
            .unwrap()
            .map(&mut doc, |v| {
                *v = json!(v.as_str().unwrap().to_uppercase());
                Ok(())
            })
            .unwrap();
        assert_eq!(visited, 2);
        assert_eq!(doc, json!({"users": [{"email": "A"}, {"email": "B"}]}));
    }
}

//! Criteria compiler and evaluator.
//!
//! Free-text filter input compiles into [`Criteria`]: either a validated
//! predicate object or the match-all predicate. Compilation never fails;
//! anything that does not parse, or that uses an operator outside the
//! supported set, degrades to match-all.
//!
//! The compiled form is also evaluable in-process via [`Criteria::matches`],
//! which is what the bundled data stores use to filter their documents.

use std::borrow::Cow;
use std::cmp::Ordering;

use regex::{Regex, RegexBuilder};
use tracing::debug;

use crate::literal::parse_literal;
use crate::normalize::TimeShift;
use crate::types::{lookup_path, Document, Value};

/// Top-level logical operators.
const LOGICAL_OPERATORS: [&str; 3] = ["$and", "$or", "$nor"];

/// Field-level operators.
const FIELD_OPERATORS: [&str; 14] = [
    "$eq", "$ne", "$gt", "$gte", "$lt", "$lte", "$in", "$nin", "$exists", "$regex", "$options",
    "$not", "$all", "$size",
];

/// A compiled filter predicate.
///
/// Equality compares the source predicate object only.
#[derive(Debug, Clone, Default)]
pub struct Criteria {
    predicate: Document,
    clauses: Vec<Clause>,
}

impl PartialEq for Criteria {
    fn eq(&self, other: &Self) -> bool {
        self.predicate == other.predicate
    }
}

#[derive(Debug, Clone)]
enum Clause {
    Field { path: String, conditions: Vec<Condition> },
    And(Vec<Vec<Clause>>),
    Or(Vec<Vec<Clause>>),
    Nor(Vec<Vec<Clause>>),
}

#[derive(Debug, Clone)]
enum Condition {
    Eq(Value),
    Ne(Value),
    Cmp(Ordering, bool, Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    Regex(Regex),
    Not(Vec<Condition>),
    All(Vec<Value>),
    Size(usize),
}

impl Criteria {
    /// The predicate that matches every document.
    #[must_use]
    pub fn match_all() -> Self {
        Self::default()
    }

    /// Whether this is the match-all predicate.
    #[must_use]
    pub fn is_match_all(&self) -> bool {
        self.predicate.is_empty()
    }

    /// The validated predicate object, as handed to a data store.
    #[must_use]
    pub fn predicate(&self) -> &Document {
        &self.predicate
    }

    /// Validates a predicate object. Returns `None` if it uses an unsupported
    /// operator or a malformed operand.
    #[must_use]
    pub fn from_predicate(predicate: Document) -> Option<Self> {
        let clauses = compile_clauses(&predicate)?;
        Some(Self { predicate, clauses })
    }

    /// Evaluates the predicate against a document.
    #[must_use]
    pub fn matches(&self, doc: &Document) -> bool {
        all_clauses_match(&self.clauses, doc)
    }
}

/// Compiles filter text with no time shift applied to `date(...)` literals.
#[must_use]
pub fn compile(text: &str) -> Criteria {
    compile_with_shift(text, TimeShift::zero())
}

/// Compiles filter text into criteria.
///
/// Empty text is match-all. Text not already brace-delimited is wrapped in
/// braces first, so `'location': 'abc'` and `{'location': 'abc'}` compile to
/// the same predicate. Any failure yields match-all.
#[must_use]
pub fn compile_with_shift(text: &str, shift: TimeShift) -> Criteria {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Criteria::match_all();
    }
    let wrapped: Cow<'_, str> = if trimmed.starts_with('{') {
        Cow::Borrowed(trimmed)
    } else {
        Cow::Owned(format!("{{{trimmed}}}"))
    };
    match parse_literal(&wrapped, shift) {
        Ok(Value::Document(doc)) => Criteria::from_predicate(doc).unwrap_or_else(|| {
            debug!(filter = %text, "filter uses unsupported operators, matching all");
            Criteria::match_all()
        }),
        Ok(_) => Criteria::match_all(),
        Err(err) => {
            debug!(filter = %text, error = %err, "filter did not parse, matching all");
            Criteria::match_all()
        }
    }
}

fn compile_clauses(predicate: &Document) -> Option<Vec<Clause>> {
    predicate
        .iter()
        .map(|(key, value)| {
            if key.starts_with('$') {
                if !LOGICAL_OPERATORS.contains(&key.as_str()) {
                    return None;
                }
                let Value::Array(branches) = value else {
                    return None;
                };
                if branches.is_empty() {
                    return None;
                }
                let compiled = branches
                    .iter()
                    .map(|b| b.as_document().and_then(compile_clauses))
                    .collect::<Option<Vec<_>>>()?;
                Some(match key.as_str() {
                    "$and" => Clause::And(compiled),
                    "$or" => Clause::Or(compiled),
                    _ => Clause::Nor(compiled),
                })
            } else {
                Some(Clause::Field {
                    path: key.clone(),
                    conditions: compile_conditions(value)?,
                })
            }
        })
        .collect()
}

fn is_operator_object(value: &Value) -> Option<&Document> {
    let doc = value.as_document()?;
    if !doc.is_empty() && doc.keys().all(|k| k.starts_with('$')) {
        Some(doc)
    } else {
        None
    }
}

fn compile_conditions(value: &Value) -> Option<Vec<Condition>> {
    let Some(ops) = is_operator_object(value) else {
        // Mixed `$` and plain keys are neither an operator object nor a
        // sensible literal.
        if let Value::Document(doc) = value {
            if doc.keys().any(|k| k.starts_with('$')) {
                return None;
            }
        }
        return Some(vec![Condition::Eq(value.clone())]);
    };

    let options = match ops.get("$options") {
        Some(Value::String(flags)) => Some(flags.as_str()),
        Some(_) => return None,
        None => None,
    };
    if options.is_some() && !ops.contains_key("$regex") {
        return None;
    }

    let mut conditions = Vec::with_capacity(ops.len());
    for (op, operand) in ops {
        if !FIELD_OPERATORS.contains(&op.as_str()) {
            return None;
        }
        let condition = match op.as_str() {
            "$eq" => Condition::Eq(operand.clone()),
            "$ne" => Condition::Ne(operand.clone()),
            "$gt" => Condition::Cmp(Ordering::Greater, false, operand.clone()),
            "$gte" => Condition::Cmp(Ordering::Greater, true, operand.clone()),
            "$lt" => Condition::Cmp(Ordering::Less, false, operand.clone()),
            "$lte" => Condition::Cmp(Ordering::Less, true, operand.clone()),
            "$in" => Condition::In(array_operand(operand)?),
            "$nin" => Condition::Nin(array_operand(operand)?),
            "$all" => Condition::All(array_operand(operand)?),
            "$exists" => Condition::Exists(operand.is_truthy()),
            "$size" => Condition::Size(usize::try_from(operand.as_i64()?).ok()?),
            "$regex" => Condition::Regex(build_regex(operand.as_str()?, options)?),
            "$not" => {
                is_operator_object(operand)?;
                Condition::Not(compile_conditions(operand)?)
            }
            // `$options` only modifies `$regex` and was consumed above.
            _ => continue,
        };
        conditions.push(condition);
    }
    Some(conditions)
}

fn array_operand(operand: &Value) -> Option<Vec<Value>> {
    match operand {
        Value::Array(items) => Some(items.clone()),
        _ => None,
    }
}

fn build_regex(pattern: &str, options: Option<&str>) -> Option<Regex> {
    let mut builder = RegexBuilder::new(pattern);
    for flag in options.unwrap_or_default().chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            _ => return None,
        };
    }
    builder.build().ok()
}

fn all_clauses_match(clauses: &[Clause], doc: &Document) -> bool {
    clauses.iter().all(|clause| clause_matches(clause, doc))
}

fn clause_matches(clause: &Clause, doc: &Document) -> bool {
    match clause {
        Clause::Field { path, conditions } => {
            let candidates = lookup_path(doc, path);
            conditions
                .iter()
                .all(|condition| condition_matches(condition, &candidates))
        }
        Clause::And(branches) => branches.iter().all(|b| all_clauses_match(b, doc)),
        Clause::Or(branches) => branches.iter().any(|b| all_clauses_match(b, doc)),
        Clause::Nor(branches) => !branches.iter().any(|b| all_clauses_match(b, doc)),
    }
}

/// Candidates plus, for array candidates, their elements.
fn expanded<'a, 'b>(candidates: &'b [&'a Value]) -> impl Iterator<Item = &'a Value> + 'b {
    candidates.iter().flat_map(|&value| {
        let elements: &'a [Value] = match value {
            Value::Array(items) => items.as_slice(),
            _ => &[],
        };
        std::iter::once(value).chain(elements.iter())
    })
}

fn equals_any(candidates: &[&Value], target: &Value) -> bool {
    if matches!(target, Value::Null) && candidates.is_empty() {
        return true;
    }
    expanded(candidates).any(|v| v == target)
}

fn condition_matches(condition: &Condition, candidates: &[&Value]) -> bool {
    match condition {
        Condition::Eq(target) => equals_any(candidates, target),
        Condition::Ne(target) => !equals_any(candidates, target),
        Condition::Cmp(direction, inclusive, bound) => expanded(candidates).any(|v| {
            if v.type_rank() != bound.type_rank() {
                return false;
            }
            let ord = v.compare(bound);
            ord == *direction || (*inclusive && ord == Ordering::Equal)
        }),
        Condition::In(targets) => targets.iter().any(|t| equals_any(candidates, t)),
        Condition::Nin(targets) => !targets.iter().any(|t| equals_any(candidates, t)),
        Condition::Exists(expected) => candidates.is_empty() != *expected,
        Condition::Regex(re) => expanded(candidates).any(|v| v.as_str().is_some_and(|s| re.is_match(s))),
        Condition::Not(inner) => !inner.iter().all(|c| condition_matches(c, candidates)),
        Condition::All(targets) => {
            !targets.is_empty() && targets.iter().all(|t| equals_any(candidates, t))
        }
        Condition::Size(len) => candidates
            .iter()
            .any(|v| matches!(v, Value::Array(items) if items.len() == *len)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(pairs: &[(&str, Value)]) -> Document {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn empty_text_matches_all() {
        assert!(compile("").is_match_all());
        assert!(compile("   ").is_match_all());
    }

    #[test]
    fn unbraced_text_is_wrapped() {
        assert_eq!(compile("'location':'abc'"), compile("{'location': 'abc'}"));
        assert!(!compile("'location':'abc'").is_match_all());
    }

    #[test]
    fn malformed_text_degrades_to_match_all() {
        assert!(compile("'location':").is_match_all());
        assert!(compile("{'a': 1").is_match_all());
        assert!(compile("os.system('x')").is_match_all());
        assert!(compile("[1, 2]").is_match_all());
    }

    #[test]
    fn deeply_nested_filter_degrades_to_match_all() {
        assert!(compile(&format!("'a': {}", "[".repeat(100_000))).is_match_all());
    }

    #[test]
    fn unknown_operators_fail_closed() {
        assert!(compile("'a': {'$where': 'sleep(1000)'}").is_match_all());
        assert!(compile("'$expr': [{'a': 1}]").is_match_all());
        assert!(compile("'a': {'$in': 3}").is_match_all());
        assert!(compile("'a': {'$regex': '('}").is_match_all());
        assert!(compile("'a': {'$gt': 1, 'b': 2}").is_match_all());
        assert!(compile("'$or': []").is_match_all());
    }

    #[test]
    fn compile_is_idempotent() {
        let text = "'user_id': {'$nin': ['check1']}";
        assert_eq!(compile(text), compile(text));
    }

    #[test]
    fn equality_and_nin() {
        let c = compile("'user_id': {'$nin': ['check1']}");
        assert!(c.matches(&doc(&[("user_id", "check2".into())])));
        assert!(!c.matches(&doc(&[("user_id", "check1".into())])));
        assert!(c.matches(&doc(&[("other", Value::Int(1))])));

        let c = compile("'location': 'abc'");
        assert!(c.matches(&doc(&[("location", "abc".into())])));
        assert!(!c.matches(&doc(&[("location", "xyz".into())])));
    }

    #[test]
    fn comparisons_stay_within_type() {
        let c = compile("'n': {'$gte': 2, '$lt': 5}");
        assert!(c.matches(&doc(&[("n", Value::Int(2))])));
        assert!(c.matches(&doc(&[("n", Value::Float(4.5))])));
        assert!(!c.matches(&doc(&[("n", Value::Int(5))])));
        assert!(!c.matches(&doc(&[("n", "3".into())])));
    }

    #[test]
    fn array_fields_match_any_element() {
        let tags = Value::Array(vec!["a".into(), "b".into()]);
        let d = doc(&[("tags", tags)]);
        assert!(compile("'tags': 'b'").matches(&d));
        assert!(compile("'tags': {'$all': ['a', 'b']}").matches(&d));
        assert!(compile("'tags': {'$size': 2}").matches(&d));
        assert!(!compile("'tags': {'$size': 3}").matches(&d));
    }

    #[test]
    fn logical_operators_and_regex() {
        let c = compile("'$or': [{'a': 1}, {'name': {'$regex': '^ab', '$options': 'i'}}]");
        assert!(c.matches(&doc(&[("a", Value::Int(1))])));
        assert!(c.matches(&doc(&[("name", "ABC".into())])));
        assert!(!c.matches(&doc(&[("name", "cab".into())])));

        let c = compile("'$nor': [{'a': 1}]");
        assert!(!c.matches(&doc(&[("a", Value::Int(1))])));
        assert!(c.matches(&doc(&[("a", Value::Int(2))])));
    }

    #[test]
    fn exists_not_and_dotted_paths() {
        let d = doc(&[("meta", Value::Document(doc(&[("owner", "x".into())])))]);
        assert!(compile("'meta.owner': {'$exists': True}").matches(&d));
        assert!(compile("'meta.size': {'$exists': 0}").matches(&d));
        assert!(compile("'meta.owner': {'$not': {'$eq': 'y'}}").matches(&d));
        assert!(compile("'meta.size': None").matches(&d));
    }

    #[test]
    fn match_all_matches_everything() {
        assert!(Criteria::match_all().matches(&Document::new()));
    }
}

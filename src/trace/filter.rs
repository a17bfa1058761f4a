//! Event predicates and stream filtering.
//!
//! Predicates compare one event field against a value and compose with
//! `and`, `or` and `not`. The time-window predicate keeps whole calls: both
//! rows of an Enter/Leave pair survive when the call overlaps the window.

use super::columns::DerivedColumn;
use super::event::{AttrValue, Event};
use super::stream::EventStream;
use crate::matcher::compute_matching;
use crate::utils::config::MatchOptions;
use crate::utils::error::TraceError;
use std::borrow::Cow;
use std::cmp::Ordering;

/// Event field a predicate reads
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Name,
    Kind,
    Process,
    Thread,
    Timestamp,
    Attribute(String),
}

impl Field {
    fn value(&self, event: &Event) -> Option<AttrValue> {
        match self {
            Self::Name => event.name.clone().map(AttrValue::Text),
            Self::Kind => Some(AttrValue::Text(event.kind.to_string())),
            Self::Process => Some(AttrValue::Int(event.process_id as i64)),
            Self::Thread => Some(AttrValue::Int(event.thread_id as i64)),
            Self::Timestamp => Some(AttrValue::Int(event.timestamp)),
            Self::Attribute(key) => event.attributes.get(key).cloned(),
        }
    }
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn holds(self, ord: Ordering) -> bool {
        match self {
            Self::Eq => ord == Ordering::Equal,
            Self::Ne => ord != Ordering::Equal,
            Self::Lt => ord == Ordering::Less,
            Self::Le => ord != Ordering::Greater,
            Self::Gt => ord == Ordering::Greater,
            Self::Ge => ord != Ordering::Less,
        }
    }
}

/// A boolean condition over events
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        field: Field,
        op: CmpOp,
        value: AttrValue,
    },
    In {
        field: Field,
        values: Vec<AttrValue>,
    },
    Between {
        field: Field,
        low: AttrValue,
        high: AttrValue,
    },
    /// Calls overlapping `[start, end]`; open ends when `None`
    TimeRange {
        start: Option<i64>,
        end: Option<i64>,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn compare(field: Field, op: CmpOp, value: impl Into<AttrValue>) -> Self {
        Self::Compare {
            field,
            op,
            value: value.into(),
        }
    }

    pub fn name_is(name: &str) -> Self {
        Self::compare(Field::Name, CmpOp::Eq, name)
    }

    pub fn process_is(process_id: u32) -> Self {
        Self::compare(Field::Process, CmpOp::Eq, process_id)
    }

    pub fn one_of(field: Field, values: Vec<AttrValue>) -> Self {
        Self::In { field, values }
    }

    pub fn not_in(field: Field, values: Vec<AttrValue>) -> Self {
        Self::In { field, values }.negate()
    }

    pub fn between(field: Field, low: impl Into<AttrValue>, high: impl Into<AttrValue>) -> Self {
        Self::Between {
            field,
            low: low.into(),
            high: high.into(),
        }
    }

    pub fn time_range(start: Option<i64>, end: Option<i64>) -> Self {
        Self::TimeRange { start, end }
    }

    pub fn and(self, other: Predicate) -> Self {
        match self {
            Self::And(mut all) => {
                all.push(other);
                Self::And(all)
            }
            first => Self::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Predicate) -> Self {
        match self {
            Self::Or(mut any) => {
                any.push(other);
                Self::Or(any)
            }
            first => Self::Or(vec![first, other]),
        }
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Whether evaluation reads Enter/Leave pairing
    pub fn needs_matching(&self) -> bool {
        match self {
            Self::TimeRange { .. } => true,
            Self::And(ps) | Self::Or(ps) => ps.iter().any(Predicate::needs_matching),
            Self::Not(p) => p.needs_matching(),
            _ => false,
        }
    }

    /// Evaluate on one event; `matching_ts` is the paired row's timestamp
    pub fn eval(&self, event: &Event, matching_ts: Option<i64>) -> bool {
        match self {
            Self::Compare { field, op, value } => field
                .value(event)
                .and_then(|v| v.compare(value))
                .is_some_and(|ord| op.holds(ord)),
            Self::In { field, values } => field.value(event).is_some_and(|v| {
                values
                    .iter()
                    .any(|candidate| v.compare(candidate) == Some(Ordering::Equal))
            }),
            Self::Between { field, low, high } => field.value(event).is_some_and(|v| {
                CmpOp::Ge.holds_opt(v.compare(low)) && CmpOp::Le.holds_opt(v.compare(high))
            }),
            Self::TimeRange { start, end } => {
                let start = start.unwrap_or(i64::MIN);
                let end = end.unwrap_or(i64::MAX);
                // Unpaired rows behave as zero-length calls
                let other = matching_ts.unwrap_or(event.timestamp);
                let (begin, finish) = if event.is_leave() {
                    (other, event.timestamp)
                } else {
                    (event.timestamp, other)
                };
                finish >= start && begin <= end
            }
            Self::And(ps) => ps.iter().all(|p| p.eval(event, matching_ts)),
            Self::Or(ps) => ps.iter().any(|p| p.eval(event, matching_ts)),
            Self::Not(p) => !p.eval(event, matching_ts),
        }
    }
}

impl CmpOp {
    fn holds_opt(self, ord: Option<Ordering>) -> bool {
        ord.is_some_and(|o| self.holds(o))
    }
}

impl EventStream {
    /// Keep the events matching `predicate` in a new, independent stream
    ///
    /// The result carries no derived columns. Time-window predicates use the
    /// stream's default-mode pairing; see [`EventStream::filter_with`].
    pub fn filter(&self, predicate: &Predicate) -> Result<EventStream, TraceError> {
        self.filter_with(predicate, &MatchOptions::default())
    }

    /// [`EventStream::filter`] pairing calls under `options`
    ///
    /// A cached pairing is reused only when it was built under the same name
    /// check; otherwise one is computed on the fly and not stored.
    ///
    /// # Errors
    /// * `TraceError::MalformedStream` - name mismatch under `NameCheck::Strict`
    pub fn filter_with(
        &self,
        predicate: &Predicate,
        options: &MatchOptions,
    ) -> Result<EventStream, TraceError> {
        let matching = if predicate.needs_matching() {
            let cached = self
                .matching()
                .filter(|_| self.is_fresh_for(&DerivedColumn::Matching, options.name_check));
            let columns = match cached {
                Some(cached) => Cow::Borrowed(cached),
                None => Cow::Owned(compute_matching(self, options)?),
            };
            Some(columns)
        } else {
            None
        };

        self.map_events(|e| {
            let other = matching
                .as_ref()
                .and_then(|m| m.matching_timestamp[e.index]);
            predicate.eval(e, other).then(|| e.clone())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::StreamId;
    use crate::utils::config::NameCheck;

    fn sample() -> EventStream {
        EventStream::new(
            StreamId::rank(0),
            vec![
                Event::enter(0, "main"),
                Event::enter(10, "compute").with_attr("flops", 5),
                Event::leave(20, "compute").with_attr("flops", 9),
                Event::instant(25, "MpiSend").with_attr("msg_length", 64),
                Event::enter(30, "io"),
                Event::leave(40, "io"),
                Event::leave(50, "main"),
            ],
        )
        .unwrap()
    }

    fn names(stream: &EventStream) -> Vec<String> {
        stream
            .events()
            .iter()
            .map(|e| e.name.clone().unwrap_or_default())
            .collect()
    }

    #[test]
    fn test_name_filter() {
        let filtered = sample().filter(&Predicate::name_is("io")).unwrap();
        assert_eq!(names(&filtered), vec!["io", "io"]);
        assert_eq!(filtered.events()[1].index, 1);
    }

    #[test]
    fn test_attribute_comparison_skips_missing() {
        let p = Predicate::compare(Field::Attribute("flops".into()), CmpOp::Gt, 6);
        let filtered = sample().filter(&p).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered.events()[0].timestamp, 20);
    }

    #[test]
    fn test_combinators() {
        let p = Predicate::name_is("io")
            .or(Predicate::name_is("compute"))
            .and(Predicate::compare(Field::Timestamp, CmpOp::Lt, 35));
        let filtered = sample().filter(&p).unwrap();
        assert_eq!(names(&filtered), vec!["compute", "compute", "io"]);

        let not_main = Predicate::name_is("main").negate();
        assert_eq!(sample().filter(&not_main).unwrap().len(), 5);
    }

    #[test]
    fn test_in_and_between() {
        let p = Predicate::one_of(Field::Name, vec!["main".into(), "io".into()]);
        assert_eq!(sample().filter(&p).unwrap().len(), 4);

        let p = Predicate::not_in(Field::Kind, vec!["Instant".into()]);
        assert_eq!(sample().filter(&p).unwrap().len(), 6);

        let p = Predicate::between(Field::Timestamp, 10, 25);
        assert_eq!(sample().filter(&p).unwrap().len(), 3);
    }

    #[test]
    fn test_time_range_keeps_whole_calls() {
        // Window only touches the tail of `compute` and the start of nothing else
        let filtered = sample()
            .filter(&Predicate::time_range(Some(15), Some(22)))
            .unwrap();
        assert_eq!(names(&filtered), vec!["main", "compute", "compute", "main"]);
    }

    #[test]
    fn test_filter_to_nothing_is_valid() {
        let filtered = sample().filter(&Predicate::name_is("missing")).unwrap();
        assert!(filtered.is_empty());
        assert_eq!(filtered.derived_column_count(), 0);
    }

    #[test]
    fn test_time_range_pairs_calls_under_the_given_mode() {
        let s = EventStream::new(
            StreamId::rank(0),
            vec![
                Event::enter(0, "main"),
                Event::enter(5, "lost"),
                Event::leave(20, "main"),
            ],
        )
        .unwrap();
        let window = Predicate::time_range(Some(15), Some(16));

        // LIFO pairs "lost" with main's Leave
        assert_eq!(names(&s.filter(&window).unwrap()), vec!["lost", "main"]);

        let recover = MatchOptions::default().with_name_check(NameCheck::Recover);
        assert_eq!(
            names(&s.filter_with(&window, &recover).unwrap()),
            vec!["main", "main"]
        );

        let strict = MatchOptions::default().with_name_check(NameCheck::Strict);
        assert!(s.filter_with(&window, &strict).is_err());
    }
}

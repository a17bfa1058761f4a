//! Enter/Leave pairing.

use super::close_frame;
use crate::trace::{EventKind, EventStream, MatchColumns};
use crate::utils::config::MatchOptions;
use crate::utils::error::TraceError;
use log::debug;
use std::collections::HashMap;

/// Pair Enter and Leave rows of a stream without storing the result
///
/// **Public** - used directly by read-only operations (time filters)
///
/// # Algorithm
/// 1. Walk events in time order
/// 2. Enter pushes onto its (process, thread) stack
/// 3. Leave pops and cross-links both rows
///
/// A Leave on an empty stack and an Enter still open at the end keep absent
/// fields; truncated boundaries are never an error.
///
/// # Errors
/// * `TraceError::MalformedStream` - name mismatch under `NameCheck::Strict`
pub fn compute_matching(
    stream: &EventStream,
    options: &MatchOptions,
) -> Result<MatchColumns, TraceError> {
    let events = stream.events();
    let mut columns = MatchColumns::with_len(events.len());
    let mut stacks: HashMap<(u32, u32), Vec<usize>> = HashMap::new();
    let mut orphan_leaves = 0usize;

    for event in events {
        match event.kind {
            EventKind::Enter => {
                stacks.entry(event.location()).or_default().push(event.index);
            }
            EventKind::Leave => {
                let stack = stacks.entry(event.location()).or_default();
                match close_frame(stack, events, event, options.name_check, stream.id())? {
                    Some(open) => {
                        columns.matching_index[open] = Some(event.index);
                        columns.matching_index[event.index] = Some(open);
                        columns.matching_timestamp[open] = Some(event.timestamp);
                        columns.matching_timestamp[event.index] = Some(events[open].timestamp);
                    }
                    None => orphan_leaves += 1,
                }
            }
            EventKind::Instant => {}
        }
    }

    let open_enters: usize = stacks.values().map(Vec::len).sum();
    debug!(
        "{}: matched {} pairs ({} leaves without enter, {} enters still open)",
        stream.id(),
        columns.matched_pairs(),
        orphan_leaves,
        open_enters
    );

    Ok(columns)
}

/// Pair events and store `matching_index`/`matching_timestamp` on the stream
///
/// **Public** - main entry point for matching. Idempotent.
pub fn match_events(stream: &mut EventStream) -> Result<(), TraceError> {
    match_events_with(stream, &MatchOptions::default())
}

/// [`match_events`] with explicit options
pub fn match_events_with(
    stream: &mut EventStream,
    options: &MatchOptions,
) -> Result<(), TraceError> {
    let columns = compute_matching(stream, options)?;
    stream.store_matching(columns, options.name_check);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{Event, StreamId};
    use crate::utils::config::NameCheck;

    fn stream(events: Vec<Event>) -> EventStream {
        EventStream::new(StreamId::rank(0), events).unwrap()
    }

    #[test]
    fn test_nested_pairs() {
        let mut s = stream(vec![
            Event::enter(0, "A"),
            Event::enter(10, "B"),
            Event::leave(30, "B"),
            Event::leave(50, "A"),
        ]);
        match_events(&mut s).unwrap();

        assert_eq!(s.matching_index(0), Some(3));
        assert_eq!(s.matching_index(3), Some(0));
        assert_eq!(s.matching_index(1), Some(2));
        assert_eq!(s.matching_timestamp(0), Some(50));
        assert_eq!(s.matching_timestamp(2), Some(10));
    }

    #[test]
    fn test_truncated_boundaries_leave_fields_absent() {
        let mut s = stream(vec![
            Event::leave(0, "started_before"),
            Event::enter(5, "A"),
            Event::leave(8, "A"),
            Event::enter(9, "never_left"),
        ]);
        match_events(&mut s).unwrap();

        assert_eq!(s.matching_index(0), None);
        assert_eq!(s.matching_index(1), Some(2));
        assert_eq!(s.matching_index(3), None);
        assert_eq!(s.matching_timestamp(3), None);
    }

    #[test]
    fn test_instants_are_never_matched() {
        let mut s = stream(vec![
            Event::enter(0, "A"),
            Event::instant(1, "MpiSend"),
            Event::leave(2, "A"),
        ]);
        match_events(&mut s).unwrap();
        assert_eq!(s.matching_index(1), None);
        assert_eq!(s.matching_index(0), Some(2));
    }

    #[test]
    fn test_threads_have_separate_stacks() {
        let mut s = stream(vec![
            Event::enter(0, "outer").on(0, 0),
            Event::enter(1, "worker").on(0, 1),
            Event::leave(2, "outer").on(0, 0),
            Event::leave(3, "worker").on(0, 1),
        ]);
        match_events(&mut s).unwrap();

        assert_eq!(s.matching_index(0), Some(2));
        assert_eq!(s.matching_index(1), Some(3));
    }

    #[test]
    fn test_strict_name_check() {
        let mut s = stream(vec![
            Event::enter(0, "A"),
            Event::enter(1, "B"),
            Event::leave(2, "A"),
        ]);
        let options = MatchOptions::default().with_name_check(NameCheck::Strict);
        let err = match_events_with(&mut s, &options).unwrap_err();
        assert!(matches!(err, TraceError::MalformedStream { index: 2, .. }));
        assert!(s.matching().is_none());
    }

    #[test]
    fn test_recover_name_check() {
        let mut s = stream(vec![
            Event::enter(0, "A"),
            Event::enter(1, "B"),
            Event::leave(2, "A"),
        ]);
        let options = MatchOptions::default().with_name_check(NameCheck::Recover);
        match_events_with(&mut s, &options).unwrap();

        assert_eq!(s.matching_index(0), Some(2));
        assert_eq!(s.matching_index(1), None);
    }

    #[test]
    fn test_repeated_matching_is_stable() {
        let mut s = stream(vec![Event::enter(0, "A"), Event::leave(4, "A")]);
        match_events(&mut s).unwrap();
        let first = s.matching().cloned();
        let count = s.derived_column_count();

        match_events(&mut s).unwrap();
        assert_eq!(s.matching().cloned(), first);
        assert_eq!(s.derived_column_count(), count);
    }
}

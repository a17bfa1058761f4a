//! Enter/Leave pairing and calling-context tree construction.
//!
//! Both traversals are single linear scans over one stream keeping one
//! stack per (process, thread). Stacks live only for the duration of one
//! call and are never shared across streams.

pub mod pairs;
pub mod tree;

use crate::trace::{Event, StreamId};
use crate::utils::config::NameCheck;
use crate::utils::error::TraceError;

// Re-export main functions
pub use pairs::{compute_matching, match_events, match_events_with};
pub use tree::{compute_call_tree, match_caller_callee, match_caller_callee_with};

/// Pop the Enter closed by `leave`, honouring the name check mode
///
/// Returns `None` for a Leave that closes nothing (stream began mid-call, or
/// no Enter of that name is open under `Recover`).
pub(crate) fn close_frame(
    stack: &mut Vec<usize>,
    events: &[Event],
    leave: &Event,
    mode: NameCheck,
    stream: StreamId,
) -> Result<Option<usize>, TraceError> {
    match mode {
        NameCheck::Off => Ok(stack.pop()),
        NameCheck::Strict => {
            let Some(open) = stack.pop() else {
                return Ok(None);
            };
            let enter_name = events[open].name.as_deref();
            if enter_name != leave.name.as_deref() {
                return Err(TraceError::MalformedStream {
                    stream,
                    index: leave.index,
                    reason: format!(
                        "leave '{}' closes enter '{}' at event {}",
                        leave.name.as_deref().unwrap_or("?"),
                        enter_name.unwrap_or("?"),
                        open
                    ),
                });
            }
            Ok(Some(open))
        }
        NameCheck::Recover => {
            let found = stack
                .iter()
                .rposition(|&open| events[open].name == leave.name);
            Ok(found.map(|pos| {
                let open = stack[pos];
                stack.truncate(pos);
                open
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events() -> Vec<Event> {
        let mut events = vec![
            Event::enter(0, "a"),
            Event::enter(1, "b"),
            Event::leave(2, "a"),
        ];
        for (i, e) in events.iter_mut().enumerate() {
            e.index = i;
        }
        events
    }

    #[test]
    fn test_close_frame_off_is_lifo() {
        let events = events();
        let mut stack = vec![0, 1];
        let closed = close_frame(&mut stack, &events, &events[2], NameCheck::Off, StreamId::rank(0));
        assert_eq!(closed.unwrap(), Some(1));
        assert_eq!(stack, vec![0]);
    }

    #[test]
    fn test_close_frame_strict_rejects_mismatch() {
        let events = events();
        let mut stack = vec![0, 1];
        let err = close_frame(&mut stack, &events, &events[2], NameCheck::Strict, StreamId::rank(0))
            .unwrap_err();
        assert!(matches!(err, TraceError::MalformedStream { index: 2, .. }));
    }

    #[test]
    fn test_close_frame_recover_discards_inner() {
        let events = events();
        let mut stack = vec![0, 1];
        let closed =
            close_frame(&mut stack, &events, &events[2], NameCheck::Recover, StreamId::rank(0));
        assert_eq!(closed.unwrap(), Some(0));
        assert!(stack.is_empty());
    }

    #[test]
    fn test_close_frame_empty_stack() {
        let events = events();
        let mut stack = Vec::new();
        for mode in [NameCheck::Off, NameCheck::Strict, NameCheck::Recover] {
            let closed = close_frame(&mut stack, &events, &events[2], mode, StreamId::rank(0));
            assert_eq!(closed.unwrap(), None);
        }
    }
}

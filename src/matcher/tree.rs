//! Calling-context tree construction (caller/callee links).

use super::close_frame;
use crate::trace::{CallTree, EventKind, EventStream};
use crate::utils::config::MatchOptions;
use crate::utils::error::TraceError;
use log::debug;
use std::collections::HashMap;

/// Build parent/children/depth columns without storing them
///
/// On Enter the current stack top becomes the parent, the Enter is appended
/// to the parent's children and its depth is the stack depth before the
/// push. On Leave the stack pops (with the same name check as matching, so
/// a matched pair always sits at a consistent place in the tree).
pub fn compute_call_tree(
    stream: &EventStream,
    options: &MatchOptions,
) -> Result<CallTree, TraceError> {
    let events = stream.events();
    let mut tree = CallTree::with_len(events.len());
    let mut stacks: HashMap<(u32, u32), Vec<usize>> = HashMap::new();

    for event in events {
        match event.kind {
            EventKind::Enter => {
                let stack = stacks.entry(event.location()).or_default();
                let index = event.index;

                if let Some(&parent) = stack.last() {
                    tree.parent[index] = Some(parent);
                    if let Some(children) = tree.children[parent].as_mut() {
                        children.push(index);
                    }
                }
                tree.depth[index] = Some(stack.len() as u32);
                tree.children[index] = Some(Vec::new());
                stack.push(index);
            }
            EventKind::Leave => {
                let stack = stacks.entry(event.location()).or_default();
                close_frame(stack, events, event, options.name_check, stream.id())?;
            }
            EventKind::Instant => {}
        }
    }

    debug!(
        "{}: built call tree with {} roots",
        stream.id(),
        tree.roots().count()
    );

    Ok(tree)
}

/// Compute and store `parent_index`, `children_indices` and `depth`
///
/// **Public** - main entry point for tree construction. Idempotent.
pub fn match_caller_callee(stream: &mut EventStream) -> Result<(), TraceError> {
    match_caller_callee_with(stream, &MatchOptions::default())
}

/// [`match_caller_callee`] with explicit options
pub fn match_caller_callee_with(
    stream: &mut EventStream,
    options: &MatchOptions,
) -> Result<(), TraceError> {
    let tree = compute_call_tree(stream, options)?;
    stream.store_call_tree(tree, options.name_check);
    Ok(())
}

/// A node of a tree of transactions that knows its children.
pub trait TraceNode: Sized {
    fn children(&self) -> &[Self];
}

/// Fold `visitor` over every node of the tree.
///
/// Nodes are visited by popping them off a stack, children pushed in order, so siblings come out
/// last-to-first and a node is not necessarily visited before all nodes of the previous level.
/// Good for counting and collecting, don't rely on the order.
pub fn reduce_trace<'a, N, T, F>(trace: &'a N, mut visitor: F, initial: T) -> T
where
    N: TraceNode,
    F: FnMut(T, &'a N) -> T,
{
    let mut result = initial;
    let mut stack: Vec<&'a N> = vec![trace];

    while let Some(current) = stack.pop() {
        stack.extend(current.children().iter());
        result = visitor(result, current);
    }

    result
}

/// All nodes matching `predicate`, in [reduce_trace] visiting order.
pub fn filter_trace<'a, N, P>(trace: &'a N, predicate: P) -> Vec<&'a N>
where
    N: TraceNode,
    P: Fn(&N) -> bool,
{
    reduce_trace(
        trace,
        |mut matches, node| {
            if predicate(node) {
                matches.push(node);
            }
            matches
        },
        Vec::new(),
    )
}

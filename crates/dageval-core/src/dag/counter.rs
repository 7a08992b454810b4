use std::sync::atomic::{AtomicUsize, Ordering};

/// Outcome of one incoming edge reaching a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// Other parents have not arrived yet.
    Waiting { remaining: usize },
    /// This arrival was the last one; the caller owns the node's payload.
    Ready,
    /// The node already fired.
    Spent,
}

/// Per-node count of unresolved incoming edges.
///
/// `arrive` is a single compare-and-decrement, so among any number of
/// concurrent arrivals exactly one observes [`Arrival::Ready`].
#[derive(Debug)]
pub struct DependencyCounter {
    pending: AtomicUsize,
}

impl DependencyCounter {
    /// A node without incoming edges still expects one arrival: the caller
    /// that starts the run.
    pub fn new(incoming_edges: usize) -> Self {
        Self {
            pending: AtomicUsize::new(incoming_edges.max(1)),
        }
    }

    pub fn arrive(&self) -> Arrival {
        match self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        {
            Ok(1) => Arrival::Ready,
            Ok(previous) => Arrival::Waiting {
                remaining: previous - 1,
            },
            Err(_) => Arrival::Spent,
        }
    }

    pub fn remaining(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

/// Deepest level at which any parent reached a node. Only ever grows.
#[derive(Debug, Default)]
pub struct DepthTracker {
    depth: AtomicUsize,
}

impl DepthTracker {
    /// Records an incoming depth and returns the resolved (maximum) depth.
    pub fn raise(&self, depth: usize) -> usize {
        let previous = self.depth.fetch_max(depth, Ordering::SeqCst);
        previous.max(depth)
    }

    pub fn get(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn fires_only_on_last_of_k_arrivals() {
        let counter = DependencyCounter::new(3);
        assert_eq!(counter.arrive(), Arrival::Waiting { remaining: 2 });
        assert_eq!(counter.arrive(), Arrival::Waiting { remaining: 1 });
        assert_eq!(counter.arrive(), Arrival::Ready);
        assert_eq!(counter.arrive(), Arrival::Spent);
        assert_eq!(counter.remaining(), 0);
    }

    #[test]
    fn root_without_edges_fires_once() {
        let counter = DependencyCounter::new(0);
        assert_eq!(counter.arrive(), Arrival::Ready);
        assert_eq!(counter.arrive(), Arrival::Spent);
    }

    #[test]
    fn exactly_one_concurrent_arrival_wins() {
        for _ in 0..50 {
            let counter = Arc::new(DependencyCounter::new(8));
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let counter = counter.clone();
                    std::thread::spawn(move || counter.arrive())
                })
                .collect();
            let ready = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|a| *a == Arrival::Ready)
                .count();
            assert_eq!(ready, 1);
        }
    }

    #[test]
    fn depth_never_decreases() {
        let depth = DepthTracker::default();
        assert_eq!(depth.raise(3), 3);
        assert_eq!(depth.raise(1), 3);
        assert_eq!(depth.raise(5), 5);
        assert_eq!(depth.get(), 5);
    }
}

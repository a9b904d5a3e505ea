//! Deferred resolution queue.
//!
//! Forward references cannot be satisfied while the graph is still
//! being materialized, so reference-dependent mutations are queued as
//! actions and replayed in enqueue order once every entity exists and
//! scene-local ids are final.
//!
//! State machine per logical operation: Queuing → Flushing → Immediate,
//! monotonic. After the flush, late enqueues (live-editing a prefab
//! instance that was already loaded) execute on the spot instead of
//! queuing into a pass that will never flush again.

use std::collections::VecDeque;

use crate::graph::SceneGraph;
use crate::identity::IdentityTable;

/// A queued mutation. Errors are logged by the queue, never propagated.
pub type DeferredAction = Box<dyn FnOnce(&mut SceneGraph, &IdentityTable) -> Result<(), String>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueState {
    Queuing,
    Flushing,
    Immediate,
}

/// FIFO trampoline for reference-dependent mutations.
pub struct DeferredQueue {
    actions: VecDeque<DeferredAction>,
    state: QueueState,
}

impl Default for DeferredQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self {
            actions: VecDeque::new(),
            state: QueueState::Queuing,
        }
    }

    pub fn state(&self) -> QueueState {
        self.state
    }

    pub fn pending(&self) -> usize {
        self.actions.len()
    }

    /// Queues an action, or runs it immediately if the pass has already
    /// flushed. Immediate failures are logged like flush failures.
    pub fn enqueue(
        &mut self,
        graph: &mut SceneGraph,
        identity: &IdentityTable,
        action: DeferredAction,
    ) {
        match self.state {
            QueueState::Queuing | QueueState::Flushing => self.actions.push_back(action),
            QueueState::Immediate => {
                if let Err(message) = action(graph, identity) {
                    log::error!("immediate deferred action failed: {message}");
                }
            }
        }
    }

    /// Drains the queue in FIFO order.
    ///
    /// Each action failure is caught and logged; the rest of the queue
    /// still runs. Afterwards the queue is in Immediate mode.
    pub fn flush(&mut self, graph: &mut SceneGraph, identity: &IdentityTable) {
        self.state = QueueState::Flushing;
        while let Some(action) = self.actions.pop_front() {
            if let Err(message) = action(graph, identity) {
                log::error!("deferred action failed: {message}");
            }
        }
        self.state = QueueState::Immediate;
    }

    /// Resets to Queuing for a new top-level operation.
    pub fn reset(&mut self) {
        self.actions.clear();
        self.state = QueueState::Queuing;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn flush_runs_fifo_and_survives_failures() {
        let mut graph = SceneGraph::new();
        let identity = IdentityTable::new();
        let mut queue = DeferredQueue::new();

        let order = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            queue.enqueue(
                &mut graph,
                &identity,
                Box::new(move |_, _| {
                    order.borrow_mut().push(i);
                    if i == 1 {
                        Err("boom".into())
                    } else {
                        Ok(())
                    }
                }),
            );
        }

        assert_eq!(queue.state(), QueueState::Queuing);
        assert_eq!(queue.pending(), 3);
        queue.flush(&mut graph, &identity);

        assert_eq!(*order.borrow(), vec![0, 1, 2]);
        assert_eq!(queue.state(), QueueState::Immediate);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn immediate_mode_runs_on_enqueue() {
        let mut graph = SceneGraph::new();
        let identity = IdentityTable::new();
        let mut queue = DeferredQueue::new();
        queue.flush(&mut graph, &identity);

        let ran = Rc::new(RefCell::new(false));
        let flag = ran.clone();
        queue.enqueue(
            &mut graph,
            &identity,
            Box::new(move |_, _| {
                *flag.borrow_mut() = true;
                Ok(())
            }),
        );

        assert!(*ran.borrow());
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn reset_returns_to_queuing() {
        let mut graph = SceneGraph::new();
        let identity = IdentityTable::new();
        let mut queue = DeferredQueue::new();
        queue.flush(&mut graph, &identity);
        queue.reset();
        assert_eq!(queue.state(), QueueState::Queuing);
    }
}

//! Ordered queue of actions awaiting dispatch.

use tracing::{debug, info};

use promptctl_core::{Action, CommandFormatter, DrainMode, Result};

/// Outcome of one [`ActionQueue::drain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainReport {
    /// Actions handed to the dispatcher during this drain
    pub dispatched: usize,
    /// Every action was dispatched and each dispatch asked to continue
    pub completed: bool,
}

/// Append-only, insertion-ordered list of actions.
///
/// Entries are never removed. In [`DrainMode::Replay`] (the default) every
/// drain walks the whole history again; in [`DrainMode::ConsumeOnce`] a drain
/// resumes after the last action that was dispatched successfully.
#[derive(Debug, Clone, Default)]
pub struct ActionQueue {
    actions: Vec<Action>,
    mode: DrainMode,
    consumed: usize,
}

impl ActionQueue {
    /// Create an empty queue in replay mode.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty queue with the given drain mode.
    pub fn with_mode(mode: DrainMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// The drain mode.
    pub fn mode(&self) -> DrainMode {
        self.mode
    }

    /// Append an action built from its parts.
    pub fn append(&mut self, name: impl Into<String>, args: Vec<String>, silent: bool) {
        self.push(Action {
            name: name.into(),
            args,
            silent,
        });
    }

    /// Append an action.
    pub fn push(&mut self, action: Action) {
        debug!("Queued action '{}' ({} args)", action.name, action.args.len());
        self.actions.push(action);
    }

    /// Number of queued actions, dispatched or not.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether nothing was ever queued.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Number of actions the next drain would dispatch.
    pub fn pending(&self) -> usize {
        self.actions.len() - self.start_index()
    }

    /// Iterate over all queued actions in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, Action> {
        self.actions.iter()
    }

    /// Format and dispatch queued actions in insertion order.
    ///
    /// `dispatch` receives each action with its wire text. Returning
    /// `Ok(false)` stops the drain and leaves the remaining actions queued;
    /// an error stops the drain and is returned.
    pub fn drain<F>(&mut self, formatter: &dyn CommandFormatter, mut dispatch: F) -> Result<DrainReport>
    where
        F: FnMut(&Action, &str) -> Result<bool>,
    {
        let start = self.start_index();
        info!(
            "Draining {} of {} queued actions ({:?})",
            self.actions.len() - start,
            self.actions.len(),
            self.mode
        );

        let mut report = DrainReport::default();
        for (index, action) in self.actions.iter().enumerate().skip(start) {
            let command = formatter.format(action);
            report.dispatched += 1;

            if !dispatch(action, &command)? {
                debug!("Drain stopped at action {} ('{}')", index, action.name);
                return Ok(report);
            }

            if self.mode == DrainMode::ConsumeOnce {
                self.consumed = index + 1;
            }
        }

        report.completed = true;
        Ok(report)
    }

    fn start_index(&self) -> usize {
        match self.mode {
            DrainMode::Replay => 0,
            DrainMode::ConsumeOnce => self.consumed,
        }
    }
}

impl<'a> IntoIterator for &'a ActionQueue {
    type Item = &'a Action;
    type IntoIter = std::slice::Iter<'a, Action>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use promptctl_core::{DefaultFormatter, Error};

    fn queue_of(names: &[&str], mode: DrainMode) -> ActionQueue {
        let mut queue = ActionQueue::with_mode(mode);
        for name in names {
            queue.append(*name, vec![], false);
        }
        queue
    }

    fn collect(queue: &mut ActionQueue) -> (DrainReport, Vec<String>) {
        let mut sent = Vec::new();
        let report = queue
            .drain(&DefaultFormatter::new(), |_, command| {
                sent.push(command.to_string());
                Ok(true)
            })
            .unwrap();
        (report, sent)
    }

    #[test]
    fn test_append_and_iter() {
        let mut queue = ActionQueue::new();
        assert!(queue.is_empty());

        queue.append("file", vec!["a.out".to_string()], false);
        queue.push(Action::silent("run", vec![]));

        assert_eq!(queue.len(), 2);
        let names: Vec<&str> = queue.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["file", "run"]);
        assert!(queue.iter().nth(1).unwrap().silent);
    }

    #[test]
    fn test_drain_formats_in_order() {
        let mut queue = ActionQueue::new();
        queue.append("foo", vec!["bar".to_string(), "baz".to_string()], false);
        queue.append("confirm", vec![], false);
        queue.append("next", vec![], false);

        let (report, sent) = collect(&mut queue);
        assert_eq!(sent, vec!["foo bar baz\n", "y\n", "next\n"]);
        assert_eq!(report.dispatched, 3);
        assert!(report.completed);
    }

    #[test]
    fn test_replay_reissues_everything() {
        let mut queue = queue_of(&["a", "b"], DrainMode::Replay);

        let (_, first) = collect(&mut queue);
        let (_, second) = collect(&mut queue);
        assert_eq!(first, second);
        assert_eq!(second, vec!["a\n", "b\n"]);
        assert_eq!(queue.pending(), 2);
    }

    #[test]
    fn test_consume_once_resumes() {
        let mut queue = queue_of(&["a", "b"], DrainMode::ConsumeOnce);
        let (_, first) = collect(&mut queue);
        assert_eq!(first, vec!["a\n", "b\n"]);
        assert_eq!(queue.pending(), 0);

        queue.append("c", vec![], false);
        let (report, second) = collect(&mut queue);
        assert_eq!(second, vec!["c\n"]);
        assert!(report.completed);
    }

    #[test]
    fn test_stop_leaves_rest_queued() {
        let mut queue = queue_of(&["a", "b", "c"], DrainMode::ConsumeOnce);

        let mut sent = Vec::new();
        let report = queue
            .drain(&DefaultFormatter::new(), |action, _| {
                sent.push(action.name.clone());
                Ok(action.name != "b")
            })
            .unwrap();

        assert_eq!(sent, vec!["a", "b"]);
        assert_eq!(report.dispatched, 2);
        assert!(!report.completed);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pending(), 2);
    }

    #[test]
    fn test_error_stops_drain() {
        let mut queue = queue_of(&["a", "b"], DrainMode::Replay);

        let mut calls = 0;
        let result = queue.drain(&DefaultFormatter::new(), |_, _| {
            calls += 1;
            Err(Error::Execution("gone".to_string()))
        });

        assert!(matches!(result, Err(Error::Execution(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_empty_drain_completes() {
        let mut queue = ActionQueue::new();
        let (report, sent) = collect(&mut queue);
        assert!(sent.is_empty());
        assert_eq!(report, DrainReport { dispatched: 0, completed: true });
    }
}

//! Device-side task bookkeeping on the host. Completion and abort
//! notifications arrive on the transport-receive thread; the only shared
//! state is the active-task list behind one mutex, and per-task updates
//! apply in receive order. Nothing here ever calls back into the compiler.

use std::sync::Mutex;

use tracing::debug;

use crate::tokens::ImageToken;

/// Abort kinds the execution engine reports.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum RuntimeAbort {
	DivideByZero,
	IndexOutOfRange,
	OutOfMemory,
	NullReference,
	StackOverflow,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskState {
	Running,
	Completed { result: i32 },
	/// The engine unwound the task; the trace is method tokens, innermost
	/// frame first.
	Aborted { kind: RuntimeAbort, trace: Vec<ImageToken> },
	Killed,
}

#[derive(Debug, Clone)]
pub struct TaskEntry {
	pub id: u32,
	pub method: ImageToken,
	pub state: TaskState,
}

/// One state change for one task, as decoded off the wire.
#[derive(Debug, Clone)]
pub enum TaskUpdate {
	Completed { task: u32, result: i32 },
	Aborted { task: u32, kind: RuntimeAbort, trace: Vec<ImageToken> },
	Killed { task: u32 },
}

impl TaskUpdate {
	fn task(&self) -> u32 {
		match self {
			TaskUpdate::Completed { task, .. }
			| TaskUpdate::Aborted { task, .. }
			| TaskUpdate::Killed { task } => *task,
		}
	}
}

#[derive(Debug, Default)]
pub struct TaskRegistry {
	tasks: Mutex<Vec<TaskEntry>>,
}

impl TaskRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Records a task the host just asked the device to start.
	pub fn begin(&self, id: u32, method: ImageToken) {
		let mut tasks = self.tasks.lock().unwrap();
		tasks.retain(|t| t.id != id);
		tasks.push(TaskEntry { id, method, state: TaskState::Running });
	}

	/// Applies one device notification. Called from the receive thread;
	/// holds the lock only long enough to swap the state in.
	pub fn apply(&self, update: TaskUpdate) {
		let mut tasks = self.tasks.lock().unwrap();
		let Some(entry) = tasks.iter_mut().find(|t| t.id == update.task()) else {
			debug!(task = update.task(), "notification for an unknown task");
			return;
		};
		entry.state = match update {
			TaskUpdate::Completed { result, .. } => TaskState::Completed { result },
			TaskUpdate::Aborted { kind, trace, .. } => TaskState::Aborted { kind, trace },
			TaskUpdate::Killed { .. } => TaskState::Killed,
		};
	}

	pub fn state_of(&self, id: u32) -> Option<TaskState> {
		self.tasks.lock().unwrap().iter().find(|t| t.id == id).map(|t| t.state.clone())
	}

	pub fn active(&self) -> Vec<TaskEntry> {
		self.tasks.lock().unwrap().clone()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::tokens::{ImageTokenKind, TokenAllocator};
	use crate::program::MethodId;

	#[test]
	fn updates_apply_in_receive_order() {
		let mut alloc = TokenAllocator::new();
		let method = alloc.method_token(MethodId(0));
		assert_eq!(method.kind(), ImageTokenKind::Method);

		let registry = TaskRegistry::new();
		registry.begin(1, method);
		registry.apply(TaskUpdate::Aborted {
			task: 1,
			kind: RuntimeAbort::IndexOutOfRange,
			trace: vec![method],
		});
		match registry.state_of(1) {
			Some(TaskState::Aborted { kind, trace }) => {
				assert_eq!(kind, RuntimeAbort::IndexOutOfRange);
				assert_eq!(trace, vec![method]);
			}
			other => panic!("unexpected state {other:?}"),
		}

		// A later notification for the same task wins.
		registry.apply(TaskUpdate::Killed { task: 1 });
		assert_eq!(registry.state_of(1), Some(TaskState::Killed));
	}

	#[test]
	fn unknown_tasks_are_tolerated() {
		let registry = TaskRegistry::new();
		registry.apply(TaskUpdate::Completed { task: 99, result: 0 });
		assert!(registry.state_of(99).is_none());
	}
}

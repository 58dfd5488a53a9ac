//! Memoized async tasks with dependency cycle detection.
//! See [`TaskTracker`].

use super::thunk::Thunk;
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{Debug, Display},
    future::Future,
    pin::Pin,
    sync::Arc,
};
use tokio::sync::Mutex;

/// The work behind each task of a [`TaskTracker`].
///
/// `work` receives a [`TaskContext`] through which it may `require` other
/// tasks. The key identifies a task; equal keys share one execution.
#[async_trait::async_trait]
pub trait TaskWork {
    type Output: Send + Sync;
    type Key: Clone + Ord + Display + Send;
    type CycleError;

    async fn work(&self, context: TaskContext<Self>, key: Self::Key) -> Self::Output;

    fn cycle_error(&self, cycle: Cycle<Self::Key>) -> Self::CycleError;
}

struct TaskState<Work: TaskWork + ?Sized> {
    result: Thunk<Work::Output>,
    dependencies: Vec<Work::Key>,
}

struct InnerState<Work: TaskWork + ?Sized> {
    tasks: BTreeMap<Work::Key, TaskState<Work>>,
    work: Arc<Work>,
}

/// Runs each task at most once and records which task required which, so
/// that a requirement closing a loop fails with a [`Cycle`] instead of
/// waiting forever.
pub struct TaskTracker<Work: TaskWork + ?Sized> {
    state: Arc<Mutex<InnerState<Work>>>,
}
impl<Work: TaskWork + Send + Sync + 'static> TaskTracker<Work>
where
    Work::Output: Clone + Send + Sync,
    Work::Key: Clone + Send + Sync,
{
    pub fn new(work: Arc<Work>) -> Self {
        TaskTracker {
            state: Arc::new(Mutex::new(InnerState {
                tasks: BTreeMap::new(),
                work,
            })),
        }
    }

    /// The thunk of the task for `key`, registering the task if it is new.
    /// Nothing runs until the thunk is forced.
    pub async fn create(&self, key: Work::Key) -> Thunk<Work::Output> {
        let mut state = self.state.lock().await;
        if let Some(task) = state.tasks.get(&key) {
            return task.result.clone();
        }
        let context = TaskContext {
            tracker: self.clone(),
            key: key.clone(),
        };
        let work = state.work.clone();
        let task_key = key.clone();
        let result = Thunk::new(async move { work.work(context, task_key).await });
        state.tasks.insert(
            key,
            TaskState {
                result: result.clone(),
                dependencies: Vec::new(),
            },
        );
        result
    }

    /// Start the task for `key` on the runtime without waiting for it.
    pub async fn spawn(&self, key: Work::Key) -> Thunk<Work::Output> {
        let thunk = self.create(key).await;
        let background = thunk.clone();
        tokio::spawn(async move {
            background.force().await;
        });
        thunk
    }

    /// Run the task for `key` and wait for its output.
    pub async fn run(&self, key: Work::Key) -> Work::Output {
        let thunk = self.create(key).await;
        thunk.force().await.clone()
    }
}

impl<Work> Clone for TaskTracker<Work>
where
    Work: TaskWork + ?Sized,
{
    fn clone(&self) -> Self {
        TaskTracker {
            state: self.state.clone(),
        }
    }
}

/// Handed to [`TaskWork::work`]; knows which task is running.
pub struct TaskContext<Work: TaskWork + ?Sized> {
    tracker: TaskTracker<Work>,
    key: Work::Key,
}
impl<Work: TaskWork + ?Sized> Clone for TaskContext<Work> {
    fn clone(&self) -> Self {
        TaskContext {
            tracker: self.tracker.clone(),
            key: self.key.clone(),
        }
    }
}
impl<Work: TaskWork + Send + Sync + 'static> TaskContext<Work>
where
    Work::Output: Clone + Send + Sync,
    Work::Key: Clone + Send + Sync,
{
    async fn add_dependency(&self, key: Work::Key) -> Result<(), Work::CycleError> {
        let mut state = self.tracker.state.lock().await;

        let known = state
            .tasks
            .get(&self.key)
            .is_some_and(|task| task.dependencies.contains(&key));
        if known {
            return Ok(());
        }

        if let Some(mut path) = find_path_to(
            &mut BTreeSet::new(),
            &state.tasks,
            &self.key,
            std::slice::from_ref(&key),
        ) {
            path.reverse();
            return Err(state.work.cycle_error(Cycle { path }));
        }

        if let Some(task) = state.tasks.get_mut(&self.key) {
            task.dependencies.push(key);
        }
        Ok(())
    }

    /// Wait for the task for `key`, recording that the current task depends
    /// on it.
    #[allow(clippy::type_complexity)]
    pub fn require(
        &self,
        key: Work::Key,
    ) -> Pin<Box<dyn Future<Output = Result<Work::Output, Work::CycleError>> + Send + '_>>
    where
        Work::CycleError: Send,
    {
        Box::pin(async move {
            self.add_dependency(key.clone()).await?;
            Ok(self.tracker.run(key).await)
        })
    }
}

/// Depth-first search for a path from any of `outgoing` to `needle`.
/// The graphs here have a handful of nodes, so nothing is cached between
/// searches.
fn find_path_to<Work: TaskWork + ?Sized>(
    seen: &mut BTreeSet<Work::Key>,
    tasks: &BTreeMap<Work::Key, TaskState<Work>>,
    needle: &Work::Key,
    outgoing: &[Work::Key],
) -> Option<Vec<Work::Key>> {
    if outgoing.contains(needle) {
        return Some(vec![needle.clone()]);
    }
    for edge in outgoing {
        if !seen.insert(edge.clone()) {
            continue;
        }
        if let Some(node) = tasks.get(edge) {
            if let Some(mut path) = find_path_to(seen, tasks, needle, &node.dependencies) {
                path.push(edge.clone());
                return Some(path);
            }
        }
    }
    None
}

/// A dependency loop. The first element of `path` depends on the second and
/// so on; the last depends on the first again.
#[derive(Clone)]
pub struct Cycle<Key> {
    path: Vec<Key>,
}
impl<Key: Display> Display for Cycle<Key> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for key in &self.path {
            write!(f, "{} -> ", key)?;
        }
        match self.path.first() {
            Some(first) => write!(f, "{}", first),
            None => write!(f, "(empty cycle)"),
        }
    }
}
impl<Key: Debug> Debug for Cycle<Key> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cycle").field("path", &self.path).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;

    /// Tasks are letters; each task requires the letters listed for it and
    /// outputs the number of tasks below it, itself included.
    struct Graph {
        edges: BTreeMap<char, Vec<char>>,
        runs: AtomicU32,
    }
    impl Graph {
        fn new(edges: &[(char, &[char])]) -> Arc<Self> {
            Arc::new(Graph {
                edges: edges.iter().map(|(k, v)| (*k, v.to_vec())).collect(),
                runs: AtomicU32::new(0),
            })
        }
    }
    #[async_trait]
    impl TaskWork for Graph {
        type Output = Result<u32, String>;
        type Key = char;
        type CycleError = String;

        async fn work(&self, context: TaskContext<Self>, key: char) -> Self::Output {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let mut total = 1;
            for dep in self.edges.get(&key).cloned().unwrap_or_default() {
                total += context.require(dep).await??;
            }
            Ok(total)
        }

        fn cycle_error(&self, cycle: Cycle<char>) -> String {
            cycle.to_string()
        }
    }

    #[tokio::test]
    async fn shared_dependencies_run_once() {
        // d -> b -> a, d -> c -> a
        let graph = Graph::new(&[('b', &['a']), ('c', &['a']), ('d', &['b', 'c'])]);
        let tracker = TaskTracker::new(graph.clone());
        assert_eq!(tracker.run('d').await, Ok(5));
        assert_eq!(graph.runs.load(Ordering::SeqCst), 4);
        assert_eq!(tracker.run('b').await, Ok(2));
        assert_eq!(graph.runs.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn cycles_are_reported() {
        let graph = Graph::new(&[('a', &['b']), ('b', &['c']), ('c', &['a'])]);
        let tracker = TaskTracker::new(graph);
        let err = tracker.run('a').await.unwrap_err();
        assert_eq!(err, "a -> b -> c -> a");
    }

    #[tokio::test]
    async fn spawned_tasks_complete() {
        let graph = Graph::new(&[('x', &['y'])]);
        let tracker = TaskTracker::new(graph.clone());
        let thunk = tracker.spawn('x').await;
        assert_eq!(*thunk.force().await, Ok(2));
    }
}

//! Phase-based update scheduling.
//!
//! Update functions register against a phase; the scheduler runs every
//! phase in a fixed order each frame, sorts each phase's functions by
//! priority and dependency (a function named in another's `depends_on`
//! always runs first; ties among otherwise-unordered functions are
//! broken by priority, then registration order), and executes `Async`
//! functions in `granularity`-sized batches — concurrently via `rayon`
//! when the `par-schedule` feature is enabled, sequentially otherwise.
//! Between phases, queued deletions are flushed and due messages are
//! delivered.

use std::time::{Duration, Instant};

use super::component::ComponentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    PreAsync,
    Async,
    PostAsync,
    PostTransform,
}

pub const ALL_PHASES: [Phase; 4] = [Phase::PreAsync, Phase::Async, Phase::PostAsync, Phase::PostTransform];

pub type UpdateFn = Box<dyn Fn(&UpdateContext) + Send + Sync>;

pub struct UpdateContext {
    pub dt_seconds: f64,
    pub is_simulating: bool,
}

/// One registered per-manager update call. `depends_on` names the other
/// functions in the same phase that must run before this one; the
/// scheduler builds a dependency graph per phase and topologically
/// sorts it, breaking ties among functions with no ordering constraint
/// between them by priority, then registration order. A name with no
/// matching registration in the phase is ignored.
pub struct RegisteredUpdateFunction {
    pub name: &'static str,
    pub phase: Phase,
    pub priority: i32,
    pub granularity: usize,
    pub only_when_simulating: bool,
    pub depends_on: Vec<&'static str>,
    pub function: UpdateFn,
}

pub struct UpdateTask {
    registration_order: usize,
    func: RegisteredUpdateFunction,
}

/// Owns every registered update function and runs them phase by phase.
#[derive(Default)]
pub struct Scheduler {
    tasks: Vec<UpdateTask>,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler { tasks: Vec::new() }
    }

    pub fn register(&mut self, func: RegisteredUpdateFunction) {
        let registration_order = self.tasks.len();
        self.tasks.push(UpdateTask { registration_order, func });
    }

    /// Orders one phase's functions by priority and dependency: a
    /// function never runs before anything named in its `depends_on`.
    /// Implemented as Kahn's algorithm, picking the highest-priority
    /// ready function at each step so the dependency-free case degrades
    /// to a plain priority sort.
    fn sorted_for_phase(&self, phase: Phase) -> Vec<&UpdateTask> {
        let matching: Vec<&UpdateTask> = self.tasks.iter().filter(|t| t.func.phase == phase).collect();
        let index_of: std::collections::HashMap<&str, usize> =
            matching.iter().enumerate().map(|(i, t)| (t.func.name, i)).collect();

        let mut in_degree = vec![0usize; matching.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); matching.len()];
        for (i, task) in matching.iter().enumerate() {
            for dep_name in &task.func.depends_on {
                if let Some(&dep_idx) = index_of.get(dep_name) {
                    dependents[dep_idx].push(i);
                    in_degree[i] += 1;
                }
            }
        }

        let mut ready: Vec<usize> = (0..matching.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut ordered = Vec::with_capacity(matching.len());
        let mut scheduled = vec![false; matching.len()];

        while !ready.is_empty() {
            ready.sort_by(|&a, &b| {
                matching[b]
                    .func
                    .priority
                    .cmp(&matching[a].func.priority)
                    .then_with(|| matching[a].registration_order.cmp(&matching[b].registration_order))
            });
            let next = ready.remove(0);
            scheduled[next] = true;
            ordered.push(next);
            for &dependent in &dependents[next] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.push(dependent);
                }
            }
        }

        // A dependency cycle leaves some tasks un-scheduled; append them
        // in priority order rather than dropping them.
        if ordered.len() < matching.len() {
            let mut leftover: Vec<usize> = (0..matching.len()).filter(|&i| !scheduled[i]).collect();
            leftover.sort_by(|&a, &b| {
                matching[b]
                    .func
                    .priority
                    .cmp(&matching[a].func.priority)
                    .then_with(|| matching[a].registration_order.cmp(&matching[b].registration_order))
            });
            ordered.extend(leftover);
        }

        ordered.into_iter().map(|i| matching[i]).collect()
    }

    /// Runs every phase in order for one frame. `on_phase_boundary` is
    /// invoked after each phase (flush deletions, deliver due messages).
    pub fn run_frame(&self, ctx: &UpdateContext, mut on_phase_boundary: impl FnMut(Phase)) {
        for &phase in &ALL_PHASES {
            let tasks = self.sorted_for_phase(phase);
            let runnable: Vec<&RegisteredUpdateFunction> = tasks
                .iter()
                .map(|t| &t.func)
                .filter(|f| ctx.is_simulating || !f.only_when_simulating)
                .collect();

            if phase == Phase::Async {
                run_async_batch(&runnable, ctx);
            } else {
                for f in runnable {
                    (f.function)(ctx);
                }
            }
            on_phase_boundary(phase);
        }
    }
}

#[cfg(feature = "par-schedule")]
fn run_async_batch(functions: &[&RegisteredUpdateFunction], ctx: &UpdateContext) {
    use rayon::prelude::*;
    if functions.is_empty() {
        return;
    }
    let granularity = functions[0].granularity.max(1);
    functions.chunks(granularity).collect::<Vec<_>>().par_iter().for_each(|batch| {
        for f in batch.iter() {
            (f.function)(ctx);
        }
    });
}

#[cfg(not(feature = "par-schedule"))]
fn run_async_batch(functions: &[&RegisteredUpdateFunction], ctx: &UpdateContext) {
    for f in functions {
        (f.function)(ctx);
    }
}

/// A named batch of components awaiting `Initialize` then
/// `OnSimulationStarted`, with a per-frame time budget: once the budget
/// is spent, remaining components wait for the next frame rather than
/// blocking it.
pub struct InitBatch {
    pub name: String,
    pub max_initialization_time_per_frame: Duration,
    to_initialize: Vec<ComponentId>,
    to_start_simulation: Vec<ComponentId>,
}

impl InitBatch {
    pub fn new(name: impl Into<String>, max_initialization_time_per_frame: Duration) -> Self {
        InitBatch {
            name: name.into(),
            max_initialization_time_per_frame,
            to_initialize: Vec::new(),
            to_start_simulation: Vec::new(),
        }
    }

    pub fn queue_initialize(&mut self, id: ComponentId) {
        self.to_initialize.push(id);
    }

    pub fn queue_start_simulation(&mut self, id: ComponentId) {
        self.to_start_simulation.push(id);
    }

    pub fn is_ready(&self) -> bool {
        self.to_initialize.is_empty() && self.to_start_simulation.is_empty()
    }

    /// Drains as many queued components as fit in the remaining budget,
    /// calling `initialize`/`start_simulation` for each. Returns how
    /// many components were processed this call.
    pub fn process(&mut self, mut initialize: impl FnMut(ComponentId), mut start_simulation: impl FnMut(ComponentId)) -> usize {
        let deadline = Instant::now() + self.max_initialization_time_per_frame;
        let mut processed = 0;
        while let Some(id) = self.to_initialize.pop() {
            initialize(id);
            processed += 1;
            if Instant::now() >= deadline {
                return processed;
            }
        }
        while let Some(id) = self.to_start_simulation.pop() {
            start_simulation(id);
            processed += 1;
            if Instant::now() >= deadline {
                return processed;
            }
        }
        processed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    #[test]
    fn phase_functions_run_highest_priority_first() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut scheduler = Scheduler::new();

        let o1 = order.clone();
        scheduler.register(RegisteredUpdateFunction {
            name: "low",
            phase: Phase::PreAsync,
            priority: 0,
            granularity: 1,
            only_when_simulating: false,
            depends_on: vec![],
            function: Box::new(move |_| o1.lock().unwrap().push("low")),
        });
        let o2 = order.clone();
        scheduler.register(RegisteredUpdateFunction {
            name: "high",
            phase: Phase::PreAsync,
            priority: 100,
            granularity: 1,
            only_when_simulating: false,
            depends_on: vec![],
            function: Box::new(move |_| o2.lock().unwrap().push("high")),
        });

        let ctx = UpdateContext { dt_seconds: 1.0 / 60.0, is_simulating: true };
        scheduler.run_frame(&ctx, |_| {});
        assert_eq!(*order.lock().unwrap(), vec!["high", "low"]);
    }

    #[test]
    fn dependency_ordering_overrides_priority() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut scheduler = Scheduler::new();

        let o1 = order.clone();
        scheduler.register(RegisteredUpdateFunction {
            name: "physics",
            phase: Phase::PreAsync,
            priority: 0,
            granularity: 1,
            only_when_simulating: false,
            depends_on: vec!["transform"],
            function: Box::new(move |_| o1.lock().unwrap().push("physics")),
        });
        let o2 = order.clone();
        scheduler.register(RegisteredUpdateFunction {
            name: "transform",
            phase: Phase::PreAsync,
            priority: -100,
            granularity: 1,
            only_when_simulating: false,
            depends_on: vec![],
            function: Box::new(move |_| o2.lock().unwrap().push("transform")),
        });

        let ctx = UpdateContext { dt_seconds: 1.0 / 60.0, is_simulating: true };
        scheduler.run_frame(&ctx, |_| {});
        assert_eq!(*order.lock().unwrap(), vec!["transform", "physics"]);
    }

    #[test]
    fn only_when_simulating_functions_skip_while_paused() {
        let calls = Arc::new(AtomicI32::new(0));
        let mut scheduler = Scheduler::new();
        let c = calls.clone();
        scheduler.register(RegisteredUpdateFunction {
            name: "sim_only",
            phase: Phase::PostAsync,
            priority: 0,
            granularity: 1,
            only_when_simulating: true,
            depends_on: vec![],
            function: Box::new(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        });

        let paused_ctx = UpdateContext { dt_seconds: 0.0, is_simulating: false };
        scheduler.run_frame(&paused_ctx, |_| {});
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let running_ctx = UpdateContext { dt_seconds: 1.0 / 60.0, is_simulating: true };
        scheduler.run_frame(&running_ctx, |_| {});
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn phase_boundaries_fire_once_per_phase() {
        let boundaries = Arc::new(std::sync::Mutex::new(Vec::new()));
        let scheduler = Scheduler::new();
        let ctx = UpdateContext { dt_seconds: 0.0, is_simulating: true };
        let b = boundaries.clone();
        scheduler.run_frame(&ctx, move |phase| b.lock().unwrap().push(phase));
        assert_eq!(boundaries.lock().unwrap().len(), ALL_PHASES.len());
    }

    #[test]
    fn init_batch_is_ready_once_both_lists_drain() {
        let mut batch = InitBatch::new("spawn", Duration::from_millis(16));
        batch.queue_initialize(ComponentId::new(0, 0));
        assert!(!batch.is_ready());
        batch.process(|_| {}, |_| {});
        assert!(batch.is_ready());
    }
}

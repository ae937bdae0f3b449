//! Promise states, reactions and the microtask queue.
//!
//! Settling a promise never runs user code directly: every reaction becomes a
//! [`Job`] that runs when the queue is drained, either by `await` or by the
//! async coordinator between scheduler yields.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::{trace, warn};

use super::Interpreter;
use crate::value::{
    Callable, JsResult, JsValue, PromiseCell, PromiseRef, PromiseState, Thrown,
};

/// What to do once a promise settles.
#[derive(Debug)]
pub enum Reaction {
    Then {
        on_fulfilled: Option<JsValue>,
        on_rejected: Option<JsValue>,
        result: PromiseRef,
    },
    /// Adopt the settlement into another promise.
    ResolveTo { target: PromiseRef },
    Finally {
        on_finally: Option<JsValue>,
        result: PromiseRef,
    },
    AllElement {
        index: usize,
        state: Rc<RefCell<AllState>>,
    },
}

/// Shared bookkeeping of one `Promise.all` call.
#[derive(Debug)]
pub struct AllState {
    values: Vec<JsValue>,
    remaining: usize,
    done: bool,
    result: PromiseRef,
}

#[derive(Clone, Debug)]
pub enum Settlement {
    Fulfilled(JsValue),
    Rejected(JsValue),
}

#[derive(Debug)]
pub struct Job {
    reaction: Reaction,
    settlement: Settlement,
}

impl Interpreter<'_> {
    pub(crate) fn new_promise(&self) -> PromiseRef {
        Rc::new(RefCell::new(PromiseCell {
            state: PromiseState::Pending,
            reactions: Vec::new(),
        }))
    }

    pub(crate) fn settled_promise(&mut self, settlement: Settlement) -> PromiseRef {
        let promise = self.new_promise();
        match settlement {
            Settlement::Fulfilled(v) => self.resolve_promise(&promise, v),
            Settlement::Rejected(r) => self.reject_promise(&promise, r),
        }
        promise
    }

    /// The `resolve`/`reject` pair handed to executors and thenables. Only the
    /// first call of either one has an effect.
    pub(crate) fn resolving_functions(&self, promise: &PromiseRef) -> (JsValue, JsValue) {
        let already = Rc::new(Cell::new(false));
        let resolve = JsValue::function(Callable::Resolver {
            promise: promise.clone(),
            reject: false,
            already: already.clone(),
        });
        let reject = JsValue::function(Callable::Resolver {
            promise: promise.clone(),
            reject: true,
            already,
        });
        (resolve, reject)
    }

    pub(crate) fn fulfill_promise(&mut self, promise: &PromiseRef, value: JsValue) {
        self.settle(promise, Settlement::Fulfilled(value));
    }

    pub(crate) fn reject_promise(&mut self, promise: &PromiseRef, reason: JsValue) {
        self.settle(promise, Settlement::Rejected(reason));
    }

    fn settle(&mut self, promise: &PromiseRef, settlement: Settlement) {
        let reactions = {
            let mut cell = promise.borrow_mut();
            if !matches!(cell.state, PromiseState::Pending) {
                return;
            }
            cell.state = match &settlement {
                Settlement::Fulfilled(v) => PromiseState::Fulfilled(v.clone()),
                Settlement::Rejected(r) => PromiseState::Rejected(r.clone()),
            };
            std::mem::take(&mut cell.reactions)
        };
        for reaction in reactions {
            self.microtasks.push_back(Job {
                reaction,
                settlement: settlement.clone(),
            });
        }
    }

    /// Resolve `promise` with `value`, adopting the state of promises and
    /// thenables.
    pub(crate) fn resolve_promise(&mut self, promise: &PromiseRef, value: JsValue) {
        if !matches!(promise.borrow().state, PromiseState::Pending) {
            return;
        }
        match &value {
            JsValue::Promise(other) if Rc::ptr_eq(other, promise) => {
                let err = JsValue::error("TypeError", "Chaining cycle detected for promise");
                self.reject_promise(promise, err);
            }
            JsValue::Promise(other) => {
                let state = other.borrow().state.clone();
                match state {
                    PromiseState::Fulfilled(v) => self.fulfill_promise(promise, v),
                    PromiseState::Rejected(r) => self.reject_promise(promise, r),
                    PromiseState::Pending => self.add_reaction(
                        other,
                        Reaction::ResolveTo {
                            target: promise.clone(),
                        },
                    ),
                }
            }
            JsValue::Object(o) => {
                let then = o.borrow().get("then").cloned();
                match then {
                    Some(then) if then.is_callable() => {
                        let (resolve, reject) = self.resolving_functions(promise);
                        if let Err(Thrown(e)) =
                            self.call_function(&then, value.clone(), vec![resolve, reject])
                        {
                            self.reject_promise(promise, e);
                        }
                    }
                    _ => self.fulfill_promise(promise, value),
                }
            }
            _ => self.fulfill_promise(promise, value),
        }
    }

    pub(crate) fn add_reaction(&mut self, promise: &PromiseRef, reaction: Reaction) {
        let settlement = {
            let mut cell = promise.borrow_mut();
            match &cell.state {
                PromiseState::Pending => {
                    cell.reactions.push(reaction);
                    return;
                }
                PromiseState::Fulfilled(v) => Settlement::Fulfilled(v.clone()),
                PromiseState::Rejected(r) => Settlement::Rejected(r.clone()),
            }
        };
        self.microtasks.push_back(Job {
            reaction,
            settlement,
        });
    }

    pub(crate) fn promise_then(
        &mut self,
        promise: &PromiseRef,
        on_fulfilled: Option<JsValue>,
        on_rejected: Option<JsValue>,
    ) -> PromiseRef {
        let result = self.new_promise();
        self.add_reaction(
            promise,
            Reaction::Then {
                on_fulfilled: on_fulfilled.filter(JsValue::is_callable),
                on_rejected: on_rejected.filter(JsValue::is_callable),
                result: result.clone(),
            },
        );
        result
    }

    pub(crate) fn promise_finally(
        &mut self,
        promise: &PromiseRef,
        on_finally: Option<JsValue>,
    ) -> PromiseRef {
        let result = self.new_promise();
        self.add_reaction(
            promise,
            Reaction::Finally {
                on_finally: on_finally.filter(JsValue::is_callable),
                result: result.clone(),
            },
        );
        result
    }

    /// `Promise.resolve(value)`.
    pub(crate) fn to_promise(&mut self, value: JsValue) -> PromiseRef {
        if let JsValue::Promise(p) = value {
            return p;
        }
        let promise = self.new_promise();
        self.resolve_promise(&promise, value);
        promise
    }

    pub(crate) fn promise_all(&mut self, items: Vec<JsValue>) -> PromiseRef {
        let result = self.new_promise();
        if items.is_empty() {
            self.fulfill_promise(&result, JsValue::array(Vec::new()));
            return result;
        }
        let state = Rc::new(RefCell::new(AllState {
            values: vec![JsValue::Undefined; items.len()],
            remaining: items.len(),
            done: false,
            result: result.clone(),
        }));
        for (index, item) in items.into_iter().enumerate() {
            let promise = self.to_promise(item);
            self.add_reaction(
                &promise,
                Reaction::AllElement {
                    index,
                    state: state.clone(),
                },
            );
        }
        result
    }

    /// Run one queued job. Returns `false` when the queue is empty or the job
    /// budget is spent.
    pub(crate) fn run_next_microtask(&mut self) -> bool {
        if self.jobs_run >= self.max_loop_iterations {
            if !self.microtasks.is_empty() {
                warn!(
                    pending = self.microtasks.len(),
                    "microtask budget exhausted; remaining jobs dropped"
                );
                self.microtasks.clear();
            }
            return false;
        }
        let Some(job) = self.microtasks.pop_front() else {
            return false;
        };
        self.jobs_run += 1;
        self.run_job(job);
        true
    }

    /// Drain the queue. Returns the number of jobs run.
    pub fn run_microtasks(&mut self) -> usize {
        let mut ran = 0;
        while self.run_next_microtask() {
            ran += 1;
        }
        if ran > 0 {
            trace!(jobs = ran, "microtask round");
        }
        ran
    }

    pub fn has_pending_microtasks(&self) -> bool {
        !self.microtasks.is_empty()
    }

    fn run_job(&mut self, job: Job) {
        match job.reaction {
            Reaction::Then {
                on_fulfilled,
                on_rejected,
                result,
            } => {
                let (handler, arg, rejected) = match job.settlement {
                    Settlement::Fulfilled(v) => (on_fulfilled, v, false),
                    Settlement::Rejected(r) => (on_rejected, r, true),
                };
                match handler {
                    Some(f) => match self.call_function(&f, JsValue::Undefined, vec![arg]) {
                        Ok(next) => self.resolve_promise(&result, next),
                        Err(Thrown(e)) => self.reject_promise(&result, e),
                    },
                    None if rejected => self.reject_promise(&result, arg),
                    None => self.fulfill_promise(&result, arg),
                }
            }
            Reaction::ResolveTo { target } => match job.settlement {
                Settlement::Fulfilled(v) => self.resolve_promise(&target, v),
                Settlement::Rejected(r) => self.reject_promise(&target, r),
            },
            Reaction::Finally { on_finally, result } => {
                if let Some(f) = on_finally {
                    if let Err(Thrown(e)) = self.call_function(&f, JsValue::Undefined, Vec::new())
                    {
                        self.reject_promise(&result, e);
                        return;
                    }
                }
                match job.settlement {
                    Settlement::Fulfilled(v) => self.fulfill_promise(&result, v),
                    Settlement::Rejected(r) => self.reject_promise(&result, r),
                }
            }
            Reaction::AllElement { index, state } => {
                let mut all = state.borrow_mut();
                if all.done {
                    return;
                }
                match job.settlement {
                    Settlement::Fulfilled(v) => {
                        all.values[index] = v;
                        all.remaining -= 1;
                        if all.remaining == 0 {
                            all.done = true;
                            let result = all.result.clone();
                            let values = std::mem::take(&mut all.values);
                            drop(all);
                            self.fulfill_promise(&result, JsValue::array(values));
                        }
                    }
                    Settlement::Rejected(r) => {
                        all.done = true;
                        let result = all.result.clone();
                        drop(all);
                        self.reject_promise(&result, r);
                    }
                }
            }
        }
    }

    /// `await value`: drain microtasks until the awaited promise settles.
    ///
    /// When the queue runs dry first, the evaluation is marked as stalled and
    /// the enclosing async function leaves its own promise pending.
    pub(crate) fn await_value(&mut self, value: JsValue) -> JsResult<JsValue> {
        let promise = self.to_promise(value);
        loop {
            let state = promise.borrow().state.clone();
            match state {
                PromiseState::Fulfilled(v) => return Ok(v),
                PromiseState::Rejected(r) => return Err(Thrown(r)),
                PromiseState::Pending => {
                    if !self.run_next_microtask() {
                        self.stalled = true;
                        return Err(Thrown(JsValue::error(
                            "Error",
                            "awaited promise never settles",
                        )));
                    }
                }
            }
        }
    }
}

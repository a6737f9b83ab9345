//! Hooks - Parameter Creation Observers
//!
//! Every `Parameter` constructor notifies the hooks installed on the current
//! thread. Each rank runs on its own thread, so a hook installed while one
//! rank builds its model never sees another rank's parameters.
//!
//! Hooks may mutate the parameter they observe (shard it, move it), but
//! cannot fail its construction; a hook that hits an error records it and
//! reports it when its scope closes.
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

use std::cell::RefCell;
use std::rc::Rc;

use crate::parameter::Parameter;

/// Observer called once for every parameter created in its scope.
pub trait ParameterHook {
    /// Called after the parameter is fully constructed.
    fn on_create(&self, param: &Parameter);
}

thread_local! {
    static HOOKS: RefCell<Vec<Rc<dyn ParameterHook>>> = RefCell::new(Vec::new());
}

/// Pops the hook when the scope ends, including on unwind.
struct HookGuard;

impl Drop for HookGuard {
    fn drop(&mut self) {
        HOOKS.with(|hooks| {
            hooks.borrow_mut().pop();
        });
    }
}

/// Runs `f` with `hook` observing every parameter it creates.
///
/// Scopes nest; inner hooks run after outer ones.
pub fn with_hook<R>(hook: Rc<dyn ParameterHook>, f: impl FnOnce() -> R) -> R {
    HOOKS.with(|hooks| hooks.borrow_mut().push(hook));
    let _guard = HookGuard;
    f()
}

/// Returns the number of hooks active on this thread.
pub fn active_hooks() -> usize {
    HOOKS.with(|hooks| hooks.borrow().len())
}

pub(crate) fn dispatch(param: &Parameter) {
    // Snapshot so a hook may create parameters of its own.
    let active: Vec<Rc<dyn ParameterHook>> = HOOKS.with(|hooks| hooks.borrow().clone());
    for hook in active {
        hook.on_create(param);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use zeroshard_tensor::Tensor;

    struct Counter(Cell<usize>);

    impl ParameterHook for Counter {
        fn on_create(&self, param: &Parameter) {
            self.0.set(self.0.get() + param.numel());
        }
    }

    #[test]
    fn test_hook_sees_parameters_in_scope() {
        let counter = Rc::new(Counter(Cell::new(0)));
        with_hook(counter.clone(), || {
            Parameter::new(Tensor::zeros(&[3]), true);
            Parameter::new(Tensor::zeros(&[2, 2]), true);
        });
        Parameter::new(Tensor::zeros(&[10]), true);
        assert_eq!(counter.0.get(), 7);
        assert_eq!(active_hooks(), 0);
    }

    #[test]
    fn test_nested_scopes() {
        let outer = Rc::new(Counter(Cell::new(0)));
        let inner = Rc::new(Counter(Cell::new(0)));
        with_hook(outer.clone(), || {
            with_hook(inner.clone(), || {
                assert_eq!(active_hooks(), 2);
                Parameter::new(Tensor::zeros(&[1]), true);
            });
            Parameter::new(Tensor::zeros(&[1]), true);
        });
        assert_eq!(outer.0.get(), 2);
        assert_eq!(inner.0.get(), 1);
    }

    #[test]
    fn test_hook_removed_on_panic() {
        let counter = Rc::new(Counter(Cell::new(0)));
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            with_hook(counter.clone(), || panic!("boom"));
        }));
        assert!(result.is_err());
        assert_eq!(active_hooks(), 0);
    }
}

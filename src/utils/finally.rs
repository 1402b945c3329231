/// Runs `func` with `arg` when the returned guard goes out of scope, no matter the
/// guarded block returns early, propagates an error or unwinds.
pub fn finally<A, F>(arg: A, func: F) -> FinallyGuard<A, F>
where
    F: FnMut(&mut A),
{
    FinallyGuard {
        arg: Some(arg),
        func,
    }
}

pub struct FinallyGuard<A, F>
where
    F: FnMut(&mut A),
{
    arg: Option<A>,
    func: F,
}

impl<A, F> FinallyGuard<A, F>
where
    F: FnMut(&mut A),
{
    /// Disarms the guard and hands the argument back.
    pub fn dismiss(mut self) -> A {
        let arg = self.arg.take();
        ::std::mem::forget(self);
        match arg {
            Some(arg) => arg,
            None => unreachable!(),
        }
    }
}

impl<A, F> ::std::ops::Deref for FinallyGuard<A, F>
where
    F: FnMut(&mut A),
{
    type Target = A;

    fn deref(&self) -> &A {
        match self.arg {
            Some(ref arg) => arg,
            None => unreachable!(),
        }
    }
}

impl<A, F> Drop for FinallyGuard<A, F>
where
    F: FnMut(&mut A),
{
    fn drop(&mut self) {
        if let Some(ref mut arg) = self.arg {
            (self.func)(arg)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn run_on_drop() {
        let counter = Cell::new(0);

        {
            let _guard = finally(&counter, |v| v.set(v.get() + 1));
            assert_eq!(counter.get(), 0);
        }

        assert_eq!(counter.get(), 1);
    }

    #[test]
    fn dismiss() {
        let counter = Cell::new(0);
        let guard = finally(&counter, |v| v.set(v.get() + 1));
        let v = guard.dismiss();
        assert_eq!(v.get(), 0);
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn run_on_unwind() {
        let counter = Cell::new(0);
        let rsp = ::std::panic::catch_unwind(::std::panic::AssertUnwindSafe(|| {
            let _guard = finally(&counter, |v| v.set(v.get() + 1));
            panic!("unwind");
        }));

        assert!(rsp.is_err());
        assert_eq!(counter.get(), 1);
    }
}

use bumpalo::Bump as Arena;
use rustc_hash::FxHashSet;
use std::cell::RefCell;

/// Interns path-component strings into `'static` slices backed by a thread-local arena.
///
/// This is process-wide (unlike the per-call interner used by the three-way text merge
/// in [`crate::merge3`]): path components are drawn from a small, long-lived vocabulary
/// that is reused across every roster a process touches, so arena growth is bounded in
/// practice. The text-merge interner's keys are arbitrary line content with no such reuse,
/// which is why that one is scoped to a single merge call instead.
#[derive(Default)]
struct Interner {
    arena: Arena,
    set: FxHashSet<&'static str>,
}

impl Interner {
    fn intern(&mut self, s: &str) -> &'static str {
        if let Some(&existing) = self.set.get(s) {
            return existing;
        }
        let ptr: &str =
            unsafe { std::str::from_utf8_unchecked(self.arena.alloc_slice_copy(s.as_bytes())) };
        let static_str = unsafe { &*(ptr as *const str) };
        self.set.insert(static_str);
        static_str
    }
}

thread_local! {
    static INTERNER: RefCell<Interner> = RefCell::new(Interner::default());
}

pub(crate) fn intern_str(s: &str) -> &'static str {
    INTERNER.with(|interner| interner.borrow_mut().intern(s))
}

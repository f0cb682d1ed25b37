//! Change detection for values that are only published or persisted when they differ.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Changed {
    Yes,
    No,
}

impl Changed {
    /// Runs `f` only if the value changed, typically to write it back to storage.
    pub(crate) fn then(self, f: impl FnOnce()) {
        if self == Self::Yes {
            f();
        }
    }
}

#[must_use = "checked_set is useless if the result of the check is not required"]
pub(crate) fn checked_set<T: PartialEq>(value: &mut T, new: T) -> Changed {
    if *value == new {
        Changed::No
    } else {
        *value = new;
        Changed::Yes
    }
}

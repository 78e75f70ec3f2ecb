use crate::engine::Limits;
use crate::leak::LeakCheck;

/// Settings applied when a [`Handle`](crate::Handle) is opened.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Options {
    pub leak_check: LeakCheck,
    /// Limits applied right after open, before the handle is returned.
    pub limits: Option<Limits>,
}

impl Default for Options {
    /// Leak check from the environment, no limits.
    fn default() -> Self {
        Self {
            leak_check: LeakCheck::from_env(),
            limits: None,
        }
    }
}

impl Options {
    pub fn leak_check(mut self, leak_check: LeakCheck) -> Self {
        self.leak_check = leak_check;
        self
    }

    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = Some(limits);
        self
    }
}

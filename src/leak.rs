//! Opt-in leak reporting for references dropped without an explicit put.
//!
//! A reference that goes out of scope without [`RcHandle::put`] is still
//! returned to its counter, so the value is released either way. The check
//! only decides how loudly the missed put is reported.
//!
//! [`RcHandle::put`]: crate::RcHandle::put

use std::env;
use std::str::FromStr;

/// Environment variable read by [`LeakCheck::from_env`].
pub const LEAK_CHECK_ENV: &str = "RC_GUARD_LEAK_CHECK";

/// What to do when a reference is dropped without being put.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum LeakCheck {
    /// Say nothing.
    #[default]
    Off,
    /// Report through `log::error!`.
    Log,
    /// Panic, unless the thread is already unwinding, in which case log.
    Panic,
}

/// Unrecognized leak check setting.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
#[error("unknown leak check {0:?}, expected one of off, log, panic")]
pub struct ParseLeakCheckError(String);

impl FromStr for LeakCheck {
    type Err = ParseLeakCheckError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "off" | "0" => Ok(LeakCheck::Off),
            "log" => Ok(LeakCheck::Log),
            "panic" | "1" => Ok(LeakCheck::Panic),
            _ => Err(ParseLeakCheckError(s.to_owned())),
        }
    }
}

impl LeakCheck {
    /// Read [`LEAK_CHECK_ENV`]. Unset means `Off`; an unparseable value is
    /// logged and treated as `Log`.
    pub fn from_env() -> Self {
        match env::var(LEAK_CHECK_ENV) {
            Ok(value) => value.parse().unwrap_or_else(|err| {
                log::warn!("{err}; falling back to log");
                LeakCheck::Log
            }),
            Err(_) => LeakCheck::Off,
        }
    }

    pub(crate) fn report(self, what: &str) {
        match self {
            LeakCheck::Off => {}
            LeakCheck::Log => log::error!("{what} dropped without put"),
            LeakCheck::Panic if std::thread::panicking() => {
                log::error!("{what} dropped without put while unwinding")
            }
            LeakCheck::Panic => panic!("{what} dropped without put"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::LeakCheck;

    #[test]
    fn parses_settings() {
        assert_eq!("off".parse::<LeakCheck>(), Ok(LeakCheck::Off));
        assert_eq!(" Log ".parse::<LeakCheck>(), Ok(LeakCheck::Log));
        assert_eq!("PANIC".parse::<LeakCheck>(), Ok(LeakCheck::Panic));
        assert!("loud".parse::<LeakCheck>().is_err());
    }

    #[test]
    fn off_and_log_do_not_panic() {
        LeakCheck::Off.report("test ref");
        LeakCheck::Log.report("test ref");
    }

    #[test]
    #[should_panic(expected = "dropped without put")]
    fn panic_policy_panics() {
        LeakCheck::Panic.report("test ref");
    }
}

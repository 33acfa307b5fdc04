#![allow(dead_code)]
#![allow(unused_imports)]

pub use punchclock_test_utils::builders;
pub use punchclock_test_utils::fakes;
pub use punchclock_test_utils::harness;
pub use punchclock_test_utils::{at, day, init_tracing, with_timeout};

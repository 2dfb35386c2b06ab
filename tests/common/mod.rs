#![allow(dead_code, unused_imports)]

pub use seqdag_test_utils::builders;
pub use seqdag_test_utils::fake_tasks;
pub use seqdag_test_utils::fixtures;
pub use seqdag_test_utils::{init_tracing, with_timeout};

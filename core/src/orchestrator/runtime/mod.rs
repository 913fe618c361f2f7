mod handle;
mod timer;
pub(crate) mod util;

pub use handle::ActiveCall;
pub use timer::DurationTimer;

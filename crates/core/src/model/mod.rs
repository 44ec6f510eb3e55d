mod category;
mod ids;
mod problem;
mod progress;
mod session;

pub use ids::{CategoryId, ParseIdError, ProblemId, UserId};

pub use category::{Category, Progress};
pub use problem::{Difficulty, ParseEnumError, Platform, Problem};
pub use progress::ProgressOverlay;
pub use session::{Role, Session};

//! CLI command handlers, one file per command.

mod add;
mod cancel;
mod limit;
mod pause;
mod playlist;
mod remove;
mod resume;
mod run;
mod schedule_all;
mod status;

pub use add::{run_add, AddOptions};
pub use cancel::run_cancel;
pub use limit::run_limit;
pub use pause::run_pause;
pub use playlist::{run_playlist, PlaylistOptions};
pub use remove::run_remove;
pub use resume::run_resume;
pub use run::run_scheduler;
pub use schedule_all::run_schedule_all;
pub use status::run_status;

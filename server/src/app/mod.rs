mod startup;
mod state;

pub(crate) use startup::start;
pub use state::AppState;

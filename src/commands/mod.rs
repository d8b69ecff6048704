pub mod replay;
pub mod run;

pub use replay::handle_replay;
pub use run::handle_run;

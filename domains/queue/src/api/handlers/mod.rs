pub mod queue;
pub mod runs;
pub mod sweeper;
pub mod worker;

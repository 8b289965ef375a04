pub mod sweeper;

pub use sweeper::MissedSweeper;

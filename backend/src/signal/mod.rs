pub mod aggregator;
pub mod board;

pub use aggregator::SignalAggregator;
pub use board::SignalBoard;

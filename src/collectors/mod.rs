/// Subprocess-backed collector for host event log records
pub mod event_collector;

pub use event_collector::EventCollector;

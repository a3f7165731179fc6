/// Notification throttling and dispatch
pub mod dispatcher;
pub mod ledger;

pub use dispatcher::NotificationDispatcher;
pub use ledger::{Admission, RejectReason, ThrottleLedger, ThrottlePolicy, ThrottleRecord};

/// Threshold evaluation, cooldown and alert delivery
pub mod cooldown;
pub mod dispatcher;
pub mod evaluator;
pub mod notifier;

pub use cooldown::{CooldownGate, DEFAULT_COOLDOWN_SECONDS};
pub use dispatcher::{AlertDispatcher, AlertMessage, AlertSender, DEFAULT_RETRY_QUEUE_SIZE};
pub use evaluator::AlertEvaluator;
#[cfg(test)]
pub use notifier::MockNotifier;
pub use notifier::{CommandNotifier, LogNotifier, Notifier};

pub mod consumer;
pub mod dead_letter;

pub use consumer::{MessageMeta, MessageProcessor, OrderConsumer};
pub use dead_letter::{DeadLetter, DeadLetterReason, DeadLetterSink, KafkaDeadLetterSink};

pub mod archive;
pub mod destination;
pub mod logs;
pub mod notifier;
pub mod source;

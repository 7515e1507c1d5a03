//! Notifier
//!
//! Best-effort fan-out of escalation messages to operator channels, with a
//! PANIC log on local disk when nothing gets through.

pub mod channels;
pub mod dispatcher;
pub mod fallback;

pub use channels::{ChannelError, EmailChannel, NotificationChannel, SlackChannel, TelegramChannel};
pub use dispatcher::{ChannelHealth, DeliveryStatus, DispatchReport, Notifier};
pub use fallback::PanicLog;

/// HTTP client shared by the built-in channels.
pub use reqwest::Client as HttpClient;

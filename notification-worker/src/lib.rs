//! Fixme notification worker.
//!
//! Consumes authentication and order email requests from RabbitMQ and sends
//! the matching templated emails. Two binaries share this library:
//! - `notification-worker`: the consumer plus its health endpoint
//! - `notification-publish`: pushes a request onto a queue by hand
//!
//! ## Architecture
//!
//! ```text
//! auth-email-queue  ─┐                              ┌→ ack / requeue
//!                    ├→ decode → dispatch (SMTP) → ─┤
//! order-email-queue ─┘                              └→ <queue>.dead-letter
//! ```

pub mod ack;
pub mod config;
pub mod consumer;
pub mod dispatch;
pub mod error;
pub mod mail;
pub mod process;
pub mod queue;
pub mod web;
pub mod worker;

// Re-export commonly used types
pub use ack::{AckController, AckPolicy, Decision, MessageAcker, MessageState};
pub use config::Config;
pub use consumer::MessageHandler;
pub use dispatch::Dispatcher;
pub use mail::{EmailContext, MailSender, SmtpMailer};
pub use process::{decode, AppLocals, DeliveryRequest};
pub use queue::{BrokerConnection, BrokerStatus, MessageClass, Publisher, RawMessage};
pub use web::AppState;

use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub mod business;
pub mod connections;
pub mod mailer;
pub mod messages;
pub mod notifications;
pub mod realtime;
pub mod rooms;

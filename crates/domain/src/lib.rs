pub mod business;
pub mod connections;
pub mod error;
pub mod identity;
pub mod messages;
pub mod notifications;
pub mod ports;
pub mod rooms;
pub mod util;

pub type DomainResult<T> = Result<T, error::DomainError>;

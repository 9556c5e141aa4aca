pub mod config;
pub mod logging;
pub mod mailer;
pub mod realtime;
pub mod repositories;
pub mod state;

#[cfg(test)]
mod tests;

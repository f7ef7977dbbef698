//! Session lifecycle for independent tabs that share one cookie.
//!
//! Each tab runs a [`session::SessionStore`] on its own [`event_loop::EventLoop`].
//! Tabs never talk to each other; they only read and write the session
//! cookie through a [`cookie::CookieJar`], coordinating writes with an
//! advisory lock stored in the cookie itself.

pub mod clock;
pub mod config;
pub mod cookie;
pub mod error;
pub mod event_loop;
pub mod monitoring;
pub mod observable;
pub mod paths;
pub mod session;
pub mod structured_logger;
pub mod throttle;

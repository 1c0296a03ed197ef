pub mod auth;
pub mod chat;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod sessions;
pub mod state;

#[cfg(test)]
mod test_support;

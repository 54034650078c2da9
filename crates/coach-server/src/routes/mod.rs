pub mod health;
pub mod inbound;
pub mod messages;
pub mod participants;
pub mod statistics;

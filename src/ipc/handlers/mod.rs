pub mod analytics;
pub mod auth;
pub mod core;
pub mod dashboard;
pub mod export;
pub mod leaderboard;
pub mod records;

pub mod collections;
pub mod health;
pub mod history;
pub mod logs;
pub mod runs;

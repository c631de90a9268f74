pub mod checker;
pub mod health;
pub mod scrape;

pub mod extraction_formatter;
pub mod threads;
pub mod token_estimator;

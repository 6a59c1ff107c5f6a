pub mod returns;
pub mod risk;

pub use returns::{expected_returns, periodic_returns, ReturnsStrategy};
pub use risk::{expected_volatility, risk_model};

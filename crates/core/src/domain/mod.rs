pub mod quotes;
pub mod recommendation;
pub mod series;

pub mod slug;
pub mod validation;

pub use validation::ValidatedJson;

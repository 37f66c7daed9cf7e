pub mod ethernet;
pub mod homeplug;
pub mod messages;

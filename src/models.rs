pub mod rewards;
pub mod users;

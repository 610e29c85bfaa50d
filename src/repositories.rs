pub mod storage;
pub mod users;

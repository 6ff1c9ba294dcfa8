pub mod login;
pub mod realm;
pub mod world;

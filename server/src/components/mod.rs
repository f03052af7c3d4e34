pub mod layout;
pub mod profile;

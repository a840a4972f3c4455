pub mod emv3ds;
pub mod merchant;
pub mod ports;
pub mod response;
pub mod signature;

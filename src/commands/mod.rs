pub mod kill;
pub mod login;
pub mod run;
pub mod session;

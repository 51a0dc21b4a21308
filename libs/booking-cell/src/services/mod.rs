pub mod payment;
pub mod validator;
pub mod wizard;

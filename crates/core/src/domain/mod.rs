pub mod approval;
pub mod change_request;
pub mod comment;
pub mod impact;
pub mod principal;
